//! Terminal console for the monitor.
//!
//! One screen carries both user surfaces: the command input (the connection
//! surface) and the live value panels (the results surface). Type
//! `host:port` to start watching a plant.
//!
//! Launch with `plantlink-monitor` on a TTY; `--headless` skips it.

use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use indexmap::IndexMap;
use parking_lot::Mutex;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
    Frame, Terminal,
};

use plantlink_bidding::SessionState;

use crate::display::DisplaySink;
use crate::supervisor::{MonitorSupervisor, SessionInfo};

const MAX_MESSAGES: usize = 500;

#[derive(Debug, Clone, Default)]
struct ChannelView {
    display_id: String,
    values: IndexMap<String, String>,
}

#[derive(Default)]
struct ConsoleModel {
    channels: IndexMap<String, ChannelView>,
    messages: Vec<(DateTime<Utc>, String, Color)>,
    results_visible: bool,
}

impl ConsoleModel {
    fn push_message(&mut self, text: impl Into<String>, color: Color) {
        self.messages.push((Utc::now(), text.into(), color));
        if self.messages.len() > MAX_MESSAGES {
            self.messages.remove(0);
        }
    }
}

/// [`DisplaySink`] backing the terminal console. Coordinators write into it
/// from their tasks; the render loop reads it every tick.
#[derive(Clone, Default)]
pub struct ConsoleSink {
    model: Arc<Mutex<ConsoleModel>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn message(&self, text: impl Into<String>, color: Color) {
        self.model.lock().push_message(text, color);
    }

    fn hide_results(&self) {
        let mut model = self.model.lock();
        model.results_visible = false;
        model.channels.clear();
    }

    /// Current value of `variable` in a session's panel.
    pub fn value(&self, session_id: &str, variable: &str) -> Option<String> {
        self.model
            .lock()
            .channels
            .get(session_id)
            .and_then(|channel| channel.values.get(variable).cloned())
    }

    pub fn channel_count(&self) -> usize {
        self.model.lock().channels.len()
    }

    pub fn results_visible(&self) -> bool {
        self.model.lock().results_visible
    }
}

impl DisplaySink for ConsoleSink {
    fn create_channel(&self, session_id: &str, display_id: &str, variables: &[String]) {
        let mut model = self.model.lock();
        model.channels.insert(
            session_id.to_string(),
            ChannelView {
                display_id: display_id.to_string(),
                values: variables
                    .iter()
                    .map(|name| (name.clone(), String::from("-")))
                    .collect(),
            },
        );
        model.push_message(format!("Receiving {display_id}"), Color::Green);
    }

    fn update_value(&self, session_id: &str, variable: &str, value: &str) {
        if let Some(channel) = self.model.lock().channels.get_mut(session_id) {
            if let Some(slot) = channel.values.get_mut(variable) {
                *slot = value.to_string();
            }
        }
    }

    fn remove_channel(&self, session_id: &str) {
        self.model.lock().channels.shift_remove(session_id);
    }

    fn show_info(&self, text: &str) {
        self.message(text, Color::Yellow);
    }

    fn show_disconnect(&self, session_id: &str) {
        self.message(format!("Connection lost: {session_id}"), Color::Red);
    }

    fn show_results(&self) {
        self.model.lock().results_visible = true;
    }
}

/// Everything the render pass needs, copied out of the shared state.
struct ConsoleSnapshot {
    monitor_id: String,
    sessions: Vec<SessionInfo>,
    channels: Vec<ChannelView>,
    messages: Vec<(DateTime<Utc>, String, Color)>,
    results_visible: bool,
    accepting: bool,
}

struct MonitorConsole {
    supervisor: MonitorSupervisor,
    sink: ConsoleSink,
    input: String,
    cursor_pos: usize,
    history: Vec<String>,
    history_pos: Option<usize>,
}

impl MonitorConsole {
    fn new(supervisor: MonitorSupervisor, sink: ConsoleSink) -> Self {
        sink.message(
            "plantlink monitor ready. Type host:port and press Enter to watch a plant.",
            Color::Cyan,
        );
        sink.message(
            "Commands: /help, /sessions, /stop, /hide, /detach, /quit",
            Color::DarkGray,
        );
        Self {
            supervisor,
            sink,
            input: String::new(),
            cursor_pos: 0,
            history: Vec::new(),
            history_pos: None,
        }
    }

    fn snapshot(&self) -> ConsoleSnapshot {
        let model = self.sink.model.lock();
        ConsoleSnapshot {
            monitor_id: self.supervisor.monitor_id().to_string(),
            sessions: self.supervisor.sessions(),
            channels: model.channels.values().cloned().collect(),
            messages: model.messages.clone(),
            results_visible: model.results_visible,
            accepting: self.supervisor.is_connection_surface_open(),
        }
    }

    /// Handle the submitted line. Returns `true` if the console should exit.
    fn process_input(&mut self) -> bool {
        let input = self.input.trim().to_string();
        self.input.clear();
        self.cursor_pos = 0;
        if input.is_empty() {
            return false;
        }

        self.history.push(input.clone());
        self.history_pos = None;

        if input.starts_with('/') {
            self.process_command(&input)
        } else {
            self.watch(&input);
            false
        }
    }

    fn process_command(&mut self, cmd: &str) -> bool {
        let (command, args) = match cmd.split_once(' ') {
            Some((command, args)) => (command, args.trim()),
            None => (cmd, ""),
        };

        match command {
            "/help" => {
                self.sink.message("Available commands:", Color::Cyan);
                for line in [
                    "  host:port        - Start watching a plant",
                    "  /watch host:port - Same as above",
                    "  /sessions        - List sessions and their state",
                    "  /stop <id|addr>  - Stop one session",
                    "  /hide            - Close the results view (stops every session)",
                    "  /detach          - Close the connection input",
                    "  /quit            - Close both and exit once sessions finish",
                ] {
                    self.sink.message(line, Color::White);
                }
            }
            "/watch" => self.watch(args),
            "/sessions" => {
                let sessions = self.supervisor.sessions();
                if sessions.is_empty() {
                    self.sink.message("No sessions.", Color::DarkGray);
                }
                for session in sessions {
                    let owner = session
                        .owner
                        .as_ref()
                        .map(|o| o.to_string())
                        .unwrap_or_else(|| "-".into());
                    self.sink.message(
                        format!("  {}  {}  owner={}", session.id, session.state, owner),
                        state_color(session.state),
                    );
                }
            }
            "/stop" => self.stop(args),
            "/hide" => {
                self.sink.hide_results();
                self.supervisor.on_results_surface_closed();
                self.sink.message("Results view closed.", Color::DarkGray);
            }
            "/detach" => {
                if self.supervisor.is_connection_surface_open() {
                    self.supervisor.on_connection_surface_closed();
                }
            }
            "/quit" | "/exit" | "/q" => return true,
            _ => {
                self.sink.message(
                    format!("Unknown command: {command}. Type /help for available commands."),
                    Color::Red,
                );
            }
        }
        false
    }

    fn watch(&mut self, address: &str) {
        if address.is_empty() {
            self.sink.message("Usage: /watch host:port", Color::Red);
            return;
        }
        match self.supervisor.start_monitoring_str(address) {
            Ok(session_id) => {
                self.sink
                    .message(format!("Session {session_id} started"), Color::Green);
            }
            Err(crate::MonitorError::SupervisorClosed) => {
                self.sink.message(
                    "Connection input is closed, no new sessions can start.",
                    Color::Red,
                );
            }
            // Invalid input and duplicates were already shown by the supervisor.
            Err(e) => tracing::debug!(error = %e, "Watch command rejected"),
        }
    }

    fn stop(&mut self, target: &str) {
        let session = self
            .supervisor
            .sessions()
            .into_iter()
            .find(|s| s.id == target || s.address.to_string() == target);
        match session {
            Some(session) => {
                if self.supervisor.stop_monitoring(&session.id).is_ok() {
                    self.sink
                        .message(format!("Stopping {}", session.id), Color::Yellow);
                }
            }
            None => self
                .sink
                .message(format!("No session matches '{target}'"), Color::Red),
        }
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    fn render(&self, frame: &mut Frame, snapshot: &ConsoleSnapshot) {
        let outer = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Status bar
                Constraint::Min(8),    // Results + sessions + log
                Constraint::Length(5), // Input
            ])
            .split(frame.area());

        self.render_status_bar(frame, outer[0], snapshot);
        self.render_main_area(frame, outer[1], snapshot);
        self.render_input(frame, outer[2], snapshot);
    }

    fn render_status_bar(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let block = Block::default()
            .title(" plantlink monitor ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan));

        let running = snap
            .sessions
            .iter()
            .filter(|s| s.state == SessionState::Running)
            .count();
        let (input_text, input_color) = if snap.accepting {
            ("open", Color::Green)
        } else {
            ("closed", Color::DarkGray)
        };

        let status_line = Line::from(vec![
            Span::styled("  Monitor: ", Style::default().fg(Color::Gray)),
            Span::styled(&snap.monitor_id, Style::default().fg(Color::White)),
            Span::styled("  |  Sessions: ", Style::default().fg(Color::Gray)),
            Span::styled(
                snap.sessions.len().to_string(),
                Style::default().fg(Color::Magenta),
            ),
            Span::styled("  |  Streaming: ", Style::default().fg(Color::Gray)),
            Span::styled(running.to_string(), Style::default().fg(Color::Green)),
            Span::styled("  |  Input: ", Style::default().fg(Color::Gray)),
            Span::styled(input_text, Style::default().fg(input_color)),
        ]);

        frame.render_widget(Paragraph::new(status_line).block(block), area);
    }

    fn render_main_area(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
            .split(area);

        self.render_results(frame, columns[0], snap);

        let right_column = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(8), Constraint::Min(4)])
            .split(columns[1]);

        self.render_sessions(frame, right_column[0], snap);
        self.render_console_output(frame, right_column[1], snap);
    }

    fn render_results(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let block = Block::default()
            .title(format!(" Plants ({}) ", snap.channels.len()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White));

        if !snap.results_visible || snap.channels.is_empty() {
            let hint = if snap.results_visible {
                "  Waiting for the first plant..."
            } else {
                "  Results appear here once a plant is streaming."
            };
            let text = Paragraph::new(Line::from(Span::styled(
                hint,
                Style::default().fg(Color::DarkGray),
            )))
            .block(block);
            frame.render_widget(text, area);
            return;
        }

        let mut lines = Vec::new();
        for channel in &snap.channels {
            lines.push(Line::from(Span::styled(
                format!("  {}", channel.display_id),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            )));
            for (name, value) in &channel.values {
                lines.push(Line::from(vec![
                    Span::styled(format!("    {name:<20}"), Style::default().fg(Color::Gray)),
                    Span::styled(value.as_str(), Style::default().fg(Color::White)),
                ]));
            }
            lines.push(Line::from(""));
        }

        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn render_sessions(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let block = Block::default()
            .title(format!(" Sessions ({}) ", snap.sessions.len()))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White));

        if snap.sessions.is_empty() {
            let text = Paragraph::new(Line::from(Span::styled(
                "  No sessions. Type host:port below to start one.",
                Style::default().fg(Color::DarkGray),
            )))
            .block(block);
            frame.render_widget(text, area);
            return;
        }

        let rows: Vec<Row> = snap
            .sessions
            .iter()
            .map(|session| {
                let owner = session
                    .owner
                    .as_ref()
                    .map(|o| o.to_string())
                    .unwrap_or_else(|| "-".into());
                Row::new(vec![
                    Cell::from(Span::styled(
                        format!("  {}", session.address),
                        Style::default().fg(Color::White),
                    )),
                    Cell::from(Span::styled(
                        session.state.to_string(),
                        Style::default().fg(state_color(session.state)),
                    )),
                    Cell::from(Span::styled(owner, Style::default().fg(Color::Gray))),
                ])
            })
            .collect();

        let table = Table::new(
            rows,
            [
                Constraint::Percentage(40),
                Constraint::Percentage(30),
                Constraint::Percentage(30),
            ],
        )
        .block(block)
        .header(
            Row::new(vec!["  Plant", "State", "Connector"])
                .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD)),
        );

        frame.render_widget(table, area);
    }

    fn render_console_output(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let block = Block::default()
            .title(" Messages ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White));

        let inner_height = area.height.saturating_sub(2) as usize;
        let start = snap.messages.len().saturating_sub(inner_height);

        let lines: Vec<Line> = snap.messages[start..]
            .iter()
            .map(|(ts, msg, color)| {
                Line::from(vec![
                    Span::styled(
                        format!("  [{}] ", ts.format("%H:%M:%S")),
                        Style::default().fg(Color::DarkGray),
                    ),
                    Span::styled(msg.as_str(), Style::default().fg(*color)),
                ])
            })
            .collect();

        frame.render_widget(Paragraph::new(lines).block(block), area);
    }

    fn render_input(&self, frame: &mut Frame, area: Rect, snap: &ConsoleSnapshot) {
        let block = Block::default()
            .title(" Watch (Enter = start host:port, /help = commands, /quit = exit) ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(if snap.accepting {
                Color::Green
            } else {
                Color::DarkGray
            }));

        let input_display = if self.input.is_empty() {
            Line::from(vec![
                Span::styled("  > ", Style::default().fg(Color::Green)),
                Span::styled(
                    "Type host:port or /command...",
                    Style::default().fg(Color::DarkGray),
                ),
            ])
        } else {
            Line::from(vec![
                Span::styled("  > ", Style::default().fg(Color::Green)),
                Span::styled(&self.input, Style::default().fg(Color::White)),
            ])
        };

        let hint_line = Line::from(Span::styled(
            "  Ctrl+C or /quit to exit  |  Up/Down for history  |  Enter to submit",
            Style::default().fg(Color::DarkGray),
        ));

        let paragraph =
            Paragraph::new(vec![Line::from(""), input_display, hint_line]).block(block);
        frame.render_widget(paragraph, area);

        let column = self.input[..self.cursor_pos].chars().count();
        let cursor_x = area.x + 4 + column as u16;
        frame.set_cursor_position((cursor_x, area.y + 2));
    }

    // -----------------------------------------------------------------------
    // Keys
    // -----------------------------------------------------------------------

    /// Byte offset of the char before the cursor. `cursor_pos` is always a
    /// char boundary of `input`.
    fn prev_boundary(&self) -> Option<usize> {
        self.input[..self.cursor_pos]
            .char_indices()
            .next_back()
            .map(|(i, _)| i)
    }

    /// Returns `true` if the console should exit.
    fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) -> bool {
        match (code, modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => return true,
            (KeyCode::Char(c), _) => {
                self.input.insert(self.cursor_pos, c);
                self.cursor_pos += c.len_utf8();
            }
            (KeyCode::Backspace, _) => {
                if let Some(prev) = self.prev_boundary() {
                    self.input.remove(prev);
                    self.cursor_pos = prev;
                }
            }
            (KeyCode::Delete, _) => {
                if self.cursor_pos < self.input.len() {
                    self.input.remove(self.cursor_pos);
                }
            }
            (KeyCode::Left, _) => {
                if let Some(prev) = self.prev_boundary() {
                    self.cursor_pos = prev;
                }
            }
            (KeyCode::Right, _) => {
                if let Some(c) = self.input[self.cursor_pos..].chars().next() {
                    self.cursor_pos += c.len_utf8();
                }
            }
            (KeyCode::Home, _) => self.cursor_pos = 0,
            (KeyCode::End, _) => self.cursor_pos = self.input.len(),
            (KeyCode::Up, _) => {
                if !self.history.is_empty() {
                    let pos = match self.history_pos {
                        Some(p) if p > 0 => p - 1,
                        Some(p) => p,
                        None => self.history.len() - 1,
                    };
                    self.history_pos = Some(pos);
                    self.input = self.history[pos].clone();
                    self.cursor_pos = self.input.len();
                }
            }
            (KeyCode::Down, _) => {
                if let Some(pos) = self.history_pos {
                    if pos + 1 < self.history.len() {
                        self.history_pos = Some(pos + 1);
                        self.input = self.history[pos + 1].clone();
                        self.cursor_pos = self.input.len();
                    } else {
                        self.history_pos = None;
                        self.input.clear();
                        self.cursor_pos = 0;
                    }
                }
            }
            _ => {}
        }
        false
    }
}

fn state_color(state: SessionState) -> Color {
    match state {
        SessionState::Discovering | SessionState::RepeatDiscovering => Color::Yellow,
        SessionState::Negotiating | SessionState::AwaitingAccept => Color::Magenta,
        SessionState::Subscribing => Color::Blue,
        SessionState::Running => Color::Green,
        SessionState::Closing | SessionState::Terminated => Color::Red,
    }
}

fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    Terminal::new(CrosstermBackend::new(stdout))
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// Run the console until the user quits or the supervisor has nothing left
/// to do. Quitting closes both surfaces; the caller should then wait for
/// [`MonitorSupervisor::finished`].
pub async fn run_console(supervisor: MonitorSupervisor, sink: ConsoleSink) -> anyhow::Result<()> {
    use std::io::IsTerminal;
    if !io::stdin().is_terminal() || !io::stdout().is_terminal() {
        return Err(anyhow::anyhow!(
            "Monitor console requires a terminal (TTY). Use --headless instead."
        ));
    }

    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic_info);
    }));

    let mut terminal = setup_terminal()?;
    let mut console = MonitorConsole::new(supervisor.clone(), sink.clone());
    let tick_rate = Duration::from_millis(100);

    loop {
        let snapshot = console.snapshot();
        terminal.draw(|frame| console.render(frame, &snapshot))?;

        if supervisor.is_finished() {
            break;
        }

        if event::poll(tick_rate)? {
            if let Event::Key(key_event) = event::read()? {
                if key_event.kind == KeyEventKind::Press {
                    let quit = if key_event.code == KeyCode::Enter {
                        console.process_input()
                    } else {
                        console.handle_key(key_event.code, key_event.modifiers)
                    };
                    if quit {
                        break;
                    }
                }
            }
        }
        tokio::task::yield_now().await;
    }

    restore_terminal(&mut terminal)?;

    if supervisor.is_connection_surface_open() {
        supervisor.on_connection_surface_closed();
    }
    sink.hide_results();
    supervisor.on_results_surface_closed();
    Ok(())
}
