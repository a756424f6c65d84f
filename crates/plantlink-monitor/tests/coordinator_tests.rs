use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

use plantlink_bidding::SessionState;
use plantlink_connector::{spawn_local_connector, ConnectionAgent, ConnectorConfig, ConnectorTiming};
use plantlink_monitor::*;
use plantlink_network::*;
use plantlink_protocol::*;

/// Connector double answering from a fixed script.
struct ScriptedConnector {
    id: AgentId,
    /// `None` refuses.
    offer: Option<Offer>,
    /// `None` never answers a call for proposals.
    bid_delay: Option<Duration>,
    accept_ok: bool,
    seen: Mutex<Vec<Performative>>,
    subscribers: Mutex<Vec<ReplySender>>,
    held: Mutex<Vec<ReplySender>>,
}

impl ScriptedConnector {
    fn new(id: &str, offer: Option<Offer>) -> Self {
        Self {
            id: AgentId::from(id),
            offer,
            bid_delay: Some(Duration::ZERO),
            accept_ok: true,
            seen: Mutex::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
        }
    }

    fn silent(id: &str) -> Self {
        Self {
            bid_delay: None,
            ..Self::new(id, Some(Offer::Ready))
        }
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.bid_delay = Some(delay);
        self
    }

    fn failing_accept(mut self) -> Self {
        self.accept_ok = false;
        self
    }

    fn seen(&self, performative: Performative) -> usize {
        self.seen.lock().iter().filter(|p| **p == performative).count()
    }

    fn push_update(&self, content: &str) {
        for tx in self.subscribers.lock().iter() {
            let update = PlantMessage::new(Performative::Inform, self.id.clone(), "update", content);
            let _ = tx.send(update);
        }
    }

    fn fail_subscribers(&self, reason: FailureReason) {
        for tx in self.subscribers.lock().drain(..) {
            let failure = PlantMessage::new(
                Performative::Failure,
                self.id.clone(),
                "update",
                reason.to_content(),
            );
            let _ = tx.send(failure);
        }
    }
}

impl Endpoint for ScriptedConnector {
    fn handle<'a>(&'a self, message: PlantMessage, replies: ReplySender) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            self.seen.lock().push(message.performative);
            match message.performative {
                Performative::CallForProposal => {
                    let Some(delay) = self.bid_delay else {
                        // Keep the conversation open without answering.
                        self.held.lock().push(replies);
                        return;
                    };
                    tokio::time::sleep(delay).await;
                    let reply = match self.offer {
                        Some(offer) => message.propose(&self.id, offer),
                        None => message.refuse(&self.id),
                    };
                    let _ = replies.send(reply);
                }
                Performative::AcceptProposal => {
                    let reply = if self.accept_ok {
                        message.reply(Performative::Inform, &self.id, "Temp;Pressure")
                    } else {
                        message.failure(&self.id, None)
                    };
                    let _ = replies.send(reply);
                }
                Performative::Subscribe => {
                    let initial = message.reply(
                        Performative::Inform,
                        &self.id,
                        "Temp:23.50;Pressure:101.30",
                    );
                    let _ = replies.send(initial);
                    self.subscribers.lock().push(replies);
                }
                Performative::Cancel => {
                    self.subscribers.lock().clear();
                    let _ = replies.send(message.reply(Performative::Inform, &self.id, ""));
                }
                _ => {}
            }
        })
    }
}

struct Harness {
    bus: LocalBus,
    directory: Arc<LocalDirectory>,
    sink: Arc<RecordingSink>,
    supervisor: MonitorSupervisor,
}

fn fast_timing() -> MonitorTiming {
    MonitorTiming {
        discovery_retry_ms: 100,
        cfp_reply_ms: 400,
        accept_reply_ms: 2_000,
        subscribe_reply_ms: 1_000,
        cancel_reply_ms: 500,
        ..Default::default()
    }
}

fn harness(monitor: &str) -> Harness {
    let bus = LocalBus::new();
    let directory = Arc::new(LocalDirectory::new());
    with_shared(monitor, &bus, &directory)
}

fn with_shared(monitor: &str, bus: &LocalBus, directory: &Arc<LocalDirectory>) -> Harness {
    let sink = Arc::new(RecordingSink::new());
    let supervisor = MonitorSupervisor::new(
        AgentId::from(monitor),
        Arc::new(bus.clone()),
        directory.clone(),
        sink.clone(),
        fast_timing(),
    );
    Harness {
        bus: bus.clone(),
        directory: directory.clone(),
        sink,
        supervisor,
    }
}

fn add_scripted(h: &Harness, connector: ScriptedConnector) -> Arc<ScriptedConnector> {
    let connector = Arc::new(connector);
    h.bus.register(connector.id.clone(), connector.clone());
    h.directory
        .register(&connector.id, PLANT_CONNECTION_CAPABILITY)
        .unwrap();
    connector
}

async fn wait_for_state(h: &Harness, state: SessionState, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if h.supervisor.sessions().iter().any(|s| s.state == state) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

async fn wait_for_no_sessions(h: &Harness, within: Duration) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if h.supervisor.session_count() == 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

fn channel_created(events: &[DisplayEvent]) -> bool {
    events
        .iter()
        .any(|e| matches!(e, DisplayEvent::ChannelCreated { .. }))
}

fn has_value(events: &[DisplayEvent], variable: &str, value: &str) -> bool {
    events.iter().any(|e| {
        matches!(e, DisplayEvent::ValueUpdated { variable: v, value: x, .. } if v == variable && x == value)
    })
}

/// The initial values arrive right after the channel is created.
fn streaming(events: &[DisplayEvent]) -> bool {
    has_value(events, "Pressure", "101.30")
}

const PLANT: &str = "127.0.0.1:6001";

#[tokio::test]
async fn ready_connector_is_accepted_and_streams() {
    let h = harness("monitor-a");
    let connector = add_scripted(&h, ScriptedConnector::new("conn-1", Some(Offer::Ready)));

    let session = h.supervisor.start_monitoring_str(PLANT).unwrap();
    assert_eq!(session, "127.0.0.1:6001_monitor-a");

    assert!(h.sink.wait_until(Duration::from_secs(3), streaming).await);
    let events = h.sink.events();
    assert!(events.contains(&DisplayEvent::ResultsShown));
    assert!(events.contains(&DisplayEvent::ChannelCreated {
        session_id: session.clone(),
        display_id: "127.0.0.1:6001@conn-1".into(),
        variables: vec!["Temp".into(), "Pressure".into()],
    }));
    assert!(has_value(&events, "Temp", "23.50"));
    assert!(has_value(&events, "Pressure", "101.30"));

    assert!(wait_for_state(&h, SessionState::Running, Duration::from_secs(1)).await);
    let info = &h.supervisor.sessions()[0];
    assert_eq!(info.owner, Some(AgentId::from("conn-1")));

    connector.push_update("Temp:23.55;Pressure:101.30");
    assert!(
        h.sink
            .wait_until(Duration::from_secs(1), |e| has_value(e, "Temp", "23.55"))
            .await
    );

    h.supervisor.stop_monitoring(&session).unwrap();
    assert!(wait_for_no_sessions(&h, Duration::from_secs(2)).await);
    assert_eq!(connector.seen(Performative::Cancel), 1);

    let events = h.sink.events();
    assert!(events.contains(&DisplayEvent::ChannelRemoved {
        session_id: session.clone()
    }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, DisplayEvent::Disconnect { .. })));
}

#[tokio::test]
async fn connected_offer_wins_over_earlier_ready() {
    let h = harness("monitor-b");
    let ready = add_scripted(&h, ScriptedConnector::new("ready-1", Some(Offer::Ready)));
    let owner = add_scripted(
        &h,
        ScriptedConnector::new("owner-1", Some(Offer::Connected)).delayed(Duration::from_millis(50)),
    );

    h.supervisor.start_monitoring_str(PLANT).unwrap();
    assert!(h.sink.wait_until(Duration::from_secs(3), channel_created).await);

    assert_eq!(owner.seen(Performative::AcceptProposal), 1);
    assert_eq!(ready.seen(Performative::AcceptProposal), 0);
    assert!(
        h.sink
            .wait_until(Duration::from_secs(1), |_| ready.seen(Performative::RejectProposal) == 1)
            .await
    );
    assert_eq!(owner.seen(Performative::RejectProposal), 0);
}

#[tokio::test]
async fn stop_during_bidding_waits_out_the_window_without_accepting() {
    let h = harness("monitor-e");
    let silent = add_scripted(&h, ScriptedConnector::silent("mute-1"));

    let session = h.supervisor.start_monitoring_str(PLANT).unwrap();
    assert!(wait_for_state(&h, SessionState::Negotiating, Duration::from_secs(1)).await);
    let stopped_at = Instant::now();
    h.supervisor.stop_monitoring(&session).unwrap();

    assert!(wait_for_no_sessions(&h, Duration::from_secs(2)).await);
    let elapsed = stopped_at.elapsed();
    assert!(elapsed >= Duration::from_millis(300), "closed after {elapsed:?}");

    assert_eq!(silent.seen(Performative::CallForProposal), 1);
    assert_eq!(silent.seen(Performative::AcceptProposal), 0);
    let events = h.sink.events();
    assert!(!channel_created(&events));
    assert!(!events
        .iter()
        .any(|e| matches!(e, DisplayEvent::Disconnect { .. })));
}

#[tokio::test]
async fn discovery_retries_until_a_candidate_appears() {
    let h = harness("monitor-c");
    h.supervisor.start_monitoring_str(PLANT).unwrap();

    assert!(wait_for_state(&h, SessionState::RepeatDiscovering, Duration::from_secs(1)).await);
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert!(!channel_created(&h.sink.events()));

    let appeared_at = Instant::now();
    add_scripted(&h, ScriptedConnector::new("late-1", Some(Offer::Ready)));
    assert!(h.sink.wait_until(Duration::from_secs(2), channel_created).await);
    assert!(appeared_at.elapsed() < Duration::from_millis(600));
}

#[tokio::test]
async fn round_without_offers_returns_to_discovery() {
    let h = harness("monitor-r");
    let refuser = add_scripted(&h, ScriptedConnector::new("busy-1", None));

    h.supervisor.start_monitoring_str(PLANT).unwrap();
    assert!(
        h.sink
            .wait_until(Duration::from_secs(2), |_| refuser.seen(Performative::CallForProposal) >= 2)
            .await
    );
    assert_eq!(refuser.seen(Performative::AcceptProposal), 0);
    assert_eq!(h.supervisor.session_count(), 1);
}

#[tokio::test]
async fn failed_accept_closes_with_disconnect_notice() {
    let h = harness("monitor-f");
    add_scripted(
        &h,
        ScriptedConnector::new("broken-1", Some(Offer::Ready)).failing_accept(),
    );

    let session = h.supervisor.start_monitoring_str(PLANT).unwrap();
    assert!(wait_for_no_sessions(&h, Duration::from_secs(3)).await);

    let events = h.sink.events();
    assert!(events.contains(&DisplayEvent::Disconnect {
        session_id: session.clone()
    }));
    assert!(!channel_created(&events));
    assert!(!events.contains(&DisplayEvent::ChannelRemoved { session_id: session }));
}

#[tokio::test]
async fn connector_failure_tags_decide_the_notice() {
    let h = harness("monitor-g");
    let connector = add_scripted(&h, ScriptedConnector::new("conn-g", Some(Offer::Ready)));

    let session = h.supervisor.start_monitoring_str(PLANT).unwrap();
    assert!(wait_for_state(&h, SessionState::Running, Duration::from_secs(3)).await);
    connector.fail_subscribers(FailureReason::ConnectorTerminated);
    assert!(wait_for_no_sessions(&h, Duration::from_secs(2)).await);

    let events = h.sink.events();
    assert!(events.contains(&DisplayEvent::ChannelRemoved {
        session_id: session.clone()
    }));
    assert!(!events.contains(&DisplayEvent::Disconnect {
        session_id: session.clone()
    }));

    h.supervisor.start_monitoring_str(PLANT).unwrap();
    assert!(wait_for_state(&h, SessionState::Running, Duration::from_secs(3)).await);
    connector.fail_subscribers(FailureReason::PlantDisconnected);
    assert!(wait_for_no_sessions(&h, Duration::from_secs(2)).await);
    assert!(h
        .sink
        .events()
        .contains(&DisplayEvent::Disconnect { session_id: session }));
}

// ---------------------------------------------------------------------------
// Against a real connection agent and a fake plant
// ---------------------------------------------------------------------------

fn doc(values: &[(&str, &str)]) -> String {
    let mut out = String::from("<Cluster>\r\n<Name>Plant</Name>\r\n");
    for (name, value) in values {
        out.push_str(&format!(
            "<DBL>\r\n<Name>{name}</Name>\r\n<Val>{value}</Val>\r\n</DBL>\r\n"
        ));
    }
    out.push_str("</Cluster>\r\n");
    out
}

async fn fake_plant() -> (String, oneshot::Receiver<TcpStream>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind plant");
    let port = listener.local_addr().expect("plant addr").port();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let _ = tx.send(stream);
        }
    });
    (format!("127.0.0.1:{port}"), rx)
}

fn local_connector(h: &Harness, id: &str) -> ConnectionAgent {
    let config = ConnectorConfig {
        agent_id: id.to_string(),
        timing: ConnectorTiming {
            ingester_join_grace_ms: 1_000,
            ..Default::default()
        },
        ..Default::default()
    };
    spawn_local_connector(&h.bus, h.directory.clone(), config).expect("local connector")
}

#[tokio::test]
async fn end_to_end_through_a_connection_agent() {
    let h = harness("monitor-1");
    let agent = local_connector(&h, "conn-real");
    let (plant, stream) = fake_plant().await;

    let session = h.supervisor.start_monitoring_str(&plant).unwrap();
    let mut stream = stream.await.expect("connector dialled the plant");
    stream
        .write_all(doc(&[("Temp", "23.5"), ("Pressure", "101.3")]).as_bytes())
        .await
        .unwrap();

    assert!(h.sink.wait_until(Duration::from_secs(3), streaming).await);
    assert!(h.sink.events().contains(&DisplayEvent::ChannelCreated {
        session_id: session.clone(),
        display_id: format!("{plant}@conn-real"),
        variables: vec!["Temp".into(), "Pressure".into()],
    }));
    assert!(has_value(&h.sink.events(), "Temp", "23.50"));

    stream
        .write_all(doc(&[("Temp", "23.55"), ("Pressure", "101.3")]).as_bytes())
        .await
        .unwrap();
    assert!(
        h.sink
            .wait_until(Duration::from_secs(2), |e| has_value(e, "Temp", "23.55"))
            .await
    );

    h.supervisor.stop_monitoring(&session).unwrap();
    assert!(wait_for_no_sessions(&h, Duration::from_secs(2)).await);
    assert_eq!(agent.subscriber_count(), 0);
    assert_eq!(agent.connection_state(), ConnectionState::Streaming);

    agent.shutdown().await;
}

#[tokio::test]
async fn plant_loss_notifies_every_monitor() {
    let bus = LocalBus::new();
    let directory = Arc::new(LocalDirectory::new());
    let first = with_shared("monitor-1", &bus, &directory);
    let second = with_shared("monitor-2", &bus, &directory);
    let agent = local_connector(&first, "conn-shared");
    let (plant, stream) = fake_plant().await;

    let first_session = first.supervisor.start_monitoring_str(&plant).unwrap();
    let mut stream = stream.await.expect("connector dialled the plant");
    stream
        .write_all(doc(&[("Temp", "23.5"), ("Pressure", "101.3")]).as_bytes())
        .await
        .unwrap();
    assert!(first.sink.wait_until(Duration::from_secs(3), channel_created).await);

    let second_session = second.supervisor.start_monitoring_str(&plant).unwrap();
    assert!(second.sink.wait_until(Duration::from_secs(3), channel_created).await);
    assert_eq!(agent.subscriber_count(), 2);
    assert_eq!(second.supervisor.session_count(), 1);

    drop(stream);

    for (h, session) in [(&first, &first_session), (&second, &second_session)] {
        assert!(wait_for_no_sessions(h, Duration::from_secs(3)).await);
        let events = h.sink.events();
        assert!(events.contains(&DisplayEvent::Disconnect {
            session_id: session.clone()
        }));
        assert!(events.contains(&DisplayEvent::ChannelRemoved {
            session_id: session.clone()
        }));
    }
    agent.terminated().await;
    assert_eq!(agent.connection_state(), ConnectionState::Disconnected);
}
