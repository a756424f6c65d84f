use plantlink_protocol::*;
use plantlink_state::*;
use tokio::sync::mpsc;

fn initial(channel: &str) -> PlantMessage {
    PlantMessage::new(Performative::Inform, AgentId::from("conn"), channel, "Temp:1.00")
}

fn registry() -> SubscriptionRegistry {
    SubscriptionRegistry::new(AgentId::from("conn"))
}

fn drain(rx: &mut mpsc::UnboundedReceiver<PlantMessage>) -> Vec<PlantMessage> {
    let mut out = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        out.push(msg);
    }
    out
}

#[test]
fn test_subscribe_refused_unless_streaming() {
    let reg = registry();
    let (tx, _rx) = mpsc::unbounded_channel();
    for state in [
        ConnectionState::Idle,
        ConnectionState::Connecting,
        ConnectionState::Faulted,
        ConnectionState::Disconnected,
    ] {
        let err = reg
            .subscribe("ch", &AgentId::from("m"), state, tx.clone(), initial("ch"))
            .unwrap_err();
        assert_eq!(err, StateError::SubscriptionRefused(state));
    }
    assert_eq!(reg.active_count(), 0);
}

#[test]
fn test_fan_out_delivers_identical_content_to_every_channel() {
    let reg = registry();
    let mut receivers = Vec::new();
    for i in 0..5 {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = format!("ch-{i}");
        reg.subscribe(&channel, &AgentId::from("m"), ConnectionState::Streaming, tx, initial(&channel))
            .unwrap();
        receivers.push(rx);
    }

    let delivered = reg.publish("Temp:23.55;Pressure:101.30");
    assert_eq!(delivered, 5);

    for (i, rx) in receivers.iter_mut().enumerate() {
        let msgs = drain(rx);
        assert_eq!(msgs.len(), 2, "initial + one update");
        assert_eq!(msgs[1].content, "Temp:23.55;Pressure:101.30");
        assert_eq!(msgs[1].conversation_id, format!("ch-{i}"));
        assert_eq!(msgs[1].performative, Performative::Inform);
    }
}

#[test]
fn test_per_channel_order_preserved() {
    let reg = registry();
    let (tx, mut rx) = mpsc::unbounded_channel();
    reg.subscribe("ch", &AgentId::from("m"), ConnectionState::Streaming, tx, initial("ch"))
        .unwrap();
    for n in 0..20 {
        reg.publish(&format!("N:{n}"));
    }
    let contents: Vec<String> = drain(&mut rx).into_iter().skip(1).map(|m| m.content).collect();
    let expected: Vec<String> = (0..20).map(|n| format!("N:{n}")).collect();
    assert_eq!(contents, expected);
}

#[test]
fn test_cancel_is_idempotent() {
    let reg = registry();
    let (tx, mut rx) = mpsc::unbounded_channel();
    reg.subscribe("ch", &AgentId::from("m"), ConnectionState::Streaming, tx, initial("ch"))
        .unwrap();

    assert_eq!(reg.cancel("ch"), CancelOutcome::Removed);
    assert_eq!(reg.cancel("ch"), CancelOutcome::NotFound);

    assert_eq!(reg.publish("Temp:2.00"), 0);
    assert_eq!(drain(&mut rx).len(), 1, "only the initial inform");
}

#[test]
fn test_fail_all_notifies_once_and_closes() {
    let reg = registry();
    let (tx_a, mut rx_a) = mpsc::unbounded_channel();
    let (tx_b, mut rx_b) = mpsc::unbounded_channel();
    reg.subscribe("a", &AgentId::from("m1"), ConnectionState::Streaming, tx_a, initial("a"))
        .unwrap();
    reg.subscribe("b", &AgentId::from("m2"), ConnectionState::Streaming, tx_b, initial("b"))
        .unwrap();

    assert_eq!(reg.fail_all(FailureReason::PlantDisconnected), 2);
    assert_eq!(reg.fail_all(FailureReason::PlantDisconnected), 0);
    assert_eq!(reg.publish("Temp:3.00"), 0);
    assert!(reg.is_closed());

    for rx in [&mut rx_a, &mut rx_b] {
        let msgs = drain(rx);
        let last = msgs.last().unwrap();
        assert_eq!(last.performative, Performative::Failure);
        assert_eq!(last.content, "Plant_disconnected");
    }

    let (tx, _rx) = mpsc::unbounded_channel();
    assert_eq!(
        reg.subscribe("c", &AgentId::from("m3"), ConnectionState::Streaming, tx, initial("c")),
        Err(StateError::RegistryClosed)
    );
}

#[test]
fn test_dropped_subscriber_is_pruned() {
    let reg = registry();
    let (tx, rx) = mpsc::unbounded_channel();
    reg.subscribe("ch", &AgentId::from("m"), ConnectionState::Streaming, tx, initial("ch"))
        .unwrap();
    drop(rx);
    assert_eq!(reg.publish("Temp:1.00"), 0);
    assert_eq!(reg.active_count(), 0);
    assert_eq!(reg.cancel("ch"), CancelOutcome::NotFound);
}
