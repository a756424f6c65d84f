use plantlink_bidding::*;
use plantlink_protocol::*;

fn cfp(round: &NegotiationRound) -> PlantMessage {
    PlantMessage::new(
        Performative::CallForProposal,
        AgentId::from("monitor"),
        round.round_id(),
        round.address().to_content(),
    )
}

fn round_of(names: &[&str]) -> NegotiationRound {
    NegotiationRound::new(
        PlantAddress::new("10.0.0.9", 6001).unwrap(),
        names.iter().map(|n| AgentId::from(*n)).collect(),
    )
}

#[test]
fn test_connected_second_in_arrival_order_wins() {
    let mut round = round_of(&["c-ready", "c-connected"]);
    let request = cfp(&round);

    assert!(round.record(&request.propose(&AgentId::from("c-ready"), Offer::Ready)).unwrap());
    assert!(round
        .record(&request.propose(&AgentId::from("c-connected"), Offer::Connected))
        .unwrap());
    assert!(round.is_complete());

    assert_eq!(round.close().unwrap(), AgentId::from("c-connected"));
    assert_eq!(round.losers(), vec![AgentId::from("c-ready")]);
}

#[test]
fn test_refusals_and_silence_are_not_losers() {
    let mut round = round_of(&["a", "b", "c"]);
    let request = cfp(&round);

    round.record(&request.refuse(&AgentId::from("a"))).unwrap();
    round.record(&request.propose(&AgentId::from("b"), Offer::Ready)).unwrap();
    round.record_silence(&AgentId::from("c"));

    assert_eq!(round.close().unwrap(), AgentId::from("b"));
    assert!(round.losers().is_empty());
}

#[test]
fn test_all_refused_reports_refusal() {
    let mut round = round_of(&["a"]);
    let request = cfp(&round);
    round.record(&request.refuse(&AgentId::from("a"))).unwrap();
    assert!(matches!(round.close(), Err(BiddingError::NegotiationRefused(_))));
}

#[test]
fn test_stray_and_duplicate_replies_ignored() {
    let mut round = round_of(&["a"]);
    let request = cfp(&round);

    assert!(!round
        .record(&request.propose(&AgentId::from("stranger"), Offer::Connected))
        .unwrap());

    let other_round = PlantMessage::new(Performative::Propose, AgentId::from("a"), "old-round", "connected");
    assert!(!round.record(&other_round).unwrap());

    assert!(round.record(&request.propose(&AgentId::from("a"), Offer::Ready)).unwrap());
    assert!(!round.record(&request.propose(&AgentId::from("a"), Offer::Connected)).unwrap());
    assert_eq!(round.replies().len(), 1);
}

#[test]
fn test_unknown_offer_text_counts_as_refusal() {
    let mut round = round_of(&["a"]);
    let mut bogus = cfp(&round).reply(Performative::Propose, &AgentId::from("a"), "maybe");
    bogus.conversation_id = round.round_id().to_string();
    round.record(&bogus).unwrap();
    assert_eq!(round.replies()[0].offer, None);
}

#[test]
fn test_closed_round_rejects_more_replies() {
    let mut round = round_of(&["a", "b"]);
    let request = cfp(&round);
    round.record(&request.propose(&AgentId::from("a"), Offer::Ready)).unwrap();
    round.close().unwrap();
    assert!(round.record(&request.propose(&AgentId::from("b"), Offer::Ready)).is_err());
    assert!(round.close().is_err());
}
