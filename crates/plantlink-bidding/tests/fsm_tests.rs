use plantlink_bidding::*;
use SessionEvent as E;
use SessionState as S;

fn run(events: &[SessionEvent]) -> Result<SessionState, BiddingError> {
    events
        .iter()
        .try_fold(S::Discovering, |state, event| transition(state, *event))
}

#[test]
fn test_happy_path_reaches_running() {
    let state = run(&[
        E::CandidatesFound,
        E::WinnerChosen,
        E::AcceptInformed,
        E::Subscribed,
        E::Update,
        E::Update,
    ])
    .unwrap();
    assert_eq!(state, S::Running);
}

#[test]
fn test_no_candidates_loops_in_repeat_discovering() {
    let state = run(&[E::NoCandidates, E::NoCandidates, E::NoCandidates]).unwrap();
    assert_eq!(state, S::RepeatDiscovering);
    assert_eq!(transition(state, E::CandidatesFound).unwrap(), S::Negotiating);
}

#[test]
fn test_no_offers_returns_to_repeat_discovering() {
    assert_eq!(
        run(&[E::CandidatesFound, E::NoOffers]).unwrap(),
        S::RepeatDiscovering
    );
}

#[test]
fn test_stop_honored_from_every_active_state() {
    for state in [
        S::Discovering,
        S::RepeatDiscovering,
        S::Negotiating,
        S::AwaitingAccept,
        S::Subscribing,
        S::Running,
    ] {
        assert_eq!(transition(state, E::StopRequested).unwrap(), S::Closing);
    }
}

#[test]
fn test_failures_close_session() {
    assert_eq!(
        run(&[E::CandidatesFound, E::WinnerChosen, E::AcceptFailed]).unwrap(),
        S::Closing
    );
    assert_eq!(
        run(&[E::CandidatesFound, E::WinnerChosen, E::AcceptInformed, E::SubscribeFailed]).unwrap(),
        S::Closing
    );
    assert_eq!(
        run(&[
            E::CandidatesFound,
            E::WinnerChosen,
            E::AcceptInformed,
            E::Subscribed,
            E::ConnectorFailed
        ])
        .unwrap(),
        S::Closing
    );
}

#[test]
fn test_closing_only_terminates() {
    assert_eq!(transition(S::Closing, E::Closed).unwrap(), S::Terminated);
    assert!(transition(S::Closing, E::StopRequested).is_err());
    assert!(transition(S::Terminated, E::Closed).is_err());
}

#[test]
fn test_out_of_order_events_rejected() {
    let err = transition(S::Discovering, E::Subscribed).unwrap_err();
    assert_eq!(
        err,
        BiddingError::InvalidTransition {
            from: S::Discovering,
            event: E::Subscribed
        }
    );
    assert!(transition(S::Running, E::WinnerChosen).is_err());
}

#[test]
fn test_disconnect_notice_policy() {
    assert!(!CloseReason::StoppedByUser.shows_disconnect_notice());
    assert!(!CloseReason::ConnectorTerminated.shows_disconnect_notice());
    assert!(CloseReason::PlantDisconnected.shows_disconnect_notice());
    assert!(CloseReason::SubscriptionRefused.shows_disconnect_notice());
    assert!(CloseReason::OutOfSequence.shows_disconnect_notice());
    assert!(CloseReason::NegotiationFailed("timeout".into()).shows_disconnect_notice());
}
