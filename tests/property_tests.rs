//! Property-based tests for the pure decision logic

use std::str::FromStr;

use proptest::prelude::*;

use fleetmon::FailureReason;
use fleetmon::actors::alert::AlertTransition;
use fleetmon::actors::messages::AlertStatus;
use fleetmon::transport::TransportError;

fn alert_status() -> impl Strategy<Value = AlertStatus> {
    prop_oneof![Just(AlertStatus::Ok), Just(AlertStatus::Alerting)]
}

fn failure_reason() -> impl Strategy<Value = FailureReason> {
    prop_oneof![
        Just(FailureReason::Timeout),
        Just(FailureReason::Auth),
        Just(FailureReason::Malformed),
        Just(FailureReason::WorkerTimeout),
    ]
}

proptest! {
    /// An alert opens exactly when an OK device is unreachable with the
    /// failure counter at or past the threshold (a zero threshold behaves
    /// as one).
    #[test]
    fn open_requires_ok_unreachable_and_threshold(
        status in alert_status(),
        reachable in any::<bool>(),
        failures in 0u32..20,
        threshold in 0u32..10,
    ) {
        let transition = AlertTransition::evaluate(status, reachable, failures, threshold);

        let should_open = status == AlertStatus::Ok
            && !reachable
            && failures >= threshold.max(1);

        prop_assert_eq!(transition == AlertTransition::Open, should_open);
    }

    /// A resolve happens exactly when an alerting device reports reachable
    #[test]
    fn resolve_requires_alerting_and_reachable(
        status in alert_status(),
        reachable in any::<bool>(),
        failures in 0u32..20,
        threshold in 0u32..10,
    ) {
        let transition = AlertTransition::evaluate(status, reachable, failures, threshold);

        let should_resolve = status == AlertStatus::Alerting && reachable;

        prop_assert_eq!(transition == AlertTransition::Resolve, should_resolve);
    }

    /// Over any reachability sequence, opens and resolves strictly
    /// alternate, starting with an open
    #[test]
    fn opens_and_resolves_alternate(
        outcomes in prop::collection::vec(any::<bool>(), 0..200),
        threshold in 1u32..6,
    ) {
        let mut status = AlertStatus::Ok;
        let mut consecutive_failures = 0u32;
        let mut transitions = Vec::new();

        for reachable in outcomes {
            consecutive_failures = if reachable { 0 } else { consecutive_failures + 1 };

            match AlertTransition::evaluate(status, reachable, consecutive_failures, threshold) {
                AlertTransition::None => {}
                AlertTransition::Open => {
                    status = AlertStatus::Alerting;
                    transitions.push(AlertTransition::Open);
                }
                AlertTransition::Resolve => {
                    status = AlertStatus::Ok;
                    transitions.push(AlertTransition::Resolve);
                }
            }
        }

        for pair in transitions.chunks(2) {
            prop_assert_eq!(pair[0], AlertTransition::Open);
            if let Some(second) = pair.get(1) {
                prop_assert_eq!(*second, AlertTransition::Resolve);
            }
        }
    }

    /// Failure reasons survive the storage text encoding
    #[test]
    fn failure_reason_text_round_trips(reason in failure_reason()) {
        let text = reason.to_string();
        let parsed = FailureReason::from_str(&text).unwrap();
        prop_assert_eq!(parsed, reason);
    }
}

#[test]
fn only_unreachable_is_transient() {
    assert!(TransportError::Unreachable("no response".to_string()).is_transient());
    assert!(!TransportError::AuthRejected("bad community".to_string()).is_transient());
    assert!(!TransportError::Malformed("truncated pdu".to_string()).is_transient());
}

#[test]
fn alerting_never_opens_again() {
    for failures in 0..10 {
        assert_ne!(
            AlertTransition::evaluate(AlertStatus::Alerting, false, failures, 3),
            AlertTransition::Open
        );
    }
}
