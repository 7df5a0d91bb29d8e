//! Property tests for the message status lattice.
//!
//! Applies arbitrary event sequences through the transition rules and
//! checks that recorded status history is always a prefix of a linear
//! extension of the lattice order.

use courier_core::MessageStatus;
use proptest::prelude::*;

fn any_status() -> impl Strategy<Value = MessageStatus> {
    prop_oneof![
        Just(MessageStatus::Pending),
        Just(MessageStatus::Queued),
        Just(MessageStatus::Sent),
        Just(MessageStatus::Delivered),
        Just(MessageStatus::Read),
        Just(MessageStatus::Failed),
    ]
}

/// Applies events in order, keeping only transitions the lattice allows.
fn apply_all(events: &[MessageStatus]) -> Vec<MessageStatus> {
    let mut history = vec![MessageStatus::Pending];
    let mut current = MessageStatus::Pending;
    for &event in events {
        if current.can_transition_to(event) {
            current = event;
            history.push(event);
        }
    }
    history
}

proptest! {
    #[test]
    fn history_ranks_strictly_increase(events in prop::collection::vec(any_status(), 0..32)) {
        let history = apply_all(&events);
        for pair in history.windows(2) {
            prop_assert!(pair[1].rank() > pair[0].rank(), "regressed: {:?}", pair);
        }
    }

    #[test]
    fn failed_never_follows_delivery(events in prop::collection::vec(any_status(), 0..32)) {
        let history = apply_all(&events);
        let delivered_at = history.iter().position(|s| matches!(s, MessageStatus::Delivered | MessageStatus::Read));
        let failed_at = history.iter().position(|s| matches!(s, MessageStatus::Failed));
        if let (Some(d), Some(f)) = (delivered_at, failed_at) {
            prop_assert!(f < d, "failed recorded after delivery");
        }
    }

    #[test]
    fn terminal_state_absorbs(events in prop::collection::vec(any_status(), 1..32)) {
        let history = apply_all(&events);
        let last = *history.last().unwrap();
        // Once failed or read is reached nothing can follow it.
        for (i, status) in history.iter().enumerate() {
            if matches!(status, MessageStatus::Failed | MessageStatus::Read) {
                prop_assert_eq!(i, history.len() - 1);
                prop_assert_eq!(*status, last);
            }
        }
    }

    #[test]
    fn final_status_is_supremum_of_applied(events in prop::collection::vec(any_status(), 0..32)) {
        let history = apply_all(&events);
        let final_status = *history.last().unwrap();
        let max_rank = history.iter().map(|s| s.rank()).max().unwrap();
        prop_assert_eq!(final_status.rank(), max_rank);
    }
}
