//! Property tests for change-feed delivery.

use changefeed::{Cursor, Delivery, Event, EventStore, Subscription, SubscriptionConfig};
use proptest::prelude::*;
use std::time::Duration;
use tempfile::TempDir;

fn drain_available(sub: &Subscription, expected: usize) -> Vec<Event> {
    let mut delivered = Vec::with_capacity(expected);
    while delivered.len() < expected {
        match sub.pull_timeout(Duration::from_secs(5)) {
            Some(Delivery::Event(event)) => delivered.push(event),
            _ => break,
        }
    }
    delivered
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A subscription resumed after the k-th event yields exactly the events
    /// appended after it, in order, whatever the buffer size.
    #[test]
    fn prop_resume_yields_exact_suffix(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..40),
        resume_seed in any::<prop::sample::Index>(),
        buffer_size in 1usize..8,
    ) {
        let store = EventStore::in_memory();
        let appended: Vec<Event> = payloads
            .iter()
            .map(|payload| store.append(payload.clone()).unwrap())
            .collect();

        let k = resume_seed.index(appended.len());
        let sub = store
            .subscribe_with(
                Cursor::from(&appended[k]),
                SubscriptionConfig::default().buffer_size(buffer_size),
            )
            .unwrap();

        let expected = &appended[k + 1..];
        let delivered = drain_available(&sub, expected.len());
        prop_assert_eq!(delivered.as_slice(), expected);
        prop_assert!(sub.pull_timeout(Duration::from_millis(20)).is_none());
    }

    /// Interleaving appends with pulls never loses or repeats an event.
    #[test]
    fn prop_live_delivery_matches_append_order(
        batches in prop::collection::vec(1usize..10, 1..8),
    ) {
        let store = EventStore::in_memory();
        let sub = store.subscribe(Cursor::start()).unwrap();

        let mut appended = Vec::new();
        let mut delivered = Vec::new();
        for (round, size) in batches.iter().enumerate() {
            for i in 0..*size {
                appended.push(store.append(format!("{round}-{i}")).unwrap());
            }
            let pending = appended.len() - delivered.len();
            delivered.extend(drain_available(&sub, pending));
        }

        prop_assert_eq!(delivered, appended);
    }

    /// Events written to disk come back identical after a reopen.
    #[test]
    fn prop_file_store_reopen_preserves_events(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..128), 0..20),
    ) {
        let dir = TempDir::new().unwrap();
        let config = changefeed::StoreConfig {
            path: dir.path().join("store"),
            ..Default::default()
        };

        let appended: Vec<Event> = {
            let store = EventStore::open(config.clone()).unwrap();
            payloads
                .iter()
                .map(|payload| store.append(payload.clone()).unwrap())
                .collect()
        };

        let store = EventStore::open(config).unwrap();
        let read = store.read_after(&Cursor::start(), usize::MAX).unwrap();
        prop_assert_eq!(read, appended);
    }
}
