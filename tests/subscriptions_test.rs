use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;
use uuid::Uuid;

use flowrelay_worker::cases::{CaseLogger, InMemoryCaseStore, SubscriptionCache, SubscriptionError};
use flowrelay_worker::events::{EventType, ExecutionEvent};
use flowrelay_worker::messaging::Subscription;

const SENDERS: [&str; 4] = ["a1", "a2", "a3", "exec"];

fn subscription_strategy() -> impl Strategy<Value = Vec<Subscription>> {
    prop::collection::vec(
        (
            prop::sample::select(SENDERS.to_vec()),
            prop::collection::vec(prop::sample::select(EventType::ALL.to_vec()), 0..4),
        )
            .prop_map(|(sender, events)| Subscription::new(sender, events)),
        0..6,
    )
}

fn pairs(subscriptions: &[Subscription]) -> HashSet<(String, EventType)> {
    subscriptions
        .iter()
        .flat_map(|s| s.events.iter().map(move |e| (s.sender.clone(), *e)))
        .collect()
}

proptest! {
    /// Property: matches() answers exactly the union of created (sender, event) pairs
    #[test]
    fn created_case_matches_exactly_its_pairs(subscriptions in subscription_strategy()) {
        let cache = SubscriptionCache::new();
        let expected = pairs(&subscriptions);
        cache.add_subscriptions("case", subscriptions).unwrap();

        for sender in SENDERS {
            for event_type in EventType::ALL {
                prop_assert_eq!(
                    cache.matches("case", sender, event_type),
                    expected.contains(&(sender.to_string(), event_type))
                );
            }
        }
    }

    /// Property: update replaces the old set rather than merging into it
    #[test]
    fn update_replaces_previous_subscriptions(
        before in subscription_strategy(),
        after in subscription_strategy(),
    ) {
        let cache = SubscriptionCache::new();
        cache.add_subscriptions("case", before).unwrap();
        let expected = pairs(&after);
        prop_assert!(cache.update_subscriptions("case", after));

        for sender in SENDERS {
            for event_type in EventType::ALL {
                prop_assert_eq!(
                    cache.matches("case", sender, event_type),
                    expected.contains(&(sender.to_string(), event_type))
                );
            }
        }
    }
}

#[test]
fn test_second_create_is_rejected_and_keeps_original() {
    let cache = SubscriptionCache::new();
    cache
        .add_subscriptions("c1", vec![Subscription::new("a1", [EventType::ActionSuccess])])
        .unwrap();

    let err = cache
        .add_subscriptions("c1", vec![Subscription::new("a2", [EventType::Started])])
        .unwrap_err();
    assert!(matches!(err, SubscriptionError::DuplicateCase { ref case_id } if case_id == "c1"));
    assert!(cache.matches("c1", "a1", EventType::ActionSuccess));
    assert!(!cache.matches("c1", "a2", EventType::Started));
}

#[test]
fn test_delete_removes_all_matches() {
    let cache = SubscriptionCache::new();
    cache
        .add_subscriptions("c1", vec![Subscription::new("a1", EventType::ALL)])
        .unwrap();
    assert!(cache.delete_case("c1"));
    assert!(!cache.contains_case("c1"));
    assert!(cache.matching_cases("a1", EventType::ActionSuccess).is_empty());
    assert!(!cache.delete_case("c1"));
}

#[tokio::test]
async fn test_case_logger_follows_cache_changes() {
    let cache = Arc::new(SubscriptionCache::new());
    let store = Arc::new(InMemoryCaseStore::new());
    let logger = CaseLogger::new(cache.clone(), store.clone());
    let event = |sender: &str, event_type| {
        ExecutionEvent::new(Uuid::new_v4(), "wf", sender, event_type, json!({}))
    };

    logger.log_event(&event("a1", EventType::ActionSuccess)).await;
    assert_eq!(logger.logged_count(), 0);

    cache
        .add_subscriptions("c1", vec![Subscription::new("a1", [EventType::ActionSuccess])])
        .unwrap();
    logger.log_event(&event("a1", EventType::ActionSuccess)).await;
    logger.log_event(&event("a1", EventType::ActionFailure)).await;
    assert_eq!(store.records_for("c1").len(), 1);

    cache.update_subscriptions("c1", vec![Subscription::new("a1", [EventType::ActionFailure])]);
    logger.log_event(&event("a1", EventType::ActionSuccess)).await;
    logger.log_event(&event("a1", EventType::ActionFailure)).await;

    let records = store.records_for("c1");
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].event.event_type, EventType::ActionFailure);
    assert_eq!(logger.logged_count(), 2);
}
