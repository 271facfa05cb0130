//! # Subscription Cache
//!
//! Case id → sender → observed event types. Mutated only by case control
//! messages; read on every execution event. One map-wide reader/writer lock
//! is held only for the duration of a check or a mutation, never across I/O.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::errors::SubscriptionError;
use crate::events::EventType;
use crate::messaging::Subscription;

type SubscriptionSet = HashMap<String, HashSet<EventType>>;

#[derive(Debug, Default)]
pub struct SubscriptionCache {
    cases: RwLock<HashMap<String, SubscriptionSet>>,
}

/// Union of the subscriptions' (sender, event) pairs
fn build_set(subscriptions: Vec<Subscription>) -> SubscriptionSet {
    let mut set = SubscriptionSet::new();
    for subscription in subscriptions {
        set.entry(subscription.sender)
            .or_default()
            .extend(subscription.events);
    }
    set
}

impl SubscriptionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new case; existing cases must be changed with `update_subscriptions`
    pub fn add_subscriptions(
        &self,
        case_id: &str,
        subscriptions: Vec<Subscription>,
    ) -> Result<(), SubscriptionError> {
        let set = build_set(subscriptions);
        let mut cases = self.cases.write();
        if cases.contains_key(case_id) {
            return Err(SubscriptionError::duplicate_case(case_id));
        }
        debug!(case_id = %case_id, senders = set.len(), "Case subscriptions added");
        cases.insert(case_id.to_string(), set);
        Ok(())
    }

    /// Replace a case's subscription set wholesale; returns false for unknown cases
    pub fn update_subscriptions(&self, case_id: &str, subscriptions: Vec<Subscription>) -> bool {
        let set = build_set(subscriptions);
        let mut cases = self.cases.write();
        match cases.get_mut(case_id) {
            Some(existing) => {
                *existing = set;
                debug!(case_id = %case_id, "Case subscriptions replaced");
                true
            }
            None => {
                drop(cases);
                warn!(case_id = %case_id, "Cannot update subscriptions for unknown case");
                false
            }
        }
    }

    /// Remove a case; returns false for unknown cases
    pub fn delete_case(&self, case_id: &str) -> bool {
        let removed = self.cases.write().remove(case_id).is_some();
        if removed {
            debug!(case_id = %case_id, "Case deleted");
        } else {
            warn!(case_id = %case_id, "Cannot delete unknown case");
        }
        removed
    }

    /// Hot-path membership test; no allocation
    pub fn matches(&self, case_id: &str, sender: &str, event_type: EventType) -> bool {
        self.cases
            .read()
            .get(case_id)
            .and_then(|senders| senders.get(sender))
            .is_some_and(|events| events.contains(&event_type))
    }

    /// Every case observing this (sender, event) pair
    pub fn matching_cases(&self, sender: &str, event_type: EventType) -> Vec<String> {
        self.cases
            .read()
            .iter()
            .filter(|(_, senders)| {
                senders
                    .get(sender)
                    .is_some_and(|events| events.contains(&event_type))
            })
            .map(|(case_id, _)| case_id.clone())
            .collect()
    }

    pub fn contains_case(&self, case_id: &str) -> bool {
        self.cases.read().contains_key(case_id)
    }

    pub fn case_count(&self) -> usize {
        self.cases.read().len()
    }
}
