//! # Cases
//!
//! Case subscriptions and the event logger that records matching events.

pub mod case_logger;
pub mod errors;
pub mod store;
pub mod subscription_cache;

pub use case_logger::CaseLogger;
pub use errors::{CaseStoreError, SubscriptionError};
pub use store::{CaseRecord, CaseStore, InMemoryCaseStore, JsonLinesCaseStore};
pub use subscription_cache::SubscriptionCache;
