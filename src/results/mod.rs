//! # Results
//!
//! Outbound result records built from execution events.

pub mod publisher;
pub mod sender;

pub use publisher::{
    BroadcastResultsPublisher, ChannelResultsPublisher, ResultsPublishError, ResultsPublisher,
};
pub use sender::ResultsSender;
