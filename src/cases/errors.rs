//! # Case Error Types

use thiserror::Error;

/// Subscription cache errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Case already has subscriptions: {case_id}; use update instead")]
    DuplicateCase { case_id: String },
}

impl SubscriptionError {
    pub fn duplicate_case(case_id: impl Into<String>) -> Self {
        Self::DuplicateCase {
            case_id: case_id.into(),
        }
    }
}

/// Case store errors
#[derive(Error, Debug)]
pub enum CaseStoreError {
    #[error("Case store I/O error: {path}: {message}")]
    Io { path: String, message: String },

    #[error("Case record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CaseStoreError {
    pub fn io(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Io {
            path: path.into(),
            message: message.into(),
        }
    }
}
