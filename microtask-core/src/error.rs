//! Error types surfaced by the task engine.
//!
//! Only failures a caller can act on live here. Corrupt persisted records and
//! duplicate medal grants are absorbed where they happen, and a missed
//! countdown deadline is a lifecycle state rather than an error.

use std::time::Duration;
use thiserror::Error;

/// Failure writing a record through a [`crate::store::KeyValueStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write record '{key}': {message}")]
    Write { key: String, message: String },

    #[error("failed to encode record '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum TaskError {
    /// The task source could not be reached or rejected the request.
    /// No local state has been changed; the same action can be retried.
    #[error("task source error: {0}")]
    Transport(String),

    /// The completion report was not confirmed within the configured bound.
    #[error("completion report not confirmed within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TaskError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Transport and timeout failures leave the attempt intact.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_timeout_are_retryable() {
        assert!(TaskError::transport("connection refused").is_retryable());
        assert!(TaskError::Timeout(Duration::from_secs(10)).is_retryable());

        let store = TaskError::from(StoreError::Write {
            key: "taskStats".to_string(),
            message: "disk full".to_string(),
        });
        assert!(!store.is_retryable());
        assert_eq!(store.to_string(), "failed to write record 'taskStats': disk full");
    }
}
