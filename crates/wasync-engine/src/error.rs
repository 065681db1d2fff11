use wasync_store::StoreError;

use crate::config::ConfigError;
use crate::sinks::SinkError;
use crate::transform::TransformError;

/// Failure while assembling a [`crate::SyncEngine`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("notification sink setup failed: {0}")]
    Sink(#[from] SinkError),
}

/// Failure inside an entity handler. Never leaves the handler: it is logged
/// and turned into an error notification.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Transform(#[from] TransformError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage task failed: {0}")]
    Task(String),
}

impl HandlerError {
    /// The row vanished between lookup and write.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_not_found())
    }
}

impl From<tokio::task::JoinError> for HandlerError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Task(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_message_is_passed_through() {
        let err = HandlerError::from(StoreError::Database("no such table: chats".into()));
        assert_eq!(err.to_string(), "database error: no such table: chats");
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_is_detected_through_wrapper() {
        let err = HandlerError::from(StoreError::NotFound("chats c1".into()));
        assert!(err.is_not_found());
        assert!(!HandlerError::Task("boom".into()).is_not_found());
    }
}
