// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the sync orchestrator.
//!
//! Errors are split by where they surface. Construction-time errors propagate
//! out of [`SyncOrchestrator::start()`](crate::SyncOrchestrator::start); everything
//! that happens in steady state is logged and counted instead of returned.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Surfaced by |
//! |------------|-----------|-------------|
//! | `Discovery` | Yes | Logged; next scheduled pass retries |
//! | `ReplicationWrite` | Yes | Worker suspends after the retry budget |
//! | `Client` | Depends on kind | Admin / data-plane collaborator |
//! | `Construction` | No | `connect()` / `start()` |
//! | `ShutdownTimeout` | No | Logged during `close()`; resources force-released |
//! | `CursorStore` | No | Local SQLite errors (needs operator attention) |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Lifecycle state machine violation |
//! | `Shutdown` | No | Orchestrator is shutting down |
//! | `Internal` | No | Unexpected internal error |

use crate::client::ClientError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while mirroring a cluster.
#[derive(Error, Debug)]
pub enum SyncError {
    /// An admin listing call failed at one level of the hierarchy.
    ///
    /// Never escapes `sync()`: the pass is abandoned and existing children
    /// are left untouched.
    #[error("Discovery error ({level} {target}): {source}")]
    Discovery {
        level: &'static str,
        target: String,
        #[source]
        source: ClientError,
    },

    /// A destination write kept failing after the bounded retry budget.
    ///
    /// The affected worker suspends; siblings and discovery continue.
    #[error("Replication write to {topic} failed after {attempts} attempts: {source}")]
    ReplicationWrite {
        topic: String,
        attempts: usize,
        #[source]
        source: ClientError,
    },

    /// Building the entity handle or the manager tree failed at startup.
    #[error("Construction error: {0}")]
    Construction(String),

    /// A child did not close within its grace period.
    #[error("{component} did not close within {timeout:?}")]
    ShutdownTimeout { component: String, timeout: Duration },

    /// Error reported by a cluster collaborator outside of the categories above.
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// SQLite error during cursor persistence.
    #[error("Cursor store error: {0}")]
    CursorStore(#[from] sqlx::Error),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lifecycle state machine violation
    /// (e.g. calling `start()` on an orchestrator that already ran).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Create a discovery error for one hierarchy level.
    pub fn discovery(level: &'static str, target: impl Into<String>, source: ClientError) -> Self {
        Self::Discovery {
            level,
            target: target.into(),
            source,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Discovery { .. } => true,
            Self::ReplicationWrite { .. } => true,
            Self::Client(e) => e.is_retryable(),
            Self::Construction(_) => false,
            Self::ShutdownTimeout { .. } => false,
            Self::CursorStore(_) => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientErrorKind;

    #[test]
    fn test_discovery_is_retryable() {
        let err = SyncError::discovery(
            "tenant",
            "cluster",
            ClientError::new(ClientErrorKind::Unavailable, "connection refused"),
        );
        assert!(err.is_retryable());
        let msg = err.to_string();
        assert!(msg.contains("tenant"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_replication_write_formatting() {
        let err = SyncError::ReplicationWrite {
            topic: "persistent://t1/ns1/topicA".to_string(),
            attempts: 5,
            source: ClientError::new(ClientErrorKind::Timeout, "send timed out"),
        };
        assert!(err.is_retryable());
        let msg = err.to_string();
        assert!(msg.contains("topicA"));
        assert!(msg.contains("5 attempts"));
    }

    #[test]
    fn test_client_retryable_follows_kind() {
        let transient = SyncError::from(ClientError::new(ClientErrorKind::Unavailable, "down"));
        assert!(transient.is_retryable());

        let auth = SyncError::from(ClientError::new(ClientErrorKind::Unauthorized, "bad token"));
        assert!(!auth.is_retryable());
    }

    #[test]
    fn test_not_retryable_construction() {
        let err = SyncError::Construction("cannot reach source cluster".to_string());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("source cluster"));
    }

    #[test]
    fn test_shutdown_timeout_formatting() {
        let err = SyncError::ShutdownTimeout {
            component: "worker persistent://t1/ns1/a".to_string(),
            timeout: Duration::from_secs(10),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("10s"));
    }

    #[test]
    fn test_not_retryable_invalid_state() {
        let err = SyncError::InvalidState {
            expected: "Created".to_string(),
            actual: "Running".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("Created"));
        assert!(err.to_string().contains("Running"));
    }

    #[test]
    fn test_not_retryable_misc() {
        assert!(!SyncError::Shutdown.is_retryable());
        assert!(!SyncError::Config("bad".into()).is_retryable());
        assert!(!SyncError::Internal("oops".into()).is_retryable());
        assert!(!SyncError::CursorStore(sqlx::Error::RowNotFound).is_retryable());
    }
}
