// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cluster collaborator traits.
//!
//! The orchestrator never speaks the broker's wire protocol itself. It drives
//! two collaborators per cluster:
//!
//! - [`AdminClient`]: hierarchy listing and entity creation
//! - [`DataClient`]: opens [`MessageReader`]s on the source and
//!   [`MessageWriter`]s on the destination
//!
//! A [`ClusterConnector`] builds both from a [`ClusterConfig`]. The in-process
//! implementation in [`crate::memory`] backs the tests; a production embedding
//! supplies its own broker bindings.
//!
//! # Implementing
//!
//! Methods return boxed futures. Futures borrow `self` only, so copy any
//! `&str` argument before the `async move` block:
//!
//! ```rust,no_run
//! use pulsar_sync::client::{AdminClient, BoxFuture};
//!
//! struct StaticAdmin;
//!
//! impl AdminClient for StaticAdmin {
//!     fn list_tenants(&self) -> BoxFuture<'_, Vec<String>> {
//!         Box::pin(async { Ok(vec!["public".to_string()]) })
//!     }
//!     fn list_namespaces(&self, tenant: &str) -> BoxFuture<'_, Vec<String>> {
//!         let tenant = tenant.to_string();
//!         Box::pin(async move { Ok(vec![format!("{}/default", tenant)]) })
//!     }
//!     fn list_topics(&self, _namespace: &str) -> BoxFuture<'_, Vec<String>> {
//!         Box::pin(async { Ok(vec![]) })
//!     }
//!     fn create_tenant(&self, _tenant: &str) -> BoxFuture<'_, ()> {
//!         Box::pin(async { Ok(()) })
//!     }
//!     fn create_namespace(&self, _namespace: &str) -> BoxFuture<'_, ()> {
//!         Box::pin(async { Ok(()) })
//!     }
//!     fn partition_count(&self, _topic: &str) -> BoxFuture<'_, u32> {
//!         Box::pin(async { Ok(0) })
//!     }
//!     fn create_topic(&self, _topic: &str, _partitions: u32) -> BoxFuture<'_, ()> {
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//! ```

use crate::config::ClusterConfig;
use crate::resilience::AttemptTimedOut;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Result type for collaborator calls.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = ClientResult<T>> + Send + 'a>>;

/// Broad classification of a collaborator failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientErrorKind {
    NotFound,
    AlreadyExists,
    Unavailable,
    Unauthorized,
    Timeout,
    Closed,
    Other,
}

impl fmt::Display for ClientErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClientErrorKind::NotFound => "not found",
            ClientErrorKind::AlreadyExists => "already exists",
            ClientErrorKind::Unavailable => "unavailable",
            ClientErrorKind::Unauthorized => "unauthorized",
            ClientErrorKind::Timeout => "timeout",
            ClientErrorKind::Closed => "closed",
            ClientErrorKind::Other => "error",
        };
        f.write_str(s)
    }
}

/// Error reported by an admin or data-plane collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ClientError {
    pub kind: ClientErrorKind,
    pub message: String,
}

impl ClientError {
    pub fn new(kind: ClientErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Unavailable, message)
    }

    pub fn closed(message: impl Into<String>) -> Self {
        Self::new(ClientErrorKind::Closed, message)
    }

    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ClientErrorKind::Unavailable | ClientErrorKind::Timeout)
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == ClientErrorKind::AlreadyExists
    }
}

impl From<AttemptTimedOut> for ClientError {
    fn from(err: AttemptTimedOut) -> Self {
        Self::new(ClientErrorKind::Timeout, err.to_string())
    }
}

/// Broker-assigned message identifier, opaque to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message as read from the source or written to the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Source-assigned id. Ignored by writers; the destination assigns its own.
    pub id: MessageId,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub properties: BTreeMap<String, String>,
    /// Producer event time, epoch millis.
    pub event_time: Option<i64>,
}

impl Message {
    pub fn new(id: MessageId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            key: None,
            payload: payload.into(),
            properties: BTreeMap::new(),
            event_time: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// Where a reader starts consuming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPosition {
    Earliest,
    Latest,
    /// Resume strictly after this message.
    After(MessageId),
}

/// Admin-interface collaborator for one cluster.
pub trait AdminClient: Send + Sync + 'static {
    fn list_tenants(&self) -> BoxFuture<'_, Vec<String>>;

    /// Namespaces of `tenant`, as `tenant/namespace` paths.
    fn list_namespaces(&self, tenant: &str) -> BoxFuture<'_, Vec<String>>;

    /// Topics of a `tenant/namespace`, including partition shards.
    fn list_topics(&self, namespace: &str) -> BoxFuture<'_, Vec<String>>;

    fn create_tenant(&self, tenant: &str) -> BoxFuture<'_, ()>;

    fn create_namespace(&self, namespace: &str) -> BoxFuture<'_, ()>;

    /// Partition count of a logical topic; `0` for a non-partitioned topic.
    fn partition_count(&self, topic: &str) -> BoxFuture<'_, u32>;

    /// Create a topic; `partitions == 0` creates a non-partitioned topic.
    fn create_topic(&self, topic: &str, partitions: u32) -> BoxFuture<'_, ()>;
}

/// Data-plane collaborator for one cluster.
pub trait DataClient: Send + Sync + 'static {
    fn open_reader(&self, topic: &str, start: StartPosition) -> BoxFuture<'_, Arc<dyn MessageReader>>;

    fn open_writer(&self, topic: &str) -> BoxFuture<'_, Arc<dyn MessageWriter>>;
}

/// Consumer-side handle on one source topic.
pub trait MessageReader: Send + Sync + 'static {
    /// Wait for the next message.
    fn read_next(&self) -> BoxFuture<'_, Message>;

    fn acknowledge(&self, id: &MessageId) -> BoxFuture<'_, ()>;

    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Producer-side handle on one destination topic.
pub trait MessageWriter: Send + Sync + 'static {
    /// Write and wait for the broker's confirmation.
    fn write<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, MessageId>;

    fn flush(&self) -> BoxFuture<'_, ()>;

    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Both collaborators for one cluster.
#[derive(Clone)]
pub struct ClusterConnection {
    pub admin: Arc<dyn AdminClient>,
    pub client: Arc<dyn DataClient>,
}

/// Builds a [`ClusterConnection`] from connection settings.
pub trait ClusterConnector: Send + Sync {
    fn connect<'a>(&'a self, config: &'a ClusterConfig) -> BoxFuture<'a, ClusterConnection>;
}
