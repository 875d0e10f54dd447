//! # Pulsar Sync
//!
//! Mirrors the tenant → namespace → topic hierarchy of a source cluster onto
//! a destination cluster and replicates every topic's message stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                             pulsar-sync                                │
//! │                                                                        │
//! │  ┌───────────────────┐   ┌──────────────────────┐   ┌────────────────┐ │
//! │  │ TenantSyncManager │──►│ NamespaceSyncManager │──►│TopicSyncManager│ │
//! │  │ (list_tenants)    │   │ (list_namespaces)    │   │ (list_topics)  │ │
//! │  └───────────────────┘   └──────────────────────┘   └───────┬────────┘ │
//! │           ▲ rediscovery on the shared DiscoveryPool         │          │
//! │                                                             ▼          │
//! │  ┌─────────────┐                              ┌─────────────────────┐  │
//! │  │ CursorStore │◄─────── last acked id ───────│ PartitionSyncWorker │  │
//! │  │ (SQLite)    │                              │ read → write → ack  │  │
//! │  └─────────────┘                              └─────────────────────┘  │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each level keeps exactly one child per discovered entity, created on first
//! sight and never duplicated under concurrent passes. Workers run outside the
//! discovery pool so replication cannot starve rediscovery.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use pulsar_sync::{OrchestratorConfig, SyncOrchestrator};
//! use pulsar_sync::memory::{InMemoryCluster, InMemoryConnector};
//!
//! #[tokio::main]
//! async fn main() {
//!     let connector = InMemoryConnector::new();
//!     connector.register("east", InMemoryCluster::new("east"));
//!     connector.register("west", InMemoryCluster::new("west"));
//!
//!     let config = OrchestratorConfig::for_testing("east", "west");
//!     let orchestrator = SyncOrchestrator::connect(config, &connector)
//!         .await
//!         .expect("Failed to connect");
//!     orchestrator.start().await.expect("Failed to start");
//!
//!     // Runs until closed
//!     orchestrator.close().await;
//! }
//! ```

pub mod client;
pub mod config;
pub mod cursor;
pub mod entity;
pub mod error;
pub mod handle;
pub mod memory;
pub mod metrics;
pub mod registry;
pub mod resilience;
pub mod schedule;
pub mod sync;

// Re-exports for convenience
pub use client::{
    AdminClient, ClientError, ClientErrorKind, ClusterConnection, ClusterConnector, DataClient, Message, MessageId,
    MessageReader, MessageWriter, StartPosition,
};
pub use config::{ClusterConfig, CursorConfig, DiscoveryConfig, OrchestratorConfig, SyncConfig, WorkerConfig};
pub use cursor::CursorStore;
pub use entity::{TenantIdentity, TenantNamespace, TenantNamespaceTopic, TopicDomain};
pub use error::{Result, SyncError};
pub use handle::EntityHandle;
pub use sync::{
    HealthSnapshot, NamespaceSyncManager, OrchestratorState, PartitionSyncWorker, SyncOrchestrator, TenantSyncManager,
    TopicSyncManager, WorkerState, WorkerStats,
};
