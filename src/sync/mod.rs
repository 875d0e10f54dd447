// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync orchestrator and the discovery tree it owns.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          SyncOrchestrator                           │
//! │  ┌──────────────┐   ┌──────────────────┐   ┌──────────────────────┐ │
//! │  │ EntityHandle │   │  DiscoveryPool   │   │ CursorStore (SQLite) │ │
//! │  └──────────────┘   └──────────────────┘   └──────────────────────┘ │
//! │                                                                     │
//! │  TenantSyncManager ─┬─ NamespaceSyncManager ─┬─ TopicSyncManager ─┬─ PartitionSyncWorker
//! │                     │                        │                    └─ PartitionSyncWorker
//! │                     │                        └─ TopicSyncManager ─── ...
//! │                     └─ NamespaceSyncManager ─── ...
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every manager rediscovers on its own fixed delay using the shared
//! [`DiscoveryPool`](crate::schedule::DiscoveryPool). By default discovery
//! tasks and worker loops both run on the runtime that calls
//! [`SyncOrchestrator::start`]. [`SyncOrchestrator::with_runtimes`] moves them
//! onto separate runtimes so long-lived replication cannot starve discovery.
//! Shutdown runs top-down: cancel discovery, then close children.

mod context;
mod namespace;
mod tenant;
mod topic;
mod types;
mod worker;

pub use context::SyncContext;
pub use namespace::NamespaceSyncManager;
pub use tenant::TenantSyncManager;
pub use topic::TopicSyncManager;
pub use types::{HealthSnapshot, OrchestratorState, WorkerState, WorkerStats};
pub use worker::PartitionSyncWorker;

use crate::client::ClusterConnector;
use crate::config::{CursorMode, OrchestratorConfig};
use crate::cursor::CursorStore;
use crate::error::{Result, SyncError};
use crate::handle::EntityHandle;
use crate::metrics;
use crate::resilience::RateLimiter;
use crate::schedule::DiscoveryPool;
use context::lock;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Owns the entity handle, the shared discovery pool, and the manager tree.
///
/// # Example
///
/// ```rust,no_run
/// use pulsar_sync::config::OrchestratorConfig;
/// use pulsar_sync::memory::{InMemoryCluster, InMemoryConnector};
/// use pulsar_sync::SyncOrchestrator;
///
/// # async fn example() -> pulsar_sync::Result<()> {
/// let connector = InMemoryConnector::new();
/// connector.register("east", InMemoryCluster::new("east"));
/// connector.register("west", InMemoryCluster::new("west"));
///
/// let config = OrchestratorConfig::for_testing("east", "west");
/// let orchestrator = SyncOrchestrator::connect(config, &connector).await?;
/// orchestrator.start().await?;
/// // ...
/// orchestrator.close().await;
/// # Ok(())
/// # }
/// ```
pub struct SyncOrchestrator {
    config: OrchestratorConfig,
    handle: EntityHandle,
    discovery_runtime: Option<Handle>,
    worker_runtime: Option<Handle>,

    state_tx: watch::Sender<OrchestratorState>,
    state_rx: watch::Receiver<OrchestratorState>,
    shutdown_tx: watch::Sender<bool>,

    pool: Mutex<Option<DiscoveryPool>>,
    tenants: Mutex<Option<Arc<TenantSyncManager>>>,
    cursor_store: Mutex<Option<Arc<CursorStore>>>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncOrchestrator {
    /// Connect to both clusters and build the orchestrator.
    ///
    /// Fails with [`SyncError::Construction`] when either cluster cannot be reached.
    pub async fn connect(config: OrchestratorConfig, connector: &dyn ClusterConnector) -> Result<Self> {
        config.validate()?;

        let source = connector.connect(&config.source).await.map_err(|e| {
            SyncError::Construction(format!("source cluster {}: {}", config.source.admin_url(), e))
        })?;
        let destination = connector.connect(&config.destination).await.map_err(|e| {
            SyncError::Construction(format!(
                "destination cluster {}: {}",
                config.destination.admin_url(),
                e
            ))
        })?;

        info!(
            source = %config.source.service_url(),
            destination = %config.destination.service_url(),
            "Connected to clusters"
        );
        Self::new(config, EntityHandle::from_connections(source, destination))
    }

    /// Build from an existing entity handle.
    pub fn new(config: OrchestratorConfig, handle: EntityHandle) -> Result<Self> {
        config.validate()?;
        let (state_tx, state_rx) = watch::channel(OrchestratorState::Created);
        let (shutdown_tx, _) = watch::channel(false);
        metrics::set_orchestrator_state("Created");

        Ok(Self {
            config,
            handle,
            discovery_runtime: None,
            worker_runtime: None,
            state_tx,
            state_rx,
            shutdown_tx,
            pool: Mutex::new(None),
            tenants: Mutex::new(None),
            cursor_store: Mutex::new(None),
            flush_task: Mutex::new(None),
        })
    }

    /// Run discovery and worker loops on dedicated runtimes instead of the
    /// runtime that calls `start()`.
    ///
    /// Without this, both share the caller's runtime. The runtimes must
    /// outlive the orchestrator and must not be dropped from async context.
    ///
    /// ```rust,no_run
    /// use pulsar_sync::config::OrchestratorConfig;
    /// use pulsar_sync::memory::InMemoryCluster;
    /// use pulsar_sync::{EntityHandle, SyncOrchestrator};
    /// use std::sync::Arc;
    ///
    /// # fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let discovery = tokio::runtime::Builder::new_multi_thread()
    ///     .thread_name("discovery")
    ///     .enable_all()
    ///     .build()?;
    /// let workers = tokio::runtime::Builder::new_multi_thread()
    ///     .thread_name("sync-worker")
    ///     .enable_all()
    ///     .build()?;
    ///
    /// let east = Arc::new(InMemoryCluster::new("east"));
    /// let west = Arc::new(InMemoryCluster::new("west"));
    /// let handle = EntityHandle::new(east.clone(), west.clone(), east, west);
    /// let orchestrator = SyncOrchestrator::new(OrchestratorConfig::for_testing("east", "west"), handle)?
    ///     .with_runtimes(discovery.handle().clone(), workers.handle().clone());
    ///
    /// workers.block_on(async {
    ///     orchestrator.start().await?;
    ///     orchestrator.close().await;
    ///     Ok::<_, pulsar_sync::SyncError>(())
    /// })?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_runtimes(mut self, discovery: Handle, workers: Handle) -> Self {
        self.discovery_runtime = Some(discovery);
        self.worker_runtime = Some(workers);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state_rx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<OrchestratorState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state() == OrchestratorState::Running
    }

    /// Root of the manager tree, once started.
    pub fn tenant_manager(&self) -> Option<Arc<TenantSyncManager>> {
        lock(&self.tenants).clone()
    }

    /// Every worker in the tree.
    pub fn workers(&self) -> Vec<Arc<PartitionSyncWorker>> {
        let Some(tenants) = self.tenant_manager() else {
            return Vec::new();
        };
        tenants
            .namespace_managers()
            .iter()
            .flat_map(|ns| ns.topic_managers())
            .flat_map(|topics| topics.workers())
            .collect()
    }

    /// Tree counts and worker states. No cluster I/O.
    pub fn health(&self) -> HealthSnapshot {
        let state = self.state();
        let (tenants, namespaces) = match self.tenant_manager() {
            Some(root) => {
                let namespaces = root.namespace_managers().iter().map(|ns| ns.len()).sum::<usize>();
                (root.len(), namespaces)
            }
            None => (0, 0),
        };

        let workers = self.workers();
        let running_workers = workers.iter().filter(|w| w.state() == WorkerState::Running).count();
        let suspended_workers = workers
            .iter()
            .filter(|w| w.state() == WorkerState::SuspendedOnError)
            .count();

        HealthSnapshot {
            state,
            tenants,
            namespaces,
            workers: workers.len(),
            running_workers,
            suspended_workers,
            healthy: state == OrchestratorState::Running && suspended_workers == 0,
        }
    }

    fn transition(&self, allowed: impl Fn(OrchestratorState) -> bool, next: OrchestratorState) -> bool {
        let moved = self.state_tx.send_if_modified(|state| {
            if allowed(*state) && *state != next {
                *state = next;
                true
            } else {
                false
            }
        });
        if moved {
            metrics::set_orchestrator_state(&next.to_string());
        }
        moved
    }

    /// Start the orchestrator.
    ///
    /// 1. Probes both admin interfaces
    /// 2. Opens the cursor store (persisted mode)
    /// 3. Starts tenant discovery, which cascades down the tree
    /// 4. Spawns the cursor flush task
    ///
    /// Any failure tears down what was started and leaves the orchestrator `Failed`.
    pub async fn start(&self) -> Result<()> {
        if !self.transition(|s| s == OrchestratorState::Created, OrchestratorState::Starting) {
            return Err(SyncError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        info!(
            source = %self.config.source.admin_url(),
            destination = %self.config.destination.admin_url(),
            "Starting sync orchestrator"
        );

        if let Err(e) = self.start_tree().await {
            error!(error = %e, "Sync orchestrator failed to start");
            self.teardown().await;
            self.transition(|_| true, OrchestratorState::Failed);
            return Err(e);
        }

        if !self.transition(|s| s == OrchestratorState::Starting, OrchestratorState::Running) {
            // close() ran while the tree was being built and may have missed it
            self.teardown().await;
            return Err(SyncError::Shutdown);
        }

        let health = self.health();
        info!(
            tenants = health.tenants,
            namespaces = health.namespaces,
            workers = health.workers,
            "Sync orchestrator running"
        );
        Ok(())
    }

    async fn start_tree(&self) -> Result<()> {
        let current = Handle::try_current()
            .map_err(|e| SyncError::Construction(format!("no tokio runtime: {}", e)))?;
        let pool = DiscoveryPool::new(
            self.discovery_runtime.clone().unwrap_or_else(|| current.clone()),
            self.config.discovery.pool_size,
        );
        *lock(&self.pool) = Some(pool.clone());

        let timeout = self.config.discovery.list_timeout_duration();
        for (role, admin) in [
            ("source", self.handle.source_admin()),
            ("destination", self.handle.destination_admin()),
        ] {
            pool.run_listing(timeout, admin.list_tenants())
                .await
                .map_err(|e| SyncError::Construction(format!("{} admin unreachable: {}", role, e)))?;
        }

        let mut ctx = SyncContext::new(
            self.handle.clone(),
            &self.config,
            pool,
            self.worker_runtime.clone().unwrap_or(current),
        );

        if self.config.cursor.mode == CursorMode::Persisted {
            let path = &self.config.cursor.sqlite_path;
            let store = CursorStore::new(path)
                .await
                .map_err(|e| SyncError::Construction(format!("cursor store {}: {}", path, e)))?;
            let store = Arc::new(store);
            *lock(&self.cursor_store) = Some(Arc::clone(&store));
            self.spawn_cursor_flush_task(Arc::clone(&store));
            ctx = ctx.with_cursor_store(store);
        }

        if let Some(rate_limit) = self.config.worker.rate_limit_config() {
            info!(
                rate_per_sec = rate_limit.refill_rate,
                burst = rate_limit.burst_size,
                "Rate limiting enabled for workers"
            );
            ctx = ctx.with_rate_limiter(Arc::new(RateLimiter::new(rate_limit)));
        }

        let tenants = TenantSyncManager::new(Arc::new(ctx));
        *lock(&self.tenants) = Some(Arc::clone(&tenants));
        tenants.start().await;
        Ok(())
    }

    /// Periodically flush dirty cursors to SQLite.
    fn spawn_cursor_flush_task(&self, store: Arc<CursorStore>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let flush_interval = self.config.cursor.flush_interval_duration();

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(flush_interval);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        if let Err(e) = store.flush_dirty().await {
                            warn!(error = %e, "Failed to flush cursors");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!("Cursor flush task stopping");
                            break;
                        }
                    }
                }
            }
        });

        debug!("Spawned cursor flush task");
        *lock(&self.flush_task) = Some(handle);
    }

    /// Close the tree, stop background tasks, and persist cursors.
    ///
    /// Idempotent; bounded by the workers' close timeout plus one flush.
    pub async fn close(&self) {
        if self.transition(|s| s == OrchestratorState::Created, OrchestratorState::Closed) {
            info!("Sync orchestrator closed before start");
            return;
        }
        if !self.transition(
            |s| matches!(s, OrchestratorState::Starting | OrchestratorState::Running),
            OrchestratorState::Closing,
        ) {
            return;
        }

        info!("Closing sync orchestrator");
        self.teardown().await;
        self.transition(|_| true, OrchestratorState::Closed);
        info!("Sync orchestrator closed");
    }

    async fn teardown(&self) {
        let tenants = lock(&self.tenants).clone();
        if let Some(tenants) = tenants {
            tenants.close().await;
        }

        self.shutdown_tx.send_replace(true);
        let pool = lock(&self.pool).clone();
        if let Some(pool) = pool {
            pool.shutdown();
        }

        let flush_task = lock(&self.flush_task).take();
        if let Some(flush_task) = flush_task {
            let timeout = self.config.worker.close_timeout_duration();
            match tokio::time::timeout(timeout, flush_task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Cursor flush task panicked during shutdown"),
                Err(_) => {
                    warn!("Cursor flush task timed out during shutdown");
                    metrics::record_shutdown_timeout("cursor_flush");
                }
            }
        }

        let store = lock(&self.cursor_store).take();
        if let Some(store) = store {
            store.close().await;
        }
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("state", &self.state())
            .field("source", &self.config.source.broker_host)
            .field("destination", &self.config.destination.broker_host)
            .finish()
    }
}
