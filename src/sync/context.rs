// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! State shared by every level of the manager tree.

use crate::client::BoxFuture;
use crate::config::{CursorConfig, DiscoveryConfig, OrchestratorConfig, SyncConfig, WorkerConfig};
use crate::cursor::CursorStore;
use crate::error::SyncError;
use crate::handle::EntityHandle;
use crate::metrics;
use crate::resilience::RateLimiter;
use crate::schedule::{DiscoveryPool, RepeatingTask};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Connections, configuration, and shared resources for one orchestrator.
///
/// Built once at start and handed to every manager and worker by `Arc`.
pub struct SyncContext {
    handle: EntityHandle,
    sync: SyncConfig,
    discovery: DiscoveryConfig,
    worker: WorkerConfig,
    cursor: CursorConfig,
    pool: DiscoveryPool,
    worker_runtime: Handle,
    cursor_store: Option<Arc<CursorStore>>,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl SyncContext {
    /// Discovery runs on `pool`; worker loops are spawned on `worker_runtime`.
    pub fn new(handle: EntityHandle, config: &OrchestratorConfig, pool: DiscoveryPool, worker_runtime: Handle) -> Self {
        Self {
            handle,
            sync: config.sync.clone(),
            discovery: config.discovery.clone(),
            worker: config.worker.clone(),
            cursor: config.cursor.clone(),
            pool,
            worker_runtime,
            cursor_store: None,
            rate_limiter: None,
        }
    }

    pub fn with_cursor_store(mut self, store: Arc<CursorStore>) -> Self {
        self.cursor_store = Some(store);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn handle(&self) -> &EntityHandle {
        &self.handle
    }

    pub fn sync_config(&self) -> &SyncConfig {
        &self.sync
    }

    pub fn discovery_config(&self) -> &DiscoveryConfig {
        &self.discovery
    }

    pub fn worker_config(&self) -> &WorkerConfig {
        &self.worker
    }

    pub fn cursor_config(&self) -> &CursorConfig {
        &self.cursor
    }

    pub fn pool(&self) -> &DiscoveryPool {
        &self.pool
    }

    pub fn worker_runtime(&self) -> &Handle {
        &self.worker_runtime
    }

    pub fn cursor_store(&self) -> Option<&Arc<CursorStore>> {
        self.cursor_store.as_ref()
    }

    pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
        self.rate_limiter.as_ref()
    }

    /// Run one source listing in a pool slot.
    ///
    /// Failures are logged and counted here; `None` means the pass is abandoned.
    pub(crate) async fn list(
        &self,
        level: &'static str,
        target: &str,
        call: BoxFuture<'_, Vec<String>>,
    ) -> Option<(Vec<String>, Instant)> {
        let started = Instant::now();
        match self.pool.run_listing(self.discovery.list_timeout_duration(), call).await {
            Ok(listed) => Some((listed, started)),
            Err(e) => {
                let err = SyncError::discovery(level, target, e);
                warn!(error = %err, "Discovery pass abandoned");
                metrics::record_discovery_pass(level, false, 0, started.elapsed());
                None
            }
        }
    }

    /// Create an entity on the destination. `AlreadyExists` counts as success.
    pub(crate) async fn mirror(&self, level: &'static str, target: &str, call: BoxFuture<'_, ()>) {
        match tokio::time::timeout(self.discovery.list_timeout_duration(), call).await {
            Ok(Ok(())) => {
                info!(level, target, "Created on destination");
                metrics::record_entity_mirror(level, "created");
            }
            Ok(Err(e)) if e.is_already_exists() => {
                debug!(level, target, "Already present on destination");
                metrics::record_entity_mirror(level, "exists");
            }
            Ok(Err(e)) => {
                warn!(level, target, error = %e, "Failed to create on destination");
                metrics::record_entity_mirror(level, "failed");
            }
            Err(_) => {
                warn!(level, target, "Timed out creating on destination");
                metrics::record_entity_mirror(level, "failed");
            }
        }
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("pool", &self.pool)
            .field("cursor_store", &self.cursor_store.as_ref().map(|s| s.path().to_string()))
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

/// Start-once / close-once bookkeeping plus the scheduled discovery task.
#[derive(Default)]
pub(crate) struct Lifecycle {
    started: AtomicBool,
    closed: AtomicBool,
    task: Mutex<Option<RepeatingTask>>,
}

impl Lifecycle {
    /// `true` exactly once, and never after close.
    pub fn try_start(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.started.swap(true, Ordering::SeqCst)
    }

    /// Keep `task` for cancellation, or cancel it at once if close already began.
    pub fn install(&self, task: RepeatingTask) {
        let mut slot = lock(&self.task);
        if self.closed.load(Ordering::SeqCst) {
            task.cancel();
            return;
        }
        *slot = Some(task);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// `true` for the first caller only.
    pub fn begin_close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    /// Cancel scheduled discovery and wait for a running pass to unwind.
    pub async fn stop_discovery(&self) {
        let task = lock(&self.task).take();
        if let Some(task) = task {
            task.cancel_and_wait().await;
        }
    }
}
