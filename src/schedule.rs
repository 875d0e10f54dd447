// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Discovery scheduling.
//!
//! - [`DiscoveryPool`]: the bounded pool every discovery pass in the tree
//!   shares. At most `size` admin listing calls are in flight at once.
//! - [`RepeatingTask`]: a fixed-delay task that starts immediately and can be
//!   cancelled deterministically.
//!
//! # Cancellation
//!
//! ```text
//!   gate check ──► pass ──► sleep(interval) ──► gate check ──► ...
//!       ▲
//!   cancel() flips the gate under the same lock, then aborts the task
//! ```
//!
//! Once `cancel()` returns no new pass is admitted. A pass already running is
//! interrupted at its next await point; `cancel_and_wait()` also waits for the
//! task to be gone.

use crate::client::{ClientError, ClientErrorKind, ClientResult};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

/// Shared bounded pool for discovery work.
#[derive(Clone)]
pub struct DiscoveryPool {
    runtime: Handle,
    permits: Arc<Semaphore>,
    size: usize,
}

impl DiscoveryPool {
    /// Pool of `size` slots whose tasks run on `runtime`.
    pub fn new(runtime: Handle, size: usize) -> Self {
        let size = size.max(1);
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Runtime that repeating discovery tasks are spawned on.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Run one admin listing call in a pool slot, bounded by `timeout`.
    ///
    /// Fails with `Closed` once the pool is shut down and with `Timeout`
    /// when the call overruns.
    pub async fn run_listing<T, F>(&self, timeout: Duration, call: F) -> ClientResult<T>
    where
        F: Future<Output = ClientResult<T>>,
    {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ClientError::closed("discovery pool shut down"))?;

        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::new(
                ClientErrorKind::Timeout,
                format!("listing exceeded {:?}", timeout),
            )),
        }
    }

    /// Refuse further listing calls; callers waiting for a slot fail with `Closed`.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    pub fn is_shutdown(&self) -> bool {
        self.permits.is_closed()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Slots currently held by running listing calls.
    pub fn in_use(&self) -> usize {
        self.size.saturating_sub(self.permits.available_permits())
    }
}

impl std::fmt::Debug for DiscoveryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryPool")
            .field("size", &self.size)
            .field("in_use", &self.in_use())
            .finish()
    }
}

struct Gate {
    cancelled: Mutex<bool>,
    passes: AtomicUsize,
}

impl Gate {
    /// Admit the next pass unless cancelled. Admission is counted under the lock.
    fn admit(&self) -> bool {
        let cancelled = match self.cancelled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *cancelled {
            return false;
        }
        self.passes.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn cancel(&self) {
        let mut cancelled = match self.cancelled.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cancelled = true;
    }

    fn is_cancelled(&self) -> bool {
        match self.cancelled.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Fixed-delay repeating task: run, wait `interval`, run again.
pub struct RepeatingTask {
    name: &'static str,
    gate: Arc<Gate>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RepeatingTask {
    /// Spawn on the pool's runtime. The first pass starts immediately.
    pub fn spawn<F, Fut>(pool: &DiscoveryPool, name: &'static str, interval: Duration, mut pass: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let gate = Arc::new(Gate {
            cancelled: Mutex::new(false),
            passes: AtomicUsize::new(0),
        });

        let loop_gate = Arc::clone(&gate);
        let span = tracing::debug_span!("repeating_task", task = name);
        let handle = pool.runtime().spawn(
            async move {
                loop {
                    if !loop_gate.admit() {
                        break;
                    }
                    pass().await;
                    tokio::time::sleep(interval).await;
                }
                debug!("Repeating task stopped");
            }
            .instrument(span),
        );

        Self {
            name,
            gate,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop admitting passes and abort the task. Returns without waiting.
    pub fn cancel(&self) {
        self.gate.cancel();
        if let Some(handle) = self.lock_handle().as_ref() {
            handle.abort();
        }
    }

    /// Cancel, then wait for the task to finish unwinding.
    pub async fn cancel_and_wait(&self) {
        self.cancel();
        let handle = self.lock_handle().take();
        if let Some(handle) = handle {
            match handle.await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) => warn!(task = self.name, error = %e, "Repeating task panicked"),
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.gate.is_cancelled()
    }

    /// Passes admitted so far.
    pub fn passes(&self) -> usize {
        self.gate.passes.load(Ordering::SeqCst)
    }

    fn lock_handle(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for RepeatingTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
