// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-topic replication loop.
//!
//! Each [`PartitionSyncWorker`] owns one reader on the source topic and one
//! writer on the identically named destination topic. The loop runs on the
//! worker runtime, which is the caller's runtime unless the orchestrator was
//! given dedicated ones.
//!
//! # Pipeline
//!
//! ```text
//!  window.acquire() ─► read_next() ─► channel ─► write (retry) ─► acknowledge ─► cursor
//!        ▲                                                                        │
//!        └──────────────────── permit released ◄──────────────────────────────────┘
//! ```
//!
//! A permit from the in-flight window is taken before every read and released
//! only after the source acknowledgement, so the reader never runs more than
//! `max_in_flight` messages ahead of the writer. Reads, writes, and acks all
//! happen in source order on a single task.
//!
//! # Failure Handling
//!
//! - Read errors back off and retry indefinitely.
//! - A write is retried with bounded exponential backoff. An attempt that
//!   outlives `attempt_timeout` is abandoned and counts as a failed attempt.
//!   When the budget is spent the worker suspends: reading stops and nothing
//!   is dropped.
//! - An acknowledgement failure is logged; the message is redelivered later
//!   (at-least-once).
//!
//! # Graceful Shutdown
//!
//! `close()` stops the reader, lets the write already in progress finish,
//! and waits up to `close_timeout` for the loop to exit. Past the deadline the
//! loop is aborted and the timeout logged. Both handles are then closed.

use super::context::{lock, SyncContext};
use super::types::{WorkerState, WorkerStats};
use crate::client::{ClientErrorKind, ClientResult, Message, MessageReader, MessageWriter, StartPosition};
use crate::entity::TenantNamespaceTopic;
use crate::error::SyncError;
use crate::metrics;
use crate::resilience::{retry_until_shutdown, Bulkhead, RetryOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Replicates one logical topic from source to destination.
pub struct PartitionSyncWorker {
    shared: Arc<WorkerShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct WorkerShared {
    topic: TenantNamespaceTopic,
    name: String,
    ctx: Arc<SyncContext>,
    state_tx: watch::Sender<WorkerState>,
    shutdown_tx: watch::Sender<bool>,
    window: Bulkhead,
    reader: Mutex<Option<Arc<dyn MessageReader>>>,
    writer: Mutex<Option<Arc<dyn MessageWriter>>>,
    read: AtomicU64,
    replicated: AtomicU64,
    write_retries: AtomicU64,
    ack_failures: AtomicU64,
}

struct InFlight {
    message: Message,
    read_at: Instant,
    _permit: OwnedSemaphorePermit,
}

impl PartitionSyncWorker {
    pub fn new(ctx: Arc<SyncContext>, topic: TenantNamespaceTopic) -> Self {
        let (state_tx, _) = watch::channel(WorkerState::Created);
        let (shutdown_tx, _) = watch::channel(false);
        let window = Bulkhead::new(ctx.worker_config().max_in_flight.max(1));
        let name = topic.topic();
        Self {
            shared: Arc::new(WorkerShared {
                topic,
                name,
                ctx,
                state_tx,
                shutdown_tx,
                window,
                reader: Mutex::new(None),
                writer: Mutex::new(None),
                read: AtomicU64::new(0),
                replicated: AtomicU64::new(0),
                write_retries: AtomicU64::new(0),
                ack_failures: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    /// Spawn the replication loop on the worker runtime.
    ///
    /// Only the first call on a `Created` worker does anything.
    pub fn start(&self) {
        if !self.shared.transition(|s| s == WorkerState::Created, WorkerState::Starting) {
            debug!(topic = %self.shared.name, state = %self.state(), "Worker start ignored");
            return;
        }

        let shared = Arc::clone(&self.shared);
        let span = info_span!("partition_worker", topic = %self.shared.name);
        let handle = self
            .shared
            .ctx
            .worker_runtime()
            .spawn(run(shared).instrument(span));
        *lock(&self.task) = Some(handle);
    }

    /// Stop the loop and release both handles within `close_timeout`.
    ///
    /// Safe to call more than once and from any state.
    pub async fn close(&self) {
        if !self.shared.transition(|s| !s.is_shutting_down(), WorkerState::Closing) {
            return;
        }
        let name = &self.shared.name;
        info!(topic = %name, "Closing worker");

        self.shared.shutdown_tx.send_replace(true);
        self.shared.window.close();

        let timeout = self.shared.ctx.worker_config().close_timeout_duration();
        let task = lock(&self.task).take();
        if let Some(mut task) = task {
            match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(())) => debug!(topic = %name, "Worker loop stopped"),
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => warn!(topic = %name, error = %e, "Worker loop panicked"),
                Err(_) => {
                    task.abort();
                    let err = SyncError::ShutdownTimeout {
                        component: format!("worker {}", name),
                        timeout,
                    };
                    error!(error = %err, "Worker loop force-released");
                    metrics::record_shutdown_timeout("worker");
                }
            }
        }

        self.shared.release_handles(timeout).await;
        self.shared.transition(|_| true, WorkerState::Closed);
        metrics::set_in_flight(name, 0);
        info!(topic = %name, "Worker closed");
    }

    pub fn state(&self) -> WorkerState {
        *self.shared.state_tx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<WorkerState> {
        self.shared.state_tx.subscribe()
    }

    /// Messages read but not yet acknowledged on the source.
    pub fn in_flight(&self) -> usize {
        self.shared.window.in_use()
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            read: self.shared.read.load(Ordering::Relaxed),
            replicated: self.shared.replicated.load(Ordering::Relaxed),
            write_retries: self.shared.write_retries.load(Ordering::Relaxed),
            ack_failures: self.shared.ack_failures.load(Ordering::Relaxed),
        }
    }

    pub fn topic(&self) -> &TenantNamespaceTopic {
        &self.shared.topic
    }
}

impl std::fmt::Debug for PartitionSyncWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionSyncWorker")
            .field("topic", &self.shared.name)
            .field("state", &self.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl WorkerShared {
    /// Move to `next` if `allowed(current)`. Returns whether it moved.
    fn transition(&self, allowed: impl Fn(WorkerState) -> bool, next: WorkerState) -> bool {
        let moved = self.state_tx.send_if_modified(|state| {
            if allowed(*state) && *state != next {
                *state = next;
                true
            } else {
                false
            }
        });
        if moved {
            metrics::record_worker_state(&self.name, next.as_str());
        }
        moved
    }

    fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn suspend(&self, cause: SyncError) {
        if self.transition(
            |s| matches!(s, WorkerState::Starting | WorkerState::Running),
            WorkerState::SuspendedOnError,
        ) {
            self.window.close();
            error!(error = %cause, "Worker suspended; replication stopped until restart");
            metrics::record_suspension(&self.name);
        }
    }

    async fn mirror_topic(&self) {
        let ctx = &self.ctx;
        let partitions = match ctx.handle().source_admin().partition_count(&self.name).await {
            Ok(partitions) => partitions,
            Err(e) => {
                warn!(error = %e, "Could not read source partition count; destination topic not created");
                metrics::record_entity_mirror("topic", "failed");
                return;
            }
        };
        ctx.mirror("topic", &self.name, ctx.handle().destination_admin().create_topic(&self.name, partitions))
            .await;
    }

    async fn open_handles(&self, start: StartPosition) -> ClientResult<(Arc<dyn MessageReader>, Arc<dyn MessageWriter>)> {
        // Left behind by an attempt that timed out after the reader opened
        let stale = lock(&self.reader).take();
        if let Some(stale) = stale {
            let _ = stale.close().await;
        }

        let handle = self.ctx.handle();
        let reader = handle.source_client().open_reader(&self.name, start).await?;
        *lock(&self.reader) = Some(Arc::clone(&reader));

        match handle.destination_client().open_writer(&self.name).await {
            Ok(writer) => {
                *lock(&self.writer) = Some(Arc::clone(&writer));
                Ok((reader, writer))
            }
            Err(e) => {
                let stale = lock(&self.reader).take();
                if let Some(stale) = stale {
                    let _ = stale.close().await;
                }
                Err(e)
            }
        }
    }

    /// Flush and close the writer, then close the reader, each bounded by `timeout`.
    async fn release_handles(&self, timeout: Duration) {
        let writer = lock(&self.writer).take();
        if let Some(writer) = writer {
            match tokio::time::timeout(timeout, writer.flush()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(topic = %self.name, error = %e, "Writer flush failed"),
                Err(_) => warn!(topic = %self.name, "Writer flush timed out"),
            }
            self.close_handle("writer", writer.close(), timeout).await;
        }

        let reader = lock(&self.reader).take();
        if let Some(reader) = reader {
            self.close_handle("reader", reader.close(), timeout).await;
        }
    }

    async fn close_handle(
        &self,
        kind: &'static str,
        close: crate::client::BoxFuture<'_, ()>,
        timeout: Duration,
    ) {
        match tokio::time::timeout(timeout, close).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(topic = %self.name, handle = kind, error = %e, "Handle close failed"),
            Err(_) => {
                let err = SyncError::ShutdownTimeout {
                    component: format!("{} on {}", kind, self.name),
                    timeout,
                };
                error!(error = %err, "Handle close abandoned");
                metrics::record_shutdown_timeout("handle");
            }
        }
    }
}

/// Resolves once shutdown is signalled.
async fn shutdown_signalled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn run(shared: Arc<WorkerShared>) {
    let ctx = Arc::clone(&shared.ctx);
    let name = shared.name.as_str();
    let mut shutdown_rx = shared.shutdown_tx.subscribe();
    info!("Starting worker");

    if ctx.sync_config().mirror_entities {
        shared.mirror_topic().await;
    }

    let start = match ctx.cursor_store() {
        Some(store) => store.resume_position(name, ctx.cursor_config().initial_position).await,
        None => ctx.cursor_config().initial_position.into(),
    };
    debug!(start = ?start, "Opening reader and writer");

    let opened = retry_until_shutdown(
        &ctx.worker_config().open_retry(),
        &mut shutdown_rx,
        |_| shared.open_handles(start.clone()),
        |attempt, e| warn!(attempt, error = %e, "Failed to open handles, retrying"),
    )
    .await;

    let (reader, writer) = match opened {
        RetryOutcome::Done { value, .. } => value,
        RetryOutcome::Exhausted { attempts, last_error } => {
            metrics::record_error(name, "open");
            warn!(attempts, "Open retry budget exhausted");
            shared.suspend(SyncError::Client(last_error));
            return;
        }
        RetryOutcome::Cancelled => return,
    };

    if !shared.transition(|s| s == WorkerState::Starting, WorkerState::Running) {
        return;
    }
    info!("Worker running");

    let (tx, mut rx) = mpsc::channel::<InFlight>(ctx.worker_config().max_in_flight.max(1));
    let mut read_shutdown = shutdown_rx.clone();
    let mut write_shutdown = shutdown_rx;
    let read_backoff = ctx.worker_config().read_error_backoff_duration();
    let write_retry = ctx.worker_config().write_retry();

    let reading = async {
        let tx = tx;
        loop {
            let permit = match shared.window.acquire().await {
                Ok(permit) => permit,
                Err(_) => return None,
            };
            let next = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut read_shutdown) => return None,
                next = reader.read_next() => next,
            };
            match next {
                Ok(message) => {
                    shared.read.fetch_add(1, Ordering::Relaxed);
                    metrics::record_messages_read(name, 1);
                    metrics::set_in_flight(name, shared.window.in_use());
                    let in_flight = InFlight {
                        message,
                        read_at: Instant::now(),
                        _permit: permit,
                    };
                    if tx.send(in_flight).await.is_err() {
                        return None;
                    }
                }
                Err(e) if e.kind == ClientErrorKind::Closed => {
                    if shared.is_shutdown() {
                        return None;
                    }
                    return Some(SyncError::Client(e));
                }
                Err(e) => {
                    drop(permit);
                    warn!(error = %e, "Source read failed");
                    metrics::record_error(name, "read");
                    tokio::select! {
                        biased;
                        _ = shutdown_signalled(&mut read_shutdown) => return None,
                        _ = tokio::time::sleep(read_backoff) => {}
                    }
                }
            }
        }
    };

    let forwarding = async {
        while let Some(in_flight) = rx.recv().await {
            let message = &in_flight.message;
            if let Some(limiter) = ctx.rate_limiter() {
                limiter.acquire().await;
            }

            let outcome = retry_until_shutdown(
                &write_retry,
                &mut write_shutdown,
                |_| writer.write(message),
                |attempt, e| {
                    shared.write_retries.fetch_add(1, Ordering::Relaxed);
                    metrics::record_write_retry(name);
                    warn!(attempt, message_id = %message.id, error = %e, "Destination write failed, retrying");
                },
            )
            .await;

            match outcome {
                RetryOutcome::Done { .. } => {}
                RetryOutcome::Exhausted { attempts, last_error } => {
                    metrics::record_error(name, "write");
                    return Some(SyncError::ReplicationWrite {
                        topic: name.to_string(),
                        attempts,
                        source: last_error,
                    });
                }
                RetryOutcome::Cancelled => return None,
            }

            if let Err(e) = reader.acknowledge(&message.id).await {
                shared.ack_failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_error(name, "ack");
                warn!(message_id = %message.id, error = %e, "Source acknowledgement failed; message will be redelivered");
            }
            if let Some(store) = ctx.cursor_store() {
                store.set(name, &message.id).await;
            }

            shared.replicated.fetch_add(1, Ordering::Relaxed);
            metrics::record_messages_replicated(name, 1);
            metrics::record_replication_latency(name, in_flight.read_at.elapsed());
            drop(in_flight);
            metrics::set_in_flight(name, shared.window.in_use());
        }
        None
    };

    tokio::pin!(reading);
    tokio::pin!(forwarding);

    let first = tokio::select! {
        biased;
        failure = &mut forwarding => Ok(failure),
        read_failure = &mut reading => Err(read_failure),
    };
    let failure = match first {
        Ok(write_failure) => write_failure,
        // Reader is done; the writer finishes what is already queued
        Err(read_failure) => {
            let write_failure = forwarding.await;
            read_failure.or(write_failure)
        }
    };

    if let Some(cause) = failure {
        shared.suspend(cause);
    } else {
        debug!("Worker loop exiting");
    }
}
