//! Lifecycle state types for workers and the orchestrator.
//!
//! # Worker State Transitions
//!
//! ```text
//!            start()                (handles open)
//! Created ───────────→ Starting ───────────────────→ Running
//!    │                    │                            │   │
//!    │                    │ (open retries exhausted)   │   │ (write retries exhausted)
//!    │                    └──────────┐   ┌─────────────┘   │
//!    │                               ↓   ↓                 │
//!    │                         SuspendedOnError            │
//!    │                               │                     │
//!    │ close()                close()│              close()│
//!    ↓                               ↓                     ↓
//!  Closed ←──────────────────────── Closing ←──────────────┘
//! ```
//!
//! `Closed` is terminal. A worker is never restarted; a fresh one is built.
//!
//! # Orchestrator States
//!
//! - **Created**: built, nothing running.
//! - **Starting**: cursor store opened, tree being discovered.
//! - **Running**: discovery scheduled and workers replicating.
//! - **Closing**: `close()` in progress.
//! - **Closed**: every task and handle released.
//! - **Failed**: `start()` failed; everything it started was torn down.

use std::fmt;

/// State of one [`PartitionSyncWorker`](super::PartitionSyncWorker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    Created,
    /// Opening the source reader and destination writer.
    Starting,
    /// Forwarding messages.
    Running,
    /// Stopped reading after a retry budget ran out. Needs operator action.
    SuspendedOnError,
    Closing,
    Closed,
}

impl WorkerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Created => "Created",
            WorkerState::Starting => "Starting",
            WorkerState::Running => "Running",
            WorkerState::SuspendedOnError => "SuspendedOnError",
            WorkerState::Closing => "Closing",
            WorkerState::Closed => "Closed",
        }
    }

    /// `Closing` or `Closed`.
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, WorkerState::Closing | WorkerState::Closed)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of the [`SyncOrchestrator`](super::SyncOrchestrator).
///
/// See module docs for descriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Created,
    Starting,
    Running,
    Closing,
    Closed,
    Failed,
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorState::Created => write!(f, "Created"),
            OrchestratorState::Starting => write!(f, "Starting"),
            OrchestratorState::Running => write!(f, "Running"),
            OrchestratorState::Closing => write!(f, "Closing"),
            OrchestratorState::Closed => write!(f, "Closed"),
            OrchestratorState::Failed => write!(f, "Failed"),
        }
    }
}

/// Counters for one worker, read without locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerStats {
    /// Messages read from the source.
    pub read: u64,
    /// Messages confirmed on the destination.
    pub replicated: u64,
    /// Destination write attempts that failed and were retried.
    pub write_retries: u64,
    /// Source acknowledgements that failed (the message will be redelivered).
    pub ack_failures: u64,
}

/// Point-in-time view of the whole tree.
///
/// Collected from registries and watch channels only; no cluster I/O.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub state: OrchestratorState,
    pub tenants: usize,
    pub namespaces: usize,
    pub workers: usize,
    pub running_workers: usize,
    pub suspended_workers: usize,
    /// Running with no suspended workers.
    pub healthy: bool,
}
