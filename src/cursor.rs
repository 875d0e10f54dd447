// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable replication cursors.
//!
//! Stores the last acknowledged source message id for each topic in SQLite so
//! a restarted orchestrator resumes where it stopped instead of replaying the
//! whole topic. Only used in [`CursorMode::Persisted`](crate::config::CursorMode).
//!
//! # Debounced Writes
//!
//! - `set()` updates the in-memory cache immediately and marks the topic dirty
//! - `flush_dirty()` persists all dirty cursors in one pass
//! - The orchestrator calls `flush_dirty()` every `flush_interval` and on close
//!
//! A crash between `set()` and `flush_dirty()` loses at most one flush interval
//! of progress. On restart those messages are replicated again, which the
//! at-least-once contract already allows.
//!
//! # Cursor Semantics
//!
//! The cursor is the **last acknowledged** message id. Readers resume strictly
//! after it.
//!
//! ```text
//! read m7 → write to destination → ack m7 on source → cursor = m7
//!                                  (crash here = m7 written twice)
//! ```

use crate::client::{MessageId, StartPosition};
use crate::config::InitialPosition;
use crate::error::{Result, SyncError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const SQLITE_RETRY_MAX_ATTEMPTS: u32 = 5;
const SQLITE_RETRY_BASE_DELAY_MS: u64 = 10;
const SQLITE_RETRY_MAX_DELAY_MS: u64 = 500;

/// Check if an error is a retryable SQLite busy/locked error
fn is_sqlite_busy_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // SQLITE_BUSY = 5, SQLITE_LOCKED = 6
            if let Some(code) = db_err.code() {
                return code == "5" || code == "6";
            }
            let msg = db_err.message().to_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
        _ => false,
    }
}

/// Execute a database operation with retry on SQLITE_BUSY/SQLITE_LOCKED
async fn execute_with_retry<F, Fut, T>(operation_name: &str, mut f: F) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = SQLITE_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(operation = operation_name, attempts, "SQLite operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if is_sqlite_busy_error(&e) && attempts < SQLITE_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = SQLITE_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "SQLite busy, retrying"
                );
                crate::metrics::record_cursor_retry(operation_name);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(SQLITE_RETRY_MAX_DELAY_MS);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Persistent cursor storage backed by SQLite.
pub struct CursorStore {
    pool: SqlitePool,
    /// topic → last acknowledged message id
    cache: Arc<RwLock<HashMap<String, String>>>,
    /// Topics whose cursor has not been persisted yet
    dirty: Arc<RwLock<HashSet<String>>>,
    path: String,
}

impl CursorStore {
    /// Open (or create) the cursor database at `path`.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        info!(path = %path_str, "Initializing cursor store");

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}?mode=rwc", path_str))
            .map_err(|e| SyncError::Config(format!("Invalid SQLite path: {}", e)))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS topic_cursors (
                topic TEXT PRIMARY KEY,
                message_id TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let rows: Vec<(String, String)> = sqlx::query_as("SELECT topic, message_id FROM topic_cursors")
            .fetch_all(&pool)
            .await?;

        let cache: HashMap<String, String> = rows.into_iter().collect();
        if !cache.is_empty() {
            info!(count = cache.len(), "Restored topic cursors from previous run");
        }

        Ok(Self {
            pool,
            cache: Arc::new(RwLock::new(cache)),
            dirty: Arc::new(RwLock::new(HashSet::new())),
            path: path_str,
        })
    }

    /// Last acknowledged message id for `topic`, if any.
    pub async fn get(&self, topic: &str) -> Option<MessageId> {
        self.cache.read().await.get(topic).cloned().map(MessageId)
    }

    /// Where a reader on `topic` should start: after the stored cursor, or
    /// `initial` when the topic has never been replicated.
    pub async fn resume_position(&self, topic: &str, initial: InitialPosition) -> StartPosition {
        match self.get(topic).await {
            Some(id) => StartPosition::After(id),
            None => initial.into(),
        }
    }

    /// Record progress for `topic` (debounced).
    pub async fn set(&self, topic: &str, message_id: &MessageId) {
        self.cache
            .write()
            .await
            .insert(topic.to_string(), message_id.as_str().to_string());
        self.dirty.write().await.insert(topic.to_string());
    }

    /// Persist every dirty cursor. Returns the number written.
    pub async fn flush_dirty(&self) -> Result<usize> {
        let dirty_topics: Vec<String> = {
            let mut dirty = self.dirty.write().await;
            dirty.drain().collect()
        };

        if dirty_topics.is_empty() {
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp_millis();
        // Snapshot so the cache lock is not held across SQLite writes
        let pending: Vec<(String, String)> = {
            let cache = self.cache.read().await;
            dirty_topics
                .into_iter()
                .filter_map(|topic| cache.get(&topic).cloned().map(|id| (topic, id)))
                .collect()
        };

        let pool = &self.pool;
        let mut flushed = 0;
        let mut errors = 0;

        for (topic, message_id) in pending {
            let result = execute_with_retry("cursor_flush", || async {
                sqlx::query(
                    r#"
                    INSERT INTO topic_cursors (topic, message_id, updated_at)
                    VALUES (?, ?, ?)
                    ON CONFLICT(topic) DO UPDATE SET
                        message_id = excluded.message_id,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(&topic)
                .bind(&message_id)
                .bind(now)
                .execute(pool)
                .await
            })
            .await;

            match result {
                Ok(_) => flushed += 1,
                Err(e) => {
                    errors += 1;
                    warn!(topic = %topic, error = %e, "Failed to flush cursor");
                    self.dirty.write().await.insert(topic);
                }
            }
        }

        crate::metrics::record_cursor_flush(flushed, errors);
        if flushed > 0 {
            debug!(flushed, errors, "Flushed dirty cursors");
        }

        if errors > 0 {
            return Err(SyncError::Internal(format!("Failed to flush {} cursors", errors)));
        }

        Ok(flushed)
    }

    pub async fn dirty_count(&self) -> usize {
        self.dirty.read().await.len()
    }

    /// Forget the cursor for `topic` so the next reader starts from the initial position.
    pub async fn delete(&self, topic: &str) -> Result<()> {
        self.cache.write().await.remove(topic);
        self.dirty.write().await.remove(topic);

        let pool = &self.pool;
        let topic_owned = topic.to_string();

        execute_with_retry("cursor_delete", || async {
            sqlx::query("DELETE FROM topic_cursors WHERE topic = ?")
                .bind(&topic_owned)
                .execute(pool)
                .await
        })
        .await?;

        info!(topic = %topic, "Deleted cursor");
        Ok(())
    }

    /// All cursors (for diagnostics).
    pub async fn get_all(&self) -> HashMap<String, String> {
        self.cache.read().await.clone()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Force flush WAL to the main database file.
    pub async fn checkpoint(&self) -> Result<()> {
        let pool = &self.pool;

        execute_with_retry("cursor_checkpoint", || async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(pool).await
        })
        .await?;

        debug!("WAL checkpoint complete");
        Ok(())
    }

    /// Flush, checkpoint, and close the pool.
    pub async fn close(&self) {
        if self.dirty_count().await > 0 {
            match self.flush_dirty().await {
                Ok(count) => info!(count, "Flushed dirty cursors on close"),
                Err(e) => warn!(error = %e, "Failed to flush dirty cursors on close"),
            }
        }

        if let Err(e) = self.checkpoint().await {
            warn!(error = %e, "Failed to checkpoint WAL on close");
        }
        self.pool.close().await;
        info!("Cursor store closed");
    }
}

impl From<InitialPosition> for StartPosition {
    fn from(initial: InitialPosition) -> Self {
        match initial {
            InitialPosition::Earliest => StartPosition::Earliest,
            InitialPosition::Latest => StartPosition::Latest,
        }
    }
}
