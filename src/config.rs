//! Configuration for the sync orchestrator.
//!
//! Configuration is passed to [`SyncOrchestrator::connect()`](crate::SyncOrchestrator::connect)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//! Durations are human-readable strings (`"3m"`, `"250ms"`) parsed with `humantime`.
//!
//! # Quick Start
//!
//! ```rust
//! use pulsar_sync::config::{OrchestratorConfig, ClusterConfig};
//!
//! let config = OrchestratorConfig {
//!     source: ClusterConfig::new("pulsar-east.internal"),
//!     destination: ClusterConfig::new("pulsar-west.internal"),
//!     ..OrchestratorConfig::for_testing("src", "dst")
//! };
//! assert_eq!(config.source.admin_url(), "http://pulsar-east.internal:8080");
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! OrchestratorConfig
//! ├── source: ClusterConfig        # Cluster to mirror from
//! ├── destination: ClusterConfig   # Cluster to mirror into
//! ├── sync: SyncConfig             # One-shot vs periodic discovery per level
//! ├── discovery: DiscoveryConfig   # Shared pool size, listing timeout, filters
//! ├── worker: WorkerConfig         # In-flight bound, write retry, close timeout
//! └── cursor: CursorConfig         # Persisted vs reset read positions
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! source:
//!   broker_host: "pulsar-east.internal"
//! destination:
//!   broker_host: "pulsar-west.internal"
//!   enable_tls: true
//!   http_port: 8443
//!   tcp_port: 6651
//!   tls_trust_store_path: "/etc/pulsar/truststore.jks"
//!
//! sync:
//!   auto_update_tenant: true
//!   auto_update_namespace: true
//!   auto_update_topic: true
//!   rediscovery_interval: "3m"
//!
//! worker:
//!   max_in_flight: 100
//!   attempt_timeout: "10s"
//!   close_timeout: "10s"
//!
//! cursor:
//!   mode: persisted
//!   sqlite_path: "/var/lib/pulsar-sync/cursors.db"
//! ```

use crate::error::{Result, SyncError};
use crate::resilience::{RateLimitConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn parse_duration_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(fallback)
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// Everything needed to build and run a [`SyncOrchestrator`](crate::SyncOrchestrator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Cluster whose hierarchy is discovered and read from.
    pub source: ClusterConfig,

    /// Cluster that receives entities and messages.
    pub destination: ClusterConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub discovery: DiscoveryConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub cursor: CursorConfig,
}

impl OrchestratorConfig {
    /// Create a minimal config for testing: fast timings, no cursor persistence.
    pub fn for_testing(source_host: &str, destination_host: &str) -> Self {
        Self {
            source: ClusterConfig::new(source_host),
            destination: ClusterConfig::new(destination_host),
            sync: SyncConfig::one_shot(),
            discovery: DiscoveryConfig::for_testing(),
            worker: WorkerConfig::for_testing(),
            cursor: CursorConfig::reset(),
        }
    }

    /// Reject settings that would make the orchestrator unable to run.
    pub fn validate(&self) -> Result<()> {
        if self.source.broker_host.is_empty() || self.destination.broker_host.is_empty() {
            return Err(SyncError::Config("broker_host must not be empty".to_string()));
        }
        if self.discovery.pool_size == 0 {
            return Err(SyncError::Config("discovery.pool_size must be at least 1".to_string()));
        }
        if self.worker.max_in_flight == 0 {
            return Err(SyncError::Config("worker.max_in_flight must be at least 1".to_string()));
        }
        if self.worker.write_max_attempts == 0 {
            return Err(SyncError::Config(
                "worker.write_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.worker.attempt_timeout_duration().is_zero() {
            return Err(SyncError::Config(
                "worker.attempt_timeout must be non-zero".to_string(),
            ));
        }
        if self.sync.rediscovery_interval_duration().is_zero() {
            return Err(SyncError::Config(
                "sync.rediscovery_interval must be non-zero".to_string(),
            ));
        }
        if self.cursor.mode == CursorMode::Persisted && self.cursor.sqlite_path.is_empty() {
            return Err(SyncError::Config(
                "cursor.sqlite_path is required in persisted mode".to_string(),
            ));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ClusterConfig: connection descriptor for one cluster
// ═══════════════════════════════════════════════════════════════════════════════

/// Connection settings for one cluster.
///
/// The admin interface is reached over HTTP(S) on `http_port`, the data plane
/// over the binary protocol on `tcp_port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub broker_host: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,

    #[serde(default = "default_false")]
    pub enable_tls: bool,

    /// Token credential, sent only when TLS is on.
    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default)]
    pub tls_trust_store_path: Option<String>,

    #[serde(default)]
    pub tls_trust_store_password: Option<String>,

    /// Skip certificate validation. The trust store is ignored when set.
    #[serde(default = "default_false")]
    pub allow_tls_insecure_connection: bool,

    #[serde(default = "default_false")]
    pub enable_tls_hostname_verification: bool,
}

fn default_http_port() -> u16 {
    8080
}

fn default_tcp_port() -> u16 {
    6650
}

/// TLS settings a connector should apply, derived from [`ClusterConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings<'a> {
    pub auth_token: Option<&'a str>,
    pub hostname_verification: bool,
    pub allow_insecure: bool,
    /// `(path, password)`; `None` when insecure connections are allowed.
    pub trust_store: Option<(&'a str, Option<&'a str>)>,
}

impl ClusterConfig {
    /// Plain-text cluster on the default ports.
    pub fn new(broker_host: impl Into<String>) -> Self {
        Self {
            broker_host: broker_host.into(),
            http_port: default_http_port(),
            tcp_port: default_tcp_port(),
            enable_tls: false,
            auth_token: None,
            tls_trust_store_path: None,
            tls_trust_store_password: None,
            allow_tls_insecure_connection: false,
            enable_tls_hostname_verification: false,
        }
    }

    /// Admin endpoint, e.g. `https://host:8443`.
    pub fn admin_url(&self) -> String {
        let scheme = if self.enable_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.broker_host, self.http_port)
    }

    /// Data-plane endpoint, e.g. `pulsar+ssl://host:6651`.
    pub fn service_url(&self) -> String {
        let scheme = if self.enable_tls { "pulsar+ssl" } else { "pulsar" };
        format!("{}://{}:{}", scheme, self.broker_host, self.tcp_port)
    }

    /// TLS settings to apply, or `None` for a plain-text connection.
    pub fn tls_settings(&self) -> Option<TlsSettings<'_>> {
        if !self.enable_tls {
            return None;
        }
        let trust_store = if self.allow_tls_insecure_connection {
            None
        } else {
            self.tls_trust_store_path
                .as_deref()
                .map(|path| (path, self.tls_trust_store_password.as_deref()))
        };
        Some(TlsSettings {
            auth_token: self.auth_token.as_deref(),
            hostname_verification: self.enable_tls_hostname_verification,
            allow_insecure: self.allow_tls_insecure_connection,
            trust_store,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SyncConfig: discovery cadence per level
// ═══════════════════════════════════════════════════════════════════════════════

/// Whether each level rediscovers periodically or runs a single pass.
///
/// Read by every manager; a level with its flag off discovers once at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_true")]
    pub auto_update_tenant: bool,

    #[serde(default = "default_true")]
    pub auto_update_namespace: bool,

    #[serde(default = "default_true")]
    pub auto_update_topic: bool,

    /// Fixed delay between discovery passes (e.g. "3m").
    #[serde(default = "default_rediscovery_interval")]
    pub rediscovery_interval: String,

    /// Create discovered tenants, namespaces, and topics on the destination
    /// before replicating into them.
    #[serde(default = "default_true")]
    pub mirror_entities: bool,
}

fn default_rediscovery_interval() -> String {
    "3m".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_update_tenant: true,
            auto_update_namespace: true,
            auto_update_topic: true,
            rediscovery_interval: "3m".to_string(),
            mirror_entities: true,
        }
    }
}

impl SyncConfig {
    /// Every level discovers exactly once.
    pub fn one_shot() -> Self {
        Self {
            auto_update_tenant: false,
            auto_update_namespace: false,
            auto_update_topic: false,
            ..Self::default()
        }
    }

    /// Every level rediscovers on `interval`.
    pub fn periodic(interval: &str) -> Self {
        Self {
            rediscovery_interval: interval.to_string(),
            ..Self::default()
        }
    }

    /// Parse the rediscovery interval to a Duration.
    pub fn rediscovery_interval_duration(&self) -> Duration {
        parse_duration_or(&self.rediscovery_interval, Duration::from_secs(180))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DiscoveryConfig: shared pool and listing behaviour
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Maximum discovery passes running at once across the whole tree.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Upper bound on a single admin listing call (e.g. "30s").
    #[serde(default = "default_list_timeout")]
    pub list_timeout: String,

    /// Tenants never mirrored (e.g. `pulsar` on clusters that expose it).
    #[serde(default)]
    pub exclude_tenants: Vec<String>,

    /// Skip broker-internal topics whose local name starts with `__`.
    #[serde(default = "default_true")]
    pub skip_system_topics: bool,
}

fn default_pool_size() -> usize {
    10
}

fn default_list_timeout() -> String {
    "30s".to_string()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            pool_size: 10,
            list_timeout: "30s".to_string(),
            exclude_tenants: Vec::new(),
            skip_system_topics: true,
        }
    }
}

impl DiscoveryConfig {
    pub fn for_testing() -> Self {
        Self {
            pool_size: 4,
            list_timeout: "2s".to_string(),
            ..Self::default()
        }
    }

    /// Parse the list timeout to a Duration.
    pub fn list_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.list_timeout, Duration::from_secs(30))
    }

    pub fn is_excluded(&self, tenant: &str) -> bool {
        self.exclude_tenants.iter().any(|t| t == tenant)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WorkerConfig: per-topic replication loop
// ═══════════════════════════════════════════════════════════════════════════════

/// Settings for every [`PartitionSyncWorker`](crate::sync::PartitionSyncWorker).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Read-but-unacknowledged messages allowed per worker.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Attempts per destination write before the worker suspends.
    #[serde(default = "default_write_max_attempts")]
    pub write_max_attempts: usize,

    #[serde(default = "default_write_initial_delay")]
    pub write_initial_delay: String,

    #[serde(default = "default_write_max_delay")]
    pub write_max_delay: String,

    #[serde(default = "default_write_backoff_factor")]
    pub write_backoff_factor: f64,

    /// Attempts to open the reader / writer before the worker suspends.
    #[serde(default = "default_open_max_attempts")]
    pub open_max_attempts: usize,

    /// Deadline for a single open or write attempt (e.g. "10s").
    /// A stalled attempt is abandoned and counts against the retry budget.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout: String,

    /// Grace period for `close()` before tasks are force-aborted (e.g. "10s").
    #[serde(default = "default_close_timeout")]
    pub close_timeout: String,

    /// Pause after a failed source read before trying again.
    #[serde(default = "default_read_error_backoff")]
    pub read_error_backoff: String,

    // ─────────────────────────────────────────────────────────────────────────
    // Rate Limiting (thundering herd prevention)
    // ─────────────────────────────────────────────────────────────────────────

    /// Enable a rate limit shared by every worker.
    /// Prevents a burst when hundreds of workers start in the same pass.
    #[serde(default = "default_false")]
    pub rate_limit_enabled: bool,

    /// Maximum messages per second across all workers (sustained rate).
    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,

    /// Maximum burst size for rate limiting.
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
}

fn default_max_in_flight() -> usize {
    100
}

fn default_write_max_attempts() -> usize {
    5
}

fn default_write_initial_delay() -> String {
    "100ms".to_string()
}

fn default_write_max_delay() -> String {
    "5s".to_string()
}

fn default_write_backoff_factor() -> f64 {
    2.0
}

fn default_open_max_attempts() -> usize {
    5
}

fn default_attempt_timeout() -> String {
    "10s".to_string()
}

fn default_close_timeout() -> String {
    "10s".to_string()
}

fn default_read_error_backoff() -> String {
    "1s".to_string()
}

fn default_rate_limit_per_sec() -> u32 {
    10_000
}

fn default_rate_limit_burst() -> u32 {
    1000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 100,
            write_max_attempts: 5,
            write_initial_delay: "100ms".to_string(),
            write_max_delay: "5s".to_string(),
            write_backoff_factor: 2.0,
            open_max_attempts: 5,
            attempt_timeout: "10s".to_string(),
            close_timeout: "10s".to_string(),
            read_error_backoff: "1s".to_string(),
            rate_limit_enabled: false,
            rate_limit_per_sec: 10_000,
            rate_limit_burst: 1000,
        }
    }
}

impl WorkerConfig {
    pub fn for_testing() -> Self {
        Self {
            max_in_flight: 16,
            write_max_attempts: 4,
            write_initial_delay: "5ms".to_string(),
            write_max_delay: "40ms".to_string(),
            write_backoff_factor: 2.0,
            open_max_attempts: 3,
            attempt_timeout: "250ms".to_string(),
            close_timeout: "2s".to_string(),
            read_error_backoff: "10ms".to_string(),
            ..Self::default()
        }
    }

    /// Retry policy for destination writes.
    pub fn write_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.write_max_attempts,
            initial_delay: parse_duration_or(&self.write_initial_delay, Duration::from_millis(100)),
            max_delay: parse_duration_or(&self.write_max_delay, Duration::from_secs(5)),
            backoff_factor: self.write_backoff_factor,
            connection_timeout: self.attempt_timeout_duration(),
        }
    }

    /// Retry policy for opening reader and writer handles.
    pub fn open_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.open_max_attempts,
            ..self.write_retry()
        }
    }

    pub fn attempt_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.attempt_timeout, Duration::from_secs(10))
    }

    pub fn close_timeout_duration(&self) -> Duration {
        parse_duration_or(&self.close_timeout, Duration::from_secs(10))
    }

    pub fn read_error_backoff_duration(&self) -> Duration {
        parse_duration_or(&self.read_error_backoff, Duration::from_secs(1))
    }

    /// Create rate limit configuration from worker settings.
    ///
    /// Returns `None` if rate limiting is disabled.
    pub fn rate_limit_config(&self) -> Option<RateLimitConfig> {
        if self.rate_limit_enabled {
            Some(RateLimitConfig {
                burst_size: self.rate_limit_burst,
                refill_rate: self.rate_limit_per_sec,
            })
        } else {
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CursorConfig: where a worker starts reading
// ═══════════════════════════════════════════════════════════════════════════════

/// Whether read positions survive a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorMode {
    /// Resume after the last acknowledged message recorded in SQLite.
    Persisted,
    /// Always start from `initial_position`.
    Reset,
}

/// Start position used when no cursor is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialPosition {
    Earliest,
    Latest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorConfig {
    #[serde(default = "default_cursor_mode")]
    pub mode: CursorMode,

    /// Path to the SQLite database (persisted mode only).
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    #[serde(default = "default_initial_position")]
    pub initial_position: InitialPosition,

    /// How often dirty cursors are written to disk (e.g. "5s").
    #[serde(default = "default_flush_interval")]
    pub flush_interval: String,
}

fn default_cursor_mode() -> CursorMode {
    CursorMode::Persisted
}

fn default_sqlite_path() -> String {
    "pulsar_sync_cursors.db".to_string()
}

fn default_initial_position() -> InitialPosition {
    InitialPosition::Earliest
}

fn default_flush_interval() -> String {
    "5s".to_string()
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            mode: CursorMode::Persisted,
            sqlite_path: default_sqlite_path(),
            initial_position: InitialPosition::Earliest,
            flush_interval: "5s".to_string(),
        }
    }
}

impl CursorConfig {
    /// No persistence; every worker starts from the earliest message.
    pub fn reset() -> Self {
        Self {
            mode: CursorMode::Reset,
            ..Self::default()
        }
    }

    /// Persist cursors at `path`.
    pub fn persisted(path: impl Into<String>) -> Self {
        Self {
            mode: CursorMode::Persisted,
            sqlite_path: path.into(),
            ..Self::default()
        }
    }

    pub fn flush_interval_duration(&self) -> Duration {
        parse_duration_or(&self.flush_interval, Duration::from_secs(5))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_urls_plain() {
        let cluster = ClusterConfig::new("broker.local");
        assert_eq!(cluster.admin_url(), "http://broker.local:8080");
        assert_eq!(cluster.service_url(), "pulsar://broker.local:6650");
        assert!(cluster.tls_settings().is_none());
    }

    #[test]
    fn test_cluster_urls_tls() {
        let cluster = ClusterConfig {
            enable_tls: true,
            http_port: 8443,
            tcp_port: 6651,
            ..ClusterConfig::new("broker.local")
        };
        assert_eq!(cluster.admin_url(), "https://broker.local:8443");
        assert_eq!(cluster.service_url(), "pulsar+ssl://broker.local:6651");
    }

    #[test]
    fn test_tls_trust_store_ignored_when_insecure() {
        let mut cluster = ClusterConfig {
            enable_tls: true,
            auth_token: Some("token".to_string()),
            tls_trust_store_path: Some("/etc/ts.jks".to_string()),
            tls_trust_store_password: Some("secret".to_string()),
            enable_tls_hostname_verification: true,
            ..ClusterConfig::new("broker.local")
        };

        let tls = cluster.tls_settings().unwrap();
        assert_eq!(tls.trust_store, Some(("/etc/ts.jks", Some("secret"))));
        assert_eq!(tls.auth_token, Some("token"));
        assert!(tls.hostname_verification);

        cluster.allow_tls_insecure_connection = true;
        let tls = cluster.tls_settings().unwrap();
        assert!(tls.trust_store.is_none());
        assert!(tls.allow_insecure);
    }

    #[test]
    fn test_sync_config_defaults() {
        let sync = SyncConfig::default();
        assert!(sync.auto_update_tenant);
        assert!(sync.auto_update_namespace);
        assert!(sync.auto_update_topic);
        assert!(sync.mirror_entities);
        assert_eq!(sync.rediscovery_interval_duration(), Duration::from_secs(180));
    }

    #[test]
    fn test_sync_config_bad_interval_falls_back() {
        let sync = SyncConfig {
            rediscovery_interval: "soon".to_string(),
            ..SyncConfig::default()
        };
        assert_eq!(sync.rediscovery_interval_duration(), Duration::from_secs(180));
    }

    #[test]
    fn test_worker_retry_mapping() {
        let worker = WorkerConfig::default();
        let retry = worker.write_retry();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.initial_delay, Duration::from_millis(100));
        assert_eq!(retry.max_delay, Duration::from_secs(5));
        assert_eq!(retry.connection_timeout, Duration::from_secs(10));
        assert_eq!(worker.open_retry().max_attempts, 5);
        assert_eq!(worker.close_timeout_duration(), Duration::from_secs(10));

        let testing = WorkerConfig::for_testing();
        assert_eq!(testing.write_retry().connection_timeout, Duration::from_millis(250));
        assert_eq!(testing.open_retry().connection_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_rate_limit_config_disabled_by_default() {
        assert!(WorkerConfig::default().rate_limit_config().is_none());

        let worker = WorkerConfig {
            rate_limit_enabled: true,
            rate_limit_per_sec: 50,
            rate_limit_burst: 5,
            ..WorkerConfig::default()
        };
        let rl = worker.rate_limit_config().unwrap();
        assert_eq!(rl.refill_rate, 50);
        assert_eq!(rl.burst_size, 5);
    }

    #[test]
    fn test_discovery_exclusions() {
        let discovery = DiscoveryConfig {
            exclude_tenants: vec!["pulsar".to_string()],
            ..DiscoveryConfig::default()
        };
        assert!(discovery.is_excluded("pulsar"));
        assert!(!discovery.is_excluded("public"));
        assert_eq!(discovery.list_timeout_duration(), Duration::from_secs(30));
    }

    #[test]
    fn test_validate() {
        let config = OrchestratorConfig::for_testing("src", "dst");
        assert!(config.validate().is_ok());

        let mut bad = config.clone();
        bad.discovery.pool_size = 0;
        assert!(matches!(bad.validate(), Err(SyncError::Config(_))));

        let mut bad = config.clone();
        bad.worker.max_in_flight = 0;
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.worker.attempt_timeout = "0s".to_string();
        assert!(bad.validate().is_err());

        let mut bad = config.clone();
        bad.sync.rediscovery_interval = "0s".to_string();
        assert!(bad.validate().is_err());

        let mut bad = config;
        bad.cursor = CursorConfig::persisted("");
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_minimal_json_uses_defaults() {
        let json = r#"{
            "source": { "broker_host": "a" },
            "destination": { "broker_host": "b", "enable_tls": true }
        }"#;
        let config: OrchestratorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.source.http_port, 8080);
        assert_eq!(config.source.tcp_port, 6650);
        assert!(config.destination.enable_tls);
        assert_eq!(config.discovery.pool_size, 10);
        assert_eq!(config.worker.max_in_flight, 100);
        assert_eq!(config.cursor.mode, CursorMode::Persisted);
        assert_eq!(config.cursor.initial_position, InitialPosition::Earliest);
    }

    #[test]
    fn test_cursor_mode_serde() {
        let json = r#"{ "mode": "reset", "initial_position": "latest" }"#;
        let cursor: CursorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cursor.mode, CursorMode::Reset);
        assert_eq!(cursor.initial_position, InitialPosition::Latest);
        assert_eq!(cursor.flush_interval_duration(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = OrchestratorConfig::for_testing("src", "dst");
        let json = serde_json::to_string(&config).unwrap();
        let parsed: OrchestratorConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.source, config.source);
        assert_eq!(parsed.worker.max_in_flight, config.worker.max_in_flight);
        assert_eq!(parsed.cursor.mode, CursorMode::Reset);
    }
}
