//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - In-memory source / destination clusters behind a connector
//! - Orchestrator config with fast timings
//! - Polling helper for asynchronous assertions

#![allow(dead_code)]

use pulsar_sync::memory::{InMemoryCluster, InMemoryConnector};
use pulsar_sync::{OrchestratorConfig, PartitionSyncWorker, SyncOrchestrator};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const SOURCE_HOST: &str = "source.test";
pub const DESTINATION_HOST: &str = "destination.test";

/// Default wait for anything asynchronous in tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Install a fmt subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Source and destination clusters reachable through one connector.
pub struct TestClusters {
    pub connector: InMemoryConnector,
    pub source: InMemoryCluster,
    pub destination: InMemoryCluster,
}

impl TestClusters {
    pub fn new() -> Self {
        init_tracing();
        let source = InMemoryCluster::new("source");
        let destination = InMemoryCluster::new("destination");
        let connector = InMemoryConnector::new();
        connector.register(SOURCE_HOST, source.clone());
        connector.register(DESTINATION_HOST, destination.clone());
        Self {
            connector,
            source,
            destination,
        }
    }

    pub fn config(&self) -> OrchestratorConfig {
        OrchestratorConfig::for_testing(SOURCE_HOST, DESTINATION_HOST)
    }

    /// Connect and start an orchestrator with `config`.
    pub async fn start(&self, config: OrchestratorConfig) -> SyncOrchestrator {
        let orchestrator = SyncOrchestrator::connect(config, &self.connector)
            .await
            .expect("connect");
        orchestrator.start().await.expect("start");
        orchestrator
    }
}

/// Poll `check` every 5ms until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

/// The worker replicating `topic`, if one is registered.
pub fn worker_for(orchestrator: &SyncOrchestrator, topic: &str) -> Option<Arc<PartitionSyncWorker>> {
    orchestrator
        .workers()
        .into_iter()
        .find(|w| w.topic().topic() == topic)
}

pub fn payloads(strings: &[&str]) -> Vec<Vec<u8>> {
    strings.iter().map(|s| s.as_bytes().to_vec()).collect()
}
