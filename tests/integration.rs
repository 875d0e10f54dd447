// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration tests for pulsar-sync.
//!
//! Drive a full orchestrator against two in-memory clusters; no broker required.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//!
//! # Run specific group
//! cargo test --test integration discovery_
//! ```
//!
//! # Test Organization
//! - `discovery_*` - tree construction, filters, rediscovery
//! - `replication_*` - ordering, at-least-once, backpressure
//! - `lifecycle_*` - connect, close, cursor persistence across restarts

mod common;

use common::{payloads, wait_until, worker_for, TestClusters, DESTINATION_HOST, SOURCE_HOST, WAIT};
use pulsar_sync::client::BoxFuture;
use pulsar_sync::memory::InMemoryCluster;
use pulsar_sync::{
    AdminClient, CursorConfig, DataClient, EntityHandle, MessageReader, MessageWriter, OrchestratorConfig,
    OrchestratorState, StartPosition, SyncConfig, SyncError, SyncOrchestrator, TenantIdentity, TenantNamespace,
    WorkerState,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOPIC_A: &str = "persistent://t1/ns1/topicA";

// =============================================================================
// Discovery
// =============================================================================

#[tokio::test]
async fn discovery_one_worker_per_logical_topic() {
    let clusters = TestClusters::new();
    clusters.source.add_topic(TOPIC_A);
    clusters.source.add_topic("persistent://t1/ns1/topicA-partition-0");

    let orchestrator = clusters.start(clusters.config()).await;

    let tenants = orchestrator.tenant_manager().unwrap();
    assert_eq!(tenants.keys(), vec![TenantIdentity::new("t1")]);
    let namespaces = tenants.get(&TenantIdentity::new("t1")).unwrap();
    let topics = namespaces
        .get(&TenantNamespace::new(TenantIdentity::new("t1"), "ns1"))
        .unwrap();
    assert_eq!(topics.len(), 1);
    assert_eq!(topics.keys()[0].topic(), TOPIC_A);

    let health = orchestrator.health();
    assert_eq!((health.tenants, health.namespaces, health.workers), (1, 1, 1));

    orchestrator.close().await;
}

#[tokio::test]
async fn discovery_partitioned_topic_mirrored_with_partition_count() {
    let clusters = TestClusters::new();
    clusters.source.add_partitioned_topic("persistent://t1/ns1/orders", 3);

    let orchestrator = clusters.start(clusters.config()).await;
    assert_eq!(orchestrator.workers().len(), 1);
    assert!(
        wait_until(WAIT, || clusters.destination.topic_partitions("persistent://t1/ns1/orders") == Some(3)).await
    );
    assert!(clusters.destination.has_tenant("t1"));
    assert!(clusters.destination.has_namespace("t1/ns1"));

    orchestrator.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn discovery_concurrent_syncs_never_duplicate() {
    let clusters = TestClusters::new();
    for ns in ["ns1", "ns2"] {
        for topic in ["a", "b", "c"] {
            clusters.source.add_topic(&format!("persistent://t1/{}/{}", ns, topic));
        }
    }

    let orchestrator = Arc::new(clusters.start(clusters.config()).await);
    let tenants = orchestrator.tenant_manager().unwrap();

    let mut passes = Vec::new();
    for _ in 0..8 {
        let tenants = Arc::clone(&tenants);
        passes.push(tokio::spawn(async move {
            tenants.sync().await;
            for namespaces in tenants.namespace_managers() {
                namespaces.sync().await;
                for topics in namespaces.topic_managers() {
                    topics.sync().await;
                }
            }
        }));
    }
    for pass in passes {
        pass.await.unwrap();
    }

    assert_eq!(orchestrator.health().workers, 6);
    assert!(wait_until(WAIT, || clusters.source.readers_opened() == 6).await);
    orchestrator.close().await;
}

#[tokio::test]
async fn discovery_periodic_picks_up_new_entities() {
    let clusters = TestClusters::new();
    clusters.source.add_topic(TOPIC_A);

    let mut config = clusters.config();
    config.sync = SyncConfig::periodic("20ms");
    let orchestrator = clusters.start(config).await;

    assert!(wait_until(WAIT, || orchestrator.health().workers == 1).await);

    clusters.source.add_topic("persistent://t1/ns1/topicB");
    clusters.source.add_topic("persistent://t2/other/topicC");
    assert!(wait_until(WAIT, || orchestrator.health().workers == 3).await);
    assert_eq!(orchestrator.health().tenants, 2);

    orchestrator.close().await;
    let calls = clusters.source.listing_calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(clusters.source.listing_calls(), calls, "discovery must stop on close");
}

// =============================================================================
// Replication
// =============================================================================

#[tokio::test]
async fn replication_preserves_order_and_acknowledges() {
    let clusters = TestClusters::new();
    for payload in ["m1", "m2", "m3"] {
        clusters.source.publish(TOPIC_A, payload);
    }

    let orchestrator = clusters.start(clusters.config()).await;
    assert!(wait_until(WAIT, || clusters.destination.message_count(TOPIC_A) == 3).await);
    assert_eq!(clusters.destination.payloads(TOPIC_A), payloads(&["m1", "m2", "m3"]));

    // Acks only follow confirmed writes
    assert!(wait_until(WAIT, || clusters.source.acked(TOPIC_A).len() == 3).await);

    clusters.source.publish(TOPIC_A, "m4");
    assert!(wait_until(WAIT, || clusters.destination.message_count(TOPIC_A) == 4).await);
    let worker = worker_for(&orchestrator, TOPIC_A).unwrap();
    assert_eq!(worker.stats().replicated, 4);

    orchestrator.close().await;
}

#[tokio::test]
async fn replication_at_least_once_across_destination_outage() {
    let clusters = TestClusters::new();
    let mut config = clusters.config();
    config.worker.write_max_attempts = 200;
    config.worker.write_max_delay = "10ms".to_string();
    clusters.source.publish(TOPIC_A, "before");
    let orchestrator = clusters.start(config).await;
    assert!(wait_until(WAIT, || clusters.destination.message_count(TOPIC_A) == 1).await);

    clusters.destination.faults().set_write_outage(true);
    for payload in ["o1", "o2", "o3"] {
        clusters.source.publish(TOPIC_A, payload);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(clusters.destination.message_count(TOPIC_A), 1);
    assert_eq!(clusters.source.acked(TOPIC_A).len(), 1, "nothing acked during the outage");

    clusters.destination.faults().set_write_outage(false);
    assert!(wait_until(WAIT, || clusters.source.acked(TOPIC_A).len() == 4).await);
    assert_eq!(
        clusters.destination.payloads(TOPIC_A),
        payloads(&["before", "o1", "o2", "o3"])
    );

    let worker = worker_for(&orchestrator, TOPIC_A).unwrap();
    assert_eq!(worker.state(), WorkerState::Running);
    assert!(worker.stats().write_retries > 0);
    orchestrator.close().await;
}

#[tokio::test]
async fn replication_in_flight_bounded_by_window() {
    let clusters = TestClusters::new();
    for i in 0..30 {
        clusters.source.publish(TOPIC_A, format!("m{}", i));
    }
    clusters.destination.faults().set_write_delay(Duration::from_millis(10));

    let mut config = clusters.config();
    config.worker.max_in_flight = 4;
    let orchestrator = clusters.start(config).await;
    let worker = worker_for(&orchestrator, TOPIC_A).unwrap();

    let mut peak = 0;
    let done = wait_until(WAIT, || {
        peak = peak.max(worker.in_flight());
        clusters.destination.message_count(TOPIC_A) == 30
    })
    .await;
    assert!(done);
    assert!(peak <= 4, "in-flight peaked at {}", peak);

    orchestrator.close().await;
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn lifecycle_connect_unknown_host_is_construction_error() {
    let clusters = TestClusters::new();
    let mut config = clusters.config();
    config.source.broker_host = "missing.test".to_string();

    match SyncOrchestrator::connect(config, &clusters.connector).await {
        Err(SyncError::Construction(msg)) => assert!(msg.contains("missing.test")),
        Err(other) => panic!("expected Construction, got {}", other),
        Ok(_) => panic!("expected Construction error"),
    }
}

#[tokio::test]
async fn lifecycle_close_releases_every_handle() {
    let clusters = TestClusters::new();
    for topic in ["a", "b", "c"] {
        clusters.source.publish(&format!("persistent://t1/ns1/{}", topic), "x");
    }

    let orchestrator = clusters.start(clusters.config()).await;
    let mut states = orchestrator.state_receiver();
    assert_eq!(*states.borrow_and_update(), OrchestratorState::Running);
    assert!(wait_until(WAIT, || clusters.destination.open_writers() == 3).await);

    orchestrator.close().await;
    assert_eq!(orchestrator.state(), OrchestratorState::Closed);
    assert!(states.has_changed().unwrap());
    assert_eq!(clusters.source.open_readers(), 0);
    assert_eq!(clusters.destination.open_writers(), 0);
    assert!(orchestrator.workers().iter().all(|w| w.state() == WorkerState::Closed));

    // Second close is a no-op
    orchestrator.close().await;
    assert_eq!(orchestrator.state(), OrchestratorState::Closed);
}

#[tokio::test]
async fn lifecycle_persisted_cursor_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cursors.db").to_string_lossy().to_string();
    let clusters = TestClusters::new();
    for payload in ["m1", "m2", "m3"] {
        clusters.source.publish(TOPIC_A, payload);
    }

    let mut config = clusters.config();
    config.cursor = CursorConfig::persisted(path.clone());

    let first = clusters.start(config.clone()).await;
    assert!(wait_until(WAIT, || clusters.destination.message_count(TOPIC_A) == 3).await);
    assert!(wait_until(WAIT, || clusters.source.acked(TOPIC_A).len() == 3).await);
    first.close().await;

    clusters.source.publish(TOPIC_A, "m4");
    clusters.source.publish(TOPIC_A, "m5");

    let second = clusters.start(config).await;
    assert!(wait_until(WAIT, || clusters.destination.message_count(TOPIC_A) == 5).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        clusters.destination.payloads(TOPIC_A),
        payloads(&["m1", "m2", "m3", "m4", "m5"]),
        "restart resumes after the last acknowledged message"
    );
    second.close().await;
}

#[tokio::test]
async fn lifecycle_reset_cursor_replays_from_earliest() {
    let clusters = TestClusters::new();
    clusters.source.publish(TOPIC_A, "m1");

    let first = clusters.start(clusters.config()).await;
    assert!(wait_until(WAIT, || clusters.destination.message_count(TOPIC_A) == 1).await);
    first.close().await;

    let second = clusters.start(clusters.config()).await;
    assert!(wait_until(WAIT, || clusters.destination.message_count(TOPIC_A) == 2).await);
    second.close().await;
}

/// In-memory cluster that records the thread each listing and open ran on.
#[derive(Clone)]
struct ThreadRecorder {
    cluster: InMemoryCluster,
    calls: Arc<Mutex<Vec<(&'static str, String)>>>,
}

impl ThreadRecorder {
    fn new(cluster: InMemoryCluster) -> Self {
        Self {
            cluster,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn record(&self, call: &'static str) {
        let thread = std::thread::current().name().unwrap_or("unnamed").to_string();
        self.calls.lock().unwrap().push((call, thread));
    }

    fn threads(&self, call: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(c, _)| *c == call)
            .map(|(_, thread)| thread.clone())
            .collect()
    }
}

impl AdminClient for ThreadRecorder {
    fn list_tenants(&self) -> BoxFuture<'_, Vec<String>> {
        self.record("list_tenants");
        self.cluster.list_tenants()
    }

    fn list_namespaces(&self, tenant: &str) -> BoxFuture<'_, Vec<String>> {
        self.record("list_namespaces");
        self.cluster.list_namespaces(tenant)
    }

    fn list_topics(&self, namespace: &str) -> BoxFuture<'_, Vec<String>> {
        self.record("list_topics");
        self.cluster.list_topics(namespace)
    }

    fn create_tenant(&self, tenant: &str) -> BoxFuture<'_, ()> {
        self.cluster.create_tenant(tenant)
    }

    fn create_namespace(&self, namespace: &str) -> BoxFuture<'_, ()> {
        self.cluster.create_namespace(namespace)
    }

    fn partition_count(&self, topic: &str) -> BoxFuture<'_, u32> {
        self.cluster.partition_count(topic)
    }

    fn create_topic(&self, topic: &str, partitions: u32) -> BoxFuture<'_, ()> {
        self.cluster.create_topic(topic, partitions)
    }
}

impl DataClient for ThreadRecorder {
    fn open_reader(&self, topic: &str, start: StartPosition) -> BoxFuture<'_, Arc<dyn MessageReader>> {
        self.record("open_reader");
        self.cluster.open_reader(topic, start)
    }

    fn open_writer(&self, topic: &str) -> BoxFuture<'_, Arc<dyn MessageWriter>> {
        self.record("open_writer");
        self.cluster.open_writer(topic)
    }
}

fn named_runtime(name: &str) -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name(name)
        .enable_all()
        .build()
        .unwrap()
}

#[test]
fn lifecycle_dedicated_runtimes_split_discovery_and_workers() {
    common::init_tracing();
    let discovery = named_runtime("discovery");
    let workers = named_runtime("sync-worker");
    let caller = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let source = ThreadRecorder::new(InMemoryCluster::new("source"));
    let destination = ThreadRecorder::new(InMemoryCluster::new("destination"));
    source.cluster.publish(TOPIC_A, "m1");

    let handle = EntityHandle::new(
        Arc::new(source.clone()),
        Arc::new(destination.clone()),
        Arc::new(source.clone()),
        Arc::new(destination.clone()),
    );
    let mut config = OrchestratorConfig::for_testing(SOURCE_HOST, DESTINATION_HOST);
    config.sync = SyncConfig::periodic("20ms");

    caller.block_on(async {
        let orchestrator = SyncOrchestrator::new(config, handle)
            .unwrap()
            .with_runtimes(discovery.handle().clone(), workers.handle().clone());
        orchestrator.start().await.unwrap();

        assert!(wait_until(WAIT, || source.cluster.acked(TOPIC_A).len() == 1).await);
        assert!(wait_until(WAIT, || source.threads("list_topics").len() >= 2).await);
        assert_eq!(destination.cluster.payloads(TOPIC_A), payloads(&["m1"]));

        orchestrator.close().await;
        assert_eq!(orchestrator.state(), OrchestratorState::Closed);
    });

    let mut opens = source.threads("open_reader");
    opens.extend(destination.threads("open_writer"));
    assert!(!opens.is_empty());
    assert!(
        opens.iter().all(|t| t.starts_with("sync-worker")),
        "handles opened on {:?}",
        opens
    );

    let listings = source.threads("list_topics");
    assert!(
        listings.iter().all(|t| t.starts_with("discovery")),
        "topics listed on {:?}",
        listings
    );
    assert_eq!(source.cluster.open_readers(), 0);
}
