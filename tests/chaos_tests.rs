// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chaos tests: inject cluster failures and verify graceful degradation.
//!
//! These tests verify that failures stay local: an admin outage abandons a
//! pass, a destination outage suspends one worker, a stalled call is timed
//! out, and a hung collaborator cannot hold up shutdown.
//!
//! Run with: cargo test --test chaos_tests -- --nocapture

mod common;

use common::{wait_until, worker_for, TestClusters, WAIT};
use pulsar_sync::{OrchestratorState, SyncConfig, WorkerState};
use std::time::{Duration, Instant};

// =============================================================================
// Admin Failures
// =============================================================================

/// Test: Listing failures abandon the pass; the next pass recovers
#[tokio::test]
async fn listing_outage_then_recovery() {
    let clusters = TestClusters::new();
    clusters.source.add_topic("persistent://t1/ns1/a");

    let mut config = clusters.config();
    config.sync = SyncConfig::periodic("20ms");
    let orchestrator = clusters.start(config).await;
    assert!(wait_until(WAIT, || orchestrator.health().workers == 1).await);
    let existing = orchestrator.workers().pop().unwrap();

    clusters.source.faults().set_fail_listings(true);
    clusters.source.add_topic("persistent://t1/ns1/b");
    let calls = clusters.source.listing_calls();
    assert!(wait_until(WAIT, || clusters.source.listing_calls() > calls + 3).await);

    // Nothing new, nothing torn down
    assert_eq!(orchestrator.health().workers, 1);
    assert_eq!(existing.state(), WorkerState::Running);
    assert_eq!(orchestrator.state(), OrchestratorState::Running);

    clusters.source.faults().set_fail_listings(false);
    assert!(wait_until(WAIT, || orchestrator.health().workers == 2).await);

    orchestrator.close().await;
}

/// Test: Destination refuses entity creation; replication proceeds anyway
#[tokio::test]
async fn entity_creation_failure_does_not_block_replication() {
    let clusters = TestClusters::new();
    clusters.source.publish("persistent://t1/ns1/a", "m1");
    clusters.destination.faults().set_fail_creates(true);

    let orchestrator = clusters.start(clusters.config()).await;
    assert!(wait_until(WAIT, || clusters.destination.message_count("persistent://t1/ns1/a") == 1).await);
    assert_eq!(orchestrator.health().running_workers, 1);

    orchestrator.close().await;
}

// =============================================================================
// Data-Plane Failures
// =============================================================================

/// Test: An outage longer than the retry budget suspends the worker, not the orchestrator
#[tokio::test]
async fn write_budget_exhaustion_suspends_one_worker() {
    let clusters = TestClusters::new();
    clusters.source.publish("persistent://t1/ns1/orders", "h1");
    let orchestrator = clusters.start(clusters.config()).await;
    assert!(wait_until(WAIT, || clusters.destination.message_count("persistent://t1/ns1/orders") == 1).await);

    // Every write fails from now on: the next message exhausts the budget
    clusters.destination.faults().set_write_outage(true);
    clusters.source.publish("persistent://t1/ns1/orders", "h2");

    let worker = worker_for(&orchestrator, "persistent://t1/ns1/orders").unwrap();
    assert!(wait_until(WAIT, || worker.state() == WorkerState::SuspendedOnError).await);
    assert_eq!(clusters.source.acked("persistent://t1/ns1/orders").len(), 1);

    let health = orchestrator.health();
    assert_eq!(health.suspended_workers, 1);
    assert!(!health.healthy);
    assert_eq!(orchestrator.state(), OrchestratorState::Running);

    orchestrator.close().await;
    assert_eq!(worker.state(), WorkerState::Closed);
    assert_eq!(clusters.source.open_readers(), 0);
}

/// Test: Suspension of one topic leaves a sibling running
#[tokio::test]
async fn suspended_worker_isolated_from_siblings() {
    let clusters = TestClusters::new();
    clusters.source.add_topic("persistent://t1/ns1/a");
    clusters.source.add_topic("persistent://t1/ns1/b");

    // The first reader open fails; with a budget of one attempt that worker suspends
    let mut config = clusters.config();
    config.worker.open_max_attempts = 1;
    clusters.source.faults().fail_next_opens(1);
    let orchestrator = clusters.start(config).await;

    assert!(
        wait_until(WAIT, || {
            let workers = orchestrator.workers();
            workers.iter().filter(|w| w.state() == WorkerState::SuspendedOnError).count() == 1
                && workers.iter().filter(|w| w.state() == WorkerState::Running).count() == 1
        })
        .await
    );

    let running = orchestrator
        .workers()
        .into_iter()
        .find(|w| w.state() == WorkerState::Running)
        .unwrap();
    let topic = running.topic().topic();
    clusters.source.publish(&topic, "still flowing");
    assert!(wait_until(WAIT, || clusters.destination.message_count(&topic) == 1).await);

    orchestrator.close().await;
}

/// Test: Transient write failures within budget never suspend
#[tokio::test]
async fn transient_write_failures_are_absorbed() {
    let clusters = TestClusters::new();
    let topic = "persistent://t1/ns1/flaky";
    for i in 0..5 {
        clusters.source.publish(topic, format!("m{}", i));
    }
    clusters.destination.faults().fail_next_writes(2);

    let orchestrator = clusters.start(clusters.config()).await;
    assert!(wait_until(WAIT, || clusters.destination.message_count(topic) == 5).await);

    let worker = worker_for(&orchestrator, topic).unwrap();
    assert_eq!(worker.state(), WorkerState::Running);
    assert_eq!(worker.stats().write_retries, 2);
    orchestrator.close().await;
}

/// Test: A write that never completes is timed out, retried, then suspends the worker
#[tokio::test]
async fn stalled_write_times_out_and_suspends() {
    let clusters = TestClusters::new();
    let topic = "persistent://t1/ns1/stalled";
    clusters.source.publish(topic, "m1");
    clusters.destination.faults().set_write_delay(Duration::from_secs(3600));

    let mut config = clusters.config();
    config.worker.attempt_timeout = "50ms".to_string();
    let orchestrator = clusters.start(config).await;

    let worker = worker_for(&orchestrator, topic).unwrap();
    assert!(wait_until(WAIT, || worker.state() == WorkerState::SuspendedOnError).await);

    let stats = worker.stats();
    assert_eq!(stats.write_retries, 3, "every attempt but the last is retried");
    assert_eq!(stats.replicated, 0);
    assert!(clusters.source.acked(topic).is_empty());
    assert_eq!(clusters.destination.message_count(topic), 0);

    let health = orchestrator.health();
    assert_eq!(health.suspended_workers, 1);
    assert!(!health.healthy);
    assert_eq!(orchestrator.state(), OrchestratorState::Running);

    let started = Instant::now();
    orchestrator.close().await;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(worker.state(), WorkerState::Closed);
}

/// Test: A reader open that hangs is timed out and the next attempt succeeds
#[tokio::test]
async fn stalled_open_is_retried() {
    let clusters = TestClusters::new();
    let topic = "persistent://t1/ns1/slow-open";
    clusters.source.publish(topic, "m1");
    clusters.source.faults().stall_next_opens(1);

    let mut config = clusters.config();
    config.worker.attempt_timeout = "50ms".to_string();
    let orchestrator = clusters.start(config).await;

    assert!(wait_until(WAIT, || clusters.destination.message_count(topic) == 1).await);
    let worker = worker_for(&orchestrator, topic).unwrap();
    assert_eq!(worker.state(), WorkerState::Running);
    assert_eq!(clusters.source.open_readers(), 1);

    orchestrator.close().await;
    assert_eq!(clusters.source.open_readers(), 0);
}

// =============================================================================
// Shutdown
// =============================================================================

/// Test: A hung destination write cannot hold close() past the grace period
#[tokio::test]
async fn hung_writer_close_is_bounded() {
    let clusters = TestClusters::new();
    let topic = "persistent://t1/ns1/stuck";
    clusters.source.publish(topic, "m1");
    clusters.destination.faults().set_write_delay(Duration::from_secs(3600));

    // Keep the write pending for the whole test so close() has to cut it off
    let mut config = clusters.config();
    config.worker.attempt_timeout = "1h".to_string();
    config.worker.close_timeout = "200ms".to_string();
    let orchestrator = clusters.start(config).await;

    let worker = worker_for(&orchestrator, topic).unwrap();
    assert!(wait_until(WAIT, || worker.stats().read == 1).await);
    assert!(worker.in_flight() >= 1);

    let started = Instant::now();
    orchestrator.close().await;
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "close took {:?}",
        started.elapsed()
    );
    assert_eq!(worker.state(), WorkerState::Closed);
    assert_eq!(orchestrator.state(), OrchestratorState::Closed);
    assert!(clusters.source.acked(topic).is_empty(), "unwritten message stays unacked");
}

/// Test: Closing while periodic discovery is mid-flight never panics or leaks
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn close_races_with_rediscovery() {
    let clusters = TestClusters::new();
    for tenant in 0..4 {
        for topic in 0..5 {
            clusters.source.add_topic(&format!("persistent://t{}/ns/topic{}", tenant, topic));
        }
    }

    let mut config = clusters.config();
    config.sync = SyncConfig::periodic("1ms");
    let orchestrator = clusters.start(config).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    orchestrator.close().await;
    assert_eq!(orchestrator.state(), OrchestratorState::Closed);
    assert!(wait_until(WAIT, || clusters.source.open_readers() == 0).await);
    assert!(orchestrator
        .workers()
        .iter()
        .all(|w| w.state() == WorkerState::Closed));
}
