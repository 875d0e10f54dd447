// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Topic discovery within one namespace.
//!
//! Lists the namespace's topics on the source, drops partition shards (a
//! partitioned topic is replicated through its logical name) and, when
//! configured, broker-internal `__` topics, then keeps exactly one
//! [`PartitionSyncWorker`] per remaining topic.

use super::context::{Lifecycle, SyncContext};
use super::worker::PartitionSyncWorker;
use crate::entity::{is_partition_shard, is_system_topic, TenantNamespace, TenantNamespaceTopic};
use crate::metrics;
use crate::registry::Registry;
use crate::schedule::RepeatingTask;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};

const LEVEL: &str = "topic";

pub struct TopicSyncManager {
    namespace: TenantNamespace,
    ctx: Arc<SyncContext>,
    workers: Registry<TenantNamespaceTopic, PartitionSyncWorker>,
    lifecycle: Lifecycle,
}

impl TopicSyncManager {
    pub fn new(ctx: Arc<SyncContext>, namespace: TenantNamespace) -> Arc<Self> {
        Arc::new(Self {
            namespace,
            ctx,
            workers: Registry::new(),
            lifecycle: Lifecycle::default(),
        })
    }

    /// Schedule rediscovery when `auto_update_topic` is on, otherwise run one pass inline.
    pub async fn start(self: &Arc<Self>) {
        if !self.lifecycle.try_start() {
            return;
        }

        if self.ctx.sync_config().auto_update_topic {
            let weak = Arc::downgrade(self);
            let task = RepeatingTask::spawn(
                self.ctx.pool(),
                "topic_discovery",
                self.ctx.sync_config().rediscovery_interval_duration(),
                move || {
                    let manager = weak.upgrade();
                    async move {
                        if let Some(manager) = manager {
                            manager.sync().await;
                        }
                    }
                },
            );
            self.lifecycle.install(task);
        } else {
            self.sync().await;
        }
    }

    /// One discovery pass. Never fails; errors are logged and the pass abandoned.
    pub async fn sync(&self) {
        let span = info_span!("topic_sync", namespace = %self.namespace);
        self.sync_pass().instrument(span).await
    }

    async fn sync_pass(&self) {
        if self.lifecycle.is_closed() {
            return;
        }

        let path = self.namespace.namespace();
        let listing = self.ctx.handle().source_admin().list_topics(&path);
        let Some((listed, started)) = self.ctx.list(LEVEL, &path, listing).await else {
            return;
        };

        let skip_system = self.ctx.discovery_config().skip_system_topics;
        let mut shards = 0;
        let mut system = 0;
        let mut discovered = Vec::new();
        for name in &listed {
            let Some(topic) = TenantNamespaceTopic::from_listed(&self.namespace, name) else {
                debug!(listed = %name, "Ignoring topic outside this namespace");
                continue;
            };
            if is_partition_shard(topic.local_name()) {
                shards += 1;
                continue;
            }
            if skip_system && is_system_topic(topic.local_name()) {
                system += 1;
                continue;
            }
            discovered.push(topic);
        }
        metrics::record_filtered(LEVEL, "partition_shard", shards);
        metrics::record_filtered(LEVEL, "system_topic", system);

        let listed_now: HashSet<&TenantNamespaceTopic> = discovered.iter().collect();
        for gone in self.workers.keys().iter().filter(|k| !listed_now.contains(k)) {
            debug!(topic = %gone, "Topic no longer listed on source; worker left running");
        }

        let mut fresh = Vec::new();
        for topic in &discovered {
            let (worker, created) = self.workers.get_or_create(topic.clone(), |key| {
                Arc::new(PartitionSyncWorker::new(Arc::clone(&self.ctx), key.clone()))
            });
            if created {
                metrics::record_registration(LEVEL);
                metrics::adjust_registered(LEVEL, 1.0);
                info!(topic = %topic, "Registered topic worker");
                worker.start();
                fresh.push(worker);
            }
        }

        // Close raced with this pass: the snapshot in close() may have missed these
        if self.lifecycle.is_closed() {
            for worker in &fresh {
                worker.close().await;
            }
            return;
        }

        metrics::record_discovery_pass(LEVEL, true, discovered.len(), started.elapsed());
        debug!(
            listed = listed.len(),
            discovered = discovered.len(),
            registered = fresh.len(),
            shards,
            system,
            "Topic discovery pass complete"
        );
    }

    /// Cancel rediscovery and close every worker.
    pub async fn close(&self) {
        if !self.lifecycle.begin_close() {
            return;
        }
        self.lifecycle.stop_discovery().await;

        let workers = self.workers.values();
        let mut closing = Vec::with_capacity(workers.len());
        for worker in &workers {
            closing.push(worker.close());
        }
        futures::future::join_all(closing).await;
        metrics::adjust_registered(LEVEL, -(workers.len() as f64));
        debug!(namespace = %self.namespace, workers = workers.len(), "Topic manager closed");
    }

    pub fn namespace(&self) -> &TenantNamespace {
        &self.namespace
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn get(&self, topic: &TenantNamespaceTopic) -> Option<Arc<PartitionSyncWorker>> {
        self.workers.get(topic)
    }

    pub fn keys(&self) -> Vec<TenantNamespaceTopic> {
        self.workers.keys()
    }

    pub fn workers(&self) -> Vec<Arc<PartitionSyncWorker>> {
        self.workers.values()
    }
}
