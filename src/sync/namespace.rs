// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Namespace discovery within one tenant.

use super::context::{Lifecycle, SyncContext};
use super::topic::TopicSyncManager;
use crate::entity::{TenantIdentity, TenantNamespace};
use crate::metrics;
use crate::registry::Registry;
use crate::schedule::RepeatingTask;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};

const LEVEL: &str = "namespace";

/// Keeps one [`TopicSyncManager`] per namespace of a tenant.
pub struct NamespaceSyncManager {
    tenant: TenantIdentity,
    ctx: Arc<SyncContext>,
    namespaces: Registry<TenantNamespace, TopicSyncManager>,
    lifecycle: Lifecycle,
}

impl NamespaceSyncManager {
    pub fn new(ctx: Arc<SyncContext>, tenant: TenantIdentity) -> Arc<Self> {
        Arc::new(Self {
            tenant,
            ctx,
            namespaces: Registry::new(),
            lifecycle: Lifecycle::default(),
        })
    }

    /// Schedule rediscovery when `auto_update_namespace` is on, otherwise run one pass inline.
    pub async fn start(self: &Arc<Self>) {
        if !self.lifecycle.try_start() {
            return;
        }

        if self.ctx.sync_config().auto_update_namespace {
            let weak = Arc::downgrade(self);
            let task = RepeatingTask::spawn(
                self.ctx.pool(),
                "namespace_discovery",
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
        let span = info_span!("namespace_sync", tenant = %self.tenant);
        self.sync_pass().instrument(span).await
    }

    async fn sync_pass(&self) {
        if self.lifecycle.is_closed() {
            return;
        }

        let listing = self.ctx.handle().source_admin().list_namespaces(self.tenant.name());
        let Some((listed, started)) = self.ctx.list(LEVEL, self.tenant.name(), listing).await else {
            return;
        };

        let mut discovered = Vec::new();
        for name in &listed {
            match TenantNamespace::from_listed(&self.tenant, name) {
                Some(namespace) => discovered.push(namespace),
                None => debug!(listed = %name, "Ignoring namespace outside this tenant"),
            }
        }

        let listed_now: HashSet<&TenantNamespace> = discovered.iter().collect();
        for gone in self.namespaces.keys().iter().filter(|k| !listed_now.contains(k)) {
            debug!(namespace = %gone, "Namespace no longer listed on source; manager left running");
        }

        let mut fresh = Vec::new();
        for namespace in &discovered {
            let (manager, created) = self.namespaces.get_or_create(namespace.clone(), |key| {
                TopicSyncManager::new(Arc::clone(&self.ctx), key.clone())
            });
            if created {
                metrics::record_registration(LEVEL);
                metrics::adjust_registered(LEVEL, 1.0);
                info!(namespace = %namespace, "Registered namespace");
                fresh.push(manager);
            }
        }

        let mut starting = Vec::with_capacity(fresh.len());
        for manager in &fresh {
            starting.push(self.start_child(manager));
        }
        futures::future::join_all(starting).await;

        // Close raced with this pass: the snapshot in close() may have missed these
        if self.lifecycle.is_closed() {
            let mut closing = Vec::with_capacity(fresh.len());
            for manager in &fresh {
                closing.push(manager.close());
            }
            futures::future::join_all(closing).await;
            return;
        }

        metrics::record_discovery_pass(LEVEL, true, discovered.len(), started.elapsed());
        debug!(
            discovered = discovered.len(),
            registered = fresh.len(),
            "Namespace discovery pass complete"
        );
    }

    async fn start_child(&self, manager: &Arc<TopicSyncManager>) {
        if self.ctx.sync_config().mirror_entities {
            let path = manager.namespace().namespace();
            let create = self.ctx.handle().destination_admin().create_namespace(&path);
            self.ctx.mirror(LEVEL, &path, create).await;
        }
        manager.start().await;
    }

    /// Cancel rediscovery and close every topic manager.
    pub async fn close(&self) {
        if !self.lifecycle.begin_close() {
            return;
        }
        self.lifecycle.stop_discovery().await;

        let managers = self.namespaces.values();
        let mut closing = Vec::with_capacity(managers.len());
        for manager in &managers {
            closing.push(manager.close());
        }
        futures::future::join_all(closing).await;
        metrics::adjust_registered(LEVEL, -(managers.len() as f64));
        debug!(tenant = %self.tenant, namespaces = managers.len(), "Namespace manager closed");
    }

    pub fn tenant(&self) -> &TenantIdentity {
        &self.tenant
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    pub fn get(&self, namespace: &TenantNamespace) -> Option<Arc<TopicSyncManager>> {
        self.namespaces.get(namespace)
    }

    pub fn keys(&self) -> Vec<TenantNamespace> {
        self.namespaces.keys()
    }

    pub fn topic_managers(&self) -> Vec<Arc<TopicSyncManager>> {
        self.namespaces.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::memory::InMemoryCluster;
    use crate::client::{AdminClient, BoxFuture};
    use crate::handle::EntityHandle;
    use crate::schedule::DiscoveryPool;
    use crate::sync::context::testing::context;
    use tokio::runtime::Handle;

    /// Source admin whose namespace listing also returns entries from other tenants.
    struct CrossTenantListing {
        inner: InMemoryCluster,
    }

    impl AdminClient for CrossTenantListing {
        fn list_tenants(&self) -> BoxFuture<'_, Vec<String>> {
            self.inner.list_tenants()
        }

        fn list_namespaces(&self, tenant: &str) -> BoxFuture<'_, Vec<String>> {
            let listing = self.inner.list_namespaces(tenant);
            Box::pin(async move {
                listing.await.map(|mut names| {
                    names.push("t2/ns1".to_string());
                    names.push("t1/".to_string());
                    names
                })
            })
        }

        fn list_topics(&self, namespace: &str) -> BoxFuture<'_, Vec<String>> {
            self.inner.list_topics(namespace)
        }

        fn create_tenant(&self, tenant: &str) -> BoxFuture<'_, ()> {
            self.inner.create_tenant(tenant)
        }

        fn create_namespace(&self, namespace: &str) -> BoxFuture<'_, ()> {
            self.inner.create_namespace(namespace)
        }

        fn partition_count(&self, topic: &str) -> BoxFuture<'_, u32> {
            self.inner.partition_count(topic)
        }

        fn create_topic(&self, topic: &str, partitions: u32) -> BoxFuture<'_, ()> {
            self.inner.create_topic(topic, partitions)
        }
    }

    #[tokio::test]
    async fn test_one_topic_manager_per_namespace() {
        let source = InMemoryCluster::new("source");
        source.add_topic("persistent://t1/ns1/a");
        source.add_topic("persistent://t1/ns2/b");
        source.add_namespace("t2/other");
        let destination = InMemoryCluster::new("destination");
        let config = OrchestratorConfig::for_testing("src", "dst");

        let manager = NamespaceSyncManager::new(context(&source, &destination, &config), TenantIdentity::new("t1"));
        manager.start().await;

        let mut keys: Vec<String> = manager.keys().iter().map(|k| k.namespace()).collect();
        keys.sort();
        assert_eq!(keys, vec!["t1/ns1", "t1/ns2"]);

        let ns1 = manager.get(&TenantNamespace::new(TenantIdentity::new("t1"), "ns1")).unwrap();
        assert_eq!(ns1.len(), 1);

        manager.sync().await;
        assert_eq!(manager.len(), 2);
        manager.close().await;
    }

    #[tokio::test]
    async fn test_mirrors_namespaces_on_destination() {
        let source = InMemoryCluster::new("source");
        source.add_namespace("t1/ns1");
        let destination = InMemoryCluster::new("destination");
        destination.add_tenant("t1");
        let config = OrchestratorConfig::for_testing("src", "dst");

        let manager = NamespaceSyncManager::new(context(&source, &destination, &config), TenantIdentity::new("t1"));
        manager.start().await;
        assert!(destination.has_namespace("t1/ns1"));
        manager.close().await;
    }

    #[tokio::test]
    async fn test_mirroring_disabled() {
        let source = InMemoryCluster::new("source");
        source.add_namespace("t1/ns1");
        let destination = InMemoryCluster::new("destination");
        destination.add_tenant("t1");
        let mut config = OrchestratorConfig::for_testing("src", "dst");
        config.sync.mirror_entities = false;

        let manager = NamespaceSyncManager::new(context(&source, &destination, &config), TenantIdentity::new("t1"));
        manager.start().await;
        assert_eq!(manager.len(), 1);
        assert!(!destination.has_namespace("t1/ns1"));
        manager.close().await;
    }

    #[tokio::test]
    async fn test_unknown_tenant_abandons_pass() {
        let source = InMemoryCluster::new("source");
        let destination = InMemoryCluster::new("destination");
        let config = OrchestratorConfig::for_testing("src", "dst");

        let manager = NamespaceSyncManager::new(context(&source, &destination, &config), TenantIdentity::new("gone"));
        manager.start().await;
        assert!(manager.is_empty());
        manager.close().await;
    }

    #[tokio::test]
    async fn test_foreign_tenant_namespaces_ignored() {
        let source = InMemoryCluster::new("source");
        source.add_namespace("t1/ns1");
        source.add_namespace("t2/ns1");
        let destination = InMemoryCluster::new("destination");
        let config = OrchestratorConfig::for_testing("src", "dst");

        let handle = EntityHandle::new(
            Arc::new(CrossTenantListing { inner: source.clone() }),
            Arc::new(destination.clone()),
            Arc::new(source.clone()),
            Arc::new(destination.clone()),
        );
        let pool = DiscoveryPool::new(Handle::current(), config.discovery.pool_size);
        let ctx = Arc::new(SyncContext::new(handle, &config, pool, Handle::current()));

        let manager = NamespaceSyncManager::new(ctx, TenantIdentity::new("t1"));
        manager.start().await;
        assert_eq!(manager.keys(), vec![TenantNamespace::new(TenantIdentity::new("t1"), "ns1")]);
        assert!(!destination.has_namespace("t2/ns1"));
        manager.close().await;
    }
}
