// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Tenant discovery: the root of the manager tree.

use super::context::{Lifecycle, SyncContext};
use super::namespace::NamespaceSyncManager;
use crate::entity::TenantIdentity;
use crate::metrics;
use crate::registry::Registry;
use crate::schedule::RepeatingTask;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, info_span, Instrument};

const LEVEL: &str = "tenant";

/// Keeps one [`NamespaceSyncManager`] per tenant visible on the source.
///
/// Tenants listed in `discovery.exclude_tenants` are never registered.
pub struct TenantSyncManager {
    ctx: Arc<SyncContext>,
    tenants: Registry<TenantIdentity, NamespaceSyncManager>,
    lifecycle: Lifecycle,
}

impl TenantSyncManager {
    pub fn new(ctx: Arc<SyncContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            tenants: Registry::new(),
            lifecycle: Lifecycle::default(),
        })
    }

    /// Schedule rediscovery when `auto_update_tenant` is on, otherwise run one pass inline.
    pub async fn start(self: &Arc<Self>) {
        if !self.lifecycle.try_start() {
            return;
        }

        if self.ctx.sync_config().auto_update_tenant {
            let weak = Arc::downgrade(self);
            let task = RepeatingTask::spawn(
                self.ctx.pool(),
                "tenant_discovery",
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
            info!("Tenant discovery scheduled");
        } else {
            self.sync().await;
        }
    }

    /// One discovery pass. Never fails; errors are logged and the pass abandoned.
    pub async fn sync(&self) {
        let span = info_span!("tenant_sync");
        self.sync_pass().instrument(span).await
    }

    async fn sync_pass(&self) {
        if self.lifecycle.is_closed() {
            return;
        }

        let listing = self.ctx.handle().source_admin().list_tenants();
        let Some((listed, started)) = self.ctx.list(LEVEL, "cluster", listing).await else {
            return;
        };

        let discovery = self.ctx.discovery_config();
        let excluded = listed.iter().filter(|name| discovery.is_excluded(name)).count();
        metrics::record_filtered(LEVEL, "excluded", excluded);
        let discovered: Vec<TenantIdentity> = listed
            .iter()
            .filter(|name| !discovery.is_excluded(name))
            .map(TenantIdentity::new)
            .collect();

        let listed_now: HashSet<&TenantIdentity> = discovered.iter().collect();
        for gone in self.tenants.keys().iter().filter(|k| !listed_now.contains(k)) {
            debug!(tenant = %gone, "Tenant no longer listed on source; manager left running");
        }

        let mut fresh = Vec::new();
        for tenant in &discovered {
            let (manager, created) = self.tenants.get_or_create(tenant.clone(), |key| {
                NamespaceSyncManager::new(Arc::clone(&self.ctx), key.clone())
            });
            if created {
                metrics::record_registration(LEVEL);
                metrics::adjust_registered(LEVEL, 1.0);
                info!(tenant = %tenant, "Registered tenant");
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
            excluded,
            "Tenant discovery pass complete"
        );
    }

    async fn start_child(&self, manager: &Arc<NamespaceSyncManager>) {
        if self.ctx.sync_config().mirror_entities {
            let tenant = manager.tenant().name();
            let create = self.ctx.handle().destination_admin().create_tenant(tenant);
            self.ctx.mirror(LEVEL, tenant, create).await;
        }
        manager.start().await;
    }

    /// Cancel rediscovery and close the whole subtree.
    pub async fn close(&self) {
        if !self.lifecycle.begin_close() {
            return;
        }
        self.lifecycle.stop_discovery().await;

        let managers = self.tenants.values();
        let mut closing = Vec::with_capacity(managers.len());
        for manager in &managers {
            closing.push(manager.close());
        }
        futures::future::join_all(closing).await;
        metrics::adjust_registered(LEVEL, -(managers.len() as f64));
        info!(tenants = managers.len(), "Tenant manager closed");
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    pub fn get(&self, tenant: &TenantIdentity) -> Option<Arc<NamespaceSyncManager>> {
        self.tenants.get(tenant)
    }

    pub fn keys(&self) -> Vec<TenantIdentity> {
        self.tenants.keys()
    }

    pub fn namespace_managers(&self) -> Vec<Arc<NamespaceSyncManager>> {
        self.tenants.values()
    }
}
