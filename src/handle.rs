// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The four connections every manager and worker shares.

use crate::client::{AdminClient, ClusterConnection, DataClient};
use std::sync::Arc;

/// Source and destination admin / data clients, built once per orchestrator.
///
/// Read-only after construction and cloned by `Arc` into every level of the
/// tree, so no locking is needed to use it.
#[derive(Clone)]
pub struct EntityHandle {
    source_admin: Arc<dyn AdminClient>,
    destination_admin: Arc<dyn AdminClient>,
    source_client: Arc<dyn DataClient>,
    destination_client: Arc<dyn DataClient>,
}

impl EntityHandle {
    pub fn new(
        source_admin: Arc<dyn AdminClient>,
        destination_admin: Arc<dyn AdminClient>,
        source_client: Arc<dyn DataClient>,
        destination_client: Arc<dyn DataClient>,
    ) -> Self {
        Self {
            source_admin,
            destination_admin,
            source_client,
            destination_client,
        }
    }

    pub fn from_connections(source: ClusterConnection, destination: ClusterConnection) -> Self {
        Self::new(source.admin, destination.admin, source.client, destination.client)
    }

    pub fn source_admin(&self) -> &Arc<dyn AdminClient> {
        &self.source_admin
    }

    pub fn destination_admin(&self) -> &Arc<dyn AdminClient> {
        &self.destination_admin
    }

    pub fn source_client(&self) -> &Arc<dyn DataClient> {
        &self.source_client
    }

    pub fn destination_client(&self) -> &Arc<dyn DataClient> {
        &self.destination_client
    }
}

impl std::fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityHandle").finish_non_exhaustive()
    }
}
