/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Eventual-consistency loop between the cloud's node-pool listing and the
//! group registry.
//!
//! [`Reconciler::reconcile`] is a single explicit pass invoked by an external
//! scheduler on its own interval — there is no self-spawned background loop,
//! which keeps lifecycle and shutdown in the caller's hands and the pass
//! itself trivially testable.
//!
//! Failure policy: any collaborator failure aborts the pass with the error
//! and keeps the last-known-good registry contents.  A cluster that stops
//! answering listing calls must not look like a cluster with zero groups.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{GroupManager, GroupSpec, ManagedGroup, RegistryError};
use crate::cloud::{
    wait_for_operation, CloudApi, CloudMode, GroupRef, NodePoolSpec, ResourceLimits,
    NODE_POOL_OPERATION_TIMEOUT,
};

/// Reconciles the registry against the cloud's node-pool listing.
pub struct Reconciler {
    manager: Arc<GroupManager>,
    cloud: Arc<dyn CloudApi>,
}

impl Reconciler {
    pub fn new(manager: Arc<GroupManager>, cloud: Arc<dyn CloudApi>) -> Self {
        Self { manager, cloud }
    }

    /// One reconciliation pass.
    ///
    /// Lists node pools, derives one [`ManagedGroup`] per backing instance
    /// group of every autoscaled pool, registers them all, unregisters every
    /// registered group absent from the listing, and regenerates the
    /// ownership cache once if anything changed.
    ///
    /// Pools with autoscaling disabled are ignored entirely; a pool that is
    /// autoprovisioned but not autoscaled is a configuration anomaly — logged
    /// and skipped, never fatal.
    pub async fn reconcile(&self) -> Result<(), RegistryError> {
        if self.manager.mode() == CloudMode::Basic {
            // Statically configured groups; there is no listing to follow.
            return Ok(());
        }

        let pools = self.cloud.list_node_pools().await?;

        let mut listed: HashSet<GroupRef> = HashSet::new();
        let mut changed = false;

        for pool in &pools {
            if !pool.autoscaled {
                if pool.autoprovisioned {
                    warn!(
                        pool = %pool.name,
                        "node pool is autoprovisioned but not autoscaled, skipping"
                    );
                }
                continue;
            }
            // A pool may back several zonal instance groups; each becomes
            // its own managed group.
            for reference in &pool.instance_groups {
                let group = ManagedGroup {
                    reference: reference.clone(),
                    node_pool_name: pool.name.clone(),
                    min_size: pool.min_size,
                    max_size: pool.max_size,
                    autoprovisioned: pool.autoprovisioned,
                    exist: true,
                    spec: None,
                };
                listed.insert(reference.clone());
                if self.manager.register(group).await {
                    changed = true;
                }
            }
        }

        for group in self.manager.groups() {
            if !listed.contains(&group.reference) && self.manager.unregister(&group.reference) {
                changed = true;
            }
        }

        if changed {
            debug!("registry changed, regenerating ownership cache");
            self.manager.regenerate_cache().await?;
        }
        Ok(())
    }

    /// Create an autoprovisioned node pool and wait until the registry has
    /// picked it up.
    pub async fn create_node_pool(
        &self,
        name: &str,
        spec: &GroupSpec,
    ) -> Result<ManagedGroup, RegistryError> {
        self.require_autoprovisioning()?;

        info!(pool = %name, machine_type = %spec.machine_type, "creating node pool");
        let request = NodePoolSpec {
            machine_type: spec.machine_type.clone(),
            labels: spec.labels.clone(),
        };
        let op = self.cloud.create_node_pool(name, &request).await?;
        wait_for_operation(self.cloud.as_ref(), &op, NODE_POOL_OPERATION_TIMEOUT).await?;

        self.reconcile().await?;
        self.manager
            .groups()
            .into_iter()
            .find(|g| g.node_pool_name == name)
            .ok_or_else(|| RegistryError::PoolNotRegistered(name.to_string()))
    }

    /// Delete an autoprovisioned node pool and reconcile the registry.
    ///
    /// Refuses to delete pools the autoscaler did not provision.
    pub async fn delete_node_pool(&self, group: &ManagedGroup) -> Result<(), RegistryError> {
        self.require_autoprovisioning()?;
        if !group.autoprovisioned {
            return Err(RegistryError::NotAutoprovisioned(
                group.node_pool_name.clone(),
            ));
        }

        info!(pool = %group.node_pool_name, "deleting node pool");
        let op = self.cloud.delete_node_pool(&group.node_pool_name).await?;
        wait_for_operation(self.cloud.as_ref(), &op, NODE_POOL_OPERATION_TIMEOUT).await?;
        self.reconcile().await
    }

    /// Cluster-wide resource bounds, available in autoprovisioning mode only.
    pub async fn resource_limits(&self) -> Result<ResourceLimits, RegistryError> {
        self.require_autoprovisioning()?;
        Ok(self.cloud.resource_limits().await?)
    }

    fn require_autoprovisioning(&self) -> Result<(), RegistryError> {
        match self.manager.mode() {
            CloudMode::Autoprovisioned => Ok(()),
            actual => Err(RegistryError::WrongMode {
                required: CloudMode::Autoprovisioned,
                actual,
            }),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
