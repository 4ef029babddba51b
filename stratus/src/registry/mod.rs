//! Managed-group registry and instance-ownership cache.
//!
//! [`GroupManager`] owns the mapping of managed instance groups to their
//! cloud identity, size bounds, and membership.  Two independent locks guard
//! the two pieces of shared state:
//!
//! * the **membership lock** over the ordered group list — register,
//!   unregister, and basename refreshes serialize here, and the lock is
//!   never held across a collaborator call;
//! * the **cache lock** over the instance → group ownership map — lookups
//!   and full rebuilds serialize here, so a lookup that triggers a rebuild
//!   sees the rebuilt cache, never a partial one.
//!
//! The ownership cache is only ever rebuilt wholesale and swapped in as a
//! complete value; no incremental patching means no stale cross-references
//! can survive a group's removal.

pub mod reconcile;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cloud::{
    wait_for_operation, CloudApi, CloudError, CloudMode, GroupRef, GROUP_OPERATION_TIMEOUT,
};
use crate::cluster::{InstanceRef, Resources};

// ── Group model ───────────────────────────────────────────────────────────────

/// Creation spec carried by a group before it physically exists
/// (autoprovisioning only).
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSpec {
    pub machine_type: String,
    pub labels: BTreeMap<String, String>,
}

/// One managed instance group and its autoscaling envelope.
///
/// Plain value type: equality is a deep comparison of the descriptive fields
/// below, which is exactly what re-registration change detection needs.
/// There is deliberately no back-reference to the owning manager.
#[derive(Debug, Clone, PartialEq)]
pub struct ManagedGroup {
    pub reference: GroupRef,
    pub node_pool_name: String,
    pub min_size: u64,
    pub max_size: u64,
    pub autoprovisioned: bool,
    /// True once the group has been confirmed live on the cloud side.
    pub exist: bool,
    /// Only meaningful while `exist` is false.
    pub spec: Option<GroupSpec>,
}

/// Registry entry: the group plus derived attributes refreshed alongside the
/// ownership cache.
#[derive(Debug, Clone)]
struct GroupEntry {
    group: ManagedGroup,
    /// Common instance-name prefix, learned from the cloud on rebuild.
    basename: Option<String>,
    /// Best-effort capacity estimate from the group's machine template.
    capacity: Option<Resources>,
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failures of registry and reconciliation operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A mode-restricted operation was invoked at the wrong capability level.
    #[error("operation requires {required:?} mode, manager is in {actual:?} mode")]
    WrongMode {
        required: CloudMode,
        actual: CloudMode,
    },

    /// The instance carries a registered group's name prefix, but even a
    /// fresh cache rebuild could not attribute it.  Distinct from the soft
    /// "no group claims this prefix" case, which is not an error.
    #[error("instance {instance} does not belong to any configured group")]
    OrphanInstance { instance: String },

    /// A batch delete mixed instances from more than one group.
    #[error("cannot delete instances of more than one group at once: {first} vs {second}")]
    MixedGroups { first: String, second: String },

    /// A created node pool never appeared in the subsequent listing.
    #[error("node pool '{0}' did not appear after creation")]
    PoolNotRegistered(String),

    /// Deleting a node pool the autoscaler does not own.
    #[error("node pool '{0}' is not autoprovisioned")]
    NotAutoprovisioned(String),

    #[error(transparent)]
    Cloud(#[from] CloudError),
}

// ── GroupManager ──────────────────────────────────────────────────────────────

/// Registry of managed groups plus the instance-ownership cache.
pub struct GroupManager {
    mode: CloudMode,
    cloud: Arc<dyn CloudApi>,
    /// Membership lock: ordered group entries, insertion order preserved.
    entries: Mutex<Vec<GroupEntry>>,
    /// Cache lock: instance → owning group, rebuilt wholesale.
    cache: tokio::sync::Mutex<HashMap<InstanceRef, ManagedGroup>>,
}

impl GroupManager {
    pub fn new(mode: CloudMode, cloud: Arc<dyn CloudApi>) -> Self {
        Self {
            mode,
            cloud,
            entries: Mutex::new(Vec::new()),
            cache: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> CloudMode {
        self.mode
    }

    /// Register `group`, or update it in place when its descriptive fields
    /// changed.  Returns `true` for a new group or a material change.
    ///
    /// On insert/change a capacity estimate is precomputed from the group's
    /// machine template; a failure there is logged and never blocks
    /// registration.
    pub async fn register(&self, group: ManagedGroup) -> bool {
        let reference = group.reference.clone();
        let changed = {
            let mut entries = self.membership();
            match entries.iter().position(|e| e.group.reference == reference) {
                Some(index) => {
                    if entries[index].group != group {
                        debug!(group = %reference, "updated group");
                        entries[index].group = group;
                        true
                    } else {
                        false
                    }
                }
                None => {
                    info!(group = %reference, "registering group");
                    entries.push(GroupEntry {
                        group,
                        basename: None,
                        capacity: None,
                    });
                    true
                }
            }
        };
        if changed {
            self.precompute_capacity(&reference).await;
        }
        changed
    }

    /// Remove the group.  Returns `true` when an entry existed.
    pub fn unregister(&self, group: &GroupRef) -> bool {
        let mut entries = self.membership();
        let before = entries.len();
        entries.retain(|e| e.group.reference != *group);
        let found = entries.len() != before;
        if found {
            info!(group = %group, "unregistered group");
        }
        found
    }

    /// Snapshot of every registered group in insertion order.
    pub fn groups(&self) -> Vec<ManagedGroup> {
        self.membership().iter().map(|e| e.group.clone()).collect()
    }

    /// Last precomputed capacity estimate for the group, if any.
    pub fn capacity_estimate(&self, group: &GroupRef) -> Option<Resources> {
        self.membership()
            .iter()
            .find(|e| e.group.reference == *group)
            .and_then(|e| e.capacity)
    }

    /// Resolve the group owning `instance`.
    ///
    /// Fast path: the ownership cache already attributes the instance.  Slow
    /// path: when the instance name carries a registered group's basename
    /// prefix (or a group's basename is still unknown), the whole cache is
    /// rebuilt from the cloud and the lookup retried once; a second miss is
    /// the hard [`RegistryError::OrphanInstance`].  An instance no registered
    /// group could claim resolves to `Ok(None)`.
    pub async fn resolve_owner(
        &self,
        instance: &InstanceRef,
    ) -> Result<Option<ManagedGroup>, RegistryError> {
        let mut cache = self.cache.lock().await;
        if let Some(group) = cache.get(instance) {
            return Ok(Some(group.clone()));
        }

        let claimed = self.snapshot().into_iter().any(|(group, basename)| {
            group.reference.project == instance.project
                && group.reference.zone == instance.zone
                && basename
                    .as_deref()
                    .map_or(true, |b| instance.name.starts_with(b))
        });
        if !claimed {
            return Ok(None);
        }

        debug!(instance = %instance, "cache miss with matching prefix, rebuilding ownership cache");
        *cache = self.build_cache().await?;
        match cache.get(instance) {
            Some(group) => Ok(Some(group.clone())),
            None => Err(RegistryError::OrphanInstance {
                instance: instance.to_string(),
            }),
        }
    }

    /// Resolve the group owning `instance`, treating "no owner" as the hard
    /// orphan error.  Used where an unattributed instance cannot be acted on.
    pub async fn owner_of(&self, instance: &InstanceRef) -> Result<ManagedGroup, RegistryError> {
        match self.resolve_owner(instance).await? {
            Some(group) => Ok(group),
            None => Err(RegistryError::OrphanInstance {
                instance: instance.to_string(),
            }),
        }
    }

    /// Rebuild the ownership cache from the cloud and swap it in atomically.
    ///
    /// A collaborator failure aborts the rebuild and leaves the previous
    /// cache untouched.
    pub async fn regenerate_cache(&self) -> Result<(), RegistryError> {
        let next = self.build_cache().await?;
        *self.cache.lock().await = next;
        Ok(())
    }

    /// Current target size of the group.
    pub async fn target_size(&self, group: &GroupRef) -> Result<u64, RegistryError> {
        Ok(self.cloud.group_metadata(group).await?.target_size)
    }

    /// Resize the group and wait for the operation to complete.
    pub async fn resize(&self, group: &GroupRef, target_size: u64) -> Result<(), RegistryError> {
        info!(group = %group, target_size, "resizing group");
        let op = self.cloud.resize_group(group, target_size).await?;
        wait_for_operation(self.cloud.as_ref(), &op, GROUP_OPERATION_TIMEOUT).await?;
        Ok(())
    }

    /// Delete the given instances.  All of them must belong to the same
    /// group; the batch is submitted as one operation and awaited.
    pub async fn delete_instances(
        &self,
        instances: &[InstanceRef],
    ) -> Result<(), RegistryError> {
        let Some(first) = instances.first() else {
            return Ok(());
        };
        let owner = self.owner_of(first).await?;
        for instance in &instances[1..] {
            let other = self.owner_of(instance).await?;
            if other.reference != owner.reference {
                return Err(RegistryError::MixedGroups {
                    first: owner.reference.to_string(),
                    second: other.reference.to_string(),
                });
            }
        }
        info!(group = %owner.reference, count = instances.len(), "deleting instances");
        let op = self.cloud.delete_instances(&owner.reference, instances).await?;
        wait_for_operation(self.cloud.as_ref(), &op, GROUP_OPERATION_TIMEOUT).await?;
        Ok(())
    }

    /// Names of the group's live member instances.
    pub async fn group_nodes(&self, group: &GroupRef) -> Result<Vec<String>, RegistryError> {
        let instances = self.cloud.list_group_instances(group).await?;
        Ok(instances.into_iter().map(|i| i.name).collect())
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    /// Membership lock accessor; a poisoned lock yields the inner state,
    /// which is always structurally valid here.
    fn membership(&self) -> MutexGuard<'_, Vec<GroupEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn snapshot(&self) -> Vec<(ManagedGroup, Option<String>)> {
        self.membership()
            .iter()
            .map(|e| (e.group.clone(), e.basename.clone()))
            .collect()
    }

    fn update_basename(&self, group: &GroupRef, basename: String) {
        let mut entries = self.membership();
        if let Some(entry) = entries.iter_mut().find(|e| e.group.reference == *group) {
            entry.basename = Some(basename);
        }
    }

    /// Construct a complete new ownership cache by re-listing every
    /// registered group's members, refreshing basenames along the way.
    async fn build_cache(&self) -> Result<HashMap<InstanceRef, ManagedGroup>, RegistryError> {
        let mut next = HashMap::new();
        for (group, _) in self.snapshot() {
            debug!(group = %group.reference, "relisting group members");
            let metadata = self.cloud.group_metadata(&group.reference).await?;
            self.update_basename(&group.reference, metadata.base_instance_name);
            let instances = self.cloud.list_group_instances(&group.reference).await?;
            for instance in instances {
                next.insert(instance, group.clone());
            }
        }
        Ok(next)
    }

    async fn precompute_capacity(&self, group: &GroupRef) {
        match self.cloud.group_template(group).await {
            Ok(template) => {
                debug!(
                    group = %group,
                    machine_type = %template.machine_type,
                    cpu_millis = template.capacity.cpu_millis,
                    "capacity estimate updated"
                );
                let mut entries = self.membership();
                if let Some(entry) = entries.iter_mut().find(|e| e.group.reference == *group) {
                    entry.capacity = Some(template.capacity);
                }
            }
            Err(err) => {
                warn!(group = %group, error = %err, "capacity estimate unavailable");
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
