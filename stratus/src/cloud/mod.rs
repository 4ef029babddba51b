//! Cloud collaborator contract.
//!
//! The decision core never talks to a cloud API directly — it consumes the
//! [`CloudApi`] capability set, implemented elsewhere against the real
//! compute/cluster clients and implemented in-memory for tests.  Mutating
//! calls return an [`OperationRef`]; completion is observed through
//! [`wait_for_operation`], which polls at a fixed interval against a
//! wall-clock deadline and reports a timeout instead of blocking forever.

#[cfg(test)]
pub(crate) mod fake;

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cluster::{InstanceRef, Resources};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Deadline for instance-group operations (resize, batch delete).
pub const GROUP_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for node-pool (control-plane) operations, which routinely take
/// two orders of magnitude longer than instance-group ones.
pub const NODE_POOL_OPERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Fixed interval between operation status polls.
pub const OPERATION_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ── Mode ──────────────────────────────────────────────────────────────────────

/// Capability level of the active cloud integration.
///
/// Mode-restricted operations check this at entry and fail fast with a typed
/// precondition error when invoked at the wrong level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudMode {
    /// Statically configured groups; no node-pool listing to reconcile.
    Basic,
    /// Node pools with autoscaling enabled are discovered and reconciled.
    Autoscaled,
    /// Autoscaled, plus node pools may be created and deleted on demand.
    Autoprovisioned,
}

// ── Identity and descriptive types ────────────────────────────────────────────

/// Identity of a managed instance group: a globally unique
/// project / zone / name triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupRef {
    pub project: String,
    pub zone: String,
    pub name: String,
}

impl fmt::Display for GroupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.zone, self.name)
    }
}

/// One node pool as reported by the cloud listing.  A pool may back several
/// zonal instance groups.
#[derive(Debug, Clone, PartialEq)]
pub struct NodePool {
    pub name: String,
    pub autoscaled: bool,
    pub autoprovisioned: bool,
    pub min_size: u64,
    pub max_size: u64,
    pub instance_groups: Vec<GroupRef>,
}

/// Point-in-time facts about one instance group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupMetadata {
    pub target_size: u64,
    /// Common name prefix shared by the group's instances.
    pub base_instance_name: String,
}

/// Machine template backing a group, used for capacity precomputation.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineTemplate {
    pub machine_type: String,
    pub capacity: Resources,
    pub labels: BTreeMap<String, String>,
}

/// Creation request for an autoprovisioned node pool.
#[derive(Debug, Clone, PartialEq)]
pub struct NodePoolSpec {
    pub machine_type: String,
    pub labels: BTreeMap<String, String>,
}

/// Cluster-wide named resource bounds (autoprovisioning mode only).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceLimits {
    pub min: BTreeMap<String, i64>,
    pub max: BTreeMap<String, i64>,
}

// ── Long-running operations ───────────────────────────────────────────────────

/// Handle of a long-running cloud operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRef {
    pub name: String,
    pub zone: String,
}

/// Observed state of a long-running operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    Running,
    Done,
    Failed(String),
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failure of a cloud collaborator call.
#[derive(Debug, Error)]
pub enum CloudError {
    /// Generic API failure (network, auth, server-side error).
    #[error("cloud API call failed: {0}")]
    Api(String),

    /// The referenced entity does not exist on the cloud side.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// The operation did not reach a terminal state within the deadline.
    #[error("operation '{operation}' did not complete within {timeout:?}")]
    OperationTimeout {
        operation: String,
        timeout: Duration,
    },

    /// The operation reached a terminal failure state.
    #[error("operation '{operation}' failed: {message}")]
    OperationFailed { operation: String, message: String },
}

// ── Capability contract ───────────────────────────────────────────────────────

/// The cloud capability set consumed by the decision core.
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// List every node pool of the cluster with its autoscaling flags and
    /// backing instance groups.
    async fn list_node_pools(&self) -> Result<Vec<NodePool>, CloudError>;

    /// Current target size and base instance name of one group.
    async fn group_metadata(&self, group: &GroupRef) -> Result<GroupMetadata, CloudError>;

    /// Live member instances of one group.
    async fn list_group_instances(&self, group: &GroupRef)
        -> Result<Vec<InstanceRef>, CloudError>;

    /// Machine template backing one group.
    async fn group_template(&self, group: &GroupRef) -> Result<MachineTemplate, CloudError>;

    /// Set the group's target size.
    async fn resize_group(
        &self,
        group: &GroupRef,
        target_size: u64,
    ) -> Result<OperationRef, CloudError>;

    /// Delete specific instances of one group, shrinking it accordingly.
    async fn delete_instances(
        &self,
        group: &GroupRef,
        instances: &[InstanceRef],
    ) -> Result<OperationRef, CloudError>;

    /// Create a node pool (autoprovisioning integrations only).
    async fn create_node_pool(
        &self,
        name: &str,
        spec: &NodePoolSpec,
    ) -> Result<OperationRef, CloudError>;

    /// Delete a node pool (autoprovisioning integrations only).
    async fn delete_node_pool(&self, name: &str) -> Result<OperationRef, CloudError>;

    /// Current state of a long-running operation.
    async fn operation_status(&self, op: &OperationRef) -> Result<OperationStatus, CloudError>;

    /// Cluster-wide resource bounds (autoprovisioning integrations only).
    async fn resource_limits(&self) -> Result<ResourceLimits, CloudError>;
}

// ── Operation polling ─────────────────────────────────────────────────────────

/// Poll `op` until it reports `Done`, fails, or `timeout` elapses.
///
/// Status-check errors are logged and retried — a flaky poll must not fail an
/// operation that is still making progress.  Once the wall-clock deadline
/// passes the caller gets [`CloudError::OperationTimeout`] and decides
/// whether to retry the surrounding pass.
pub async fn wait_for_operation(
    cloud: &dyn CloudApi,
    op: &OperationRef,
    timeout: Duration,
) -> Result<(), CloudError> {
    let deadline = Instant::now() + timeout;
    loop {
        match cloud.operation_status(op).await {
            Ok(OperationStatus::Done) => {
                debug!(operation = %op.name, "operation complete");
                return Ok(());
            }
            Ok(OperationStatus::Failed(message)) => {
                return Err(CloudError::OperationFailed {
                    operation: op.name.clone(),
                    message,
                });
            }
            Ok(OperationStatus::Running) => {
                debug!(operation = %op.name, zone = %op.zone, "waiting for operation");
            }
            Err(err) => {
                warn!(operation = %op.name, error = %err, "operation status check failed");
            }
        }
        if Instant::now() >= deadline {
            return Err(CloudError::OperationTimeout {
                operation: op.name.clone(),
                timeout,
            });
        }
        tokio::time::sleep(OPERATION_POLL_INTERVAL).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
