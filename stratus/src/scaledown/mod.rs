//! Scale-down coordination.
//!
//! [`ScaleDown`] drives one state machine per attempt:
//!
//! ```text
//! Idle ──► EvaluatingCandidates ──► Draining ──► Deleting ──► Idle
//!                │                      (detached task, at most one)
//!                └──► nothing to do ──► Idle
//! ```
//!
//! The evaluation itself runs inside the caller's single-threaded reconcile
//! tick.  Draining and deletion detach as one background task guarded by the
//! shared [`DeleteStatus`] flag — a second trigger while one is in flight is
//! answered with [`ScaleDownOutcome::DeleteInProgress`], never queued.

pub mod drain;
pub mod tracker;

pub use drain::{DeleteStatus, DrainError, EvictionApi, EvictionError};
pub use tracker::{SkipReasons, Tracker};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info};

use crate::cluster::{Node, Pod};
use crate::config::AutoscalerOptions;
use crate::registry::{GroupManager, RegistryError};
use crate::simulator::{
    find_nodes_to_remove, pods_to_relocate, policy::is_empty, DrainPolicy, NodeName,
    PredicateChecker, SimulationError,
};

// ── Outcomes and errors ───────────────────────────────────────────────────────

/// Result of one [`ScaleDown::try_scale_down`] attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDownOutcome {
    /// The registry knows no groups; nothing can ever be removed.
    NoNodeGroups,
    /// Nothing currently qualifies for removal.
    NoUnneeded,
    /// A previous drain/delete sequence is still running.
    DeleteInProgress,
    /// A drain/delete task was detached; completion is observed via
    /// [`DeleteStatus`].
    NodeDeleteStarted,
    /// Empty nodes were deleted synchronously.
    NodeDeleted,
}

/// Structural failure of a scale-down attempt.
#[derive(Debug, Error)]
pub enum ScaleDownError {
    /// An unneeded node cannot be attributed to any registered group.
    #[error("owning group for node '{node}' is unknown")]
    NoGroupForNode { node: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Simulation(#[from] SimulationError),

    #[error(transparent)]
    Drain(#[from] DrainError),
}

// ── Candidate ranking ─────────────────────────────────────────────────────────

/// Pluggable ordering of non-empty removal candidates.
pub trait CandidateRanker: Send + Sync {
    /// Order `candidates` most-removable-first.  `utilization` carries the
    /// tracker's last per-node ratings.
    fn rank(&self, candidates: &mut [Node], utilization: &BTreeMap<NodeName, f64>);
}

/// Default ranking: the least-utilized node costs the least to move.
pub struct LowestUtilizationFirst;

impl CandidateRanker for LowestUtilizationFirst {
    fn rank(&self, candidates: &mut [Node], utilization: &BTreeMap<NodeName, f64>) {
        candidates.sort_by(|a, b| {
            let ua = utilization.get(&a.name).copied().unwrap_or(0.0);
            let ub = utilization.get(&b.name).copied().unwrap_or(0.0);
            ua.partial_cmp(&ub)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
    }
}

// ── ScaleDown ─────────────────────────────────────────────────────────────────

/// Scale-down coordinator: owns the tracker state and turns ripe unneeded
/// nodes into drain/delete sequences.
pub struct ScaleDown {
    options: AutoscalerOptions,
    manager: Arc<GroupManager>,
    oracle: Arc<dyn PredicateChecker>,
    ranker: Box<dyn CandidateRanker>,
    tracker: Tracker,
    delete_status: Arc<DeleteStatus>,
}

impl ScaleDown {
    pub fn new(
        options: AutoscalerOptions,
        manager: Arc<GroupManager>,
        oracle: Arc<dyn PredicateChecker>,
    ) -> Self {
        Self::with_ranker(options, manager, oracle, Box::new(LowestUtilizationFirst))
    }

    pub fn with_ranker(
        options: AutoscalerOptions,
        manager: Arc<GroupManager>,
        oracle: Arc<dyn PredicateChecker>,
        ranker: Box<dyn CandidateRanker>,
    ) -> Self {
        let tracker = Tracker::new(options.clone());
        Self {
            options,
            manager,
            oracle,
            ranker,
            tracker,
            delete_status: Arc::new(DeleteStatus::new()),
        }
    }

    /// Recompute the unneeded set for this tick.
    pub fn update_unneeded(
        &mut self,
        candidates: &[Node],
        all_nodes: &[Node],
        pods: &[Pod],
        now: Instant,
        skipped: &SkipReasons,
    ) -> Result<(), SimulationError> {
        self.tracker
            .update(candidates, all_nodes, pods, now, skipped, self.oracle.as_ref())
    }

    /// Current tracker state (timestamps, hints, utilization).
    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Shared delete-status flag; consumers poll it to avoid overlapping
    /// scale-down attempts.
    pub fn delete_status(&self) -> &Arc<DeleteStatus> {
        &self.delete_status
    }

    /// Attempt one scale-down.
    ///
    /// Empty candidates are deleted synchronously in bulk.  Otherwise the
    /// best-ranked non-empty candidate is validated once more against the
    /// current snapshot, then drained and deleted in a detached task while
    /// this call returns [`ScaleDownOutcome::NodeDeleteStarted`] immediately.
    pub async fn try_scale_down(
        &self,
        all_nodes: &[Node],
        pods: &[Pod],
        evictor: Arc<dyn EvictionApi>,
        now: Instant,
    ) -> Result<ScaleDownOutcome, ScaleDownError> {
        if self.delete_status.in_progress() {
            debug!("previous node deletion still in progress");
            return Ok(ScaleDownOutcome::DeleteInProgress);
        }
        if self.manager.groups().is_empty() {
            return Ok(ScaleDownOutcome::NoNodeGroups);
        }
        let policy = DrainPolicy::from_options(&self.options);

        // ── Ripe candidates with a known, shrinkable owning group ─────────────
        let mut candidates: Vec<Node> = Vec::new();
        for node in all_nodes {
            let Some(since) = self.tracker.unneeded_since(&node.name) else {
                continue;
            };
            let required = if node.ready {
                self.options.unneeded_duration
            } else {
                self.options.unready_unneeded_duration
            };
            if now.saturating_duration_since(since) < required {
                continue;
            }
            let Some(instance) = &node.provider else {
                return Err(ScaleDownError::NoGroupForNode {
                    node: node.name.clone(),
                });
            };
            let Some(owner) = self.manager.resolve_owner(instance).await? else {
                return Err(ScaleDownError::NoGroupForNode {
                    node: node.name.clone(),
                });
            };
            let size = self.manager.target_size(&owner.reference).await?;
            if size <= owner.min_size {
                debug!(node = %node.name, group = %owner.reference, "group already at minimum size");
                continue;
            }
            candidates.push(node.clone());
        }
        if candidates.is_empty() {
            return Ok(ScaleDownOutcome::NoUnneeded);
        }

        // ── Empty nodes need no draining: bulk-delete synchronously ───────────
        let empty: Vec<Node> = candidates
            .iter()
            .filter(|n| is_empty(&n.name, pods))
            .cloned()
            .collect();
        if !empty.is_empty() {
            let deleted = self.delete_empty_nodes(&empty).await?;
            if deleted > 0 {
                return Ok(ScaleDownOutcome::NodeDeleted);
            }
        }

        // ── Pick one non-empty candidate and detach its removal ───────────────
        let mut ranked: Vec<Node> = candidates
            .into_iter()
            .filter(|n| !is_empty(&n.name, pods))
            .collect();
        if ranked.is_empty() {
            return Ok(ScaleDownOutcome::NoUnneeded);
        }
        self.ranker.rank(&mut ranked, self.tracker.utilization_map());

        let removal = find_nodes_to_remove(
            &ranked,
            all_nodes,
            pods,
            &policy,
            self.oracle.as_ref(),
            1,
            self.tracker.hints(),
        )?;
        let Some(node) = removal.nodes.into_iter().next() else {
            debug!("no ranked candidate survived the final check");
            return Ok(ScaleDownOutcome::NoUnneeded);
        };
        let Ok(to_move) = pods_to_relocate(&node.name, pods, &policy) else {
            return Ok(ScaleDownOutcome::NoUnneeded);
        };

        if !self.delete_status.try_begin() {
            return Ok(ScaleDownOutcome::DeleteInProgress);
        }
        info!(node = %node.name, pods = to_move.len(), "starting drain and removal of node");

        let manager = Arc::clone(&self.manager);
        let status = Arc::clone(&self.delete_status);
        let options = self.options.clone();
        tokio::spawn(async move {
            if let Err(err) = drain_and_delete(manager, &node, &to_move, evictor, &options).await
            {
                error!(node = %node.name, error = %err, "node removal failed");
            }
            status.finish();
        });
        Ok(ScaleDownOutcome::NodeDeleteStarted)
    }

    /// Delete up to `max_empty_bulk_delete` empty nodes, never shrinking a
    /// group below its minimum size.  Returns how many were deleted.
    async fn delete_empty_nodes(&self, empty: &[Node]) -> Result<usize, ScaleDownError> {
        let mut headroom: HashMap<String, i64> = HashMap::new();
        let mut deleted = 0usize;

        for node in empty.iter().take(self.options.max_empty_bulk_delete) {
            let Some(instance) = &node.provider else {
                return Err(ScaleDownError::NoGroupForNode {
                    node: node.name.clone(),
                });
            };
            let Some(owner) = self.manager.resolve_owner(instance).await? else {
                return Err(ScaleDownError::NoGroupForNode {
                    node: node.name.clone(),
                });
            };
            let key = owner.reference.to_string();
            if !headroom.contains_key(&key) {
                let size = self.manager.target_size(&owner.reference).await?;
                headroom.insert(key.clone(), size as i64 - owner.min_size as i64);
            }
            if let Some(remaining) = headroom.get_mut(&key) {
                if *remaining <= 0 {
                    debug!(node = %node.name, group = %owner.reference, "group at minimum size, keeping node");
                    continue;
                }
                *remaining -= 1;
            }
            info!(node = %node.name, group = %owner.reference, "deleting empty node");
            self.manager
                .delete_instances(std::slice::from_ref(instance))
                .await?;
            deleted += 1;
        }
        Ok(deleted)
    }
}

/// Detached drain/delete sequence: evict, cordon, delete the instance.
async fn drain_and_delete(
    manager: Arc<GroupManager>,
    node: &Node,
    pods: &[Pod],
    evictor: Arc<dyn EvictionApi>,
    options: &AutoscalerOptions,
) -> Result<(), ScaleDownError> {
    drain::drain_node(node, pods, evictor, options).await?;
    let Some(instance) = node.provider.clone() else {
        return Err(ScaleDownError::NoGroupForNode {
            node: node.name.clone(),
        });
    };
    manager.delete_instances(&[instance]).await?;
    info!(node = %node.name, "node removed");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
