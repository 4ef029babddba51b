//! Removal simulation: can a node's pods be rescheduled elsewhere?
//!
//! [`find_nodes_to_remove`] walks removal candidates in caller order and, for
//! each one, tries to find a home for every pod that would have to move.
//! Placement is hint-first, then first-fit over the remaining nodes — this is
//! a feasibility check, not a bin-packing optimizer, and deliberately stays
//! one.
//!
//! Within one candidate, tentative placements accumulate so that several
//! evicted pods do not collide on the same headroom; a single unplaceable pod
//! vetoes the candidate and discards its partial placements.  Candidates do
//! not see each other's tentative placements — each is judged against the
//! real snapshot.

pub mod oracle;
pub mod policy;
pub mod utilization;

pub use oracle::{FitDecision, OracleError, PredicateChecker, ResourceFit};
pub use policy::{pods_to_relocate, DrainBlocker, DrainPolicy};
pub use utilization::{utilization, UtilizationError};

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use tracing::debug;

use crate::cluster::{Node, NodeState, Pod};

/// `namespace/name` pod key.
pub type PodKey = String;
pub type NodeName = String;

/// Best-effort placement suggestions carried between evaluation rounds to
/// keep repeated simulations stable.
pub type LocationHints = BTreeMap<PodKey, NodeName>;

/// Result of one simulation pass.
#[derive(Debug, Default)]
pub struct Removal {
    /// Nodes whose pods all found a home, in candidate order.
    pub nodes: Vec<Node>,
    /// Final per-pod placements of every node in `nodes`.
    pub hints: LocationHints,
    /// Candidates vetoed this pass, for unremovability bookkeeping.
    pub blocked: Vec<NodeName>,
}

/// Structural simulation failure.  Individual no-fit verdicts are not errors.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Find up to `max_count` removable nodes among `candidates`.
///
/// Candidate order is the caller's priority order and is preserved in the
/// result.  `old_hints` seeds placement so a pod simulated repeatedly keeps
/// landing on the same target while that target still fits.
pub fn find_nodes_to_remove(
    candidates: &[Node],
    all_nodes: &[Node],
    pods: &[Pod],
    policy: &DrainPolicy,
    oracle: &dyn PredicateChecker,
    max_count: usize,
    old_hints: &LocationHints,
) -> Result<Removal, SimulationError> {
    let base: HashMap<NodeName, NodeState> = all_nodes
        .iter()
        .map(|n| (n.name.clone(), NodeState::new(n.clone(), pods)))
        .collect();

    let mut removal = Removal::default();
    for candidate in candidates {
        if removal.nodes.len() >= max_count {
            break;
        }
        debug!(node = %candidate.name, "evaluating node for removal");

        let to_move = match pods_to_relocate(&candidate.name, pods, policy) {
            Ok(pods) => pods,
            Err(blocker) => {
                debug!(node = %candidate.name, reason = %blocker, "node cannot be removed");
                removal.blocked.push(candidate.name.clone());
                continue;
            }
        };

        match find_place_for(&candidate.name, &to_move, all_nodes, &base, oracle, old_hints)? {
            Some(placements) => {
                debug!(node = %candidate.name, pods = to_move.len(), "node may be removed");
                removal.hints.extend(placements);
                removal.nodes.push(candidate.clone());
            }
            None => {
                debug!(node = %candidate.name, "no placement for all pods, keeping node");
                removal.blocked.push(candidate.name.clone());
            }
        }
    }
    Ok(removal)
}

/// Try to place every pod of one candidate, banning the candidate itself.
///
/// Returns the complete per-pod placements on success, `None` when any pod
/// has no home.  Partial placements never escape this function.
fn find_place_for(
    banned: &str,
    pods: &[Pod],
    all_nodes: &[Node],
    base: &HashMap<NodeName, NodeState>,
    oracle: &dyn PredicateChecker,
    old_hints: &LocationHints,
) -> Result<Option<LocationHints>, SimulationError> {
    // Tentative states overlay the base snapshot as pods are placed.
    let mut tentative: HashMap<NodeName, NodeState> = HashMap::new();
    let mut placements = LocationHints::new();

    for pod in pods {
        let mut placed = false;

        if let Some(hinted) = old_hints.get(&pod.key()) {
            if hinted != banned && try_place(pod, hinted, base, &mut tentative, oracle)? {
                debug!(pod = %pod.key(), node = %hinted, "placed on hinted node");
                placements.insert(pod.key(), hinted.clone());
                placed = true;
            }
        }
        if !placed {
            for node in all_nodes.iter().filter(|n| n.name != banned) {
                if try_place(pod, &node.name, base, &mut tentative, oracle)? {
                    placements.insert(pod.key(), node.name.clone());
                    placed = true;
                    break;
                }
            }
        }
        if !placed {
            debug!(pod = %pod.key(), "no node can take the pod");
            return Ok(None);
        }
    }
    Ok(Some(placements))
}

/// Score `pod` against `node_name` including earlier tentative placements;
/// on a fit, extend the tentative state so later pods see the pod there.
fn try_place(
    pod: &Pod,
    node_name: &str,
    base: &HashMap<NodeName, NodeState>,
    tentative: &mut HashMap<NodeName, NodeState>,
    oracle: &dyn PredicateChecker,
) -> Result<bool, SimulationError> {
    let state = match tentative.get(node_name).or_else(|| base.get(node_name)) {
        Some(state) => state.clone(),
        None => return Ok(false),
    };
    match oracle.check(pod, &state)? {
        FitDecision::Fits => {
            let mut updated = state;
            let mut moved = pod.clone();
            moved.node_name = Some(node_name.to_string());
            updated.pods.push(moved);
            tentative.insert(node_name.to_string(), updated);
            Ok(true)
        }
        FitDecision::Rejected(_) => Ok(false),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
