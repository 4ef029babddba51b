/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Core cluster data structures for the scale-down decision core.
//!
//! Two sides of the pipeline share these types:
//!
//! ```text
//! watcher ──(Node / Pod snapshots)──►  tracker + simulator  ──(candidates)──►  drain
//!                                        ↑ read-only inputs       ↑ owns per-tick state
//! ```
//!
//! # Ownership model
//! `Node` and `Pod` values are plain snapshots owned by the evaluation loop
//! for the duration of one tick.  Nothing here is shared between tasks; the
//! only concurrently-mutated state in the crate lives in the group registry.

use std::fmt;

// ── Resources ─────────────────────────────────────────────────────────────────

/// The tracked resource vector of a node or pod.
///
/// Extending the set of rated resources means adding a field here plus one
/// arm in the utilization loop; everything else sums whole vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resources {
    /// CPU in milli-cores (1000 = one full core).
    pub cpu_millis: i64,
    /// Memory in bytes.
    pub memory_bytes: i64,
}

impl Resources {
    /// A zero request vector.
    pub const ZERO: Resources = Resources {
        cpu_millis: 0,
        memory_bytes: 0,
    };

    /// Component-wise saturating sum.
    pub fn saturating_add(&self, other: &Resources) -> Resources {
        Resources {
            cpu_millis: self.cpu_millis.saturating_add(other.cpu_millis),
            memory_bytes: self.memory_bytes.saturating_add(other.memory_bytes),
        }
    }
}

// ── Instance identity ─────────────────────────────────────────────────────────

/// Identity of a single compute instance: a globally unique
/// project / zone / name triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceRef {
    pub project: String,
    pub zone: String,
    pub name: String,
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.project, self.zone, self.name)
    }
}

// ── Node ──────────────────────────────────────────────────────────────────────

/// Snapshot of a cluster node as seen by the evaluation loop.
///
/// `scale_down_disabled` carries the per-node opt-out annotation and
/// `provider` carries the parsed provider identity; both are resolved by the
/// surrounding Kubernetes-client layer before a snapshot reaches this crate.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub capacity: Resources,
    pub ready: bool,
    pub unschedulable: bool,
    pub scale_down_disabled: bool,
    /// Cloud identity of the backing instance.  `None` for nodes the cloud
    /// layer could not attribute (these can never be scaled down).
    pub provider: Option<InstanceRef>,
}

// ── Pod ───────────────────────────────────────────────────────────────────────

/// Snapshot of a scheduled pod.
///
/// `controlled` is true when a controller will recreate the pod after
/// eviction; uncontrolled pods pin their node.  `mirror` and `daemon_set`
/// pods are never relocated (they are recreated on, or bound to, their node
/// by other machinery).
#[derive(Debug, Clone, PartialEq)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    /// Node the pod is currently bound to, if any.
    pub node_name: Option<String>,
    pub requests: Resources,
    pub controlled: bool,
    pub mirror: bool,
    pub daemon_set: bool,
    pub local_storage: bool,
}

impl Pod {
    /// Stable `namespace/name` key used for location hints.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Returns `true` if the pod currently runs on `node`.
    pub fn is_on(&self, node: &str) -> bool {
        self.node_name.as_deref() == Some(node)
    }
}

// ── NodeState ─────────────────────────────────────────────────────────────────

/// A node together with the pods scheduled on it — the aggregate the
/// predicate oracle scores a placement against.
///
/// During simulation, tentative copies of this accumulate already-placed
/// pods so that several evicted pods do not collide on the same headroom.
#[derive(Debug, Clone)]
pub struct NodeState {
    pub node: Node,
    pub pods: Vec<Pod>,
}

impl NodeState {
    /// Build the state of `node` from a full pod snapshot, keeping only the
    /// pods bound to it.
    pub fn new(node: Node, all_pods: &[Pod]) -> Self {
        let pods = all_pods
            .iter()
            .filter(|p| p.is_on(&node.name))
            .cloned()
            .collect();
        Self { node, pods }
    }

    /// Sum of the resource requests of every pod on the node.
    pub fn requested(&self) -> Resources {
        self.pods
            .iter()
            .fold(Resources::ZERO, |acc, p| acc.saturating_add(&p.requests))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
