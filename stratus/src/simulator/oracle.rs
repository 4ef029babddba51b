/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Scheduling-feasibility oracle.
//!
//! The real predicate logic lives in the scheduler; this crate consumes it as
//! a black box behind [`PredicateChecker`].  An individual no-fit verdict is
//! ordinary data — only [`OracleError`] is structural and aborts the
//! surrounding evaluation.
//!
//! [`ResourceFit`] is the default implementation: a plain capacity check over
//! ready, schedulable nodes.  It is deliberately simpler than a real
//! scheduler and exists for deployments without one wired in, and for tests.

use std::fmt;

use thiserror::Error;

use crate::cluster::{NodeState, Pod};

// ── Verdicts ──────────────────────────────────────────────────────────────────

/// Outcome of asking "can this pod land on this node".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FitDecision {
    Fits,
    Rejected(NoFitReason),
}

/// Why a pod/node pairing was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoFitReason {
    NodeNotReady,
    NodeUnschedulable,
    /// Free capacity for one resource is below the pod's request.
    InsufficientResource {
        resource: &'static str,
        requested: i64,
        free: i64,
    },
}

impl fmt::Display for NoFitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoFitReason::NodeNotReady => write!(f, "node is not ready"),
            NoFitReason::NodeUnschedulable => write!(f, "node is unschedulable"),
            NoFitReason::InsufficientResource {
                resource,
                requested,
                free,
            } => write!(
                f,
                "insufficient {resource}: requested {requested}, free {free}"
            ),
        }
    }
}

/// Structural failure of the oracle collaborator itself.
///
/// Not a no-fit verdict: this aborts the whole candidate evaluation.
#[derive(Debug, Error)]
#[error("predicate oracle failure: {0}")]
pub struct OracleError(pub String);

// ── Contract ──────────────────────────────────────────────────────────────────

/// External scheduling-feasibility check.
pub trait PredicateChecker: Send + Sync {
    /// Score `pod` against the aggregate `state` of a candidate node
    /// (existing plus tentatively-placed pods).
    fn check(&self, pod: &Pod, state: &NodeState) -> Result<FitDecision, OracleError>;
}

// ── Default implementation ────────────────────────────────────────────────────

/// Capacity-only feasibility check.
#[derive(Debug, Default)]
pub struct ResourceFit;

impl PredicateChecker for ResourceFit {
    fn check(&self, pod: &Pod, state: &NodeState) -> Result<FitDecision, OracleError> {
        if !state.node.ready {
            return Ok(FitDecision::Rejected(NoFitReason::NodeNotReady));
        }
        if state.node.unschedulable {
            return Ok(FitDecision::Rejected(NoFitReason::NodeUnschedulable));
        }

        let used = state.requested();
        let free_cpu = state.node.capacity.cpu_millis - used.cpu_millis;
        if pod.requests.cpu_millis > free_cpu {
            return Ok(FitDecision::Rejected(NoFitReason::InsufficientResource {
                resource: "cpu",
                requested: pod.requests.cpu_millis,
                free: free_cpu,
            }));
        }
        let free_memory = state.node.capacity.memory_bytes - used.memory_bytes;
        if pod.requests.memory_bytes > free_memory {
            return Ok(FitDecision::Rejected(NoFitReason::InsufficientResource {
                resource: "memory",
                requested: pod.requests.memory_bytes,
                free: free_memory,
            }));
        }
        Ok(FitDecision::Fits)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
