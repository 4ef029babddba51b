/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Node utilization rating.
//!
//! Utilization is the total amount of requested resources divided by the
//! node's capacity, taken per tracked resource, with the **maximum** fraction
//! across resources as the result — the binding constraint decides whether a
//! node is worth keeping.

use thiserror::Error;

use crate::cluster::{Node, Pod, Resources};

/// A node that cannot be meaningfully rated.
///
/// Zero or absent capacity makes the fraction undefined; the caller must
/// exclude the node from removal consideration instead of crashing the
/// evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("node '{node}' reports no {resource} capacity")]
pub struct UtilizationError {
    pub node: String,
    pub resource: &'static str,
}

/// Utilization fraction of `node` given the pods scheduled on it.
pub fn utilization(node: &Node, pods_on_node: &[Pod]) -> Result<f64, UtilizationError> {
    let cpu = fraction(node, pods_on_node, "cpu", |r| r.cpu_millis)?;
    let memory = fraction(node, pods_on_node, "memory", |r| r.memory_bytes)?;
    Ok(cpu.max(memory))
}

fn fraction(
    node: &Node,
    pods_on_node: &[Pod],
    resource: &'static str,
    amount: impl Fn(&Resources) -> i64,
) -> Result<f64, UtilizationError> {
    let capacity = amount(&node.capacity);
    if capacity <= 0 {
        return Err(UtilizationError {
            node: node.name.clone(),
            resource,
        });
    }
    let requested: i64 = pods_on_node.iter().map(|p| amount(&p.requests)).sum();
    Ok(requested as f64 / capacity as f64)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
