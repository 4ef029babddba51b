/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Drain policy: which pods must be relocated before a node can go, and
//! which pods veto the node outright.
//!
//! Daemon-set and mirror pods are never relocated — their lifecycle is
//! handled by other machinery.  Everything else must be recreated by a
//! controller somewhere, so an uncontrolled pod pins its node.  The two
//! strict flags extend the veto to `kube-system` pods and pods with local
//! storage, whose removal needs stricter checks upstream.

use thiserror::Error;

use crate::cluster::Pod;
use crate::config::AutoscalerOptions;

/// Strictness flags applied when computing a node's relocation set.
#[derive(Debug, Clone, Copy)]
pub struct DrainPolicy {
    pub skip_system_pods: bool,
    pub skip_local_storage: bool,
}

impl DrainPolicy {
    pub fn from_options(options: &AutoscalerOptions) -> Self {
        Self {
            skip_system_pods: options.skip_system_pods,
            skip_local_storage: options.skip_local_storage,
        }
    }
}

/// A pod that makes its node ineligible for removal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DrainBlocker {
    #[error("pod {pod} has no controller to recreate it")]
    NotReplicated { pod: String },

    #[error("pod {pod} belongs to kube-system")]
    SystemPod { pod: String },

    #[error("pod {pod} uses local storage")]
    LocalStorage { pod: String },
}

/// The pods that must find a new home if `node` is removed.
///
/// Daemon-set and mirror pods are excluded from the result.  Returns a
/// [`DrainBlocker`] when any remaining pod vetoes the removal under the
/// active policy.
pub fn pods_to_relocate(
    node: &str,
    pods: &[Pod],
    policy: &DrainPolicy,
) -> Result<Vec<Pod>, DrainBlocker> {
    let mut to_move = Vec::new();
    for pod in pods.iter().filter(|p| p.is_on(node)) {
        if pod.mirror || pod.daemon_set {
            continue;
        }
        if !pod.controlled {
            return Err(DrainBlocker::NotReplicated { pod: pod.key() });
        }
        if policy.skip_system_pods && pod.namespace == "kube-system" {
            return Err(DrainBlocker::SystemPod { pod: pod.key() });
        }
        if policy.skip_local_storage && pod.local_storage {
            return Err(DrainBlocker::LocalStorage { pod: pod.key() });
        }
        to_move.push(pod.clone());
    }
    Ok(to_move)
}

/// Returns `true` when nothing on `node` would need relocation — only
/// daemon-set or mirror pods, or no pods at all.
pub fn is_empty(node: &str, pods: &[Pod]) -> bool {
    !pods
        .iter()
        .any(|p| p.is_on(node) && !p.mirror && !p.daemon_set)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
