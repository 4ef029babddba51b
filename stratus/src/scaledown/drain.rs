/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Node drain: evict every relocatable pod, with bounded parallelism and
//! retry on disruption-budget conflicts.
//!
//! Eviction is not transactional.  A pod that fails for a non-retryable
//! reason is reported and the rest of the drain continues; a node may end up
//! partially drained, which is left for operator visibility and the next
//! evaluation cycle rather than rolled back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cluster::{Node, Pod};
use crate::config::AutoscalerOptions;

// ── Eviction collaborator ─────────────────────────────────────────────────────

/// Failure of a single eviction attempt.
///
/// [`DisruptionBudget`](EvictionError::DisruptionBudget) is the one retryable
/// signal — too many concurrent disruptions right now.  Everything else fails
/// the pod immediately.
#[derive(Debug, Clone, Error)]
pub enum EvictionError {
    #[error("too many concurrent disruptions")]
    DisruptionBudget,

    #[error("eviction failed: {0}")]
    Failed(String),
}

/// The pod-eviction primitive consumed by the drain.
#[async_trait]
pub trait EvictionApi: Send + Sync {
    /// Attempt to evict one pod with the given grace period.
    async fn evict_pod(&self, pod: &Pod, grace: Duration) -> Result<(), EvictionError>;

    /// Mark the node unschedulable ahead of its deletion.
    async fn cordon_node(&self, node: &str) -> Result<(), EvictionError>;
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failure of a whole drain.
#[derive(Debug, Error)]
pub enum DrainError {
    /// One or more pods could not be evicted.  Evictions that already
    /// succeeded are not undone.
    #[error("{} pod eviction(s) failed on node '{node}'", .failures.len())]
    PodsFailed {
        node: String,
        /// `(pod key, failure)` pairs, in completion order.
        failures: Vec<(String, String)>,
    },

    #[error("failed to cordon node '{node}': {message}")]
    CordonFailed { node: String, message: String },
}

// ── Delete status ─────────────────────────────────────────────────────────────

/// Process-wide guard ensuring at most one drain/delete sequence is in
/// flight.  A guarded boolean, not a queue: a second trigger while one is
/// running is rejected, never enqueued.
#[derive(Debug, Default)]
pub struct DeleteStatus {
    in_progress: AtomicBool,
}

impl DeleteStatus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the in-flight slot.  Returns `false` when a sequence is already
    /// running.
    pub fn try_begin(&self) -> bool {
        self.in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Release the slot.
    pub fn finish(&self) {
        self.in_progress.store(false, Ordering::SeqCst);
    }

    pub fn in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }
}

// ── Drain ─────────────────────────────────────────────────────────────────────

/// Evict `pods` from `node`, then cordon it.
///
/// At most `max_eviction_parallelism` evictions are in flight at once.  Each
/// eviction retries on [`EvictionError::DisruptionBudget`] with a fixed
/// delay until `max_pod_eviction_time` is spent; any other failure is final
/// for that pod.  All pod failures are collected into one
/// [`DrainError::PodsFailed`].
pub async fn drain_node(
    node: &Node,
    pods: &[Pod],
    evictor: Arc<dyn EvictionApi>,
    options: &AutoscalerOptions,
) -> Result<(), DrainError> {
    let semaphore = Arc::new(tokio::sync::Semaphore::new(
        options.max_eviction_parallelism.max(1),
    ));
    let mut workers = Vec::with_capacity(pods.len());

    for pod in pods.iter().cloned() {
        let evictor = Arc::clone(&evictor);
        let semaphore = Arc::clone(&semaphore);
        let grace = options.max_graceful_termination;
        let retry_delay = options.eviction_retry_delay;
        let budget = options.max_pod_eviction_time;

        workers.push(tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Err((pod.key(), "eviction worker pool closed".to_string())),
            };
            let started = Instant::now();
            loop {
                match evictor.evict_pod(&pod, grace).await {
                    Ok(()) => {
                        debug!(pod = %pod.key(), "pod evicted");
                        return Ok(());
                    }
                    Err(EvictionError::DisruptionBudget) => {
                        if started.elapsed() + retry_delay >= budget {
                            return Err((
                                pod.key(),
                                format!(
                                    "disruption budget still exceeded after {:?}",
                                    started.elapsed()
                                ),
                            ));
                        }
                        debug!(pod = %pod.key(), "disruption budget exceeded, will retry");
                        tokio::time::sleep(retry_delay).await;
                    }
                    Err(err) => return Err((pod.key(), err.to_string())),
                }
            }
        }));
    }

    let mut failures = Vec::new();
    for worker in workers {
        match worker.await {
            Ok(Ok(())) => {}
            Ok(Err(failure)) => {
                warn!(pod = %failure.0, error = %failure.1, "pod eviction failed");
                failures.push(failure);
            }
            Err(err) => failures.push(("<worker>".to_string(), err.to_string())),
        }
    }
    if !failures.is_empty() {
        return Err(DrainError::PodsFailed {
            node: node.name.clone(),
            failures,
        });
    }

    evictor
        .cordon_node(&node.name)
        .await
        .map_err(|err| DrainError::CordonFailed {
            node: node.name.clone(),
            message: err.to_string(),
        })?;

    info!(node = %node.name, pods = pods.len(), "node drained");
    Ok(())
}

// ── Test double ───────────────────────────────────────────────────────────────


// ── Tests ─────────────────────────────────────────────────────────────────────
