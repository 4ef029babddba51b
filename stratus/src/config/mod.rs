//! Autoscaler option loading and validation.
//!
//! The surrounding CLI/config layer owns flag parsing; this module only
//! defines the plain-value [`AutoscalerOptions`] struct the core consumes,
//! plus an optional YAML loader for deployments that ship options as a file.
//!
//! The expected YAML structure is:
//! ```yaml
//! utilization_threshold: 0.35
//! unneeded_seconds: 600
//! max_non_empty_candidates: 30
//! candidates_pool_ratio: 0.1
//! candidates_pool_min_count: 50
//! ```
//! Every field is optional; missing values fall back to their defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use serde::Deserialize;
use tracing::info;

// ── Private YAML deserialization type ─────────────────────────────────────────

/// File layout as it appears on disk.  Durations are plain seconds so the
/// file stays writable by hand; they are converted on load.
///
/// Kept private — callers work with [`AutoscalerOptions`] instead.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OptionsFile {
    utilization_threshold: Option<f64>,
    unneeded_seconds: Option<u64>,
    unready_unneeded_seconds: Option<u64>,
    unremovable_recheck_seconds: Option<u64>,
    max_non_empty_candidates: Option<usize>,
    candidates_pool_ratio: Option<f64>,
    candidates_pool_min_count: Option<usize>,
    max_empty_bulk_delete: Option<usize>,
    max_graceful_termination_seconds: Option<u64>,
    max_pod_eviction_seconds: Option<u64>,
    eviction_retry_seconds: Option<u64>,
    max_eviction_parallelism: Option<usize>,
    skip_system_pods: Option<bool>,
    skip_local_storage: Option<bool>,
}

// ── Public options struct ─────────────────────────────────────────────────────

/// Tuning knobs of the scale-down core, consumed as plain values.
#[derive(Debug, Clone)]
pub struct AutoscalerOptions {
    /// Nodes with utilization below this fraction qualify as unneeded.
    pub utilization_threshold: f64,
    /// How long a node must stay continuously unneeded before removal.
    pub unneeded_duration: Duration,
    /// The same gate for nodes that are not ready (typically much longer).
    pub unready_unneeded_duration: Duration,
    /// Cooldown before a node rejected as unremovable is re-simulated.
    pub unremovable_recheck: Duration,
    /// Upper bound on non-empty removal candidates per evaluation.
    pub max_non_empty_candidates: usize,
    /// Fraction of the cluster considered when topping up candidates.
    pub candidates_pool_ratio: f64,
    /// Absolute floor for the top-up pool, applied independently of the ratio.
    pub candidates_pool_min_count: usize,
    /// How many empty nodes one scale-down attempt may delete at once.
    pub max_empty_bulk_delete: usize,
    /// Grace period handed to the eviction primitive.
    pub max_graceful_termination: Duration,
    /// Total time budget for evicting one pod, retries included.
    pub max_pod_eviction_time: Duration,
    /// Fixed delay between retries on disruption-budget conflicts.
    pub eviction_retry_delay: Duration,
    /// How many evictions may be in flight at once while draining one node.
    pub max_eviction_parallelism: usize,
    /// Refuse to remove nodes running `kube-system` pods.
    pub skip_system_pods: bool,
    /// Refuse to remove nodes running pods with local storage.
    pub skip_local_storage: bool,
}

impl Default for AutoscalerOptions {
    fn default() -> Self {
        Self {
            utilization_threshold: 0.5,
            unneeded_duration: Duration::from_secs(10 * 60),
            unready_unneeded_duration: Duration::from_secs(20 * 60),
            unremovable_recheck: Duration::from_secs(5 * 60),
            max_non_empty_candidates: 30,
            candidates_pool_ratio: 0.1,
            candidates_pool_min_count: 50,
            max_empty_bulk_delete: 10,
            max_graceful_termination: Duration::from_secs(60),
            max_pod_eviction_time: Duration::from_secs(2 * 60),
            eviction_retry_delay: Duration::from_secs(10),
            max_eviction_parallelism: 10,
            skip_system_pods: true,
            skip_local_storage: true,
        }
    }
}

impl AutoscalerOptions {
    /// Parses `path` and returns the resulting options.
    ///
    /// Missing fields keep their defaults; present fields are validated the
    /// same way [`validate`](Self::validate) does.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, the YAML is
    /// structurally invalid, or a value fails validation.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot open options file: {}", path.display()))?;

        let file: OptionsFile = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse YAML file: {}", path.display()))?;

        let mut options = Self::default();
        if let Some(v) = file.utilization_threshold {
            options.utilization_threshold = v;
        }
        if let Some(v) = file.unneeded_seconds {
            options.unneeded_duration = Duration::from_secs(v);
        }
        if let Some(v) = file.unready_unneeded_seconds {
            options.unready_unneeded_duration = Duration::from_secs(v);
        }
        if let Some(v) = file.unremovable_recheck_seconds {
            options.unremovable_recheck = Duration::from_secs(v);
        }
        if let Some(v) = file.max_non_empty_candidates {
            options.max_non_empty_candidates = v;
        }
        if let Some(v) = file.candidates_pool_ratio {
            options.candidates_pool_ratio = v;
        }
        if let Some(v) = file.candidates_pool_min_count {
            options.candidates_pool_min_count = v;
        }
        if let Some(v) = file.max_empty_bulk_delete {
            options.max_empty_bulk_delete = v;
        }
        if let Some(v) = file.max_graceful_termination_seconds {
            options.max_graceful_termination = Duration::from_secs(v);
        }
        if let Some(v) = file.max_pod_eviction_seconds {
            options.max_pod_eviction_time = Duration::from_secs(v);
        }
        if let Some(v) = file.eviction_retry_seconds {
            options.eviction_retry_delay = Duration::from_secs(v);
        }
        if let Some(v) = file.max_eviction_parallelism {
            options.max_eviction_parallelism = v;
        }
        if let Some(v) = file.skip_system_pods {
            options.skip_system_pods = v;
        }
        if let Some(v) = file.skip_local_storage {
            options.skip_local_storage = v;
        }

        options.validate()?;

        info!(
            utilization_threshold = options.utilization_threshold,
            max_non_empty_candidates = options.max_non_empty_candidates,
            candidates_pool_ratio = options.candidates_pool_ratio,
            "loaded autoscaler options from {}",
            path.display()
        );

        Ok(options)
    }

    /// Rejects structurally invalid combinations before the core runs with
    /// them.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.utilization_threshold > 0.0 && self.utilization_threshold <= 1.0,
            "utilization_threshold must be in (0, 1], got {}",
            self.utilization_threshold
        );
        ensure!(
            self.candidates_pool_ratio > 0.0 && self.candidates_pool_ratio <= 1.0,
            "candidates_pool_ratio must be in (0, 1], got {}",
            self.candidates_pool_ratio
        );
        ensure!(
            self.candidates_pool_min_count >= 1,
            "candidates_pool_min_count must be at least 1"
        );
        ensure!(
            self.max_non_empty_candidates >= 1,
            "max_non_empty_candidates must be at least 1"
        );
        ensure!(
            self.max_eviction_parallelism >= 1,
            "max_eviction_parallelism must be at least 1"
        );
        ensure!(
            self.max_empty_bulk_delete >= 1,
            "max_empty_bulk_delete must be at least 1"
        );
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
