/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Stateful unneeded-node classification with hysteresis.
//!
//! [`Tracker::update`] recomputes the unneeded set from scratch every tick,
//! but carries three pieces of state across ticks:
//!
//! * `unneeded` — when each node was **first** observed unneeded; a node must
//!   accumulate continuous unneeded time before it may be removed, so the
//!   timestamp survives as long as the node keeps qualifying and resets when
//!   it drops out;
//! * `unremovable` — when a node last failed removal simulation; such nodes
//!   are skipped until a cooldown elapses, so unstable pods do not trigger
//!   the same expensive simulation every tick;
//! * `hints` — last known placements, which keep repeated simulations stable.
//!
//! All state lives in `BTreeMap`s and every scan follows caller-supplied
//! order: identical inputs and prior state produce identical output.

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::cluster::{Node, Pod};
use crate::config::AutoscalerOptions;
use crate::simulator::{
    self, find_nodes_to_remove, utilization, DrainPolicy, LocationHints, NodeName,
    PredicateChecker, SimulationError,
};

/// Caller-supplied exclusions for one update, keyed by node name with a
/// human-readable reason for the log.
pub type SkipReasons = BTreeMap<NodeName, String>;

/// Hysteresis-based unneeded-node classifier.
pub struct Tracker {
    options: AutoscalerOptions,
    /// Node → first observed unneeded.  Absence means "needed".
    unneeded: BTreeMap<NodeName, Instant>,
    /// Current unneeded nodes, empty candidates first, simulation order after.
    unneeded_list: Vec<Node>,
    /// Node → last rejected as unremovable.
    unremovable: BTreeMap<NodeName, Instant>,
    /// Pod → suggested relocation target from the last simulation.
    hints: LocationHints,
    /// Node → utilization fraction from the last update.
    utilization: BTreeMap<NodeName, f64>,
}

impl Tracker {
    pub fn new(options: AutoscalerOptions) -> Self {
        Self {
            options,
            unneeded: BTreeMap::new(),
            unneeded_list: Vec::new(),
            unremovable: BTreeMap::new(),
            hints: LocationHints::new(),
            utilization: BTreeMap::new(),
        }
    }

    /// Recompute the unneeded set.
    ///
    /// `candidates` is the caller's pre-filtered list of nodes eligible for
    /// scale-down this tick; `all_nodes` is the full cluster used as
    /// placement targets; `skipped` excludes nodes for caller-side reasons.
    pub fn update(
        &mut self,
        candidates: &[Node],
        all_nodes: &[Node],
        pods: &[Pod],
        now: Instant,
        skipped: &SkipReasons,
        oracle: &dyn PredicateChecker,
    ) -> Result<(), SimulationError> {
        let policy = DrainPolicy::from_options(&self.options);
        let recheck = self.options.unremovable_recheck;
        self.unremovable
            .retain(|_, rejected| now < *rejected + recheck);

        // ── Classify by utilization ───────────────────────────────────────────
        let mut rated = BTreeMap::new();
        let mut currently_unneeded: Vec<Node> = Vec::new();
        for node in candidates {
            if node.scale_down_disabled {
                debug!(node = %node.name, "scale-down disabled on node, skipping");
                continue;
            }
            if let Some(reason) = skipped.get(&node.name) {
                debug!(node = %node.name, reason = %reason, "skipped by caller");
                continue;
            }
            if self.unremovable.contains_key(&node.name) {
                debug!(node = %node.name, "recently found unremovable, cooling down");
                continue;
            }
            let pods_on_node: Vec<Pod> =
                pods.iter().filter(|p| p.is_on(&node.name)).cloned().collect();
            let value = match utilization(node, &pods_on_node) {
                Ok(value) => value,
                Err(err) => {
                    warn!(node = %node.name, error = %err, "cannot rate node, excluding from scale-down");
                    continue;
                }
            };
            rated.insert(node.name.clone(), value);
            if value >= self.options.utilization_threshold {
                continue;
            }
            currently_unneeded.push(node.clone());
        }
        self.utilization = rated;

        // ── Empty nodes are always kept; non-empty ones are capped ────────────
        let (empty, non_empty): (Vec<Node>, Vec<Node>) = currently_unneeded
            .into_iter()
            .partition(|n| simulator::policy::is_empty(&n.name, pods));

        // Nodes already unneeded last round are re-simulated first so the
        // candidate set stays stable between ticks.
        let (previous, fresh): (Vec<Node>, Vec<Node>) = non_empty
            .into_iter()
            .partition(|n| self.unneeded.contains_key(&n.name));

        let mut removal = find_nodes_to_remove(
            &previous,
            all_nodes,
            pods,
            &policy,
            oracle,
            previous.len(),
            &self.hints,
        )?;

        let additional = self
            .options
            .max_non_empty_candidates
            .saturating_sub(removal.nodes.len())
            .min(fresh.len());
        if additional > 0 {
            // Both the ratio and the floor bound the pool independently; the
            // larger wins, then the pool cannot exceed what is available.
            let pool = (all_nodes.len() as f64 * self.options.candidates_pool_ratio)
                .max(self.options.candidates_pool_min_count as f64) as usize;
            let pool = pool.min(fresh.len());
            let extra = find_nodes_to_remove(
                &fresh[..pool],
                all_nodes,
                pods,
                &policy,
                oracle,
                additional,
                &self.hints,
            )?;
            removal.nodes.extend(extra.nodes);
            removal.hints.extend(extra.hints);
            removal.blocked.extend(extra.blocked);
        }

        for name in removal.blocked {
            self.unremovable.insert(name, now);
        }

        // ── Carry timestamps, stamp newcomers, drop the rest ──────────────────
        let mut next = BTreeMap::new();
        let mut list = Vec::with_capacity(empty.len() + removal.nodes.len());
        for node in empty.iter().chain(removal.nodes.iter()) {
            let since = self.unneeded.get(&node.name).copied().unwrap_or(now);
            next.insert(node.name.clone(), since);
            list.push(node.clone());
        }
        info!(
            unneeded = next.len(),
            empty = empty.len(),
            cooling_down = self.unremovable.len(),
            "unneeded set updated"
        );
        self.unneeded = next;
        self.unneeded_list = list;

        // ── Hints: keep only live pods, overlay this round's placements ───────
        let live: HashSet<String> = pods.iter().map(Pod::key).collect();
        self.hints.retain(|pod, _| live.contains(pod));
        self.hints.extend(removal.hints);
        Ok(())
    }

    /// When `node` was first observed unneeded, if it currently is.
    pub fn unneeded_since(&self, node: &str) -> Option<Instant> {
        self.unneeded.get(node).copied()
    }

    /// Current unneeded nodes: empty candidates first, then non-empty ones in
    /// simulation order.
    pub fn unneeded_nodes(&self) -> &[Node] {
        &self.unneeded_list
    }

    pub fn unneeded_count(&self) -> usize {
        self.unneeded.len()
    }

    /// Placement hints carried to the next evaluation round.
    pub fn hints(&self) -> &LocationHints {
        &self.hints
    }

    /// Utilization fractions computed by the last update.
    pub fn utilization_map(&self) -> &BTreeMap<NodeName, f64> {
        &self.utilization
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::ResourceFit;
    use crate::testutil::{test_node, test_pod};
    use std::time::Duration;

    fn pod_on(node: &str, name: &str, cpu_millis: i64) -> Pod {
        let mut pod = test_pod(name, cpu_millis);
        pod.node_name = Some(node.to_string());
        pod
    }

    fn options(threshold: f64) -> AutoscalerOptions {
        AutoscalerOptions {
            utilization_threshold: threshold,
            ..AutoscalerOptions::default()
        }
    }

    /// The worked five-node scenario: only `n2` (300m / 1000m = 0.30) ends up
    /// unneeded under a 0.35 threshold.
    fn five_node_fixture() -> (Vec<Node>, Vec<Pod>) {
        let n1 = test_node("n1", 1000);
        let n2 = test_node("n2", 1000);
        let n3 = test_node("n3", 1000);
        let n4 = test_node("n4", 10000);
        let mut n5 = test_node("n5", 1000);
        n5.scale_down_disabled = true;

        // p1 has no controller, so n1 can never be drained.
        let mut p1 = pod_on("n1", "p1", 100);
        p1.controlled = false;
        let p2 = pod_on("n2", "p2", 300);
        let p3 = pod_on("n3", "p3", 400);
        let p4 = pod_on("n4", "p4", 2000);

        (vec![n1, n2, n3, n4, n5], vec![p1, p2, p3, p4])
    }

    #[test]
    fn only_the_below_threshold_drainable_node_is_unneeded() {
        let (nodes, pods) = five_node_fixture();
        let mut tracker = Tracker::new(options(0.35));

        tracker
            .update(&nodes, &nodes, &pods, Instant::now(), &SkipReasons::new(), &ResourceFit)
            .unwrap();

        assert_eq!(tracker.unneeded_count(), 1);
        assert!(tracker.unneeded_since("n2").is_some());
        assert!(tracker.hints().contains_key("default/p2"));
        // n5 is annotation-excluded before rating; the other four are rated.
        assert_eq!(tracker.utilization_map().len(), 4);
    }

    #[test]
    fn first_observed_timestamp_survives_repeated_updates() {
        let (nodes, pods) = five_node_fixture();
        let mut tracker = Tracker::new(options(0.35));
        let t1 = Instant::now();

        tracker
            .update(&nodes, &nodes, &pods, t1, &SkipReasons::new(), &ResourceFit)
            .unwrap();
        let since = tracker.unneeded_since("n2").unwrap();
        assert_eq!(since, t1);

        // Pretend n1 was unneeded too and clear the cooldown bookkeeping so
        // the second pass re-evaluates everything.
        tracker.unremovable.clear();
        tracker.unneeded.insert("n1".to_string(), t1);

        let four: Vec<Node> = nodes[..4].to_vec();
        let t2 = t1 + Duration::from_secs(30);
        tracker
            .update(&four, &four, &pods, t2, &SkipReasons::new(), &ResourceFit)
            .unwrap();
        tracker.unremovable.clear();

        assert_eq!(tracker.unneeded_count(), 1);
        assert_eq!(
            tracker.unneeded_since("n2").unwrap(),
            since,
            "a node that stays unneeded keeps its first-observed timestamp"
        );
        assert_eq!(tracker.utilization_map().len(), 4);
    }

    #[test]
    fn node_dropping_out_loses_its_history() {
        let (nodes, pods) = five_node_fixture();
        let mut tracker = Tracker::new(options(0.35));
        let t1 = Instant::now();

        tracker
            .update(&nodes, &nodes, &pods, t1, &SkipReasons::new(), &ResourceFit)
            .unwrap();
        assert!(tracker.unneeded_since("n2").is_some());

        // n2 is no longer a candidate: its entry must disappear entirely.
        let without_n2: Vec<Node> = nodes
            .iter()
            .filter(|n| n.name != "n2")
            .cloned()
            .collect();
        tracker.unremovable.clear();
        let t2 = t1 + Duration::from_secs(60);
        tracker
            .update(&without_n2, &nodes, &pods, t2, &SkipReasons::new(), &ResourceFit)
            .unwrap();
        assert_eq!(tracker.unneeded_count(), 0);

        // Re-qualifying later restarts the clock at the later timestamp.
        tracker.unremovable.clear();
        let t3 = t2 + Duration::from_secs(60);
        tracker
            .update(&nodes, &nodes, &pods, t3, &SkipReasons::new(), &ResourceFit)
            .unwrap();
        assert_eq!(tracker.unneeded_since("n2").unwrap(), t3);
    }

    #[test]
    fn unremovable_nodes_cool_down_before_re_simulation() {
        let n1 = test_node("n1", 1000);
        let mut p1 = pod_on("n1", "p1", 100);
        p1.controlled = false;
        let nodes = vec![n1];
        let t1 = Instant::now();

        let mut tracker = Tracker::new(options(0.35));
        // p1 blocks the drain, so n1 is found unremovable.
        tracker
            .update(&nodes, &nodes, &[p1], t1, &SkipReasons::new(), &ResourceFit)
            .unwrap();
        assert_eq!(tracker.unneeded_count(), 0);

        // Now empty, but still cooling down.
        let t2 = t1 + Duration::from_secs(1);
        tracker
            .update(&nodes, &nodes, &[], t2, &SkipReasons::new(), &ResourceFit)
            .unwrap();
        assert_eq!(tracker.unneeded_count(), 0, "cooldown must suppress re-evaluation");

        // After the recheck cooldown it is evaluated again and qualifies.
        let t3 = t1 + tracker.options.unremovable_recheck + Duration::from_secs(1);
        tracker
            .update(&nodes, &nodes, &[], t3, &SkipReasons::new(), &ResourceFit)
            .unwrap();
        assert_eq!(tracker.unneeded_count(), 1);
    }

    #[test]
    fn caller_skips_exclude_nodes() {
        let nodes = vec![test_node("n1", 1000), test_node("n2", 1000)];
        let mut skipped = SkipReasons::new();
        skipped.insert("n1".to_string(), "group at minimum size".to_string());

        let mut tracker = Tracker::new(options(0.35));
        tracker
            .update(&nodes, &nodes, &[], Instant::now(), &skipped, &ResourceFit)
            .unwrap();
        assert!(tracker.unneeded_since("n1").is_none());
        assert!(tracker.unneeded_since("n2").is_some());
    }

    #[test]
    fn unratable_node_is_excluded_not_fatal() {
        let mut broken = test_node("n1", 1000);
        broken.capacity.cpu_millis = 0;
        let nodes = vec![broken, test_node("n2", 1000)];

        let mut tracker = Tracker::new(options(0.35));
        tracker
            .update(&nodes, &nodes, &[], Instant::now(), &SkipReasons::new(), &ResourceFit)
            .unwrap();
        assert!(tracker.unneeded_since("n1").is_none());
        assert!(tracker.unneeded_since("n2").is_some());
        assert!(!tracker.utilization_map().contains_key("n1"));
    }

    fn bulk_fixture(total: usize, with_pods: usize) -> (Vec<Node>, Vec<Pod>) {
        let nodes: Vec<Node> = (0..total)
            .map(|i| test_node(&format!("n{i}"), 1000))
            .collect();
        let pods: Vec<Pod> = (0..with_pods)
            .map(|i| pod_on(&format!("n{i}"), &format!("p{i}"), 100))
            .collect();
        (nodes, pods)
    }

    #[test]
    fn non_empty_candidates_are_capped() {
        let (mut nodes, mut pods) = bulk_fixture(100, 100);
        let opts = AutoscalerOptions {
            utilization_threshold: 0.35,
            max_non_empty_candidates: 30,
            candidates_pool_ratio: 1.0,
            candidates_pool_min_count: 1000,
            ..AutoscalerOptions::default()
        };
        let mut tracker = Tracker::new(opts);
        let t1 = Instant::now();
        tracker
            .update(&nodes, &nodes, &pods, t1, &SkipReasons::new(), &ResourceFit)
            .unwrap();
        assert_eq!(tracker.unneeded_count(), 30);

        // One of the unneeded nodes disappears: its pod moves elsewhere and
        // the node leaves the cluster.  The cap must be refilled.
        let deleted = tracker.unneeded_nodes().last().unwrap().name.clone();
        let index = nodes.iter().position(|n| n.name == deleted).unwrap();
        let target = if index >= 1 { index - 1 } else { index + 1 };
        pods[index].node_name = Some(nodes[target].name.clone());
        nodes.remove(index);

        let t2 = t1 + Duration::from_secs(30);
        tracker
            .update(&nodes, &nodes, &pods, t2, &SkipReasons::new(), &ResourceFit)
            .unwrap();
        assert_eq!(tracker.unneeded_count(), 30);
        assert!(tracker.unneeded_since(&deleted).is_none());
    }

    #[test]
    fn empty_nodes_are_always_included_beyond_the_cap() {
        // 70 lightly-loaded nodes plus 30 empty ones.
        let (nodes, pods) = bulk_fixture(100, 70);
        let opts = AutoscalerOptions {
            utilization_threshold: 0.35,
            max_non_empty_candidates: 30,
            candidates_pool_ratio: 1.0,
            candidates_pool_min_count: 1000,
            ..AutoscalerOptions::default()
        };
        let mut tracker = Tracker::new(opts);
        tracker
            .update(&nodes, &nodes, &pods, Instant::now(), &SkipReasons::new(), &ResourceFit)
            .unwrap();
        assert_eq!(
            tracker.unneeded_count(),
            60,
            "30 empty nodes plus 30 capped non-empty candidates"
        );
    }

    #[test]
    fn candidate_pool_ratio_and_floor_bound_the_search() {
        let (nodes, pods) = bulk_fixture(100, 100);
        let opts = AutoscalerOptions {
            utilization_threshold: 0.35,
            max_non_empty_candidates: 30,
            candidates_pool_ratio: 0.1,
            candidates_pool_min_count: 10,
            ..AutoscalerOptions::default()
        };
        let mut tracker = Tracker::new(opts);
        tracker
            .update(&nodes, &nodes, &pods, Instant::now(), &SkipReasons::new(), &ResourceFit)
            .unwrap();
        // pool = max(100 × 0.1, 10) = 10 — fewer than the candidate cap.
        assert_eq!(tracker.unneeded_count(), 10);
    }

    #[test]
    fn above_threshold_nodes_never_enter_the_unneeded_set() {
        let nodes = vec![test_node("n1", 1000), test_node("n2", 1000)];
        let pods = vec![pod_on("n1", "p1", 400), pod_on("n2", "p2", 100)];

        let mut tracker = Tracker::new(options(0.35));
        tracker
            .update(&nodes, &nodes, &pods, Instant::now(), &SkipReasons::new(), &ResourceFit)
            .unwrap();
        assert!(tracker.unneeded_since("n1").is_none(), "0.40 ≥ 0.35");
        assert!(tracker.unneeded_since("n2").is_some());
    }

    #[test]
    fn stale_hints_are_dropped_with_their_pods() {
        let (nodes, pods) = five_node_fixture();
        let mut tracker = Tracker::new(options(0.35));
        tracker
            .update(&nodes, &nodes, &pods, Instant::now(), &SkipReasons::new(), &ResourceFit)
            .unwrap();
        assert!(tracker.hints().contains_key("default/p2"));

        // p2 is gone; its hint must not survive.
        let remaining: Vec<Pod> = pods.iter().filter(|p| p.name != "p2").cloned().collect();
        tracker.unremovable.clear();
        tracker
            .update(&nodes, &nodes, &remaining, Instant::now(), &SkipReasons::new(), &ResourceFit)
            .unwrap();
        assert!(!tracker.hints().contains_key("default/p2"));
    }
}
