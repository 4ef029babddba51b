/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! stratus – cluster scale-down decision core
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── config/     – plain-value autoscaler options + YAML loading
//! ├── cluster     – Node / Pod / Resources data model
//! ├── cloud/      – cloud collaborator contract + operation polling
//! ├── registry/   – managed-group registry, ownership cache, reconciler
//! ├── simulator/  – utilization, drain policy, predicate oracle, removal simulation
//! └── scaledown/  – unneeded-node tracker, scale-down coordinator, drain
//! ```
//!
//! The crate has no wire protocol, file format, or CLI surface of its own;
//! the surrounding layer supplies parsed configuration and the collaborator
//! implementations (cloud API, pod eviction, predicate oracle) and drives
//! [`registry::reconcile::Reconciler::reconcile`] plus the evaluation tick on
//! its own schedule.

pub mod cloud;
pub mod cluster;
pub mod config;
pub mod registry;
pub mod scaledown;
pub mod simulator;

#[cfg(test)]
pub(crate) mod testutil;
