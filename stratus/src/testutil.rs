/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Shared builders for test fixtures.

use crate::cloud::fake::{TEST_PROJECT, TEST_ZONE};
use crate::cloud::GroupRef;
use crate::cluster::{InstanceRef, Node, Pod, Resources};
use crate::registry::ManagedGroup;

/// Opt-in tracing output for a test run, controlled by `RUST_LOG`.
#[allow(dead_code)]
pub(crate) fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// A ready, schedulable node with the given CPU capacity, 8 GiB of memory,
/// and a provider identity matching its name.
pub(crate) fn test_node(name: &str, cpu_millis: i64) -> Node {
    Node {
        name: name.to_string(),
        capacity: Resources {
            cpu_millis,
            memory_bytes: 8 << 30,
        },
        ready: true,
        unschedulable: false,
        scale_down_disabled: false,
        provider: Some(test_instance(name)),
    }
}

/// An unbound, controller-owned pod requesting the given CPU.
pub(crate) fn test_pod(name: &str, cpu_millis: i64) -> Pod {
    Pod {
        name: name.to_string(),
        namespace: "default".to_string(),
        node_name: None,
        requests: Resources {
            cpu_millis,
            memory_bytes: 0,
        },
        controlled: true,
        mirror: false,
        daemon_set: false,
        local_storage: false,
    }
}

pub(crate) fn test_instance(name: &str) -> InstanceRef {
    InstanceRef {
        project: TEST_PROJECT.to_string(),
        zone: TEST_ZONE.to_string(),
        name: name.to_string(),
    }
}

/// A live, non-autoprovisioned managed group in the fake cloud's project.
pub(crate) fn test_group(name: &str, min_size: u64, max_size: u64) -> ManagedGroup {
    ManagedGroup {
        reference: GroupRef {
            project: TEST_PROJECT.to_string(),
            zone: TEST_ZONE.to_string(),
            name: name.to_string(),
        },
        node_pool_name: name.to_string(),
        min_size,
        max_size,
        autoprovisioned: false,
        exist: true,
        spec: None,
    }
}
