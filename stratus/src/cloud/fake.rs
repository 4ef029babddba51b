/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! In-memory [`CloudApi`] implementation for tests.
//!
//! Programmable node-pool listings, per-group metadata and instances,
//! operations that stay pending for a configurable number of polls, injected
//! listing failures, and a recorded call log that tests assert against.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{
    CloudError, GroupMetadata, GroupRef, MachineTemplate, NodePool, NodePoolSpec, OperationRef,
    OperationStatus, ResourceLimits,
};
use crate::cluster::InstanceRef;

pub(crate) const TEST_PROJECT: &str = "test-project";
pub(crate) const TEST_ZONE: &str = "us-test1-a";

// ── Internal state ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct FakeGroup {
    base_instance_name: String,
    target_size: u64,
    instances: Vec<InstanceRef>,
    template: Option<MachineTemplate>,
}

#[derive(Debug, Clone)]
enum FakeOp {
    /// Reports `Running` for the given number of polls, then `Done`.
    Pending(u32),
    /// Reports a terminal failure.
    Fail(String),
    /// Never completes.
    Stalled,
}

#[derive(Default)]
struct FakeState {
    node_pools: Vec<NodePool>,
    groups: HashMap<GroupRef, FakeGroup>,
    operations: HashMap<String, FakeOp>,
    limits: ResourceLimits,
    fail_next_listing: Option<String>,
    calls: Vec<String>,
    deleted: Vec<String>,
    next_op: u64,
}

/// Programmable in-memory cloud.
#[derive(Default)]
pub(crate) struct FakeCloud {
    state: Mutex<FakeState>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Group identity in the fake's fixed project and zone.
    pub fn group_ref(name: &str) -> GroupRef {
        GroupRef {
            project: TEST_PROJECT.to_string(),
            zone: TEST_ZONE.to_string(),
            name: name.to_string(),
        }
    }

    pub fn add_node_pool(&self, pool: NodePool) {
        self.state.lock().unwrap().node_pools.push(pool);
    }

    /// Replace the whole listing, simulating drift on the cloud side.
    pub fn set_node_pools(&self, pools: Vec<NodePool>) {
        self.state.lock().unwrap().node_pools = pools;
    }

    /// Register a group with its basename and live instances; the target
    /// size starts at the instance count.
    pub fn add_group(&self, group: GroupRef, basename: &str, instances: Vec<InstanceRef>) {
        self.state.lock().unwrap().groups.insert(
            group,
            FakeGroup {
                base_instance_name: basename.to_string(),
                target_size: instances.len() as u64,
                instances,
                template: None,
            },
        );
    }

    pub fn set_template(&self, group: &GroupRef, template: MachineTemplate) {
        if let Some(entry) = self.state.lock().unwrap().groups.get_mut(group) {
            entry.template = Some(template);
        }
    }

    pub fn set_limits(&self, limits: ResourceLimits) {
        self.state.lock().unwrap().limits = limits;
    }

    /// Make the next `list_node_pools` call fail with the given message.
    pub fn fail_next_listing(&self, message: &str) {
        self.state.lock().unwrap().fail_next_listing = Some(message.to_string());
    }

    /// Every call recorded so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Names of instances deleted so far, in deletion order.
    pub fn deleted_instances(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// An operation that reports `Running` for `polls` status checks.
    pub fn pending_operation(&self, polls: u32) -> OperationRef {
        self.register_operation(FakeOp::Pending(polls))
    }

    /// An operation that reports a terminal failure.
    pub fn failing_operation(&self, message: &str) -> OperationRef {
        self.register_operation(FakeOp::Fail(message.to_string()))
    }

    /// An operation that never completes.
    pub fn stalled_operation(&self) -> OperationRef {
        self.register_operation(FakeOp::Stalled)
    }

    fn register_operation(&self, op: FakeOp) -> OperationRef {
        let mut state = self.state.lock().unwrap();
        state.next_op += 1;
        let name = format!("op-{}", state.next_op);
        state.operations.insert(name.clone(), op);
        OperationRef {
            name,
            zone: TEST_ZONE.to_string(),
        }
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

// ── CloudApi implementation ───────────────────────────────────────────────────

#[async_trait]
impl super::CloudApi for FakeCloud {
    async fn list_node_pools(&self) -> Result<Vec<NodePool>, CloudError> {
        self.record("list_node_pools".to_string());
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.fail_next_listing.take() {
            return Err(CloudError::Api(message));
        }
        Ok(state.node_pools.clone())
    }

    async fn group_metadata(&self, group: &GroupRef) -> Result<GroupMetadata, CloudError> {
        self.record(format!("group_metadata:{}", group.name));
        let state = self.state.lock().unwrap();
        let entry = state.groups.get(group).ok_or(CloudError::NotFound {
            kind: "instance group",
            name: group.name.clone(),
        })?;
        Ok(GroupMetadata {
            target_size: entry.target_size,
            base_instance_name: entry.base_instance_name.clone(),
        })
    }

    async fn list_group_instances(
        &self,
        group: &GroupRef,
    ) -> Result<Vec<InstanceRef>, CloudError> {
        self.record(format!("list_instances:{}", group.name));
        let state = self.state.lock().unwrap();
        let entry = state.groups.get(group).ok_or(CloudError::NotFound {
            kind: "instance group",
            name: group.name.clone(),
        })?;
        Ok(entry.instances.clone())
    }

    async fn group_template(&self, group: &GroupRef) -> Result<MachineTemplate, CloudError> {
        self.record(format!("group_template:{}", group.name));
        let state = self.state.lock().unwrap();
        state
            .groups
            .get(group)
            .and_then(|g| g.template.clone())
            .ok_or(CloudError::NotFound {
                kind: "machine template",
                name: group.name.clone(),
            })
    }

    async fn resize_group(
        &self,
        group: &GroupRef,
        target_size: u64,
    ) -> Result<OperationRef, CloudError> {
        self.record(format!("resize:{}:{}", group.name, target_size));
        {
            let mut state = self.state.lock().unwrap();
            let entry = state.groups.get_mut(group).ok_or(CloudError::NotFound {
                kind: "instance group",
                name: group.name.clone(),
            })?;
            entry.target_size = target_size;
        }
        Ok(self.pending_operation(0))
    }

    async fn delete_instances(
        &self,
        group: &GroupRef,
        instances: &[InstanceRef],
    ) -> Result<OperationRef, CloudError> {
        let names: Vec<&str> = instances.iter().map(|i| i.name.as_str()).collect();
        self.record(format!("delete_instances:{}:{}", group.name, names.join(",")));
        {
            let mut guard = self.state.lock().unwrap();
            let state = &mut *guard;
            let entry = state.groups.get_mut(group).ok_or(CloudError::NotFound {
                kind: "instance group",
                name: group.name.clone(),
            })?;
            entry.instances.retain(|i| !instances.contains(i));
            entry.target_size = entry.target_size.saturating_sub(instances.len() as u64);
            for instance in instances {
                state.deleted.push(instance.name.clone());
            }
        }
        Ok(self.pending_operation(0))
    }

    async fn create_node_pool(
        &self,
        name: &str,
        _spec: &NodePoolSpec,
    ) -> Result<OperationRef, CloudError> {
        self.record(format!("create_node_pool:{name}"));
        let group = Self::group_ref(&format!("{name}-grp"));
        {
            let mut state = self.state.lock().unwrap();
            state.node_pools.push(NodePool {
                name: name.to_string(),
                autoscaled: true,
                autoprovisioned: true,
                min_size: 0,
                max_size: 1000,
                instance_groups: vec![group.clone()],
            });
            state.groups.insert(
                group,
                FakeGroup {
                    base_instance_name: format!("{name}-"),
                    target_size: 0,
                    instances: vec![],
                    template: None,
                },
            );
        }
        Ok(self.pending_operation(0))
    }

    async fn delete_node_pool(&self, name: &str) -> Result<OperationRef, CloudError> {
        self.record(format!("delete_node_pool:{name}"));
        {
            let mut state = self.state.lock().unwrap();
            let removed: Vec<GroupRef> = state
                .node_pools
                .iter()
                .filter(|p| p.name == name)
                .flat_map(|p| p.instance_groups.clone())
                .collect();
            state.node_pools.retain(|p| p.name != name);
            for group in removed {
                state.groups.remove(&group);
            }
        }
        Ok(self.pending_operation(0))
    }

    async fn operation_status(&self, op: &OperationRef) -> Result<OperationStatus, CloudError> {
        let mut state = self.state.lock().unwrap();
        match state.operations.get_mut(&op.name) {
            Some(FakeOp::Pending(0)) => Ok(OperationStatus::Done),
            Some(FakeOp::Pending(polls)) => {
                *polls -= 1;
                Ok(OperationStatus::Running)
            }
            Some(FakeOp::Fail(message)) => Ok(OperationStatus::Failed(message.clone())),
            Some(FakeOp::Stalled) => Ok(OperationStatus::Running),
            None => Err(CloudError::NotFound {
                kind: "operation",
                name: op.name.clone(),
            }),
        }
    }

    async fn resource_limits(&self) -> Result<ResourceLimits, CloudError> {
        self.record("resource_limits".to_string());
        Ok(self.state.lock().unwrap().limits.clone())
    }
}
