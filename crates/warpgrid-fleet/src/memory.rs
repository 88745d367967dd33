//! InMemoryFleet — an in-process capacity authority and cluster.
//!
//! Implements both [`CapacityAuthority`] and [`ClusterMembership`] over a
//! shared, mutex-guarded fleet. Tests script it (task counts, drain
//! progress, injected failures) and then assert on the resulting state and
//! on how many calls of each kind were made.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::client::{CapacityAuthority, ClusterMembership};
use crate::error::{FleetError, FleetResult};
use crate::types::*;

/// How running workload leaves a node once it is draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainProgress {
    /// Workload vacates as soon as the drain request lands.
    #[default]
    Immediate,
    /// Each poll of a draining node finishes this many tasks.
    PerPoll(u32),
    /// Workload never vacates.
    Stuck,
}

/// Number of calls made against each remote operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub describe_group: u32,
    pub decrement_and_remove: u32,
    pub list_nodes: u32,
    pub describe_nodes: u32,
    pub set_draining: u32,
}

impl CallCounts {
    /// Calls that change fleet state.
    pub fn mutating(&self) -> u32 {
        self.decrement_and_remove + self.set_draining
    }
}

#[derive(Default)]
struct FleetState {
    cluster: String,
    groups: Vec<ScalingGroup>,
    /// Registered nodes keyed by ARN.
    nodes: BTreeMap<NodeArn, ClusterNode>,
    drain_progress: DrainProgress,
    fail_drain_requests: bool,
    failing_instances: HashSet<InstanceId>,
    /// Terminate instances without decrementing desired capacity.
    leak_capacity: bool,
    calls: CallCounts,
}

/// Thread-safe in-memory fleet. Clones share the same state.
#[derive(Clone, Default)]
pub struct InMemoryFleet {
    inner: Arc<Mutex<FleetState>>,
}

impl InMemoryFleet {
    /// Create an empty fleet with a single cluster of the given name.
    pub fn new(cluster: &str) -> Self {
        let fleet = Self::default();
        fleet.state().cluster = cluster.to_string();
        fleet
    }

    /// Add a scaling group with no instances.
    ///
    /// Adding a second group with the same name makes the name ambiguous.
    pub fn add_group(&self, name: &str, desired_capacity: u32) {
        self.state().groups.push(ScalingGroup {
            name: name.to_string(),
            desired_capacity,
            instance_ids: Vec::new(),
        });
    }

    /// Register a node in the cluster and attach its instance to `group`.
    pub fn add_node(&self, group: &str, node: ClusterNode) {
        let mut state = self.state();
        if let Some(g) = state.groups.iter_mut().find(|g| g.name == group) {
            g.instance_ids.push(node.instance_id.clone());
        }
        state.nodes.insert(node.node_arn.clone(), node);
    }

    /// Register a node that belongs to no scaling group.
    pub fn add_unmanaged_node(&self, node: ClusterNode) {
        self.state().nodes.insert(node.node_arn.clone(), node);
    }

    pub fn set_drain_progress(&self, progress: DrainProgress) {
        self.state().drain_progress = progress;
    }

    pub fn set_running_tasks(&self, node_arn: &str, count: u32) {
        if let Some(node) = self.state().nodes.get_mut(node_arn) {
            node.running_task_count = count;
        }
    }

    /// Overwrite a group's desired capacity, as an external actor would.
    pub fn set_desired_capacity(&self, group: &str, desired: u32) {
        if let Some(g) = self.state().groups.iter_mut().find(|g| g.name == group) {
            g.desired_capacity = desired;
        }
    }

    /// Make every subsequent drain request fail.
    pub fn fail_drain_requests(&self, fail: bool) {
        self.state().fail_drain_requests = fail;
    }

    /// Make termination of this instance fail.
    pub fn fail_termination(&self, instance_id: &str) {
        self.state().failing_instances.insert(instance_id.to_string());
    }

    /// Terminate instances without decrementing desired capacity.
    pub fn leak_capacity(&self, leak: bool) {
        self.state().leak_capacity = leak;
    }

    pub fn group(&self, name: &str) -> Option<ScalingGroup> {
        self.state().groups.iter().find(|g| g.name == name).cloned()
    }

    pub fn node(&self, node_arn: &str) -> Option<ClusterNode> {
        self.state().nodes.get(node_arn).cloned()
    }

    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    fn state(&self) -> MutexGuard<'_, FleetState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FleetState {
    fn check_cluster(&self, cluster: &str) -> FleetResult<()> {
        if self.cluster == cluster {
            Ok(())
        } else {
            Err(FleetError::Membership(format!("cluster {cluster:?} not found")))
        }
    }
}

#[async_trait]
impl CapacityAuthority for InMemoryFleet {
    async fn describe_group(&self, group: &str) -> FleetResult<ScalingGroup> {
        let mut state = self.state();
        state.calls.describe_group += 1;

        let mut matches = state.groups.iter().filter(|g| g.name == group);
        match (matches.next(), matches.count()) {
            (None, _) => Err(FleetError::GroupNotFound {
                group: group.to_string(),
            }),
            (Some(g), 0) => Ok(g.clone()),
            (Some(_), rest) => Err(FleetError::AmbiguousGroup {
                group: group.to_string(),
                matches: rest + 1,
            }),
        }
    }

    async fn decrement_and_remove(&self, instance_id: &str) -> FleetResult<()> {
        let mut state = self.state();
        state.calls.decrement_and_remove += 1;

        if state.failing_instances.contains(instance_id) {
            return Err(FleetError::Authority(format!(
                "termination of {instance_id} rejected"
            )));
        }

        let leak = state.leak_capacity;
        let group = state
            .groups
            .iter_mut()
            .find(|g| g.contains(instance_id))
            .ok_or_else(|| {
                FleetError::Authority(format!("instance {instance_id} is not in any scaling group"))
            })?;

        group.instance_ids.retain(|id| id != instance_id);
        if !leak {
            group.desired_capacity = group.desired_capacity.saturating_sub(1);
        }
        let desired = group.desired_capacity;

        state.nodes.retain(|_, n| n.instance_id != instance_id);
        debug!(%instance_id, desired, "instance terminated");
        Ok(())
    }
}

#[async_trait]
impl ClusterMembership for InMemoryFleet {
    async fn list_nodes(&self, cluster: &str) -> FleetResult<Vec<ClusterNode>> {
        let mut state = self.state();
        state.calls.list_nodes += 1;
        state.check_cluster(cluster)?;
        Ok(state.nodes.values().cloned().collect())
    }

    async fn describe_nodes(
        &self,
        cluster: &str,
        node_arns: &[NodeArn],
    ) -> FleetResult<Vec<ClusterNode>> {
        let mut state = self.state();
        state.calls.describe_nodes += 1;
        state.check_cluster(cluster)?;

        let progress = state.drain_progress;
        let mut found = Vec::with_capacity(node_arns.len());
        for arn in node_arns {
            if let Some(node) = state.nodes.get_mut(arn) {
                if let (DrainState::Draining, DrainProgress::PerPoll(n)) =
                    (node.drain_state, progress)
                {
                    node.running_task_count = node.running_task_count.saturating_sub(n);
                }
                found.push(node.clone());
            }
        }
        Ok(found)
    }

    async fn set_draining(&self, cluster: &str, node_arns: &[NodeArn]) -> FleetResult<()> {
        let mut state = self.state();
        state.calls.set_draining += 1;
        state.check_cluster(cluster)?;

        if state.fail_drain_requests {
            return Err(FleetError::Membership("drain request rejected".to_string()));
        }
        if let Some(missing) = node_arns.iter().find(|arn| !state.nodes.contains_key(*arn)) {
            return Err(FleetError::Membership(format!(
                "node {missing} is not registered to cluster {cluster:?}"
            )));
        }

        let progress = state.drain_progress;
        for arn in node_arns {
            if let Some(node) = state.nodes.get_mut(arn) {
                node.drain_state = DrainState::Draining;
                if progress == DrainProgress::Immediate {
                    node.running_task_count = 0;
                }
            }
        }
        debug!(nodes = node_arns.len(), "nodes set to draining");
        Ok(())
    }
}
