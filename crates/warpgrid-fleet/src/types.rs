//! Domain types for fleet scale-down.
//!
//! These types mirror what the capacity authority and cluster membership
//! report. They are transient: built from fresh remote reads each run and
//! never written to disk.

use serde::{Deserialize, Serialize};

/// Unique identifier for a compute instance (e.g. `i-0abc...`).
pub type InstanceId = String;

/// Cluster-assigned identifier for a registered node (ARN).
pub type NodeArn = String;

// ── Scaling group ─────────────────────────────────────────────────

/// A scaling group as seen by the capacity authority.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScalingGroup {
    pub name: String,
    /// Target instance count the authority maintains.
    pub desired_capacity: u32,
    /// Instances currently attached to the group.
    pub instance_ids: Vec<InstanceId>,
}

impl ScalingGroup {
    /// Whether the given instance is attached to this group.
    pub fn contains(&self, instance_id: &str) -> bool {
        self.instance_ids.iter().any(|id| id == instance_id)
    }
}

// ── Cluster node ──────────────────────────────────────────────────

/// Scheduling state of a registered node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DrainState {
    /// Accepting new workload.
    Active,
    /// No new workload is placed; running workload is left to finish.
    Draining,
}

impl DrainState {
    /// Map a cluster-reported status string onto a drain state.
    ///
    /// Only `DRAINING` counts as draining; registering, deregistering and
    /// other transitional states are treated as active.
    pub fn from_status(status: &str) -> Self {
        if status.eq_ignore_ascii_case("DRAINING") {
            DrainState::Draining
        } else {
            DrainState::Active
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DrainState::Active => "ACTIVE",
            DrainState::Draining => "DRAINING",
        }
    }
}

impl std::fmt::Display for DrainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node registered to a compute cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterNode {
    pub node_arn: NodeArn,
    pub instance_id: InstanceId,
    /// Unix timestamp (milliseconds) when the node registered.
    pub registered_at: u64,
    /// Workload units currently running on the node.
    pub running_task_count: u32,
    pub drain_state: DrainState,
}

impl ClusterNode {
    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(&self.node_arn, &self.instance_id)
    }

    /// True when no workload is running on the node.
    pub fn is_idle(&self) -> bool {
        self.running_task_count == 0
    }
}

/// Both identities of a node: the cluster ARN (used to drain it) and the
/// instance ID (used to terminate it).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeRef {
    pub node_arn: NodeArn,
    pub instance_id: InstanceId,
}

impl NodeRef {
    pub fn new(node_arn: &str, instance_id: &str) -> Self {
        Self {
            node_arn: node_arn.to_string(),
            instance_id: instance_id.to_string(),
        }
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.instance_id)
    }
}

// ── Plan ──────────────────────────────────────────────────────────

/// The nodes a single scale-down run intends to remove.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScaleDownPlan {
    pub cluster: String,
    pub group: String,
    /// Desired capacity read at the start of the run.
    pub desired_before: u32,
    /// Desired capacity the run converges to.
    pub requested: u32,
    /// `desired_before - requested`; always positive in a plan.
    pub target_reduction: u32,
    /// Nodes chosen for removal, oldest first.
    pub nodes: Vec<NodeRef>,
}

impl ScaleDownPlan {
    /// Number of nodes the plan is short of its reduction target.
    pub fn shortfall(&self) -> u32 {
        self.target_reduction.saturating_sub(self.nodes.len() as u32)
    }

    pub fn node_arns(&self) -> Vec<NodeArn> {
        self.nodes.iter().map(|n| n.node_arn.clone()).collect()
    }

    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.nodes.iter().map(|n| n.instance_id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_state_from_status() {
        assert_eq!(DrainState::from_status("DRAINING"), DrainState::Draining);
        assert_eq!(DrainState::from_status("draining"), DrainState::Draining);
        assert_eq!(DrainState::from_status("ACTIVE"), DrainState::Active);
        assert_eq!(DrainState::from_status("REGISTERING"), DrainState::Active);
    }

    #[test]
    fn drain_state_serializes_uppercase() {
        let json = serde_json::to_string(&DrainState::Draining).unwrap();
        assert_eq!(json, "\"DRAINING\"");
    }

    #[test]
    fn plan_shortfall() {
        let plan = ScaleDownPlan {
            cluster: "prod".to_string(),
            group: "workers".to_string(),
            desired_before: 5,
            requested: 2,
            target_reduction: 3,
            nodes: vec![NodeRef::new("arn:1", "i-1")],
        };
        assert_eq!(plan.shortfall(), 2);
        assert_eq!(plan.instance_ids(), vec!["i-1".to_string()]);
        assert_eq!(plan.node_arns(), vec!["arn:1".to_string()]);
    }

    #[test]
    fn group_membership() {
        let group = ScalingGroup {
            name: "workers".to_string(),
            desired_capacity: 2,
            instance_ids: vec!["i-1".to_string(), "i-2".to_string()],
        };
        assert!(group.contains("i-2"));
        assert!(!group.contains("i-3"));
    }
}
