//! Client traits for the two remote authorities a scale-down talks to.
//!
//! Implementations must map every non-success response onto
//! [`FleetError::Authority`] or [`FleetError::Membership`]; retries are not
//! expected at this layer.

use async_trait::async_trait;

use crate::error::FleetResult;
use crate::types::{ClusterNode, NodeArn, ScalingGroup};

/// Reads and decrements the desired size of a scaling group.
#[async_trait]
pub trait CapacityAuthority: Send + Sync {
    /// Describe the single scaling group with this name.
    ///
    /// Fails with `GroupNotFound` when nothing matches and `AmbiguousGroup`
    /// when more than one group does.
    async fn describe_group(&self, group: &str) -> FleetResult<ScalingGroup>;

    /// Current desired capacity of the group.
    async fn desired_capacity(&self, group: &str) -> FleetResult<u32> {
        Ok(self.describe_group(group).await?.desired_capacity)
    }

    /// Detach and terminate one instance, decrementing the group's desired
    /// capacity in the same request.
    ///
    /// Either both happen or neither does; on error the caller re-reads the
    /// desired capacity rather than assuming either outcome.
    async fn decrement_and_remove(&self, instance_id: &str) -> FleetResult<()>;
}

/// Lists cluster nodes and changes their drain state.
#[async_trait]
pub trait ClusterMembership: Send + Sync {
    /// Every node registered to the cluster, with live task counts.
    async fn list_nodes(&self, cluster: &str) -> FleetResult<Vec<ClusterNode>>;

    /// Re-read a subset of nodes. Nodes no longer registered are omitted.
    async fn describe_nodes(
        &self,
        cluster: &str,
        node_arns: &[NodeArn],
    ) -> FleetResult<Vec<ClusterNode>>;

    /// Mark the given nodes as draining. Draining an already-draining node
    /// is a no-op.
    async fn set_draining(&self, cluster: &str, node_arns: &[NodeArn]) -> FleetResult<()>;
}
