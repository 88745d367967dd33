//! Node selection for removal.
//!
//! Oldest-registered nodes go first. Ties on registration time are broken
//! by instance ID and then node ARN, so the order is total and the same
//! input always yields the same selection.

use std::cmp::Ordering;

use warpgrid_fleet::{ClusterNode, NodeRef};

/// Pick up to `count` nodes to remove, oldest registration first.
///
/// Returns every node when `count` exceeds the fleet; callers compare the
/// result length against `count` to detect under-fulfillment.
pub fn select_for_removal(nodes: &[ClusterNode], count: usize) -> Vec<NodeRef> {
    let mut candidates: Vec<&ClusterNode> = nodes.iter().collect();
    candidates.sort_by(|a, b| removal_order(a, b));
    candidates
        .into_iter()
        .take(count)
        .map(ClusterNode::node_ref)
        .collect()
}

fn removal_order(a: &ClusterNode, b: &ClusterNode) -> Ordering {
    a.registered_at
        .cmp(&b.registered_at)
        .then_with(|| a.instance_id.cmp(&b.instance_id))
        .then_with(|| a.node_arn.cmp(&b.node_arn))
}
