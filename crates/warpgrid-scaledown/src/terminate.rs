//! Termination executor — removes drained nodes through the scaling group.

use std::sync::Arc;

use tracing::{info, warn};

use warpgrid_fleet::{CapacityAuthority, FleetError, FleetResult, NodeRef, TerminationFailure};

/// Outcome of terminating a batch of nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminationReport {
    pub terminated: Vec<NodeRef>,
    pub failed: Vec<TerminationFailure>,
}

impl TerminationReport {
    /// Surface every failure at once, or the terminated nodes if none.
    pub fn into_result(self) -> FleetResult<Vec<NodeRef>> {
        if self.failed.is_empty() {
            Ok(self.terminated)
        } else {
            Err(FleetError::Termination {
                failures: self.failed,
            })
        }
    }
}

/// Terminates nodes one at a time, decrementing desired capacity with each.
pub struct TerminationExecutor {
    authority: Arc<dyn CapacityAuthority>,
}

impl TerminationExecutor {
    pub fn new(authority: Arc<dyn CapacityAuthority>) -> Self {
        Self { authority }
    }

    /// Terminate every node in order. A failure on one node does not stop
    /// the rest.
    pub async fn terminate(&self, nodes: &[NodeRef]) -> TerminationReport {
        let mut report = TerminationReport::default();

        for node in nodes {
            match self.authority.decrement_and_remove(&node.instance_id).await {
                Ok(()) => {
                    info!(instance_id = %node.instance_id, "terminated instance");
                    report.terminated.push(node.clone());
                }
                Err(e) => {
                    warn!(instance_id = %node.instance_id, error = %e, "termination failed");
                    report.failed.push(TerminationFailure {
                        node: node.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report
    }
}
