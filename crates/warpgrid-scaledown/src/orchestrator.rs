//! Scale-down orchestrator — drives a run from delta to verified
//! convergence.
//!
//! The orchestrator holds no state between runs. Each run re-reads the
//! scaling group and the cluster, so a run that stopped early (drain
//! timeout, process kill) can simply be repeated.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use warpgrid_fleet::*;

use crate::drain::{DrainCoordinator, DrainPolicy};
use crate::pause::Pause;
use crate::selector::select_for_removal;
use crate::terminate::TerminationExecutor;

/// What a run should converge to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleDownRequest {
    pub cluster: String,
    pub group: String,
    /// Desired capacity the group should end at.
    pub desired: u32,
}

impl ScaleDownRequest {
    pub fn new(cluster: &str, group: &str, desired: u32) -> Self {
        Self {
            cluster: cluster.to_string(),
            group: group.to_string(),
            desired,
        }
    }
}

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScaleDownOutcome {
    /// The group was already at the requested capacity.
    NothingToDo { desired: u32 },
    /// Nodes were drained and removed; desired capacity now matches.
    Converged {
        plan: ScaleDownPlan,
        desired_after: u32,
    },
}

/// Phase of a run. Fatal transitions leave the machine as an `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDownPhase {
    ComputeDelta,
    SelectNodes {
        group: ScalingGroup,
        reduction: u32,
    },
    Drain {
        plan: ScaleDownPlan,
        nodes: Vec<ClusterNode>,
    },
    Terminate {
        plan: ScaleDownPlan,
    },
    Verify {
        plan: ScaleDownPlan,
    },
    Done(ScaleDownOutcome),
}

impl ScaleDownPhase {
    pub fn name(&self) -> &'static str {
        match self {
            ScaleDownPhase::ComputeDelta => "compute_delta",
            ScaleDownPhase::SelectNodes { .. } => "select_nodes",
            ScaleDownPhase::Drain { .. } => "drain",
            ScaleDownPhase::Terminate { .. } => "terminate",
            ScaleDownPhase::Verify { .. } => "verify",
            ScaleDownPhase::Done(_) => "done",
        }
    }
}

/// Shrinks a cluster to a requested size without dropping in-flight work.
pub struct ScaleDownOrchestrator {
    authority: Arc<dyn CapacityAuthority>,
    membership: Arc<dyn ClusterMembership>,
    pause: Arc<dyn Pause>,
    policy: DrainPolicy,
}

impl ScaleDownOrchestrator {
    /// Create an orchestrator over the given clients with the default
    /// drain policy.
    pub fn new(
        authority: Arc<dyn CapacityAuthority>,
        membership: Arc<dyn ClusterMembership>,
        pause: Arc<dyn Pause>,
    ) -> Self {
        Self {
            authority,
            membership,
            pause,
            policy: DrainPolicy::default(),
        }
    }

    /// Set the drain retry budget.
    pub fn with_drain_policy(mut self, policy: DrainPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run to completion.
    pub async fn run(&self, request: &ScaleDownRequest) -> FleetResult<ScaleDownOutcome> {
        info!(
            cluster = %request.cluster,
            group = %request.group,
            desired = request.desired,
            "scale-down started"
        );

        let mut phase = ScaleDownPhase::ComputeDelta;
        loop {
            phase = self.step(request, phase).await?;
            debug!(phase = phase.name(), "scale-down phase");
            if let ScaleDownPhase::Done(outcome) = phase {
                return Ok(outcome);
            }
        }
    }

    /// Work out what a run would remove without changing anything.
    ///
    /// Returns `None` when the group is already at the requested size.
    pub async fn plan(&self, request: &ScaleDownRequest) -> FleetResult<Option<ScaleDownPlan>> {
        match self.step(request, ScaleDownPhase::ComputeDelta).await? {
            ScaleDownPhase::Done(_) => Ok(None),
            select @ ScaleDownPhase::SelectNodes { .. } => {
                match self.step(request, select).await? {
                    ScaleDownPhase::Drain { plan, .. } => Ok(Some(plan)),
                    other => unreachable!("select_nodes led to {}", other.name()),
                }
            }
            other => unreachable!("compute_delta led to {}", other.name()),
        }
    }

    /// Advance the run by one phase.
    pub async fn step(
        &self,
        request: &ScaleDownRequest,
        phase: ScaleDownPhase,
    ) -> FleetResult<ScaleDownPhase> {
        match phase {
            ScaleDownPhase::ComputeDelta => self.compute_delta(request).await,
            ScaleDownPhase::SelectNodes { group, reduction } => {
                self.select_nodes(request, group, reduction).await
            }
            ScaleDownPhase::Drain { plan, nodes } => {
                DrainCoordinator::new(self.membership.clone(), self.pause.clone(), self.policy)
                    .drain(&plan.cluster, nodes)
                    .await?;
                Ok(ScaleDownPhase::Terminate { plan })
            }
            ScaleDownPhase::Terminate { plan } => {
                info!(
                    group = %plan.group,
                    instances = ?plan.instance_ids(),
                    "terminating instances"
                );
                TerminationExecutor::new(self.authority.clone())
                    .terminate(&plan.nodes)
                    .await
                    .into_result()?;
                Ok(ScaleDownPhase::Verify { plan })
            }
            ScaleDownPhase::Verify { plan } => self.verify(request, plan).await,
            done @ ScaleDownPhase::Done(_) => Ok(done),
        }
    }

    async fn compute_delta(&self, request: &ScaleDownRequest) -> FleetResult<ScaleDownPhase> {
        let group = self.authority.describe_group(&request.group).await?;
        let current = group.desired_capacity;

        if current < request.desired {
            return Err(FleetError::UnderCapacity {
                group: request.group.clone(),
                current,
                requested: request.desired,
            });
        }

        let reduction = current - request.desired;
        if reduction == 0 {
            info!(
                group = %request.group,
                desired = current,
                "scaling group already at requested capacity, nothing to do"
            );
            return Ok(ScaleDownPhase::Done(ScaleDownOutcome::NothingToDo {
                desired: current,
            }));
        }

        info!(group = %request.group, current, reduction, "computed scale-down delta");
        Ok(ScaleDownPhase::SelectNodes { group, reduction })
    }

    async fn select_nodes(
        &self,
        request: &ScaleDownRequest,
        group: ScalingGroup,
        reduction: u32,
    ) -> FleetResult<ScaleDownPhase> {
        let registered = self.membership.list_nodes(&request.cluster).await?;

        let (candidates, foreign): (Vec<ClusterNode>, Vec<ClusterNode>) = registered
            .into_iter()
            .partition(|n| group.contains(&n.instance_id));
        if !foreign.is_empty() {
            warn!(
                cluster = %request.cluster,
                group = %group.name,
                skipped = foreign.len(),
                "ignoring cluster nodes that are not members of the scaling group"
            );
        }

        let chosen = select_for_removal(&candidates, reduction as usize);
        let nodes: Vec<ClusterNode> = chosen
            .iter()
            .filter_map(|r| candidates.iter().find(|n| n.node_arn == r.node_arn).cloned())
            .collect();

        let plan = ScaleDownPlan {
            cluster: request.cluster.clone(),
            group: group.name.clone(),
            desired_before: group.desired_capacity,
            requested: request.desired,
            target_reduction: reduction,
            nodes: chosen,
        };

        if plan.shortfall() > 0 {
            warn!(
                group = %plan.group,
                reduction,
                available = plan.nodes.len(),
                "fewer removable nodes than the requested reduction, continuing with what is available"
            );
        }
        info!(
            group = %plan.group,
            instances = ?plan.instance_ids(),
            "selected nodes for removal"
        );

        Ok(ScaleDownPhase::Drain { plan, nodes })
    }

    async fn verify(
        &self,
        request: &ScaleDownRequest,
        plan: ScaleDownPlan,
    ) -> FleetResult<ScaleDownPhase> {
        let desired = self.authority.desired_capacity(&request.group).await?;
        if desired != request.desired && plan.shortfall() > 0 {
            return Err(FleetError::UnderFulfilled {
                group: request.group.clone(),
                desired,
                requested: request.desired,
                registered: plan.nodes.len(),
                reduction: plan.target_reduction,
            });
        }
        if desired != request.desired {
            return Err(FleetError::Convergence {
                group: request.group.clone(),
                desired,
                requested: request.desired,
            });
        }

        info!(
            group = %request.group,
            desired,
            removed = plan.nodes.len(),
            "scaling group converged"
        );
        Ok(ScaleDownPhase::Done(ScaleDownOutcome::Converged {
            plan,
            desired_after: desired,
        }))
    }
}
