//! Drain coordinator — moves workload off nodes before they are removed.
//!
//! Draining is a small bounded state machine:
//!
//! ```text
//! Requesting ──ok──▶ Polling{attempts_left} ──all idle──▶ Drained
//!     │                   │        ▲
//!     │ err               │ busy   │ pause(poll_interval)
//!     ▼                   ▼────────┘
//!   Failed            TimedOut (attempts exhausted)
//! ```
//!
//! Completion is only observable by polling the cluster, so each attempt
//! issues one read and then suspends through the injected [`Pause`].

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use warpgrid_fleet::{ClusterMembership, ClusterNode, DrainState, FleetError, FleetResult, NodeRef};

use crate::pause::Pause;

/// Default number of polls before giving up on a drain.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 30;

/// Default wait between drain polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Retry budget for a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainPolicy {
    /// Polls to make before timing out. Zero is treated as one.
    pub max_attempts: u32,
    /// Wait between consecutive polls.
    pub poll_interval: Duration,
}

impl Default for DrainPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Current phase of a drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainPhase {
    /// Drain request not yet issued.
    Requesting,
    /// Waiting for workload to vacate.
    Polling { attempts_left: u32 },
    /// Every node reports zero running tasks.
    Drained,
    /// Attempts exhausted while these nodes still had work.
    TimedOut { busy: Vec<NodeRef> },
    /// A request to the cluster failed.
    Failed { reason: String },
}

impl DrainPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DrainPhase::Drained | DrainPhase::TimedOut { .. } | DrainPhase::Failed { .. }
        )
    }
}

/// Summary of a successful drain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Nodes this run asked the cluster to drain. Nodes that were already
    /// draining are not included.
    pub requested: Vec<NodeRef>,
    /// Polls made before the nodes reported idle.
    pub polls: u32,
    /// Time spent waiting between polls.
    pub waited: Duration,
}

/// A single drain of a fixed set of nodes, advanced one transition at a
/// time by [`DrainRun::step`].
pub struct DrainRun {
    membership: Arc<dyn ClusterMembership>,
    pause: Arc<dyn Pause>,
    policy: DrainPolicy,
    cluster: String,
    nodes: Vec<ClusterNode>,
    phase: DrainPhase,
    requested: Vec<NodeRef>,
    polls: u32,
    waited: Duration,
    failure: Option<FleetError>,
}

impl DrainRun {
    pub fn new(
        membership: Arc<dyn ClusterMembership>,
        pause: Arc<dyn Pause>,
        policy: DrainPolicy,
        cluster: &str,
        nodes: Vec<ClusterNode>,
    ) -> Self {
        Self {
            membership,
            pause,
            policy,
            cluster: cluster.to_string(),
            nodes,
            phase: DrainPhase::Requesting,
            requested: Vec::new(),
            polls: 0,
            waited: Duration::ZERO,
            failure: None,
        }
    }

    pub fn phase(&self) -> &DrainPhase {
        &self.phase
    }

    /// Advance by one transition. Does nothing once terminal.
    pub async fn step(&mut self) {
        let next = match self.phase {
            DrainPhase::Requesting => self.request().await,
            DrainPhase::Polling { attempts_left } => self.poll(attempts_left).await,
            _ => return,
        };
        self.phase = next;
    }

    /// Step until a terminal phase and convert it into a result.
    pub async fn run(mut self) -> FleetResult<DrainReport> {
        while !self.phase.is_terminal() {
            self.step().await;
        }
        self.finish()
    }

    fn finish(self) -> FleetResult<DrainReport> {
        match self.phase {
            DrainPhase::Drained => Ok(DrainReport {
                requested: self.requested,
                polls: self.polls,
                waited: self.waited,
            }),
            DrainPhase::TimedOut { busy } => Err(FleetError::DrainTimeout {
                nodes: busy.into_iter().map(|n| n.instance_id).collect(),
                attempts: self.polls,
                waited_secs: self.waited.as_secs(),
            }),
            DrainPhase::Failed { reason } => Err(self
                .failure
                .unwrap_or(FleetError::Membership(reason))),
            DrainPhase::Requesting | DrainPhase::Polling { .. } => Err(FleetError::Membership(
                "drain stopped before reaching a terminal phase".to_string(),
            )),
        }
    }

    async fn request(&mut self) -> DrainPhase {
        if self.nodes.is_empty() {
            debug!(cluster = %self.cluster, "no nodes to drain");
            return DrainPhase::Drained;
        }

        let pending: Vec<&ClusterNode> = self
            .nodes
            .iter()
            .filter(|n| n.drain_state != DrainState::Draining)
            .collect();

        if pending.is_empty() {
            info!(
                cluster = %self.cluster,
                nodes = self.nodes.len(),
                "nodes already draining, skipping drain request"
            );
        } else {
            let arns: Vec<String> = pending.iter().map(|n| n.node_arn.clone()).collect();
            let refs: Vec<NodeRef> = pending.iter().map(|n| n.node_ref()).collect();
            info!(
                cluster = %self.cluster,
                instances = ?refs.iter().map(|r| r.instance_id.as_str()).collect::<Vec<_>>(),
                "draining nodes"
            );

            if let Err(e) = self.membership.set_draining(&self.cluster, &arns).await {
                warn!(cluster = %self.cluster, error = %e, "drain request failed");
                let reason = e.to_string();
                self.failure = Some(e);
                return DrainPhase::Failed { reason };
            }
            self.requested = refs;
        }

        DrainPhase::Polling {
            attempts_left: self.policy.max_attempts.max(1),
        }
    }

    async fn poll(&mut self, attempts_left: u32) -> DrainPhase {
        let arns: Vec<String> = self.nodes.iter().map(|n| n.node_arn.clone()).collect();
        self.polls += 1;

        let observed = match self.membership.describe_nodes(&self.cluster, &arns).await {
            Ok(observed) => observed,
            Err(e) => {
                warn!(cluster = %self.cluster, error = %e, "drain poll failed");
                let reason = e.to_string();
                self.failure = Some(e);
                return DrainPhase::Failed { reason };
            }
        };

        // A node missing from the response has not been observed idle.
        let busy: Vec<NodeRef> = self
            .nodes
            .iter()
            .filter(|n| {
                !observed
                    .iter()
                    .any(|o| o.node_arn == n.node_arn && o.is_idle())
            })
            .map(ClusterNode::node_ref)
            .collect();

        if busy.is_empty() {
            info!(
                cluster = %self.cluster,
                polls = self.polls,
                waited_secs = self.waited.as_secs(),
                "nodes drained"
            );
            return DrainPhase::Drained;
        }

        let attempts_left = attempts_left.saturating_sub(1);
        if attempts_left == 0 {
            warn!(
                cluster = %self.cluster,
                busy = busy.len(),
                polls = self.polls,
                "drain retry budget exhausted"
            );
            return DrainPhase::TimedOut { busy };
        }

        debug!(
            cluster = %self.cluster,
            busy = busy.len(),
            attempts_left,
            "waiting on nodes to drain"
        );
        self.pause.pause(self.policy.poll_interval).await;
        self.waited += self.policy.poll_interval;
        DrainPhase::Polling { attempts_left }
    }
}

/// Drains node batches against one cluster membership client.
pub struct DrainCoordinator {
    membership: Arc<dyn ClusterMembership>,
    pause: Arc<dyn Pause>,
    policy: DrainPolicy,
}

impl DrainCoordinator {
    pub fn new(
        membership: Arc<dyn ClusterMembership>,
        pause: Arc<dyn Pause>,
        policy: DrainPolicy,
    ) -> Self {
        Self {
            membership,
            pause,
            policy,
        }
    }

    pub fn policy(&self) -> DrainPolicy {
        self.policy
    }

    /// Start a drain without running it, for callers that step it.
    pub fn begin(&self, cluster: &str, nodes: Vec<ClusterNode>) -> DrainRun {
        DrainRun::new(
            self.membership.clone(),
            self.pause.clone(),
            self.policy,
            cluster,
            nodes,
        )
    }

    /// Drain `nodes` and wait until every one reports zero running tasks.
    pub async fn drain(&self, cluster: &str, nodes: Vec<ClusterNode>) -> FleetResult<DrainReport> {
        self.begin(cluster, nodes).run().await
    }
}

/// Parse a duration string like "30s", "5m", or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    let secs = if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok()?
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok()?.checked_mul(60)?
    } else {
        s.parse::<u64>().ok()?
    };
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pause::RecordingPause;
    use warpgrid_fleet::{CapacityAuthority, DrainProgress, InMemoryFleet};

    fn node(n: u32, tasks: u32) -> ClusterNode {
        ClusterNode {
            node_arn: format!("arn:node/{n}"),
            instance_id: format!("i-{n}"),
            registered_at: n as u64,
            running_task_count: tasks,
            drain_state: DrainState::Active,
        }
    }

    fn fleet_with(nodes: &[ClusterNode]) -> InMemoryFleet {
        let fleet = InMemoryFleet::new("prod");
        fleet.add_group("workers", nodes.len() as u32);
        for n in nodes {
            fleet.add_node("workers", n.clone());
        }
        fleet
    }

    fn coordinator(fleet: &InMemoryFleet, pause: Arc<RecordingPause>, attempts: u32) -> DrainCoordinator {
        DrainCoordinator::new(
            Arc::new(fleet.clone()),
            pause,
            DrainPolicy {
                max_attempts: attempts,
                poll_interval: Duration::from_secs(10),
            },
        )
    }

    #[tokio::test]
    async fn steps_through_phases() {
        let nodes = vec![node(1, 2)];
        let fleet = fleet_with(&nodes);
        let pause = Arc::new(RecordingPause::new());
        let mut run = coordinator(&fleet, pause, 5).begin("prod", nodes);

        assert_eq!(run.phase(), &DrainPhase::Requesting);
        run.step().await;
        assert_eq!(run.phase(), &DrainPhase::Polling { attempts_left: 5 });
        run.step().await;
        assert_eq!(run.phase(), &DrainPhase::Drained);

        // Terminal phases do not move.
        run.step().await;
        assert_eq!(run.phase(), &DrainPhase::Drained);
    }

    #[tokio::test]
    async fn drains_after_several_polls() {
        let nodes = vec![node(1, 3), node(2, 1)];
        let fleet = fleet_with(&nodes);
        fleet.set_drain_progress(DrainProgress::PerPoll(1));
        let pause = Arc::new(RecordingPause::new());

        let report = coordinator(&fleet, pause.clone(), 30)
            .drain("prod", nodes)
            .await
            .unwrap();

        assert_eq!(report.polls, 3);
        assert_eq!(report.requested.len(), 2);
        assert_eq!(pause.count(), 2);
        assert_eq!(report.waited, Duration::from_secs(20));
        assert_eq!(fleet.calls().set_draining, 1);
    }

    #[tokio::test]
    async fn times_out_when_workload_is_stuck() {
        let nodes = vec![node(1, 4), node(2, 0)];
        let fleet = fleet_with(&nodes);
        fleet.set_drain_progress(DrainProgress::Stuck);
        let pause = Arc::new(RecordingPause::new());

        let err = coordinator(&fleet, pause.clone(), 3)
            .drain("prod", nodes)
            .await
            .unwrap_err();

        match err {
            FleetError::DrainTimeout {
                nodes,
                attempts,
                waited_secs,
            } => {
                assert_eq!(nodes, vec!["i-1".to_string()]);
                assert_eq!(attempts, 3);
                assert_eq!(waited_secs, 20);
            }
            other => panic!("expected drain timeout, got {other:?}"),
        }
        assert_eq!(fleet.calls().describe_nodes, 3);
        assert_eq!(pause.count(), 2);
    }

    #[tokio::test]
    async fn request_failure_is_fatal_without_polling() {
        let nodes = vec![node(1, 1)];
        let fleet = fleet_with(&nodes);
        fleet.fail_drain_requests(true);
        let pause = Arc::new(RecordingPause::new());

        let mut run = coordinator(&fleet, pause, 30).begin("prod", nodes);
        run.step().await;
        assert!(matches!(run.phase(), DrainPhase::Failed { .. }));

        let err = run.run().await.unwrap_err();
        assert!(matches!(err, FleetError::Membership(_)));
        assert_eq!(fleet.calls().describe_nodes, 0);
    }

    #[tokio::test]
    async fn already_draining_nodes_are_not_requested_again() {
        let mut n = node(1, 0);
        n.drain_state = DrainState::Draining;
        let fleet = fleet_with(std::slice::from_ref(&n));
        let pause = Arc::new(RecordingPause::new());

        let report = coordinator(&fleet, pause, 30)
            .drain("prod", vec![n])
            .await
            .unwrap();

        assert!(report.requested.is_empty());
        assert_eq!(fleet.calls().set_draining, 0);
        assert_eq!(report.polls, 1);
    }

    #[tokio::test]
    async fn only_active_nodes_are_requested() {
        let mut draining = node(1, 0);
        draining.drain_state = DrainState::Draining;
        let active = node(2, 2);
        let fleet = fleet_with(&[draining.clone(), active.clone()]);
        let pause = Arc::new(RecordingPause::new());

        let report = coordinator(&fleet, pause, 30)
            .drain("prod", vec![draining, active])
            .await
            .unwrap();

        assert_eq!(report.requested, vec![NodeRef::new("arn:node/2", "i-2")]);
    }

    #[tokio::test]
    async fn empty_selection_drains_trivially() {
        let fleet = fleet_with(&[]);
        let pause = Arc::new(RecordingPause::new());

        let report = coordinator(&fleet, pause, 30)
            .drain("prod", Vec::new())
            .await
            .unwrap();

        assert_eq!(report.polls, 0);
        assert_eq!(fleet.calls().mutating(), 0);
    }

    #[tokio::test]
    async fn zero_attempts_still_polls_once() {
        let nodes = vec![node(1, 1)];
        let fleet = fleet_with(&nodes);
        fleet.set_drain_progress(DrainProgress::Stuck);
        let pause = Arc::new(RecordingPause::new());

        let err = coordinator(&fleet, pause.clone(), 0)
            .drain("prod", nodes)
            .await
            .unwrap_err();

        assert!(matches!(err, FleetError::DrainTimeout { attempts: 1, .. }));
        assert_eq!(pause.count(), 0);
    }

    #[tokio::test]
    async fn deregistered_node_counts_as_busy() {
        let nodes = vec![node(1, 0)];
        let fleet = fleet_with(&nodes);
        let pause = Arc::new(RecordingPause::new());
        let mut run = coordinator(&fleet, pause, 1).begin("prod", nodes);

        run.step().await;
        assert_eq!(run.phase(), &DrainPhase::Polling { attempts_left: 1 });

        // The node disappears from the cluster between request and poll.
        fleet.decrement_and_remove("i-1").await.unwrap();
        run.step().await;

        assert_eq!(
            run.phase(),
            &DrainPhase::TimedOut {
                busy: vec![NodeRef::new("arn:node/1", "i-1")]
            }
        );
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("0s"), Some(Duration::ZERO));
        assert_eq!(parse_duration(" 12 "), Some(Duration::from_secs(12)));
        assert_eq!(parse_duration("invalid"), None);
        assert_eq!(parse_duration("m"), None);
    }

    #[test]
    fn default_policy() {
        let policy = DrainPolicy::default();
        assert_eq!(policy.max_attempts, 30);
        assert_eq!(policy.poll_interval, Duration::from_secs(10));
    }
}
