//! ECS backend for [`ClusterMembership`].
//!
//! Container instances are listed page by page, described in chunks of
//! 100, and drained in chunks of 10, the per-request limits of the ECS
//! API.

use std::future::Future;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_ecs::error::DisplayErrorContext;
use aws_sdk_ecs::types::{ContainerInstance, ContainerInstanceStatus, Failure};
use tracing::{debug, info, warn};

use warpgrid_fleet::{ClusterMembership, ClusterNode, DrainState, FleetError, FleetResult, NodeArn};

/// Maximum container instances per `DescribeContainerInstances` call.
const DESCRIBE_CHUNK: usize = 100;

/// Maximum container instances per `UpdateContainerInstancesState` call.
const DRAIN_CHUNK: usize = 10;

/// Cluster membership backed by the container instances of an ECS cluster.
pub struct EcsMembership {
    client: aws_sdk_ecs::Client,
}

impl EcsMembership {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_ecs::Client::new(config),
        }
    }

    async fn list_arns(&self, cluster: &str) -> FleetResult<Vec<NodeArn>> {
        let client = &self.client;
        collect_pages(|next_token| async move {
            let resp = client
                .list_container_instances()
                .cluster(cluster)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| FleetError::Membership(format!("{}", DisplayErrorContext(&e))))?;
            Ok((
                resp.container_instance_arns().to_vec(),
                resp.next_token().map(str::to_string),
            ))
        })
        .await
    }
}

#[async_trait]
impl ClusterMembership for EcsMembership {
    async fn list_nodes(&self, cluster: &str) -> FleetResult<Vec<ClusterNode>> {
        let arns = self.list_arns(cluster).await?;
        debug!(%cluster, nodes = arns.len(), "listed container instances");
        self.describe_nodes(cluster, &arns).await
    }

    async fn describe_nodes(
        &self,
        cluster: &str,
        node_arns: &[NodeArn],
    ) -> FleetResult<Vec<ClusterNode>> {
        let client = &self.client;
        in_chunks(node_arns, DESCRIBE_CHUNK, |chunk| async move {
            let resp = client
                .describe_container_instances()
                .cluster(cluster)
                .set_container_instances(Some(chunk))
                .send()
                .await
                .map_err(|e| FleetError::Membership(format!("{}", DisplayErrorContext(&e))))?;

            // Missing instances are reported as failures; the caller sees
            // them as absent from the result.
            for failure in resp.failures() {
                debug!(%cluster, failure = %describe_failure(failure), "container instance not described");
            }

            resp.container_instances()
                .iter()
                .map(to_cluster_node)
                .collect::<FleetResult<Vec<_>>>()
        })
        .await
    }

    async fn set_draining(&self, cluster: &str, node_arns: &[NodeArn]) -> FleetResult<()> {
        let client = &self.client;
        in_chunks(node_arns, DRAIN_CHUNK, |chunk| async move {
            let resp = client
                .update_container_instances_state()
                .cluster(cluster)
                .set_container_instances(Some(chunk))
                .status(ContainerInstanceStatus::Draining)
                .send()
                .await
                .map_err(|e| FleetError::Membership(format!("{}", DisplayErrorContext(&e))))?;
            drain_rejections(cluster, resp.failures()).map(|()| Vec::<()>::new())
        })
        .await?;

        info!(%cluster, nodes = node_arns.len(), "container instances set to DRAINING");
        Ok(())
    }
}

/// Follow `next_token` until a page comes back without one.
async fn collect_pages<F, Fut>(mut fetch: F) -> FleetResult<Vec<NodeArn>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = FleetResult<(Vec<NodeArn>, Option<String>)>>,
{
    let mut arns = Vec::new();
    let mut next_token = None;

    loop {
        let (page, token) = fetch(next_token.take()).await?;
        arns.extend(page);
        match token {
            Some(token) if !token.is_empty() => next_token = Some(token),
            _ => break,
        }
    }

    Ok(arns)
}

/// Issue one request per `size` ARNs, in order, stopping at the first error.
async fn in_chunks<T, F, Fut>(
    node_arns: &[NodeArn],
    size: usize,
    mut send: F,
) -> FleetResult<Vec<T>>
where
    F: FnMut(Vec<NodeArn>) -> Fut,
    Fut: Future<Output = FleetResult<Vec<T>>>,
{
    let mut out = Vec::with_capacity(node_arns.len());
    for chunk in node_arns.chunks(size) {
        out.extend(send(chunk.to_vec()).await?);
    }
    Ok(out)
}

/// Any per-instance failure fails the whole drain request.
fn drain_rejections(cluster: &str, failures: &[Failure]) -> FleetResult<()> {
    if failures.is_empty() {
        return Ok(());
    }
    let reasons: Vec<String> = failures.iter().map(describe_failure).collect();
    warn!(%cluster, failures = ?reasons, "drain request partially rejected");
    Err(FleetError::Membership(format!(
        "drain request rejected: {}",
        reasons.join("; ")
    )))
}

fn to_cluster_node(instance: &ContainerInstance) -> FleetResult<ClusterNode> {
    let node_arn = instance
        .container_instance_arn()
        .ok_or_else(|| FleetError::Membership("container instance without an ARN".to_string()))?
        .to_string();
    let instance_id = instance
        .ec2_instance_id()
        .ok_or_else(|| FleetError::Membership(format!("{node_arn} has no EC2 instance ID")))?
        .to_string();

    // An unknown registration time sorts last so the node is never
    // preferred for removal.
    let registered_at = match instance.registered_at().map(|t| t.to_millis()) {
        Some(Ok(ms)) => u64::try_from(ms).unwrap_or(0),
        _ => {
            warn!(%node_arn, "container instance has no usable registration time");
            u64::MAX
        }
    };

    let running_task_count = u32::try_from(instance.running_tasks_count()).map_err(|_| {
        FleetError::Membership(format!(
            "{node_arn} reports {} running tasks",
            instance.running_tasks_count()
        ))
    })?;

    Ok(ClusterNode {
        node_arn,
        instance_id,
        registered_at,
        running_task_count,
        drain_state: DrainState::from_status(instance.status().unwrap_or_default()),
    })
}

fn describe_failure(failure: &Failure) -> String {
    format!(
        "{}: {}",
        failure.arn().unwrap_or("<unknown>"),
        failure.reason().unwrap_or("<no reason>")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use aws_sdk_ecs::primitives::DateTime;

    fn arns(n: usize) -> Vec<NodeArn> {
        (1..=n).map(|i| format!("arn:node/{i}")).collect()
    }

    fn instance(status: &str, tasks: i32) -> ContainerInstance {
        ContainerInstance::builder()
            .container_instance_arn("arn:aws:ecs:eu-west-1:1:container-instance/prod/abc")
            .ec2_instance_id("i-0abc")
            .registered_at(DateTime::from_millis(1_700_000_000_123))
            .running_tasks_count(tasks)
            .status(status)
            .build()
    }

    #[test]
    fn converts_container_instance() {
        let node = to_cluster_node(&instance("ACTIVE", 3)).unwrap();
        assert_eq!(node.instance_id, "i-0abc");
        assert!(node.node_arn.ends_with("/prod/abc"));
        assert_eq!(node.registered_at, 1_700_000_000_123);
        assert_eq!(node.running_task_count, 3);
        assert_eq!(node.drain_state, DrainState::Active);
    }

    #[test]
    fn draining_status_maps_to_draining() {
        let node = to_cluster_node(&instance("DRAINING", 0)).unwrap();
        assert_eq!(node.drain_state, DrainState::Draining);
        assert!(node.is_idle());
    }

    #[test]
    fn missing_instance_id_is_an_error() {
        let bare = ContainerInstance::builder()
            .container_instance_arn("arn:aws:ecs:eu-west-1:1:container-instance/prod/abc")
            .build();
        assert!(matches!(
            to_cluster_node(&bare),
            Err(FleetError::Membership(_))
        ));
    }

    #[test]
    fn missing_registration_time_sorts_last() {
        let node = to_cluster_node(
            &ContainerInstance::builder()
                .container_instance_arn("arn:x")
                .ec2_instance_id("i-1")
                .build(),
        )
        .unwrap();
        assert_eq!(node.registered_at, u64::MAX);
    }

    #[test]
    fn failure_description() {
        let failure = Failure::builder().arn("arn:x").reason("MISSING").build();
        assert_eq!(describe_failure(&failure), "arn:x: MISSING");
    }

    #[test]
    fn negative_task_count_is_an_error() {
        assert!(matches!(
            to_cluster_node(&instance("ACTIVE", -1)),
            Err(FleetError::Membership(msg)) if msg.contains("-1 running tasks")
        ));
    }

    #[tokio::test]
    async fn listing_follows_next_token() {
        let tokens = Mutex::new(Vec::new());
        let listed = collect_pages(|token| {
            tokens.lock().unwrap().push(token.clone());
            async move {
                Ok(match token.as_deref() {
                    None => (arns(2), Some("page-2".to_string())),
                    Some("page-2") => (vec!["arn:node/3".to_string()], None),
                    Some(other) => panic!("unexpected token {other}"),
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(listed, arns(3));
        assert_eq!(
            *tokens.lock().unwrap(),
            vec![None, Some("page-2".to_string())]
        );
    }

    #[tokio::test]
    async fn empty_next_token_ends_listing() {
        let mut calls = 0;
        let listed = collect_pages(|_| {
            calls += 1;
            async { Ok((arns(1), Some(String::new()))) }
        })
        .await
        .unwrap();

        assert_eq!(listed.len(), 1);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn describe_splits_into_hundreds() {
        let sizes = Mutex::new(Vec::new());
        let described = in_chunks(&arns(250), DESCRIBE_CHUNK, |chunk| {
            sizes.lock().unwrap().push(chunk.len());
            async move { Ok(chunk) }
        })
        .await
        .unwrap();

        assert_eq!(*sizes.lock().unwrap(), vec![100, 100, 50]);
        assert_eq!(described, arns(250));
    }

    #[tokio::test]
    async fn drain_rejection_in_later_chunk_is_reported() {
        let sent = Mutex::new(Vec::new());
        let err = in_chunks(&arns(11), DRAIN_CHUNK, |chunk| {
            sent.lock().unwrap().push(chunk.clone());
            async move {
                let failures: Vec<Failure> = chunk
                    .iter()
                    .filter(|arn| arn.as_str() == "arn:node/11")
                    .map(|arn| Failure::builder().arn(arn).reason("INACTIVE").build())
                    .collect();
                drain_rejections("prod", &failures).map(|()| Vec::<()>::new())
            }
        })
        .await
        .unwrap_err();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], arns(10));
        assert_eq!(sent[1], vec!["arn:node/11".to_string()]);
        assert!(matches!(
            err,
            FleetError::Membership(msg) if msg == "drain request rejected: arn:node/11: INACTIVE"
        ));
    }

    #[tokio::test]
    async fn first_failed_chunk_stops_the_rest() {
        let mut calls = 0;
        let result: FleetResult<Vec<()>> = in_chunks(&arns(25), DRAIN_CHUNK, |_| {
            calls += 1;
            async { Err(FleetError::Membership("throttled".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
