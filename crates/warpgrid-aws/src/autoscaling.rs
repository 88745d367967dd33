//! EC2 Auto Scaling backend for [`CapacityAuthority`].

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_autoscaling::error::DisplayErrorContext;
use aws_sdk_autoscaling::types::AutoScalingGroup;
use tracing::{debug, info};

use warpgrid_fleet::{CapacityAuthority, FleetError, FleetResult, ScalingGroup};

/// Capacity authority backed by an EC2 Auto Scaling Group.
pub struct AutoScalingAuthority {
    client: aws_sdk_autoscaling::Client,
}

impl AutoScalingAuthority {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_autoscaling::Client::new(config),
        }
    }
}

#[async_trait]
impl CapacityAuthority for AutoScalingAuthority {
    async fn describe_group(&self, group: &str) -> FleetResult<ScalingGroup> {
        let resp = self
            .client
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(group)
            .send()
            .await
            .map_err(|e| FleetError::Authority(format!("{}", DisplayErrorContext(&e))))?;

        let matches = resp
            .auto_scaling_groups()
            .iter()
            .map(to_scaling_group)
            .collect::<FleetResult<Vec<_>>>()?;

        let resolved = resolve_group(group, matches)?;
        debug!(
            group = %resolved.name,
            desired = resolved.desired_capacity,
            instances = resolved.instance_ids.len(),
            "described auto scaling group"
        );
        Ok(resolved)
    }

    async fn decrement_and_remove(&self, instance_id: &str) -> FleetResult<()> {
        let resp = self
            .client
            .terminate_instance_in_auto_scaling_group()
            .instance_id(instance_id)
            .should_decrement_desired_capacity(true)
            .send()
            .await
            .map_err(|e| {
                FleetError::Authority(format!(
                    "terminate {instance_id}: {}",
                    DisplayErrorContext(&e)
                ))
            })?;

        info!(
            %instance_id,
            activity = resp
                .activity()
                .and_then(|a| a.description())
                .unwrap_or_default(),
            "termination requested"
        );
        Ok(())
    }
}

fn to_scaling_group(asg: &AutoScalingGroup) -> FleetResult<ScalingGroup> {
    let name = asg.auto_scaling_group_name().unwrap_or_default().to_string();
    let desired = asg
        .desired_capacity()
        .ok_or_else(|| FleetError::Authority(format!("group {name:?} has no desired capacity")))?;

    Ok(ScalingGroup {
        desired_capacity: capacity(&name, desired)?,
        instance_ids: asg
            .instances()
            .iter()
            .filter_map(|i| i.instance_id().map(str::to_string))
            .collect(),
        name,
    })
}

fn capacity(group: &str, desired: i32) -> FleetResult<u32> {
    u32::try_from(desired).map_err(|_| {
        FleetError::Authority(format!("group {group:?} reports desired capacity {desired}"))
    })
}

/// Exactly one group must match the requested name.
fn resolve_group(group: &str, mut matches: Vec<ScalingGroup>) -> FleetResult<ScalingGroup> {
    match matches.len() {
        0 => Err(FleetError::GroupNotFound {
            group: group.to_string(),
        }),
        1 => Ok(matches.remove(0)),
        n => Err(FleetError::AmbiguousGroup {
            group: group.to_string(),
            matches: n,
        }),
    }
}
