//! `warp fleet` — shrink an ECS cluster backed by an Auto Scaling Group.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::info;
use warpgrid_aws::{load_sdk_config, AutoScalingAuthority, AwsSettings, EcsMembership};
use warpgrid_fleet::{FleetError, ScaleDownPlan};
use warpgrid_scaledown::{ScaleDownOrchestrator, ScaleDownOutcome, ScaleDownRequest, TokioPause};

use crate::config::FleetConfig;

/// Arguments shared by every `warp fleet` subcommand.
#[derive(Debug, Clone, Args)]
pub struct FleetArgs {
    /// ECS cluster the nodes are registered to
    pub cluster: String,
    /// Auto Scaling Group that owns the cluster's instances
    pub group: String,
    /// Desired instance count to scale down to
    pub desired_count: u32,
    /// Config file (default: ./warp-fleet.toml if present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// AWS region override
    #[arg(long)]
    pub region: Option<String>,
    /// AWS endpoint override, e.g. a local emulator
    #[arg(long)]
    pub endpoint_url: Option<String>,
    /// Drain polls before giving up (default: 30)
    #[arg(long)]
    pub drain_attempts: Option<u32>,
    /// Wait between drain polls, e.g. "10s" or "1m" (default: 10s)
    #[arg(long)]
    pub drain_interval: Option<String>,
}

/// JSON shape of `warp fleet plan`, tagged like the scale-down outcome.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
enum PlanReport<'a> {
    NothingToDo { desired: u32 },
    Planned { plan: &'a ScaleDownPlan },
}

impl FleetArgs {
    fn request(&self) -> ScaleDownRequest {
        ScaleDownRequest::new(&self.cluster, &self.group, self.desired_count)
    }
}

/// Run a full scale-down: drain, terminate, verify.
pub async fn scale_down(args: &FleetArgs) -> Result<()> {
    let orchestrator = build_orchestrator(args).await?;
    let request = args.request();

    let outcome = match orchestrator.run(&request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            let next = next_step(&e);
            return Err(e).with_context(|| {
                format!(
                    "scale-down of {} in cluster {} to {} instances failed ({next})",
                    request.group, request.cluster, request.desired
                )
            });
        }
    };

    println!("{}", format_outcome(&request, &outcome));
    Ok(())
}

/// Show what a scale-down would remove, without changing anything.
pub async fn plan(args: &FleetArgs, format: &str) -> Result<()> {
    let orchestrator = build_orchestrator(args).await?;
    let request = args.request();

    let plan = orchestrator.plan(&request).await.with_context(|| {
        format!(
            "planning scale-down of {} in cluster {}",
            request.group, request.cluster
        )
    })?;

    match format {
        "json" => println!(
            "{}",
            serde_json::to_string_pretty(&plan_report(&request, plan.as_ref()))?
        ),
        _ => println!("{}", format_plan(&request, plan.as_ref())),
    }
    Ok(())
}

async fn build_orchestrator(args: &FleetArgs) -> Result<ScaleDownOrchestrator> {
    let cwd = std::env::current_dir().context("resolving working directory")?;
    let config = FleetConfig::load(args.config.as_deref(), &cwd)?;

    let policy = config.drain_policy(args.drain_attempts, args.drain_interval.as_deref())?;
    let aws = config.aws_settings(AwsSettings {
        region: args.region.clone(),
        endpoint_url: args.endpoint_url.clone(),
    });

    let sdk_config = load_sdk_config(&aws).await;
    info!(
        max_attempts = policy.max_attempts,
        poll_interval_secs = policy.poll_interval.as_secs(),
        "drain policy"
    );

    Ok(ScaleDownOrchestrator::new(
        Arc::new(AutoScalingAuthority::new(&sdk_config)),
        Arc::new(EcsMembership::new(&sdk_config)),
        Arc::new(TokioPause),
    )
    .with_drain_policy(policy))
}

fn next_step(err: &FleetError) -> &'static str {
    if err.is_safe_to_rerun() {
        "safe to rerun"
    } else {
        "investigate before rerunning"
    }
}

fn plan_report<'a>(
    request: &ScaleDownRequest,
    plan: Option<&'a ScaleDownPlan>,
) -> PlanReport<'a> {
    match plan {
        Some(plan) => PlanReport::Planned { plan },
        None => PlanReport::NothingToDo {
            desired: request.desired,
        },
    }
}

fn format_outcome(request: &ScaleDownRequest, outcome: &ScaleDownOutcome) -> String {
    match outcome {
        ScaleDownOutcome::NothingToDo { desired } => format!(
            "✓ {} is already at {} instances, nothing to do",
            request.group, desired
        ),
        ScaleDownOutcome::Converged {
            plan,
            desired_after,
        } => format!(
            "✓ {} converged at {} instances (removed {}: {})",
            request.group,
            desired_after,
            plan.nodes.len(),
            plan.instance_ids().join(", ")
        ),
    }
}

fn format_plan(request: &ScaleDownRequest, plan: Option<&ScaleDownPlan>) -> String {
    let Some(plan) = plan else {
        return format!(
            "{} is already at {} instances, nothing to do",
            request.group, request.desired
        );
    };

    let mut out = format!(
        "Scale-down plan for {} (cluster {})\n  desired: {} → {} (remove {})\n",
        plan.group, plan.cluster, plan.desired_before, plan.requested, plan.target_reduction
    );
    for node in &plan.nodes {
        out.push_str(&format!("  - {}  {}\n", node.instance_id, node.node_arn));
    }
    if plan.shortfall() > 0 {
        out.push_str(&format!(
            "  ! only {} removable node(s) found, {} short of the target\n",
            plan.nodes.len(),
            plan.shortfall()
        ));
    }
    out
}
