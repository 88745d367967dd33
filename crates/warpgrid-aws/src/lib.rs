//! warpgrid-aws — AWS implementations of the fleet client traits.
//!
//! - [`AutoScalingAuthority`] implements `CapacityAuthority` over an EC2
//!   Auto Scaling Group.
//! - [`EcsMembership`] implements `ClusterMembership` over the container
//!   instances of an ECS cluster.
//!
//! Both are built from one shared SDK config (see [`load_sdk_config`]), so
//! region, credentials, and endpoint overrides apply to both.

pub mod autoscaling;
pub mod config;
pub mod ecs;

pub use autoscaling::AutoScalingAuthority;
pub use config::{load_sdk_config, AwsSettings};
pub use ecs::EcsMembership;
