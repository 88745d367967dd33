//! warpgrid-fleet — the fleet model shared by the scale-down tooling.
//!
//! Describes the two remote authorities a scale-down talks to:
//!
//! - the **capacity authority** (a scaling group that owns the desired
//!   instance count), and
//! - the **cluster membership** (the nodes registered to run workload, with
//!   their live task counts and drain state).
//!
//! Both are expressed as async traits so the orchestrator can be driven by
//! real cloud clients (`warpgrid-aws`) or by the in-process
//! [`InMemoryFleet`] in tests.
//!
//! # Architecture
//!
//! ```text
//! CapacityAuthority                ClusterMembership
//!   ├── describe_group()             ├── list_nodes()
//!   ├── desired_capacity()           ├── describe_nodes()
//!   └── decrement_and_remove()       └── set_draining()
//! ```
//!
//! Nothing here is persisted: every value is re-read from the authority on
//! each run, which is what makes a scale-down safe to rerun.

pub mod client;
pub mod error;
pub mod memory;
pub mod types;

pub use client::{CapacityAuthority, ClusterMembership};
pub use error::{FleetError, FleetResult, TerminationFailure};
pub use memory::{CallCounts, DrainProgress, InMemoryFleet};
pub use types::*;
