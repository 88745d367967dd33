//! Error types for fleet operations.

use thiserror::Error;

use crate::types::NodeRef;

/// Result type alias for fleet operations.
pub type FleetResult<T> = Result<T, FleetError>;

/// A single node that could not be removed from its scaling group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationFailure {
    pub node: NodeRef,
    pub reason: String,
}

impl std::fmt::Display for TerminationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.node.instance_id, self.reason)
    }
}

/// Errors that abort a scale-down run.
///
/// Every variant is fatal for the current run. None of them leave local
/// state behind, so the caller decides whether to rerun.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("scaling group {group:?} not found")]
    GroupNotFound { group: String },

    #[error("scaling group name {group:?} is ambiguous: {matches} groups matched")]
    AmbiguousGroup { group: String, matches: usize },

    #[error(
        "scaling group {group:?} has {current} instances, fewer than the requested {requested}"
    )]
    UnderCapacity {
        group: String,
        current: u32,
        requested: u32,
    },

    #[error("capacity authority error: {0}")]
    Authority(String),

    #[error("cluster membership error: {0}")]
    Membership(String),

    #[error(
        "timed out after {attempts} polls ({waited_secs}s) waiting for nodes to drain: {}; \
         the scale-down can be safely rerun and will pick up where it left off",
        .nodes.join(", ")
    )]
    DrainTimeout {
        nodes: Vec<String>,
        attempts: u32,
        waited_secs: u64,
    },

    #[error("failed to terminate {} node(s): {}", .failures.len(), format_failures(.failures))]
    Termination { failures: Vec<TerminationFailure> },

    #[error(
        "scaling group {group:?} desired capacity is {desired} after scale-down, expected \
         {requested}; investigate before rerunning"
    )]
    Convergence {
        group: String,
        desired: u32,
        requested: u32,
    },

    #[error(
        "scaling group {group:?} desired capacity is {desired} after scale-down, expected \
         {requested}: only {registered} of the {reduction} node(s) to remove were registered \
         to the cluster; register or terminate the remaining group instances, then rerun"
    )]
    UnderFulfilled {
        group: String,
        desired: u32,
        requested: u32,
        registered: usize,
        reduction: u32,
    },
}

impl FleetError {
    /// Whether rerunning the whole scale-down is known to be safe.
    ///
    /// Drain state and membership are re-read on every run, so a run cut
    /// short by a timeout or a transient remote error picks up where it
    /// left off.
    pub fn is_safe_to_rerun(&self) -> bool {
        matches!(
            self,
            FleetError::DrainTimeout { .. }
                | FleetError::UnderFulfilled { .. }
                | FleetError::Authority(_)
                | FleetError::Membership(_)
        )
    }
}

fn format_failures(failures: &[TerminationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
