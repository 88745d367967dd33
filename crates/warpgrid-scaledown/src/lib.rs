//! warpgrid-scaledown — shrink a cluster without dropping in-flight work.
//!
//! Reconciles a scaling group's desired capacity against the nodes
//! registered to a cluster, picks which nodes to remove, drains them, and
//! only then terminates them through the scaling group so its bookkeeping
//! stays consistent.
//!
//! # Run phases
//!
//! ```text
//! ComputeDelta ── reduction = desired - requested
//!   │  < 0  → UnderCapacity (no mutating call)
//!   │  == 0 → Done (nothing to do)
//!   ▼
//! SelectNodes ── oldest-registered group members first
//!   ▼
//! Drain ──────── Requesting → Polling{attempts_left} → Drained
//!   │                                 └──────────────→ TimedOut (safe to rerun)
//!   ▼
//! Terminate ──── one decrement-and-remove per node, failures collected
//!   ▼
//! Verify ─────── desired == requested, else UnderFulfilled (too few nodes
//!                 were registered) or Convergence
//!   ▼
//! Done
//! ```
//!
//! All state is re-read from the remote authorities on every run, so a
//! run that stops early (timeout, process kill) is safe to repeat.

pub mod drain;
pub mod orchestrator;
pub mod pause;
pub mod selector;
pub mod terminate;

pub use drain::{parse_duration, DrainCoordinator, DrainPhase, DrainPolicy, DrainReport, DrainRun};
pub use orchestrator::{ScaleDownOrchestrator, ScaleDownOutcome, ScaleDownPhase, ScaleDownRequest};
pub use pause::{Pause, RecordingPause, TokioPause};
pub use selector::select_for_removal;
pub use terminate::{TerminationExecutor, TerminationReport};
