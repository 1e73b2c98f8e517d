//! Checkpoint log for resuming interrupted agent-to-agent executions
//!
//! When an agent run is interrupted or fails, the orchestrator appends one
//! checkpoint per execution step to this log. Agents may delegate to other
//! agents, so every checkpoint names the call frame (`stack_id`) it was taken
//! in and that frame's parent, which lets a restarted orchestrator rebuild the
//! full delegation chain and resume from the exact frame that stopped.
//!
//! - [`CheckpointStore`] persists checkpoints in SQLite and answers lookups by
//!   conversation, frame and request
//! - [`stack`] walks parent pointers from a frame up to its root
//! - [`recovery`] bundles those lookups into a replay plan

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod db;
pub mod errors;
pub mod record;
pub mod recovery;
pub mod stack;
pub mod store;

pub use config::{ResumeConfig, RetentionConfig};
pub use errors::{ErrorCategory, Result, ResumeError};
pub use record::{Checkpoint, NewCheckpoint, Payload, ResumeStatus, StepType};
pub use recovery::{FrameCheckpoints, RecoveryPlan, RecoveryState};
pub use stack::{FrameLookup, FrameRef, resolve_stack_path, walk_to_root};
pub use store::CheckpointStore;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
