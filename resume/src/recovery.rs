//! Recovery protocol helpers
//!
//! On restart an orchestrator finds the most recent interrupted checkpoint,
//! rebuilds the chain of delegated frames above it, replays each frame from
//! its checkpoints, and clears the conversation once the replay succeeds. A
//! failed replay appends new checkpoints with higher sequences and the cycle
//! starts over.

use serde::Serialize;

use crate::errors::{ResumeError, Result};
use crate::record::{Checkpoint, Payload};
use crate::stack::FrameRef;
use crate::store::CheckpointStore;

/// Where a conversation stands in the checkpoint lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecoveryState {
    /// No live checkpoints; nothing to resume
    Clean,
    /// Live checkpoints exist and a resume is possible
    Checkpointed {
        checkpoints: usize,
        last_sequence: i64,
    },
}

impl RecoveryState {
    pub fn needs_resume(&self) -> bool {
        matches!(self, Self::Checkpointed { .. })
    }
}

/// Checkpoints recorded by one frame of the stack path
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameCheckpoints {
    pub frame: FrameRef,
    /// Ordered by sequence
    pub checkpoints: Vec<Checkpoint>,
}

impl FrameCheckpoints {
    /// Newest non-empty space snapshot of this frame
    pub fn latest_space_snapshot(&self) -> Option<&Payload> {
        self.checkpoints
            .iter()
            .rev()
            .filter_map(|c| c.space_snapshot.as_ref())
            .find(|snapshot| !snapshot.is_empty())
    }

    pub fn last(&self) -> Option<&Checkpoint> {
        self.checkpoints.last()
    }
}

/// Everything needed to replay an interrupted conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryPlan {
    pub chat_id: String,
    /// Highest-sequence checkpoint of the conversation
    pub interrupted: Checkpoint,
    /// Root-first `stack_id`s ending at the interrupted frame
    pub path: Vec<String>,
    /// One entry per `path` element, same order
    pub frames: Vec<FrameCheckpoints>,
}

impl RecoveryPlan {
    /// The top-level frame the replay starts from
    pub fn root(&self) -> Option<&FrameCheckpoints> {
        self.frames.first()
    }

    /// The frame that was executing when the run stopped
    pub fn leaf(&self) -> Option<&FrameCheckpoints> {
        self.frames.last()
    }

    pub fn frame(&self, stack_id: &str) -> Option<&FrameCheckpoints> {
        self.frames.iter().find(|f| f.frame.stack_id == stack_id)
    }

    /// Delegation depth of the interrupted frame, as walked
    pub fn resume_depth(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}

impl CheckpointStore {
    /// Classify a conversation as clean or checkpointed
    pub fn recovery_state(&self, chat_id: &str) -> Result<RecoveryState> {
        let checkpoints = self.get_resume(chat_id)?;
        Ok(match checkpoints.last() {
            None => RecoveryState::Clean,
            Some(last) => RecoveryState::Checkpointed {
                checkpoints: checkpoints.len(),
                last_sequence: last.sequence,
            },
        })
    }

    /// Assemble the replay plan for a conversation, or `None` if it is clean
    ///
    /// Chain corruption is returned as an error; the plan is never truncated.
    pub fn plan_recovery(&self, chat_id: &str) -> Result<Option<RecoveryPlan>> {
        let Some(interrupted) = self.get_last_resume(chat_id)? else {
            tracing::debug!(chat_id, "Nothing to resume");
            return Ok(None);
        };

        let walked = self.get_stack_frames(&interrupted.stack_id)?;
        let mut frames = Vec::with_capacity(walked.len());
        for frame in walked {
            if frame.chat_id != chat_id {
                return Err(ResumeError::corruption(format!(
                    "stack {} on the path of chat {chat_id} belongs to chat {}",
                    frame.stack_id, frame.chat_id
                )));
            }
            let checkpoints = self.get_resume_by_stack_id(&frame.stack_id)?;
            frames.push(FrameCheckpoints { frame, checkpoints });
        }

        let path: Vec<String> = frames.iter().map(|f| f.frame.stack_id.clone()).collect();

        tracing::info!(
            chat_id,
            stack_id = %interrupted.stack_id,
            sequence = interrupted.sequence,
            depth = path.len().saturating_sub(1),
            "Recovery plan assembled"
        );

        Ok(Some(RecoveryPlan {
            chat_id: chat_id.to_string(),
            interrupted,
            path,
            frames,
        }))
    }

    /// Clear a conversation after a successful replay
    pub fn complete_recovery(&self, chat_id: &str) -> Result<usize> {
        let cleared = self.delete_resume(chat_id)?;
        tracing::info!(chat_id, cleared, "Recovery completed");
        Ok(cleared)
    }
}
