//! Stack reconstruction
//!
//! Rebuilds the root-to-leaf chain of delegated frames by following
//! `stack_parent_id` pointers. Correctness rests on the parent pointers alone;
//! stored depths are only cross-checked.

use std::collections::HashSet;

use serde::Serialize;

use crate::errors::{ResumeError, Result};

/// Identity of one call frame as recorded on its checkpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameRef {
    pub stack_id: String,
    pub stack_parent_id: Option<String>,
    pub stack_depth: u32,
    pub chat_id: String,
}

impl FrameRef {
    pub fn is_root(&self) -> bool {
        self.stack_parent_id.is_none()
    }
}

/// Read access to frames, keyed by `stack_id`
pub trait FrameLookup {
    /// Any live record's view of the frame, or `None` if nothing is stored
    fn frame(&self, stack_id: &str) -> Result<Option<FrameRef>>;
}

/// Walk parent pointers from `stack_id` up to the root
///
/// Returns frames root-first. An unknown starting frame is not-found; a parent
/// with no stored record, or a chain that revisits a frame, is corruption.
pub fn walk_to_root<L>(lookup: &L, stack_id: &str) -> Result<Vec<FrameRef>>
where
    L: FrameLookup + ?Sized,
{
    if stack_id.is_empty() {
        return Err(ResumeError::required("stack_id"));
    }

    let leaf = lookup
        .frame(stack_id)?
        .ok_or_else(|| ResumeError::not_found(format!("no checkpoints for stack {stack_id}")))?;

    let mut seen = HashSet::from([leaf.stack_id.clone()]);
    let mut chain = vec![leaf];

    while let Some(parent_id) = chain.last().and_then(|f| f.stack_parent_id.clone()) {
        if !seen.insert(parent_id.clone()) {
            return Err(ResumeError::corruption(format!(
                "cycle in parent chain of stack {stack_id}: {parent_id} revisited"
            )));
        }

        let parent = lookup.frame(&parent_id)?.ok_or_else(|| {
            ResumeError::corruption(format!(
                "dangling parent {parent_id} in chain of stack {stack_id}"
            ))
        })?;
        chain.push(parent);
    }

    chain.reverse();
    check_depths(stack_id, &chain);
    Ok(chain)
}

/// Root-first `stack_id`s for the chain ending at `stack_id`
pub fn resolve_stack_path<L>(lookup: &L, stack_id: &str) -> Result<Vec<String>>
where
    L: FrameLookup + ?Sized,
{
    Ok(walk_to_root(lookup, stack_id)?
        .into_iter()
        .map(|f| f.stack_id)
        .collect())
}

fn check_depths(stack_id: &str, chain: &[FrameRef]) {
    for (expected, frame) in chain.iter().enumerate() {
        if frame.stack_depth as usize != expected {
            tracing::warn!(
                stack_id,
                frame = %frame.stack_id,
                stored_depth = frame.stack_depth,
                walked_depth = expected,
                "stack_depth disagrees with parent chain"
            );
        }
    }
}
