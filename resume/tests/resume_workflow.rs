#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end checkpoint workflows against a file-backed store.
//!
//! Covers:
//!   1. An A2A run where the main agent delegates to a sub-agent and the
//!      sub-agent is interrupted mid-step
//!   2. Restart: last checkpoint, stack path, per-frame checkpoints
//!   3. Successful resume clears the conversation
//!   4. Reopening the database sees committed state
//!   5. Concurrent readers over the shared pool

use std::path::Path;
use std::sync::Arc;
use std::thread;

use agent_resume::db::PoolOptions;
use agent_resume::{
    CheckpointStore, ErrorCategory, NewCheckpoint, Payload, ResumeConfig, ResumeStatus, StepType,
};
use pretty_assertions::assert_eq;
use serde_json::json;

fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().expect("object payload")
}

fn open(dir: &Path) -> CheckpointStore {
    CheckpointStore::open_at_path(&dir.join("resume.db"), PoolOptions::default())
        .expect("open store")
}

/// main_stack (depth 0, seq 1-2) delegates to sub_stack (depth 1, seq 3-4)
fn a2a_batch(chat_id: &str) -> Vec<NewCheckpoint> {
    vec![
        NewCheckpoint::new(
            chat_id,
            "req_a2a",
            "main_assistant",
            "main_stack",
            StepType::Input,
            ResumeStatus::Interrupted,
        )
        .with_sequence(1)
        .with_input(payload(json!({"messages": [{"role": "user", "content": "Analyze data"}]}))),
        NewCheckpoint::new(
            chat_id,
            "req_a2a",
            "main_assistant",
            "main_stack",
            StepType::Delegate,
            ResumeStatus::Interrupted,
        )
        .with_sequence(2)
        .with_space_snapshot(payload(json!({"delegate_to": "sub_assistant"}))),
        NewCheckpoint::new(
            chat_id,
            "req_a2a",
            "sub_assistant",
            "sub_stack",
            StepType::Llm,
            ResumeStatus::Interrupted,
        )
        .with_parent("main_stack", 1)
        .with_sequence(3)
        .with_space_snapshot(payload(json!({"task": "analyze", "data_id": "123"}))),
        NewCheckpoint::new(
            chat_id,
            "req_a2a",
            "sub_assistant",
            "sub_stack",
            StepType::Tool,
            ResumeStatus::Interrupted,
        )
        .with_parent("main_stack", 1)
        .with_sequence(4)
        .with_output(payload(json!({"partial_content": "The analysis shows..."})))
        .with_error("Interrupted during tool execution"),
    ]
}

#[test]
fn a2a_interrupt_and_resume() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    let chat_id = "chat_a2a";

    assert_eq!(store.save_resume(&a2a_batch(chat_id)).unwrap(), 4);

    // Restart: most recent interrupted frame
    let last = store.get_last_resume(chat_id).unwrap().expect("last checkpoint");
    assert_eq!(last.sequence, 4);
    assert_eq!(last.stack_id, "sub_stack");
    assert_eq!(last.stack_depth, 1);
    assert_eq!(last.step_type, StepType::Tool);
    assert_eq!(last.error.as_deref(), Some("Interrupted during tool execution"));

    // Ancestor chain
    let path = store.get_stack_path(&last.stack_id).unwrap();
    assert_eq!(path, vec!["main_stack", "sub_stack"]);

    // Per-frame checkpoints
    let main = store.get_resume_by_stack_id("main_stack").unwrap();
    let sub = store.get_resume_by_stack_id("sub_stack").unwrap();
    assert_eq!(main.iter().map(|c| c.sequence).collect::<Vec<_>>(), vec![1, 2]);
    assert_eq!(sub.iter().map(|c| c.sequence).collect::<Vec<_>>(), vec![3, 4]);
    assert!(main.iter().all(|c| c.is_root()));
    assert!(sub.iter().all(|c| c.stack_parent_id.as_deref() == Some("main_stack")));
    assert_eq!(
        sub[0].space_snapshot.as_ref().and_then(|s| s.get("data_id")),
        Some(&json!("123"))
    );

    // Whole conversation, in order
    let all = store.get_resume(chat_id).unwrap();
    assert_eq!(
        all.iter().map(|c| c.sequence).collect::<Vec<_>>(),
        vec![1, 2, 3, 4]
    );

    // Successful resume clears everything
    assert_eq!(store.complete_recovery(chat_id).unwrap(), 4);
    assert!(store.get_resume(chat_id).unwrap().is_empty());
    assert!(store.get_last_resume(chat_id).unwrap().is_none());
    assert!(store.plan_recovery(chat_id).unwrap().is_none());
}

#[test]
fn recovery_plan_matches_manual_steps() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());
    store.save_resume(&a2a_batch("chat_plan")).unwrap();

    let plan = store.plan_recovery("chat_plan").unwrap().expect("plan");
    assert_eq!(plan.path, vec!["main_stack", "sub_stack"]);
    assert_eq!(plan.interrupted.sequence, 4);
    assert_eq!(plan.resume_depth(), 1);

    let root = plan.root().expect("root frame");
    assert_eq!(root.frame.stack_id, "main_stack");
    assert_eq!(root.checkpoints, store.get_resume_by_stack_id("main_stack").unwrap());
    assert_eq!(
        root.latest_space_snapshot()
            .and_then(|s| s.get("delegate_to"))
            .cloned(),
        Some(json!("sub_assistant"))
    );

    let leaf = plan.leaf().expect("leaf frame");
    assert_eq!(leaf.frame.stack_depth, 1);
    assert_eq!(
        leaf.latest_space_snapshot().and_then(|s| s.get("task")).cloned(),
        Some(json!("analyze"))
    );
}

#[test]
fn committed_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = open(dir.path());
        store.save_resume(&a2a_batch("chat_reopen")).unwrap();
    }

    let cfg = ResumeConfig {
        db_path: dir.path().join("resume.db").to_string_lossy().into_owned(),
        ..ResumeConfig::default()
    };
    let store = CheckpointStore::open(&cfg).unwrap();
    assert_eq!(store.get_resume("chat_reopen").unwrap().len(), 4);
    assert_eq!(store.next_sequence("chat_reopen").unwrap(), 5);
}

#[test]
fn rejected_batch_leaves_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());

    let mut batch = a2a_batch("chat_reject");
    batch[2].assistant_id.clear();

    let err = store.save_resume(&batch).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Validation);
    assert_eq!(err.to_string(), "assistant_id is required (record 2)");
    assert!(store.get_resume("chat_reject").unwrap().is_empty());
    assert!(store.get_resume_by_stack_id("main_stack").unwrap().is_empty());
}

#[test]
fn deep_delegation_path() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());

    let frames = ["root_stack", "a", "b", "c"];
    let batch: Vec<NewCheckpoint> = frames
        .iter()
        .enumerate()
        .map(|(depth, stack)| {
            let record = NewCheckpoint::new(
                "chat_deep",
                "req",
                format!("assistant_{depth}"),
                *stack,
                StepType::Delegate,
                ResumeStatus::Interrupted,
            )
            .with_sequence(depth as i64 + 1);
            match depth.checked_sub(1) {
                Some(parent) => record.with_parent(frames[parent], depth as u32),
                None => record,
            }
        })
        .collect();
    store.save_resume(&batch).unwrap();

    assert_eq!(store.get_stack_path("c").unwrap(), vec!["root_stack", "a", "b", "c"]);
    assert_eq!(store.get_stack_path("root_stack").unwrap(), vec!["root_stack"]);
    assert!(store.get_stack_path("nonexistent").unwrap_err().is_not_found());
}

#[test]
fn deleted_frames_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());

    store
        .save_resume(&[NewCheckpoint::new(
            "chat_parent",
            "req",
            "main",
            "shared_root",
            StepType::Delegate,
            ResumeStatus::Interrupted,
        )
        .with_sequence(1)])
        .unwrap();
    store
        .save_resume(&[NewCheckpoint::new(
            "chat_parent",
            "req",
            "sub",
            "child",
            StepType::Llm,
            ResumeStatus::Failed,
        )
        .with_parent("shared_root", 1)
        .with_sequence(2)])
        .unwrap();

    store.delete_resume("chat_parent").unwrap();
    assert!(store.get_stack_path("child").unwrap_err().is_not_found());
}

#[test]
fn concurrent_readers_see_committed_batches() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(open(dir.path()));
    store.save_resume(&a2a_batch("chat_concurrent")).unwrap();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..25 {
                    let rows = store.get_resume("chat_concurrent").unwrap();
                    assert_eq!(rows.len(), 4);
                    let path = store.get_stack_path("sub_stack").unwrap();
                    assert_eq!(path.len(), 2);
                }
            })
        })
        .collect();

    for reader in readers {
        reader.join().expect("reader thread");
    }
}

#[test]
fn concurrent_writers_on_separate_chats() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path());

    let writers: Vec<_> = (0..4)
        .map(|i| {
            let store = store.clone();
            thread::spawn(move || {
                let chat_id = format!("chat_writer_{i}");
                for sequence in 1..=10 {
                    store
                        .save_resume(&[NewCheckpoint::new(
                            chat_id.as_str(),
                            "req",
                            "assistant",
                            format!("stack_{i}"),
                            StepType::Llm,
                            ResumeStatus::Interrupted,
                        )
                        .with_sequence(sequence)])
                        .unwrap();
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().expect("writer thread");
    }

    for i in 0..4 {
        let rows = store.get_resume(&format!("chat_writer_{i}")).unwrap();
        assert_eq!(rows.len(), 10);
    }
}
