//! Operator commands for inspecting and maintaining the checkpoint log
//!
//! ## Commands
//!
//! - `agent-resume list --chat ID` - every live checkpoint of a conversation
//! - `agent-resume last --chat ID` - the most recent checkpoint
//! - `agent-resume frame --stack ID` - checkpoints of one call frame
//! - `agent-resume path --stack ID` - root-first ancestor chain of a frame
//! - `agent-resume plan --chat ID` - full recovery plan
//! - `agent-resume clear --chat ID` - soft-delete a conversation
//! - `agent-resume purge` - remove soft-deleted rows past retention
//!
//! Exit codes: 0 success, 1 nothing found, 2 failure.

use std::path::PathBuf;

use agent_resume::{Checkpoint, CheckpointStore, RecoveryPlan, ResumeConfig, ResumeError, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

/// Inspect and maintain the agent checkpoint log
#[derive(Debug, Parser)]
#[command(name = "agent-resume", version)]
pub struct ResumeCli {
    /// Config file (default: $AGENT_RESUME_CONFIG or ~/.config/agent-resume/resume.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Database file, overriding `db_path` from the config
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<PathBuf>,

    /// Output as JSON for automation
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: ResumeSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum ResumeSubcommand {
    /// List every live checkpoint of a conversation in sequence order
    List(ChatArgs),
    /// Show the most recent checkpoint of a conversation
    Last(ChatArgs),
    /// List the checkpoints recorded by one call frame
    Frame(StackArgs),
    /// Print the root-first chain of frames ending at a frame
    Path(StackArgs),
    /// Assemble the recovery plan for a conversation
    Plan(ChatArgs),
    /// Soft-delete every checkpoint of a conversation
    Clear(ChatArgs),
    /// Permanently remove soft-deleted checkpoints
    Purge(PurgeArgs),
}

#[derive(Debug, Args)]
pub struct ChatArgs {
    /// Conversation id
    #[arg(long = "chat", value_name = "CHAT_ID")]
    pub chat_id: String,
}

#[derive(Debug, Args)]
pub struct StackArgs {
    /// Call frame id
    #[arg(long = "stack", value_name = "STACK_ID")]
    pub stack_id: String,
}

#[derive(Debug, Args)]
pub struct PurgeArgs {
    /// Keep rows deleted within this many days (default: retention.deleted_days)
    #[arg(long, value_name = "DAYS")]
    pub older_than_days: Option<u32>,
}

/// Whether a command found anything to report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Found,
    Nothing,
}

impl ResumeCli {
    pub fn run(self) -> i32 {
        match self.execute() {
            Ok(Outcome::Found) => 0,
            Ok(Outcome::Nothing) => 1,
            Err(e) if e.is_not_found() => {
                report_error(&e);
                1
            }
            Err(e) => {
                report_error(&e);
                2
            }
        }
    }

    fn load_config(&self) -> Result<ResumeConfig> {
        let mut cfg = match &self.config {
            Some(path) => ResumeConfig::load_from_path(path)?,
            None => ResumeConfig::load()?,
        };
        if let Some(db) = &self.db {
            cfg.db_path = db.to_string_lossy().into_owned();
        }
        Ok(cfg)
    }

    fn execute(&self) -> Result<Outcome> {
        let cfg = self.load_config()?;
        let store = CheckpointStore::open(&cfg)?;

        match &self.command {
            ResumeSubcommand::List(args) => {
                let checkpoints = store.get_resume(&args.chat_id)?;
                self.print_checkpoints(&checkpoints)
            }
            ResumeSubcommand::Last(args) => {
                let last = store.get_last_resume(&args.chat_id)?;
                self.print_checkpoints(last.as_slice())
            }
            ResumeSubcommand::Frame(args) => {
                let checkpoints = store.get_resume_by_stack_id(&args.stack_id)?;
                self.print_checkpoints(&checkpoints)
            }
            ResumeSubcommand::Path(args) => {
                let path = store.get_stack_path(&args.stack_id)?;
                if self.json {
                    print_json(&path)?;
                } else {
                    print_line(&path.join(" -> "));
                }
                Ok(Outcome::Found)
            }
            ResumeSubcommand::Plan(args) => match store.plan_recovery(&args.chat_id)? {
                Some(plan) => {
                    if self.json {
                        print_json(&plan)?;
                    } else {
                        print_plan(&plan);
                    }
                    Ok(Outcome::Found)
                }
                None => {
                    if !self.json {
                        print_line(&format!("chat {} is clean; nothing to resume", args.chat_id));
                    }
                    Ok(Outcome::Nothing)
                }
            },
            ResumeSubcommand::Clear(args) => {
                let cleared = store.complete_recovery(&args.chat_id)?;
                self.print_count("cleared", cleared)
            }
            ResumeSubcommand::Purge(args) => {
                let days = args.older_than_days.unwrap_or(cfg.retention.deleted_days);
                let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
                let purged = store.purge_deleted(cutoff)?;
                self.print_count("purged", purged)
            }
        }
    }

    fn print_checkpoints(&self, checkpoints: &[Checkpoint]) -> Result<Outcome> {
        if self.json {
            print_json(&checkpoints)?;
        } else {
            for checkpoint in checkpoints {
                print_line(&checkpoint_line(checkpoint));
            }
        }

        Ok(if checkpoints.is_empty() {
            Outcome::Nothing
        } else {
            Outcome::Found
        })
    }

    fn print_count(&self, action: &'static str, count: usize) -> Result<Outcome> {
        if self.json {
            #[derive(Serialize)]
            struct Count {
                action: &'static str,
                count: usize,
            }
            print_json(&Count { action, count })?;
        } else {
            print_line(&format!("{action} {count} checkpoint(s)"));
        }
        Ok(Outcome::Found)
    }
}

fn checkpoint_line(c: &Checkpoint) -> String {
    let mut line = format!(
        "{:>6}  {:<24} depth={} {:<12} {:<11} req={}",
        c.sequence, c.stack_id, c.stack_depth, c.step_type, c.status, c.request_id
    );
    if let Some(parent) = &c.stack_parent_id {
        line.push_str(&format!(" parent={parent}"));
    }
    if let Some(error) = &c.error {
        line.push_str(&format!(" error={error:?}"));
    }
    line
}

fn print_plan(plan: &RecoveryPlan) {
    print_line(&format!(
        "chat {} interrupted at sequence {} in stack {} (depth {})",
        plan.chat_id,
        plan.interrupted.sequence,
        plan.interrupted.stack_id,
        plan.resume_depth()
    ));
    print_line(&format!("path: {}", plan.path.join(" -> ")));
    for frame in &plan.frames {
        let snapshot = if frame.latest_space_snapshot().is_some() {
            "snapshot"
        } else {
            "no snapshot"
        };
        print_line(&format!(
            "  [{}] {} ({} checkpoint(s), {snapshot})",
            frame.frame.stack_depth,
            frame.frame.stack_id,
            frame.checkpoints.len()
        ));
        for checkpoint in &frame.checkpoints {
            print_line(&format!("    {}", checkpoint_line(checkpoint)));
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| ResumeError::backend_with_source("failed to encode JSON output", e))?;
    print_line(&text);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_line(line: &str) {
    println!("{line}");
}

#[allow(clippy::print_stderr)]
fn report_error(err: &ResumeError) {
    tracing::debug!(category = %err.category(), "Command failed");
    eprintln!("error [{}]: {err}", err.category());
}
