//! Checkpoint store
//!
//! Maintains the `agent_resume` SQLite table: one row per interrupted or
//! failed execution step, looked up by `(chat_id, sequence)` for a
//! conversation's linear history and by `stack_id` for frame-scoped and
//! parent-chain queries.
//!
//! Rows are append-only. `delete_resume` stamps `deleted_at` on a whole
//! conversation, which hides the rows from every read; `purge_deleted` removes
//! stamped rows for good.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use crate::config::ResumeConfig;
use crate::db::{self, PoolOptions, SqlitePool, execute_in_transaction};
use crate::errors::{ResumeError, Result};
use crate::record::{Checkpoint, NewCheckpoint, Payload, ResumeStatus, StepType};
use crate::stack::{self, FrameLookup, FrameRef};

const SELECT_COLUMNS: &str = "resume_id, chat_id, request_id, assistant_id, stack_id, \
     stack_parent_id, stack_depth, type, status, input, output, space_snapshot, error, \
     sequence, metadata, created_at, updated_at";

const INSERT_SQL: &str = r#"
    INSERT INTO agent_resume
        (resume_id, chat_id, request_id, assistant_id, stack_id, stack_parent_id,
         stack_depth, type, status, input, output, space_snapshot, error, sequence,
         metadata, created_at, updated_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?16)
"#;

/// Persistent checkpoint log
///
/// Cheap to clone; clones share one connection pool.
#[derive(Clone)]
pub struct CheckpointStore {
    pool: SqlitePool,
}

impl CheckpointStore {
    /// Open the store described by `cfg`, creating and migrating the database
    pub fn open(cfg: &ResumeConfig) -> Result<Self> {
        Self::open_at_path(&cfg.resolved_db_path(), cfg.pool_options())
    }

    /// Open a store backed by a specific database file
    pub fn open_at_path(path: &Path, options: PoolOptions) -> Result<Self> {
        let pool = db::initialize_pool(path, options).map_err(|e| {
            ResumeError::backend_with_source(
                format!("failed to open resume db at {}", path.display()),
                e,
            )
        })?;
        let store = Self::from_pool(pool)?;

        tracing::info!(path = %path.display(), "Resume store opened");
        Ok(store)
    }

    /// Open a private in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let pool = db::initialize_memory_pool()
            .map_err(|e| ResumeError::backend_with_source("failed to open in-memory db", e))?;
        Self::from_pool(pool)
    }

    fn from_pool(pool: SqlitePool) -> Result<Self> {
        {
            let mut conn = pool.get()?;
            db::migrations::migrate_to_latest(&mut conn)
                .map_err(|e| ResumeError::backend_with_source("failed to migrate schema", e))?;
        }
        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────────

    /// Persist a batch of checkpoints atomically
    ///
    /// Every record is validated before anything is written; one bad record
    /// rejects the whole batch. Returns the number of rows written.
    pub fn save_resume(&self, records: &[NewCheckpoint]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        for (index, record) in records.iter().enumerate() {
            record.validate(index)?;
        }
        let plan = BatchPlan::build(records)?;

        let now = format_ts(Utc::now());
        let mut conn = self.conn()?;
        let written = execute_in_transaction(
            &mut conn,
            TransactionBehavior::Immediate,
            |tx| -> Result<usize> {
                plan.check_against_stored(tx)?;

                let mut stmt = tx.prepare_cached(INSERT_SQL)?;
                for record in records {
                    let resume_id = record
                        .resume_id
                        .clone()
                        .filter(|id| !id.is_empty())
                        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

                    stmt.execute(params![
                        resume_id,
                        record.chat_id,
                        record.request_id,
                        record.assistant_id,
                        record.stack_id,
                        record.parent_id(),
                        record.stack_depth,
                        record.step_type.as_ref().map(StepType::as_str),
                        record.status.as_ref().map(ResumeStatus::as_str),
                        encode_payload(record.input.as_ref(), "input")?,
                        encode_payload(record.output.as_ref(), "output")?,
                        encode_payload(record.space_snapshot.as_ref(), "space_snapshot")?,
                        record.error.as_deref().filter(|e| !e.is_empty()),
                        record.sequence,
                        encode_payload(record.metadata.as_ref(), "metadata")?,
                        now,
                    ])?;
                }
                Ok(records.len())
            },
        )?;

        tracing::debug!(
            records = written,
            chats = plan.last_sequence.len(),
            frames = plan.frames.len(),
            "Saved resume checkpoints"
        );

        Ok(written)
    }

    /// Soft-delete every checkpoint of a conversation
    ///
    /// Idempotent; returns the number of rows hidden by this call.
    pub fn delete_resume(&self, chat_id: &str) -> Result<usize> {
        require("chat_id", chat_id)?;

        let now = format_ts(Utc::now());
        let deleted = self.conn()?.execute(
            r#"
            UPDATE agent_resume
            SET deleted_at = ?2, updated_at = ?2
            WHERE chat_id = ?1 AND deleted_at IS NULL
            "#,
            params![chat_id, now],
        )?;

        tracing::info!(chat_id, deleted, "Deleted resume checkpoints");
        Ok(deleted)
    }

    /// Physically remove soft-deleted rows stamped before `before`
    pub fn purge_deleted(&self, before: DateTime<Utc>) -> Result<usize> {
        let purged = self.conn()?.execute(
            "DELETE FROM agent_resume WHERE deleted_at IS NOT NULL AND deleted_at < ?1",
            params![format_ts(before)],
        )?;

        tracing::info!(purged, before = %before, "Purged soft-deleted checkpoints");
        Ok(purged)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────────

    /// All checkpoints of a conversation, ordered by sequence
    pub fn get_resume(&self, chat_id: &str) -> Result<Vec<Checkpoint>> {
        require("chat_id", chat_id)?;
        self.query_by("chat_id", chat_id)
    }

    /// The highest-sequence checkpoint of a conversation
    pub fn get_last_resume(&self, chat_id: &str) -> Result<Option<Checkpoint>> {
        require("chat_id", chat_id)?;

        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM agent_resume \
             WHERE chat_id = ?1 AND deleted_at IS NULL \
             ORDER BY sequence DESC LIMIT 1"
        );
        let row = self
            .conn()?
            .query_row(&sql, params![chat_id], StoredRow::from_row)
            .optional()
            .map_err(row_error)?;

        row.map(StoredRow::into_checkpoint).transpose()
    }

    /// All checkpoints of one frame, ordered by sequence
    pub fn get_resume_by_stack_id(&self, stack_id: &str) -> Result<Vec<Checkpoint>> {
        require("stack_id", stack_id)?;
        self.query_by("stack_id", stack_id)
    }

    /// All checkpoints of one request, ordered by sequence
    pub fn get_resume_by_request_id(&self, request_id: &str) -> Result<Vec<Checkpoint>> {
        require("request_id", request_id)?;
        self.query_by("request_id", request_id)
    }

    /// Next free sequence for a conversation (1 when it has no checkpoints)
    pub fn next_sequence(&self, chat_id: &str) -> Result<i64> {
        require("chat_id", chat_id)?;
        let conn = self.conn()?;
        Ok(max_live_sequence(&conn, chat_id)?.map_or(1, |max| max + 1))
    }

    /// Root-first `stack_id`s from the root ancestor down to `stack_id`
    pub fn get_stack_path(&self, stack_id: &str) -> Result<Vec<String>> {
        let conn = self.conn()?;
        stack::resolve_stack_path(&ConnFrames(&conn), stack_id)
    }

    /// Like [`Self::get_stack_path`] but returns each frame's stored identity
    pub fn get_stack_frames(&self, stack_id: &str) -> Result<Vec<FrameRef>> {
        let conn = self.conn()?;
        stack::walk_to_root(&ConnFrames(&conn), stack_id)
    }

    /// `column` is always one of the indexed id columns, never caller input
    fn query_by(&self, column: &'static str, value: &str) -> Result<Vec<Checkpoint>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM agent_resume \
             WHERE {column} = ?1 AND deleted_at IS NULL \
             ORDER BY sequence ASC"
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt
            .query_map(params![value], StoredRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(row_error)?;

        let checkpoints = rows
            .into_iter()
            .map(StoredRow::into_checkpoint)
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(column, value, count = checkpoints.len(), "Loaded checkpoints");
        Ok(checkpoints)
    }
}

/// Frame lookups over one checked-out connection
struct ConnFrames<'c>(&'c Connection);

impl FrameLookup for ConnFrames<'_> {
    fn frame(&self, stack_id: &str) -> Result<Option<FrameRef>> {
        stored_frame(self.0, stack_id).map_err(row_error)
    }
}

fn stored_frame(conn: &Connection, stack_id: &str) -> rusqlite::Result<Option<FrameRef>> {
    conn.query_row(
        r#"
        SELECT stack_id, stack_parent_id, stack_depth, chat_id
        FROM agent_resume
        WHERE stack_id = ?1 AND deleted_at IS NULL
        ORDER BY sequence ASC
        LIMIT 1
        "#,
        params![stack_id],
        |row| {
            Ok(FrameRef {
                stack_id: row.get(0)?,
                stack_parent_id: row
                    .get::<_, Option<String>>(1)?
                    .filter(|p| !p.is_empty()),
                stack_depth: row.get(2)?,
                chat_id: row.get(3)?,
            })
        },
    )
    .optional()
}

fn max_live_sequence(conn: &Connection, chat_id: &str) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT MAX(sequence) FROM agent_resume WHERE chat_id = ?1 AND deleted_at IS NULL",
        params![chat_id],
        |row| row.get(0),
    )
}

/// Column decode failures mean the stored row is bad, not the backend
fn row_error(err: rusqlite::Error) -> ResumeError {
    match err {
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::IntegralValueOutOfRange(..) => {
            ResumeError::corruption(format!("undecodable checkpoint row: {err}"))
        }
        other => other.into(),
    }
}

fn require(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ResumeError::required(field));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Batch invariants
// ─────────────────────────────────────────────────────────────────────────────

/// Per-batch view used to enforce id, sequence and frame invariants
struct BatchPlan<'a> {
    /// Caller-supplied resume ids
    resume_ids: HashSet<&'a str>,
    /// Lowest sequence each chat writes in this batch
    first_sequence: HashMap<&'a str, i64>,
    /// Highest sequence each chat writes in this batch
    last_sequence: HashMap<&'a str, i64>,
    /// Frame identity each stack_id claims in this batch
    frames: HashMap<&'a str, (&'a str, Option<&'a str>, u32)>,
}

impl<'a> BatchPlan<'a> {
    fn build(records: &'a [NewCheckpoint]) -> Result<Self> {
        let mut seen_sequences = HashSet::new();
        let mut plan = BatchPlan {
            resume_ids: HashSet::new(),
            first_sequence: HashMap::new(),
            last_sequence: HashMap::new(),
            frames: HashMap::new(),
        };

        for (index, record) in records.iter().enumerate() {
            if let Some(id) = record.resume_id.as_deref().filter(|id| !id.is_empty())
                && !plan.resume_ids.insert(id)
            {
                return Err(ResumeError::invalid(format!(
                    "record {index}: resume_id {id} repeated in batch"
                )));
            }

            let chat = record.chat_id.as_str();
            if !seen_sequences.insert((chat, record.sequence)) {
                return Err(ResumeError::invalid(format!(
                    "record {index}: sequence {} repeated for chat {chat}",
                    record.sequence
                )));
            }
            plan.first_sequence
                .entry(chat)
                .and_modify(|s| *s = (*s).min(record.sequence))
                .or_insert(record.sequence);
            plan.last_sequence
                .entry(chat)
                .and_modify(|s| *s = (*s).max(record.sequence))
                .or_insert(record.sequence);

            let identity = (chat, record.parent_id(), record.stack_depth);
            match plan.frames.get(record.stack_id.as_str()) {
                Some(existing) if *existing != identity => {
                    return Err(ResumeError::invalid(format!(
                        "record {index}: stack {} conflicts with an earlier record of the batch",
                        record.stack_id
                    )));
                }
                Some(_) => {}
                None => {
                    plan.frames.insert(record.stack_id.as_str(), identity);
                }
            }
        }

        Ok(plan)
    }

    /// Compare the batch with live rows, inside the write transaction
    fn check_against_stored(&self, conn: &Connection) -> Result<()> {
        // Soft-deleted rows keep their primary key until purged
        let mut id_taken =
            conn.prepare_cached("SELECT 1 FROM agent_resume WHERE resume_id = ?1")?;
        for id in &self.resume_ids {
            if id_taken.exists(params![id])? {
                return Err(ResumeError::invalid(format!("resume_id {id} already exists")));
            }
        }

        for (chat, first) in &self.first_sequence {
            if let Some(max) = max_live_sequence(conn, chat)?
                && *first <= max
            {
                return Err(ResumeError::invalid(format!(
                    "sequence {first} for chat {chat} does not follow stored sequence {max}"
                )));
            }
        }

        for (stack_id, (chat, parent, depth)) in &self.frames {
            let Some(stored) = stored_frame(conn, stack_id).map_err(row_error)? else {
                continue;
            };
            if stored.chat_id != *chat
                || stored.stack_parent_id.as_deref() != *parent
                || stored.stack_depth != *depth
            {
                return Err(ResumeError::invalid(format!(
                    "stack {stack_id} is already recorded with chat {}, parent {:?}, depth {}",
                    stored.chat_id, stored.stack_parent_id, stored.stack_depth
                )));
            }
        }

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row encoding
// ─────────────────────────────────────────────────────────────────────────────

/// Raw column values, decoded into a [`Checkpoint`] outside the row callback
struct StoredRow {
    resume_id: String,
    chat_id: String,
    request_id: String,
    assistant_id: String,
    stack_id: String,
    stack_parent_id: Option<String>,
    stack_depth: u32,
    step_type: String,
    status: String,
    input: Option<String>,
    output: Option<String>,
    space_snapshot: Option<String>,
    error: Option<String>,
    sequence: i64,
    metadata: Option<String>,
    created_at: String,
    updated_at: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            resume_id: row.get(0)?,
            chat_id: row.get(1)?,
            request_id: row.get(2)?,
            assistant_id: row.get(3)?,
            stack_id: row.get(4)?,
            stack_parent_id: row.get(5)?,
            stack_depth: row.get(6)?,
            step_type: row.get(7)?,
            status: row.get(8)?,
            input: row.get(9)?,
            output: row.get(10)?,
            space_snapshot: row.get(11)?,
            error: row.get(12)?,
            sequence: row.get(13)?,
            metadata: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint> {
        let status = ResumeStatus::parse(&self.status).ok_or_else(|| {
            ResumeError::corruption(format!(
                "resume {} has unknown status {:?}",
                self.resume_id, self.status
            ))
        })?;

        Ok(Checkpoint {
            input: decode_payload(&self.resume_id, "input", self.input)?,
            output: decode_payload(&self.resume_id, "output", self.output)?,
            space_snapshot: decode_payload(&self.resume_id, "space_snapshot", self.space_snapshot)?,
            metadata: decode_payload(&self.resume_id, "metadata", self.metadata)?,
            created_at: parse_ts(&self.resume_id, &self.created_at)?,
            updated_at: parse_ts(&self.resume_id, &self.updated_at)?,
            stack_parent_id: self.stack_parent_id.filter(|p| !p.is_empty()),
            step_type: StepType::parse(&self.step_type),
            status,
            error: self.error.filter(|e| !e.is_empty()),
            resume_id: self.resume_id,
            chat_id: self.chat_id,
            request_id: self.request_id,
            assistant_id: self.assistant_id,
            stack_id: self.stack_id,
            stack_depth: self.stack_depth,
            sequence: self.sequence,
        })
    }
}

fn encode_payload(payload: Option<&Payload>, field: &str) -> Result<Option<String>> {
    payload
        .map(|p| {
            serde_json::to_string(p)
                .map_err(|e| ResumeError::invalid(format!("failed to encode {field}: {e}")))
        })
        .transpose()
}

fn decode_payload(resume_id: &str, field: &str, raw: Option<String>) -> Result<Option<Payload>> {
    match raw.as_deref() {
        None | Some("") => Ok(None),
        Some(text) => serde_json::from_str(text).map(Some).map_err(|e| {
            ResumeError::corruption(format!("resume {resume_id} has undecodable {field}: {e}"))
        }),
    }
}

/// Fixed-width RFC 3339 so stored timestamps compare lexicographically
fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(resume_id: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            ResumeError::corruption(format!("resume {resume_id} has bad timestamp {raw:?}: {e}"))
        })
}
