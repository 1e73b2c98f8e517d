//! Schema versioning and migrations
//!
//! Forward-only. The applied version lives in `PRAGMA user_version`, and every
//! migration is idempotent (`IF NOT EXISTS`) so re-running one is harmless.

use rusqlite::Connection;

use super::{DbError, Result};

/// Embedded schema for the checkpoint table
const SCHEMA_V1_SQL: &str = include_str!("../../RESUME_SCHEMA.sql");

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Apply all migrations to bring the database to [`SCHEMA_VERSION`]
pub fn migrate_to_latest(conn: &mut Connection) -> Result<()> {
    let current = get_schema_version(conn)?;

    if current > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database schema version {current} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    if current < 1 {
        migration_v1(conn)?;
        set_schema_version(conn, 1)?;
        tracing::info!(version = 1, "Applied resume schema migration");
    }

    Ok(())
}

/// Get current schema version
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Migration V1: checkpoint table and its lookup indexes
fn migration_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(SCHEMA_V1_SQL)?;
    tx.commit()?;
    Ok(())
}
