//! Connection pooling and pragma configuration

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use super::{DbError, Result};

/// Pool of SQLite connections shared by every store handle.
pub type SqlitePool = Pool<SqliteConnectionManager>;

/// Knobs applied when building a pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolOptions {
    pub max_size: u32,
    pub busy_timeout: Duration,
    /// Write-ahead logging; readers stop blocking the writer.
    pub wal: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 4,
            busy_timeout: Duration::from_millis(5_000),
            wal: true,
        }
    }
}

/// Initialize a connection pool for a database file
///
/// Creates the parent directory if needed. Every pooled connection gets the
/// same pragmas, and the first checkout verifies them so a broken file fails
/// at open time rather than on the first write.
pub fn initialize_pool(db_path: &Path, options: PoolOptions) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path)
        .with_init(move |conn| apply_pragmas(conn, options));
    let pool = Pool::builder().max_size(options.max_size).build(manager)?;

    verify_pragmas(&*pool.get()?, options)?;

    tracing::debug!(
        path = %db_path.display(),
        max_size = options.max_size,
        wal = options.wal,
        "SQLite pool initialized"
    );

    Ok(pool)
}

/// Initialize a single-connection pool over a private in-memory database
///
/// Each in-memory connection is its own database, so the pool is capped at
/// one connection.
pub fn initialize_memory_pool() -> Result<SqlitePool> {
    let options = PoolOptions {
        max_size: 1,
        wal: false,
        ..PoolOptions::default()
    };
    let manager =
        SqliteConnectionManager::memory().with_init(move |conn| apply_pragmas(conn, options));
    Ok(Pool::builder().max_size(1).build(manager)?)
}

/// Apply pragmas to a freshly opened connection
fn apply_pragmas(conn: &mut Connection, options: PoolOptions) -> rusqlite::Result<()> {
    conn.busy_timeout(options.busy_timeout)?;
    if options.wal {
        // journal_mode reports the resulting mode as a row
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Verify critical pragmas are applied
fn verify_pragmas(conn: &Connection, options: PoolOptions) -> Result<()> {
    if !options.wal {
        return Ok(());
    }
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        return Err(DbError::Migration(format!(
            "expected WAL journal mode, database reports {mode}"
        )));
    }
    Ok(())
}
