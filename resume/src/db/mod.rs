//! Database layer for the checkpoint log
//!
//! This module provides:
//! - Connection pooling (r2d2-sqlite)
//! - WAL mode + busy timeout pragmas
//! - Schema migrations tracked through `PRAGMA user_version`
//! - ACID transaction helper used for all-or-nothing batches

pub mod connection;
pub mod migrations;
pub mod transactions;

pub use connection::{PoolOptions, SqlitePool, initialize_memory_pool, initialize_pool};
pub use transactions::execute_in_transaction;

/// Database module result type
pub type Result<T> = std::result::Result<T, DbError>;

/// Database error types
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Migration error: {0}")]
    Migration(String),
}
