//! ACID transaction helpers

use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Execute operation within an ACID transaction
///
/// Commits when `operation` returns `Ok`; on `Err` the transaction is dropped,
/// which rolls it back. The error type is the caller's, so validation failures
/// raised mid-transaction abort the write exactly like SQLite errors do.
pub fn execute_in_transaction<F, T, E>(
    conn: &mut Connection,
    behavior: TransactionBehavior,
    operation: F,
) -> std::result::Result<T, E>
where
    F: FnOnce(&Transaction) -> std::result::Result<T, E>,
    E: From<rusqlite::Error>,
{
    let tx = conn.transaction_with_behavior(behavior)?;
    let result = operation(&tx)?;
    tx.commit()?;
    Ok(result)
}
