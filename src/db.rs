use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::MarketResult;

/// The shared SQLite handle behind the price store, registry and ledger.
///
/// Calls hold the connection only for the duration of one statement or one
/// transaction, never across an `.await`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> MarketResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> MarketResult<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    pub fn init(&self) -> MarketResult<()> {
        self.conn().execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS stocks (
                ticker TEXT PRIMARY KEY,
                company TEXT NOT NULL,
                reference_ticker TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS stock_prices (
                ticker TEXT NOT NULL,
                ts INTEGER NOT NULL,
                price REAL NOT NULL CHECK (price > 0),
                PRIMARY KEY (ticker, ts)
            ) WITHOUT ROWID;
            CREATE TABLE IF NOT EXISTS players (
                id INTEGER PRIMARY KEY,
                balance REAL NOT NULL CHECK (balance >= 0)
            );
            CREATE TABLE IF NOT EXISTS holdings (
                player_id INTEGER NOT NULL REFERENCES players(id),
                ticker TEXT NOT NULL,
                shares INTEGER NOT NULL CHECK (shares > 0),
                average_price REAL NOT NULL,
                PRIMARY KEY (player_id, ticker)
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// A poisoned lock only means another caller panicked mid-statement;
    /// SQLite has already rolled that statement back, so the connection is
    /// still consistent.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
