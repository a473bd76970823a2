//! Player balances and holdings.
//!
//! Every mutation of a player's record goes through [`PlayerGuard`]: a
//! per-player async mutex that is held across the whole read-validate-write,
//! so two commands for the same player can never interleave between the
//! balance check and the write. Inside the guard the write itself is one
//! SQLite `IMMEDIATE` transaction, so the balance debit and the holding update
//! commit together.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::json;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::db::Database;
use crate::error::{MarketResult, ValidationError};
use crate::logging::{info, obj, v_num, Domain};
use crate::model::{validate_balance, Holding, Player, PlayerId};

/// One async mutex per player id, created on first use and dropped again
/// once nobody holds or waits on it.
#[derive(Default)]
pub struct PlayerLocks {
    locks: Mutex<HashMap<PlayerId, Arc<AsyncMutex<()>>>>,
}

impl PlayerLocks {
    pub async fn acquire(&self, player: PlayerId) -> PlayerGuard {
        let lock = {
            let mut map = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // clones only happen under this lock, so a count of 1 means idle
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(player).or_default().clone()
        };
        PlayerGuard {
            player,
            _guard: lock.lock_owned().await,
        }
    }

    /// Number of players with a lock entry right now.
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

/// Proof that the holder is the only writer for `player` right now.
pub struct PlayerGuard {
    player: PlayerId,
    _guard: OwnedMutexGuard<()>,
}

impl PlayerGuard {
    pub fn player(&self) -> PlayerId {
        self.player
    }
}

pub struct Ledger {
    db: Arc<Database>,
    locks: PlayerLocks,
    starting_balance: f64,
}

impl Ledger {
    pub fn new(db: Arc<Database>, starting_balance: f64) -> Self {
        Self {
            db,
            locks: PlayerLocks::default(),
            starting_balance,
        }
    }

    pub async fn lock(&self, player: PlayerId) -> PlayerGuard {
        self.locks.acquire(player).await
    }

    /// Current record, creating it with the starting balance if new.
    pub fn player(&self, id: PlayerId) -> MarketResult<Player> {
        let conn = self.db.conn();
        ensure_player(&conn, id, self.starting_balance)?;
        read_player(&conn, id)
    }

    pub fn balance(&self, id: PlayerId) -> MarketResult<f64> {
        Ok(self.player(id)?.balance)
    }

    /// Adds coins won elsewhere (rewards, other games).
    pub async fn credit(&self, id: PlayerId, amount: f64) -> MarketResult<f64> {
        check_amount(amount)?;
        let guard = self.lock(id).await;
        let balance = self.adjust(&guard, amount)?;
        info(
            Domain::Ledger,
            "credit",
            obj(&[("player", json!(id)), ("amount", v_num(amount)), ("balance", v_num(balance))]),
        );
        Ok(balance)
    }

    /// Removes coins, refusing to go below zero.
    pub async fn debit(&self, id: PlayerId, amount: f64) -> MarketResult<f64> {
        check_amount(amount)?;
        let guard = self.lock(id).await;
        let balance = self.adjust(&guard, -amount)?;
        info(
            Domain::Ledger,
            "debit",
            obj(&[("player", json!(id)), ("amount", v_num(amount)), ("balance", v_num(balance))]),
        );
        Ok(balance)
    }

    fn adjust(&self, guard: &PlayerGuard, delta: f64) -> MarketResult<f64> {
        let id = guard.player();
        let mut conn = self.db.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_player(&tx, id, self.starting_balance)?;
        let balance = read_balance(&tx, id)?;
        let next = balance + delta;
        if !next.is_finite() {
            return Err(ValidationError::InvalidAmount(delta.abs()).into());
        }
        if next < 0.0 {
            return Err(ValidationError::InsufficientBalance {
                needed: -delta,
                available: balance,
            }
            .into());
        }
        write_balance(&tx, id, next)?;
        tx.commit()?;
        Ok(next)
    }

    /// Debits `quantity * price` and folds the lot into the player's holding.
    pub(crate) fn apply_buy(
        &self,
        guard: &PlayerGuard,
        ticker: &str,
        quantity: i64,
        price: f64,
    ) -> MarketResult<(f64, Holding)> {
        let id = guard.player();
        let total = price * quantity as f64;
        let mut conn = self.db.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_player(&tx, id, self.starting_balance)?;

        let balance = read_balance(&tx, id)?;
        if balance < total {
            return Err(ValidationError::InsufficientBalance {
                needed: total,
                available: balance,
            }
            .into());
        }

        let holding = match read_holding(&tx, id, ticker)? {
            Some(h) => h.bought(quantity, price)?,
            None => Holding {
                ticker: ticker.to_string(),
                shares: quantity,
                average_price: price,
            },
        };

        let balance = balance - total;
        write_balance(&tx, id, balance)?;
        tx.execute(
            "INSERT INTO holdings (player_id, ticker, shares, average_price) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (player_id, ticker) DO UPDATE SET shares = excluded.shares, average_price = excluded.average_price",
            params![id as i64, ticker, holding.shares, holding.average_price],
        )?;
        tx.commit()?;
        Ok((balance, holding))
    }

    /// Credits `quantity * price` and takes the shares off the holding,
    /// deleting it when none remain. The cost basis is left alone.
    pub(crate) fn apply_sell(
        &self,
        guard: &PlayerGuard,
        ticker: &str,
        quantity: i64,
        price: f64,
    ) -> MarketResult<(f64, Option<Holding>)> {
        let id = guard.player();
        let mut conn = self.db.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        ensure_player(&tx, id, self.starting_balance)?;

        let held = read_holding(&tx, id, ticker)?
            .ok_or_else(|| ValidationError::NoHolding(ticker.to_string()))?;
        if held.shares < quantity {
            return Err(ValidationError::InsufficientShares {
                ticker: ticker.to_string(),
                held: held.shares,
                requested: quantity,
            }
            .into());
        }

        let balance = read_balance(&tx, id)? + price * quantity as f64;
        write_balance(&tx, id, balance)?;

        let remaining = held.shares - quantity;
        let holding = if remaining == 0 {
            tx.execute(
                "DELETE FROM holdings WHERE player_id = ?1 AND ticker = ?2",
                params![id as i64, ticker],
            )?;
            None
        } else {
            tx.execute(
                "UPDATE holdings SET shares = ?3 WHERE player_id = ?1 AND ticker = ?2",
                params![id as i64, ticker, remaining],
            )?;
            Some(Holding {
                shares: remaining,
                ..held
            })
        };
        tx.commit()?;
        Ok((balance, holding))
    }
}

fn check_amount(amount: f64) -> Result<(), ValidationError> {
    if amount.is_finite() && amount > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidAmount(amount))
    }
}

fn ensure_player(conn: &Connection, id: PlayerId, starting_balance: f64) -> MarketResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO players (id, balance) VALUES (?1, ?2)",
        params![id as i64, starting_balance.max(0.0)],
    )?;
    Ok(())
}

fn read_balance(conn: &Connection, id: PlayerId) -> MarketResult<f64> {
    let balance: f64 = conn.query_row(
        "SELECT balance FROM players WHERE id = ?1",
        params![id as i64],
        |r| r.get(0),
    )?;
    validate_balance(id, balance)
}

fn write_balance(conn: &Connection, id: PlayerId, balance: f64) -> MarketResult<()> {
    conn.execute(
        "UPDATE players SET balance = ?2 WHERE id = ?1",
        params![id as i64, balance],
    )?;
    Ok(())
}

fn read_holding(conn: &Connection, id: PlayerId, ticker: &str) -> MarketResult<Option<Holding>> {
    let row = conn
        .query_row(
            "SELECT shares, average_price FROM holdings WHERE player_id = ?1 AND ticker = ?2",
            params![id as i64, ticker],
            |r| Ok((r.get::<_, i64>(0)?, r.get::<_, f64>(1)?)),
        )
        .optional()?;
    row.map(|(shares, avg)| Holding::from_row(ticker.to_string(), shares, avg))
        .transpose()
}

fn read_player(conn: &Connection, id: PlayerId) -> MarketResult<Player> {
    let balance = read_balance(conn, id)?;
    let mut stmt = conn.prepare_cached(
        "SELECT ticker, shares, average_price FROM holdings WHERE player_id = ?1 ORDER BY ticker",
    )?;
    let rows = stmt.query_map(params![id as i64], |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?, r.get::<_, f64>(2)?))
    })?;
    let mut holdings = Vec::new();
    for row in rows {
        let (ticker, shares, avg) = row?;
        holdings.push(Holding::from_row(ticker, shares, avg)?);
    }
    Ok(Player {
        id,
        balance,
        holdings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarketError;

    fn ledger(starting: f64) -> Ledger {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        Ledger::new(Arc::new(db), starting)
    }

    #[test]
    fn new_players_get_starting_balance() {
        let l = ledger(10.0);
        let p = l.player(42).unwrap();
        assert_eq!(p.balance, 10.0);
        assert!(p.holdings.is_empty());
    }

    #[tokio::test]
    async fn credit_and_debit() {
        let l = ledger(10.0);
        assert_eq!(l.credit(1, 5.0).await.unwrap(), 15.0);
        assert_eq!(l.debit(1, 15.0).await.unwrap(), 0.0);
        let err = l.debit(1, 1.0).await.unwrap_err();
        assert!(matches!(
            err,
            MarketError::Validation(ValidationError::InsufficientBalance { .. })
        ));
        assert_eq!(l.balance(1).unwrap(), 0.0);
        assert!(l.credit(1, -3.0).await.is_err());
        assert!(l.credit(1, f64::NAN).await.is_err());
    }

    #[tokio::test]
    async fn buy_then_sell_round_trip() {
        let l = ledger(100.0);
        let guard = l.lock(7).await;
        let (bal, h) = l.apply_buy(&guard, "ACME", 4, 10.0).unwrap();
        assert_eq!(bal, 60.0);
        assert_eq!(h.shares, 4);

        let (bal, h) = l.apply_sell(&guard, "ACME", 1, 12.0).unwrap();
        assert_eq!(bal, 72.0);
        assert_eq!(h.unwrap().average_price, 10.0);

        let (_, h) = l.apply_sell(&guard, "ACME", 3, 12.0).unwrap();
        assert!(h.is_none());
        drop(guard);
        assert!(l.player(7).unwrap().holdings.is_empty());
    }

    #[tokio::test]
    async fn locks_are_per_player() {
        let locks = PlayerLocks::default();
        let a = locks.acquire(1).await;
        // a different player is not blocked
        let b = tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire(2)).await;
        assert!(b.is_ok());
        // the same player is
        let again = tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire(1)).await;
        assert!(again.is_err());
        drop(a);
        assert!(locks.acquire(1).await.player() == 1);
    }

    #[tokio::test]
    async fn idle_locks_are_pruned() {
        let locks = PlayerLocks::default();
        for id in 0..100 {
            drop(locks.acquire(id).await);
        }
        let held = locks.acquire(500).await;
        assert_eq!(locks.tracked(), 1);

        // an entry in use survives pruning
        drop(locks.acquire(501).await);
        assert_eq!(locks.tracked(), 2);
        let _other = locks.acquire(502).await;
        assert_eq!(locks.tracked(), 2);
        drop(held);
    }
}
