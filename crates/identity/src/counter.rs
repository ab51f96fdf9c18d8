//! Monotonic per-device counters used as anti-replay nonces.
//!
//! `next()` is an atomic increment-and-persist: the SQLite implementation
//! performs the update and read inside one immediate transaction under the
//! connection lock, so concurrent signers always observe distinct values.
//! Moving a counter backwards is rejected with `CounterRegression`; moving it
//! past [`MAX_COUNTER`] is rejected with `CounterOverflow`. Neither store ever
//! wraps.

use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{error, trace};

use crate::error::{IdentityError, IdentityResult};
use crate::storage::{from_sql, to_sql, IdentityDatabase, MAX_STORED};

/// Highest value a counter can reach. Bounded by the signed database column.
pub const MAX_COUNTER: u64 = MAX_STORED;

const IN_MEMORY_DEVICE: &str = "in-memory";

pub trait CounterStore: Send + Sync {
    /// Atomically increment and return the new value (first call returns 1).
    fn next(&self) -> IdentityResult<u64>;

    /// Last value handed out, 0 if none.
    fn current(&self) -> IdentityResult<u64>;

    /// Restore a counter from a backup; only forward moves are accepted.
    fn advance_to(&self, value: u64) -> IdentityResult<()>;
}

/// Counter persisted in the identity database, keyed by device id.
pub struct SqliteCounterStore {
    db: Arc<IdentityDatabase>,
    device_id: String,
}

impl SqliteCounterStore {
    pub fn new(db: Arc<IdentityDatabase>, device_id: impl Into<String>) -> Self {
        Self {
            db,
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl SqliteCounterStore {
    fn stored(conn: &Connection, device_id: &str) -> IdentityResult<u64> {
        let value: Option<i64> = conn
            .query_row(
                "SELECT value FROM counters WHERE device_id = ?1",
                params![device_id],
                |row| row.get(0),
            )
            .optional()?;
        value.map_or(Ok(0), from_sql)
    }

    fn store(conn: &Connection, device_id: &str, value: u64) -> IdentityResult<()> {
        conn.execute(
            "INSERT INTO counters (device_id, value) VALUES (?1, ?2)
             ON CONFLICT(device_id) DO UPDATE SET value = excluded.value",
            params![device_id, to_sql(value)?],
        )?;
        Ok(())
    }
}

impl CounterStore for SqliteCounterStore {
    fn next(&self) -> IdentityResult<u64> {
        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stored = Self::stored(&tx, &self.device_id)?;
        let value = checked_successor(&self.device_id, stored)?;
        Self::store(&tx, &self.device_id, value)?;
        tx.commit()?;

        trace!(device_id = %self.device_id, value, "Counter advanced");
        Ok(value)
    }

    fn current(&self) -> IdentityResult<u64> {
        let conn = self.db.lock();
        Self::stored(&conn, &self.device_id)
    }

    fn advance_to(&self, value: u64) -> IdentityResult<()> {
        let mut conn = self.db.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stored = Self::stored(&tx, &self.device_id)?;
        check_advance(&self.device_id, stored, value)?;
        Self::store(&tx, &self.device_id, value)?;
        tx.commit()?;
        Ok(())
    }
}

fn checked_successor(device_id: &str, stored: u64) -> IdentityResult<u64> {
    match stored.checked_add(1) {
        Some(value) if value <= MAX_COUNTER => Ok(value),
        _ => {
            error!(device_id, stored, "Counter exhausted");
            Err(IdentityError::CounterOverflow {
                device_id: device_id.to_string(),
                attempted: stored.saturating_add(1),
                max: MAX_COUNTER,
            })
        }
    }
}

fn check_advance(device_id: &str, stored: u64, value: u64) -> IdentityResult<()> {
    if value < stored {
        error!(
            device_id,
            stored,
            attempted = value,
            "Refusing to move counter backwards"
        );
        return Err(IdentityError::CounterRegression {
            device_id: device_id.to_string(),
            stored,
            attempted: value,
        });
    }
    if value > MAX_COUNTER {
        error!(device_id, attempted = value, "Refusing counter past the storable maximum");
        return Err(IdentityError::CounterOverflow {
            device_id: device_id.to_string(),
            attempted: value,
            max: MAX_COUNTER,
        });
    }
    Ok(())
}

/// Process-local counter for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    value: Mutex<u64>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from `value` instead of zero.
    pub fn starting_at(value: u64) -> Self {
        Self {
            value: Mutex::new(value),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, u64> {
        self.value.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CounterStore for InMemoryCounterStore {
    fn next(&self) -> IdentityResult<u64> {
        let mut value = self.lock();
        *value = checked_successor(IN_MEMORY_DEVICE, *value)?;
        Ok(*value)
    }

    fn current(&self) -> IdentityResult<u64> {
        Ok(*self.lock())
    }

    fn advance_to(&self, target: u64) -> IdentityResult<()> {
        let mut value = self.lock();
        check_advance(IN_MEMORY_DEVICE, *value, target)?;
        *value = target;
        Ok(())
    }
}
