//! SQLite persistence shared by the identity stores.
//!
//! One connection, opened in WAL mode, guarded by a mutex. Each store owns its
//! own tables but shares the handle so a single file holds all durable state:
//!
//! - `device_state`: device id and hardware key handle
//! - `counters`: per-device anti-replay counters
//! - `whitelist_master`, `whitelist_agent`: issuer whitelists
//! - `revoked_keys`, `counter_thresholds`: revocation state
//! - `agents`: persisted `AgentInfo`
//! - `access_keys`: persisted `AccessKeyInfo`
//!
//! Addresses are stored as lowercase hex. Counters, thresholds and
//! timestamps are unsigned in memory and signed `INTEGER` on disk, so every
//! value crossing the boundary goes through [`to_sql`] / [`from_sql`].

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OpenFlags};
use tracing::info;

use crate::error::{IdentityError, IdentityResult};

/// Largest unsigned value a signed SQLite `INTEGER` column can hold.
pub const MAX_STORED: u64 = i64::MAX as u64;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS device_state (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS counters (
    device_id TEXT PRIMARY KEY,
    value     INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS whitelist_master (
    address TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS whitelist_agent (
    agent   TEXT NOT NULL,
    address TEXT NOT NULL,
    PRIMARY KEY (agent, address)
);

CREATE TABLE IF NOT EXISTS revoked_keys (
    address TEXT NOT NULL,
    nonce   TEXT NOT NULL,
    PRIMARY KEY (address, nonce)
);

CREATE TABLE IF NOT EXISTS counter_thresholds (
    address   TEXT PRIMARY KEY,
    threshold INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS agents (
    idx        INTEGER PRIMARY KEY,
    address    TEXT NOT NULL UNIQUE,
    label      TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    removed    INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS access_keys (
    id                TEXT PRIMARY KEY,
    label             TEXT,
    prefix            TEXT NOT NULL,
    nonce             TEXT NOT NULL,
    cnt               INTEGER NOT NULL,
    iss               TEXT NOT NULL,
    aud               TEXT NOT NULL,
    created_at        INTEGER NOT NULL,
    expiration_policy TEXT NOT NULL,
    expires_at        INTEGER,
    revoked           INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_access_keys_iss ON access_keys(iss);
"#;

/// Shared SQLite handle for all identity state.
pub struct IdentityDatabase {
    conn: Mutex<Connection>,
}

impl IdentityDatabase {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> IdentityResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Opening identity database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    /// In-memory database, used by tests and ephemeral sessions.
    pub fn open_in_memory() -> IdentityResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> IdentityResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection. A poisoned lock is recovered: SQLite keeps its own
    /// transactional consistency.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Remove all identity-derived rows; used by a full identity reset.
    ///
    /// Device state and counters are kept: they belong to the device, and a
    /// counter must never restart for a live device id.
    pub(crate) fn wipe_identity_state(&self) -> IdentityResult<()> {
        let conn = self.lock();
        conn.execute_batch(
            r#"
            DELETE FROM whitelist_master;
            DELETE FROM whitelist_agent;
            DELETE FROM revoked_keys;
            DELETE FROM counter_thresholds;
            DELETE FROM agents;
            DELETE FROM access_keys;
            "#,
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for IdentityDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityDatabase").finish_non_exhaustive()
    }
}

/// Read a single `device_state` value.
pub(crate) fn read_state(conn: &Connection, key: &str) -> IdentityResult<Option<String>> {
    use rusqlite::OptionalExtension;
    let value = conn
        .query_row(
            "SELECT value FROM device_state WHERE key = ?1",
            [key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub(crate) fn write_state(conn: &Connection, key: &str, value: &str) -> IdentityResult<()> {
    conn.execute(
        "INSERT INTO device_state (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    )?;
    Ok(())
}

/// Bind an unsigned value, refusing anything above [`MAX_STORED`].
pub(crate) fn to_sql(value: u64) -> IdentityResult<i64> {
    i64::try_from(value).map_err(|_| {
        IdentityError::InvalidState(format!("{value} exceeds the storable maximum {MAX_STORED}"))
    })
}

/// Bind an inclusive upper bound, saturating at [`MAX_STORED`].
pub(crate) fn to_sql_saturating(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Read back an unsigned value; a negative row is corrupt.
pub(crate) fn from_sql(value: i64) -> IdentityResult<u64> {
    u64::try_from(value)
        .map_err(|_| IdentityError::InvalidState(format!("negative stored value {value}")))
}

pub(crate) fn delete_state(conn: &Connection, key: &str) -> IdentityResult<bool> {
    let deleted = conn.execute("DELETE FROM device_state WHERE key = ?1", [key])?;
    Ok(deleted > 0)
}
