//! Access-key revocation state.
//!
//! Two mechanisms:
//!
//! - individual: `"address:nonce"` entries, one per revoked key
//! - bulk: a per-address counter threshold; every key from that address with
//!   `cnt <= threshold` is revoked without knowing its nonce
//!
//! A threshold at or above the storable maximum means "every key from this
//! address" and reads back as `u64::MAX`.
//!
//! The store persists both and publishes an immutable [`RevocationSnapshot`]
//! that is rebuilt after every mutation. Validators hold a snapshot; nothing
//! mutates through it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use osaurus_crypto::OsaurusId;
use rusqlite::params;
use tracing::{debug, info};

use crate::error::IdentityResult;
use crate::storage::{from_sql, to_sql_saturating, IdentityDatabase};

/// Immutable revocation state consulted by access-key validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevocationSnapshot {
    revoked_keys: HashSet<String>,
    counter_thresholds: HashMap<OsaurusId, u64>,
}

impl RevocationSnapshot {
    /// Set key for an individually revoked access key.
    pub fn revoked_key_id(address: &OsaurusId, nonce: &str) -> String {
        format!("{}:{}", address.to_lowercase_hex(), nonce.to_ascii_lowercase())
    }

    pub fn is_key_revoked(&self, address: &OsaurusId, nonce: &str) -> bool {
        self.revoked_keys
            .contains(&Self::revoked_key_id(address, nonce))
    }

    pub fn threshold(&self, address: &OsaurusId) -> Option<u64> {
        self.counter_thresholds.get(address).copied()
    }

    /// `true` if the key is individually revoked or under its issuer's threshold.
    pub fn is_revoked(&self, issuer: &OsaurusId, nonce: &str, cnt: u64) -> bool {
        self.is_key_revoked(issuer, nonce)
            || self.threshold(issuer).is_some_and(|threshold| cnt <= threshold)
    }

    pub fn revoked_key_count(&self) -> usize {
        self.revoked_keys.len()
    }
}

pub struct RevocationStore {
    db: Arc<IdentityDatabase>,
    snapshot: RwLock<Arc<RevocationSnapshot>>,
}

impl RevocationStore {
    /// Load persisted revocation state.
    pub fn open(db: Arc<IdentityDatabase>) -> IdentityResult<Self> {
        let snapshot = Self::load(&db)?;
        Ok(Self {
            db,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    /// The current snapshot. Cheap: clones an `Arc`.
    pub fn snapshot(&self) -> Arc<RevocationSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Revoke one key by nonce. Returns false if it was already revoked.
    pub fn revoke_individual(&self, address: &OsaurusId, nonce: &str) -> IdentityResult<bool> {
        let inserted = {
            let conn = self.db.lock();
            conn.execute(
                "INSERT OR IGNORE INTO revoked_keys (address, nonce) VALUES (?1, ?2)",
                params![address.to_lowercase_hex(), nonce.to_ascii_lowercase()],
            )?
        };
        if inserted > 0 {
            info!(address = %address, nonce, "Access key revoked");
            self.reload()?;
        }
        Ok(inserted > 0)
    }

    /// Revoke every key from `address` with `cnt <= threshold`.
    ///
    /// Thresholds only rise; a lower value leaves the stored one in place.
    /// Returns the threshold in effect afterwards.
    pub fn revoke_bulk(&self, address: &OsaurusId, threshold: u64) -> IdentityResult<u64> {
        let effective: i64 = {
            let conn = self.db.lock();
            conn.execute(
                "INSERT INTO counter_thresholds (address, threshold) VALUES (?1, ?2)
                 ON CONFLICT(address) DO UPDATE
                 SET threshold = MAX(threshold, excluded.threshold)",
                params![address.to_lowercase_hex(), to_sql_saturating(threshold)],
            )?;
            conn.query_row(
                "SELECT threshold FROM counter_thresholds WHERE address = ?1",
                params![address.to_lowercase_hex()],
                |row| row.get(0),
            )?
        };
        let effective = threshold_from_sql(effective)?;
        info!(address = %address, threshold = effective, "Bulk revocation threshold set");
        self.reload()?;
        Ok(effective)
    }

    /// Re-read persisted state and publish a new snapshot.
    pub fn reload(&self) -> IdentityResult<Arc<RevocationSnapshot>> {
        // Held across the load so the last publisher always read the latest rows.
        let mut current = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        let snapshot = Arc::new(Self::load(&self.db)?);
        debug!(
            revoked_keys = snapshot.revoked_keys.len(),
            thresholds = snapshot.counter_thresholds.len(),
            "Revocation snapshot rebuilt"
        );
        *current = snapshot.clone();
        Ok(snapshot)
    }

    fn load(db: &IdentityDatabase) -> IdentityResult<RevocationSnapshot> {
        let conn = db.lock();

        let mut stmt = conn.prepare("SELECT address, nonce FROM revoked_keys")?;
        let revoked_keys = stmt
            .query_map([], |row| {
                Ok(format!(
                    "{}:{}",
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?
                ))
            })?
            .collect::<rusqlite::Result<HashSet<_>>>()?;

        let mut stmt = conn.prepare("SELECT address, threshold FROM counter_thresholds")?;
        let counter_thresholds = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .map(|row| {
                let (address, threshold) = row?;
                Ok((address.parse::<OsaurusId>()?, threshold_from_sql(threshold)?))
            })
            .collect::<IdentityResult<HashMap<_, _>>>()?;

        Ok(RevocationSnapshot {
            revoked_keys,
            counter_thresholds,
        })
    }
}

fn threshold_from_sql(value: i64) -> IdentityResult<u64> {
    if value == i64::MAX {
        Ok(u64::MAX)
    } else {
        from_sql(value)
    }
}
