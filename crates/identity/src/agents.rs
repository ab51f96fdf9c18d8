//! Persisted agent metadata.
//!
//! Agent key material is never stored. What is stored is `AgentInfo`, so UIs
//! can list agents without re-deriving keys or prompting for presence.
//! Indices are allocated monotonically and never reused, even after removal,
//! so a removed agent's address can never silently reappear.

use std::sync::Arc;

use osaurus_core::{unix_now_secs, UnixSeconds};
use osaurus_crypto::{AgentKeyDeriver, OsaurusId};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{IdentityError, IdentityResult};
use crate::storage::{from_sql, to_sql, IdentityDatabase};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub index: u32,
    pub address: OsaurusId,
    pub label: String,
    pub created_at: UnixSeconds,
}

pub struct AgentRegistry {
    db: Arc<IdentityDatabase>,
}

impl AgentRegistry {
    pub fn new(db: Arc<IdentityDatabase>) -> Self {
        Self { db }
    }

    /// Derive the next agent under `master_secret` and persist its metadata.
    pub fn create(&self, label: &str, master_secret: &[u8]) -> IdentityResult<AgentInfo> {
        let conn = self.db.lock();
        let last: Option<i64> =
            conn.query_row("SELECT MAX(idx) FROM agents", [], |row| row.get(0))?;
        let index = match last {
            None => 0,
            Some(i) => u32::try_from(i + 1).map_err(|_| {
                IdentityError::InvalidState("agent index space exhausted".to_string())
            })?,
        };

        let address = AgentKeyDeriver::derive_address(master_secret, index)?;
        let info = AgentInfo {
            index,
            address,
            label: label.to_string(),
            created_at: unix_now_secs(),
        };
        conn.execute(
            "INSERT INTO agents (idx, address, label, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                info.index,
                info.address.to_lowercase_hex(),
                info.label,
                to_sql(info.created_at)?
            ],
        )?;

        info!(index, address = %address, "Agent identity created");
        Ok(info)
    }

    /// Active agents ordered by index.
    pub fn list(&self) -> IdentityResult<Vec<AgentInfo>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT idx, address, label, created_at FROM agents WHERE removed = 0 ORDER BY idx",
        )?;
        let agents = stmt
            .query_map([], row_to_raw)?
            .map(|row| raw_to_info(row?))
            .collect::<IdentityResult<Vec<_>>>()?;
        Ok(agents)
    }

    pub fn get_by_index(&self, index: u32) -> IdentityResult<Option<AgentInfo>> {
        let conn = self.db.lock();
        let raw = conn
            .query_row(
                "SELECT idx, address, label, created_at FROM agents
                 WHERE idx = ?1 AND removed = 0",
                params![index],
                row_to_raw,
            )
            .optional()?;
        raw.map(raw_to_info).transpose()
    }

    pub fn get_by_address(&self, address: &OsaurusId) -> IdentityResult<Option<AgentInfo>> {
        let conn = self.db.lock();
        let raw = conn
            .query_row(
                "SELECT idx, address, label, created_at FROM agents
                 WHERE address = ?1 AND removed = 0",
                params![address.to_lowercase_hex()],
                row_to_raw,
            )
            .optional()?;
        raw.map(raw_to_info).transpose()
    }

    pub fn rename(&self, index: u32, label: &str) -> IdentityResult<()> {
        let conn = self.db.lock();
        let updated = conn.execute(
            "UPDATE agents SET label = ?1 WHERE idx = ?2 AND removed = 0",
            params![label, index],
        )?;
        if updated == 0 {
            return Err(IdentityError::NotFound(format!("agent {index}")));
        }
        Ok(())
    }

    /// Hide an agent. Its index stays reserved.
    pub fn remove(&self, index: u32) -> IdentityResult<()> {
        let conn = self.db.lock();
        let updated = conn.execute(
            "UPDATE agents SET removed = 1 WHERE idx = ?1 AND removed = 0",
            params![index],
        )?;
        if updated == 0 {
            return Err(IdentityError::NotFound(format!("agent {index}")));
        }
        info!(index, "Agent identity removed");
        Ok(())
    }
}

type RawAgent = (u32, String, String, i64);

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawAgent> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn raw_to_info((index, address, label, created_at): RawAgent) -> IdentityResult<AgentInfo> {
    Ok(AgentInfo {
        index,
        address: address.parse()?,
        label,
        created_at: from_sql(created_at)?,
    })
}
