//! Issuer whitelists.
//!
//! Two tiers: a master-level set that applies to every agent, and per-agent
//! overrides. The effective whitelist handed to a validator is
//! `master ∪ agent[agent] ∪ {agent, master}`, so an entity always trusts keys
//! it issued itself even when both backing sets are empty.

use std::collections::HashSet;
use std::sync::Arc;

use osaurus_crypto::OsaurusId;
use rusqlite::params;
use tracing::info;

use crate::error::IdentityResult;
use crate::storage::IdentityDatabase;

/// Immutable set of addresses allowed to issue access keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WhitelistSnapshot {
    addresses: HashSet<OsaurusId>,
}

impl WhitelistSnapshot {
    pub fn contains(&self, address: &OsaurusId) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OsaurusId> {
        self.addresses.iter()
    }
}

impl FromIterator<OsaurusId> for WhitelistSnapshot {
    fn from_iter<I: IntoIterator<Item = OsaurusId>>(iter: I) -> Self {
        Self {
            addresses: iter.into_iter().collect(),
        }
    }
}

pub struct WhitelistStore {
    db: Arc<IdentityDatabase>,
}

impl WhitelistStore {
    pub fn new(db: Arc<IdentityDatabase>) -> Self {
        Self { db }
    }

    /// Returns false if the address was already present.
    pub fn add_master(&self, address: &OsaurusId) -> IdentityResult<bool> {
        let conn = self.db.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO whitelist_master (address) VALUES (?1)",
            params![address.to_lowercase_hex()],
        )?;
        if inserted > 0 {
            info!(address = %address, "Master whitelist entry added");
        }
        Ok(inserted > 0)
    }

    pub fn remove_master(&self, address: &OsaurusId) -> IdentityResult<bool> {
        let conn = self.db.lock();
        let removed = conn.execute(
            "DELETE FROM whitelist_master WHERE address = ?1",
            params![address.to_lowercase_hex()],
        )?;
        if removed > 0 {
            info!(address = %address, "Master whitelist entry removed");
        }
        Ok(removed > 0)
    }

    pub fn add_for_agent(&self, agent: &OsaurusId, address: &OsaurusId) -> IdentityResult<bool> {
        let conn = self.db.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO whitelist_agent (agent, address) VALUES (?1, ?2)",
            params![agent.to_lowercase_hex(), address.to_lowercase_hex()],
        )?;
        if inserted > 0 {
            info!(agent = %agent, address = %address, "Agent whitelist entry added");
        }
        Ok(inserted > 0)
    }

    pub fn remove_for_agent(
        &self,
        agent: &OsaurusId,
        address: &OsaurusId,
    ) -> IdentityResult<bool> {
        let conn = self.db.lock();
        let removed = conn.execute(
            "DELETE FROM whitelist_agent WHERE agent = ?1 AND address = ?2",
            params![agent.to_lowercase_hex(), address.to_lowercase_hex()],
        )?;
        Ok(removed > 0)
    }

    pub fn master_entries(&self) -> IdentityResult<Vec<OsaurusId>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare("SELECT address FROM whitelist_master ORDER BY address")?;
        let addresses = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .map(|row| Ok(row?.parse()?))
            .collect::<IdentityResult<Vec<OsaurusId>>>()?;
        Ok(addresses)
    }

    pub fn agent_entries(&self, agent: &OsaurusId) -> IdentityResult<Vec<OsaurusId>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(
            "SELECT address FROM whitelist_agent WHERE agent = ?1 ORDER BY address",
        )?;
        let addresses = stmt
            .query_map(params![agent.to_lowercase_hex()], |row| {
                row.get::<_, String>(0)
            })?
            .map(|row| Ok(row?.parse()?))
            .collect::<IdentityResult<Vec<OsaurusId>>>()?;
        Ok(addresses)
    }

    /// `master ∪ agent[agent] ∪ {agent, master}`.
    pub fn effective_whitelist(
        &self,
        agent: &OsaurusId,
        master: &OsaurusId,
    ) -> IdentityResult<WhitelistSnapshot> {
        let mut addresses: HashSet<OsaurusId> = self.master_entries()?.into_iter().collect();
        addresses.extend(self.agent_entries(agent)?);
        addresses.insert(*agent);
        addresses.insert(*master);
        Ok(WhitelistSnapshot { addresses })
    }
}
