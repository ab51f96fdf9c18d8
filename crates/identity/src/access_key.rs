//! Portable `osk-v1` access keys.
//!
//! Wire format: `osk-v1.<base64url(payload-json)>.<hex(65-byte signature)>`.
//! The payload is canonical JSON with alphabetically ordered keys, signed under
//! the `"Osaurus Signed Access"` domain so it can never be confused with a
//! request token signature.
//!
//! Only [`AccessKeyInfo`] is persisted. The full key string is handed out once
//! at issuance and never stored.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use osaurus_core::{unix_now_secs, UnixSeconds};
use osaurus_crypto::{Keypair, OsaurusId, SecureRandom, ACCESS_KEY_DOMAIN};
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::counter::CounterStore;
use crate::error::{IdentityError, IdentityResult};
use crate::storage::{from_sql, to_sql, to_sql_saturating, IdentityDatabase};

/// Version tag, first segment of every access key.
pub const ACCESS_KEY_VERSION: &str = "osk-v1";

/// Random bytes in an access-key nonce.
pub const NONCE_BYTES: usize = 16;

/// Trailing characters of the key kept for display.
const DISPLAY_SUFFIX_LEN: usize = 8;

const SECONDS_PER_DAY: u64 = 86_400;

/// Signed claims of an access key.
///
/// Field order is alphabetical; serde emits fields in declaration order, which
/// makes the encoding canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKeyPayload {
    pub aud: OsaurusId,
    pub cnt: u64,
    /// `None` (serialized as `null`) never expires.
    pub exp: Option<UnixSeconds>,
    pub iat: UnixSeconds,
    pub iss: OsaurusId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lbl: Option<String>,
    pub nonce: String,
}

impl AccessKeyPayload {
    pub fn to_canonical_json(&self) -> IdentityResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Sign and serialize to the `osk-v1` wire format.
    pub fn sign(&self, signer: &Keypair) -> IdentityResult<String> {
        let payload = self.to_canonical_json()?;
        let signature = signer.sign_in_domain(ACCESS_KEY_DOMAIN, &payload)?;
        Ok(format!(
            "{ACCESS_KEY_VERSION}.{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            signature.to_hex()
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpirationPolicy {
    #[serde(rename = "30d")]
    ThirtyDays,
    #[serde(rename = "90d")]
    NinetyDays,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "never")]
    Never,
}

impl ExpirationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThirtyDays => "30d",
            Self::NinetyDays => "90d",
            Self::OneYear => "1y",
            Self::Never => "never",
        }
    }

    pub fn lifetime_secs(&self) -> Option<u64> {
        match self {
            Self::ThirtyDays => Some(30 * SECONDS_PER_DAY),
            Self::NinetyDays => Some(90 * SECONDS_PER_DAY),
            Self::OneYear => Some(365 * SECONDS_PER_DAY),
            Self::Never => None,
        }
    }

    /// Expiry for a key issued at `issued_at`.
    pub fn expires_at(&self, issued_at: UnixSeconds) -> Option<UnixSeconds> {
        self.lifetime_secs()
            .map(|lifetime| issued_at.saturating_add(lifetime))
    }
}

impl fmt::Display for ExpirationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpirationPolicy {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "30d" => Ok(Self::ThirtyDays),
            "90d" => Ok(Self::NinetyDays),
            "1y" => Ok(Self::OneYear),
            "never" => Ok(Self::Never),
            other => Err(IdentityError::InvalidState(format!(
                "unknown expiration policy '{other}'"
            ))),
        }
    }
}

/// Persisted metadata of an issued key. Never holds the signature or key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessKeyInfo {
    pub id: Uuid,
    pub label: Option<String>,
    /// Short display form, e.g. `osk-v1…9f3a1c2d`.
    pub prefix: String,
    pub nonce: String,
    pub cnt: u64,
    pub iss: OsaurusId,
    pub aud: OsaurusId,
    pub created_at: UnixSeconds,
    pub expiration: ExpirationPolicy,
    pub expires_at: Option<UnixSeconds>,
    pub revoked: bool,
}

impl AccessKeyInfo {
    pub fn is_expired_at(&self, now: UnixSeconds) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(unix_now_secs())
    }

    pub fn is_active(&self) -> bool {
        !self.revoked && !self.is_expired()
    }
}

/// Display form of a full key: version tag plus its last characters.
pub fn display_prefix(full_key: &str) -> String {
    let tail_start = full_key.len().saturating_sub(DISPLAY_SUFFIX_LEN);
    format!(
        "{ACCESS_KEY_VERSION}…{}",
        full_key.get(tail_start..).unwrap_or_default()
    )
}

/// Builds and signs access keys.
pub struct AccessKeyIssuer {
    counter: Arc<dyn CounterStore>,
    rng: Arc<dyn SecureRandom>,
}

impl AccessKeyIssuer {
    pub fn new(counter: Arc<dyn CounterStore>, rng: Arc<dyn SecureRandom>) -> Self {
        Self { counter, rng }
    }

    /// Issue a key signed by `signer` for `audience`.
    ///
    /// The full key is returned once, in a buffer zeroed on drop.
    pub fn issue(
        &self,
        signer: &Keypair,
        audience: &OsaurusId,
        label: Option<&str>,
        policy: ExpirationPolicy,
    ) -> IdentityResult<(AccessKeyInfo, Zeroizing<String>)> {
        let iat = unix_now_secs();
        let payload = AccessKeyPayload {
            aud: *audience,
            cnt: self.counter.next()?,
            exp: policy.expires_at(iat),
            iat,
            iss: signer.address(),
            lbl: label.map(str::to_string),
            nonce: hex::encode(self.rng.bytes(NONCE_BYTES)?),
        };
        let full_key = Zeroizing::new(payload.sign(signer)?);

        let info = AccessKeyInfo {
            id: Uuid::new_v4(),
            label: payload.lbl.clone(),
            prefix: display_prefix(&full_key),
            nonce: payload.nonce.clone(),
            cnt: payload.cnt,
            iss: payload.iss,
            aud: payload.aud,
            created_at: iat,
            expiration: policy,
            expires_at: payload.exp,
            revoked: false,
        };

        info!(
            id = %info.id,
            iss = %info.iss,
            aud = %info.aud,
            cnt = info.cnt,
            expiration = %policy,
            "Access key issued"
        );
        Ok((info, full_key))
    }
}

/// Persisted `AccessKeyInfo` records.
pub struct AccessKeyRegistry {
    db: Arc<IdentityDatabase>,
}

const SELECT_COLUMNS: &str = "SELECT id, label, prefix, nonce, cnt, iss, aud, created_at,
    expiration_policy, expires_at, revoked FROM access_keys";

impl AccessKeyRegistry {
    pub fn new(db: Arc<IdentityDatabase>) -> Self {
        Self { db }
    }

    pub fn insert(&self, info: &AccessKeyInfo) -> IdentityResult<()> {
        let conn = self.db.lock();
        conn.execute(
            "INSERT INTO access_keys (id, label, prefix, nonce, cnt, iss, aud, created_at,
                 expiration_policy, expires_at, revoked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                info.id.to_string(),
                info.label,
                info.prefix,
                info.nonce,
                to_sql(info.cnt)?,
                info.iss.to_lowercase_hex(),
                info.aud.to_lowercase_hex(),
                to_sql(info.created_at)?,
                info.expiration.as_str(),
                info.expires_at.map(to_sql).transpose()?,
                info.revoked,
            ],
        )?;
        Ok(())
    }

    /// All keys, newest first.
    pub fn list(&self) -> IdentityResult<Vec<AccessKeyInfo>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} ORDER BY created_at DESC, cnt DESC"
        ))?;
        let keys = stmt
            .query_map([], row_to_raw)?
            .map(|row| raw_to_info(row?))
            .collect::<IdentityResult<Vec<_>>>()?;
        Ok(keys)
    }

    pub fn list_for_issuer(&self, issuer: &OsaurusId) -> IdentityResult<Vec<AccessKeyInfo>> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_COLUMNS} WHERE iss = ?1 ORDER BY created_at DESC, cnt DESC"
        ))?;
        let keys = stmt
            .query_map(params![issuer.to_lowercase_hex()], row_to_raw)?
            .map(|row| raw_to_info(row?))
            .collect::<IdentityResult<Vec<_>>>()?;
        Ok(keys)
    }

    pub fn get(&self, id: &Uuid) -> IdentityResult<Option<AccessKeyInfo>> {
        let conn = self.db.lock();
        let raw = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.to_string()],
                row_to_raw,
            )
            .optional()?;
        raw.map(raw_to_info).transpose()
    }

    /// Returns false if the key was unknown or already revoked.
    pub fn mark_revoked(&self, id: &Uuid) -> IdentityResult<bool> {
        let conn = self.db.lock();
        let updated = conn.execute(
            "UPDATE access_keys SET revoked = 1 WHERE id = ?1 AND revoked = 0",
            params![id.to_string()],
        )?;
        Ok(updated > 0)
    }

    /// Mark every key from `issuer` with `cnt <= threshold` revoked.
    pub fn mark_revoked_through(&self, issuer: &OsaurusId, threshold: u64) -> IdentityResult<usize> {
        let conn = self.db.lock();
        let updated = conn.execute(
            "UPDATE access_keys SET revoked = 1
             WHERE iss = ?1 AND cnt <= ?2 AND revoked = 0",
            params![issuer.to_lowercase_hex(), to_sql_saturating(threshold)],
        )?;
        Ok(updated)
    }

    pub fn mark_all_revoked(&self, issuer: &OsaurusId) -> IdentityResult<usize> {
        self.mark_revoked_through(issuer, u64::MAX)
    }

    pub fn delete(&self, id: &Uuid) -> IdentityResult<bool> {
        let conn = self.db.lock();
        let deleted = conn.execute(
            "DELETE FROM access_keys WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(deleted > 0)
    }
}

struct RawKey {
    id: String,
    label: Option<String>,
    prefix: String,
    nonce: String,
    cnt: i64,
    iss: String,
    aud: String,
    created_at: i64,
    expiration: String,
    expires_at: Option<i64>,
    revoked: bool,
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawKey> {
    Ok(RawKey {
        id: row.get(0)?,
        label: row.get(1)?,
        prefix: row.get(2)?,
        nonce: row.get(3)?,
        cnt: row.get(4)?,
        iss: row.get(5)?,
        aud: row.get(6)?,
        created_at: row.get(7)?,
        expiration: row.get(8)?,
        expires_at: row.get(9)?,
        revoked: row.get(10)?,
    })
}

fn raw_to_info(raw: RawKey) -> IdentityResult<AccessKeyInfo> {
    Ok(AccessKeyInfo {
        id: Uuid::parse_str(&raw.id)
            .map_err(|e| IdentityError::InvalidState(format!("corrupt access key id: {e}")))?,
        label: raw.label,
        prefix: raw.prefix,
        nonce: raw.nonce,
        cnt: from_sql(raw.cnt)?,
        iss: raw.iss.parse()?,
        aud: raw.aud.parse()?,
        created_at: from_sql(raw.created_at)?,
        expiration: raw.expiration.parse()?,
        expires_at: raw.expires_at.map(from_sql).transpose()?,
        revoked: raw.revoked,
    })
}
