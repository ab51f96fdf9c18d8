//! Secure key storage seam.
//!
//! Platform keychains (Secure Enclave-backed keychain items, Android
//! Keystore, TPM-sealed blobs) implement [`SecureKeyStore`] outside this crate.
//! [`InMemoryKeyStore`] is the software implementation used for headless
//! sessions and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use zeroize::Zeroizing;

use crate::error::{IdentityError, IdentityResult};
use crate::presence::PresenceProof;

/// Durable, optionally presence-gated storage for secret bytes.
pub trait SecureKeyStore: Send + Sync {
    /// Existence check. Must never trigger a presence prompt.
    fn contains(&self, label: &str) -> IdentityResult<bool>;

    /// Read an item. Items written with `presence_required` need a proof.
    fn read(
        &self,
        label: &str,
        proof: Option<&PresenceProof>,
    ) -> IdentityResult<Option<Zeroizing<Vec<u8>>>>;

    fn write(&self, label: &str, secret: &[u8], presence_required: bool) -> IdentityResult<()>;

    /// Returns whether an item was removed.
    fn delete(&self, label: &str) -> IdentityResult<bool>;
}

struct StoredItem {
    secret: Zeroizing<Vec<u8>>,
    presence_required: bool,
}

/// Process-local key store. Contents vanish with the process.
#[derive(Default)]
pub struct InMemoryKeyStore {
    items: RwLock<HashMap<String, StoredItem>>,
}

impl InMemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InMemoryKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.items.read().map(|items| items.len()).unwrap_or(0);
        f.debug_struct("InMemoryKeyStore")
            .field("items", &count)
            .finish()
    }
}

impl SecureKeyStore for InMemoryKeyStore {
    fn contains(&self, label: &str) -> IdentityResult<bool> {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        Ok(items.contains_key(label))
    }

    fn read(
        &self,
        label: &str,
        proof: Option<&PresenceProof>,
    ) -> IdentityResult<Option<Zeroizing<Vec<u8>>>> {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        let Some(item) = items.get(label) else {
            return Ok(None);
        };
        if item.presence_required && proof.is_none() {
            return Err(IdentityError::PresenceRequired(format!(
                "key store item '{label}' is presence-gated"
            )));
        }
        Ok(Some(item.secret.clone()))
    }

    fn write(&self, label: &str, secret: &[u8], presence_required: bool) -> IdentityResult<()> {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        items.insert(
            label.to_string(),
            StoredItem {
                secret: Zeroizing::new(secret.to_vec()),
                presence_required,
            },
        );
        Ok(())
    }

    fn delete(&self, label: &str) -> IdentityResult<bool> {
        let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
        Ok(items.remove(label).is_some())
    }
}
