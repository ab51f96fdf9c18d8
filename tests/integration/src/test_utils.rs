//! Test utilities for end-to-end identity tests

use std::path::PathBuf;
use std::sync::Arc;

use osaurus_core::{IdentityConfig, StorageConfig};
use osaurus_crypto::{OsaurusId, SequenceRandom};
use osaurus_identity::{
    AutoApprovePresenceGate, HardwareAttester, IdentityService, InMemoryKeyStore, PresenceGate,
    SecureKeyStore,
};
use uuid::Uuid;

/// Config pointing at a fresh database under the system temp dir
pub fn temp_config() -> (IdentityConfig, PathBuf) {
    let dir = std::env::temp_dir().join(format!("osaurus-it-{}", Uuid::new_v4()));
    let config = IdentityConfig {
        storage: StorageConfig {
            database_path: dir.join("identity.db"),
        },
        ..IdentityConfig::default_config()
    };
    (config, dir)
}

/// A set-up identity backed by a throwaway database
pub struct TestIdentity {
    pub service: IdentityService,
    pub master: OsaurusId,
    pub key_store: Arc<InMemoryKeyStore>,
    dir: PathBuf,
}

impl TestIdentity {
    /// Software device, auto-approving presence gate
    pub fn new() -> Self {
        Self::build(Arc::new(AutoApprovePresenceGate), None)
    }

    pub fn with_hardware(attester: Arc<dyn HardwareAttester>) -> Self {
        Self::build(Arc::new(AutoApprovePresenceGate), Some(attester))
    }

    pub fn build(
        presence: Arc<dyn PresenceGate>,
        hardware: Option<Arc<dyn HardwareAttester>>,
    ) -> Self {
        osaurus_core::logging::try_init_for_tests();

        let (config, dir) = temp_config();
        let key_store = Arc::new(InMemoryKeyStore::new());
        let service = IdentityService::open_with_random(
            config,
            key_store.clone() as Arc<dyn SecureKeyStore>,
            presence,
            hardware,
            Arc::new(SequenceRandom::new(seed_from(&dir))),
        )
        .expect("open identity service");
        let (master, _recovery_code) = service.setup().expect("identity setup");

        Self {
            service,
            master,
            key_store,
            dir,
        }
    }

    /// Reopen the same database with the same key store, as after a restart
    pub fn reopen(&self) -> IdentityService {
        let config = IdentityConfig {
            storage: StorageConfig {
                database_path: self.dir.join("identity.db"),
            },
            ..IdentityConfig::default_config()
        };
        IdentityService::open_with_random(
            config,
            self.key_store.clone() as Arc<dyn SecureKeyStore>,
            Arc::new(AutoApprovePresenceGate),
            None,
            Arc::new(SequenceRandom::new(seed_from(&self.dir) ^ 0xFFFF)),
        )
        .expect("reopen identity service")
    }
}

impl Default for TestIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestIdentity {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Distinct deterministic seeds per test directory
fn seed_from(dir: &std::path::Path) -> u64 {
    let digest = osaurus_crypto::sha256(dir.to_string_lossy().as_bytes());
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}
