//! The identity engine facade.
//!
//! [`IdentityService`] wires every component over one [`IdentityDatabase`]
//! and is what the HTTP layer and management surfaces talk to. Presence proofs
//! are obtained internally through the configured [`PresenceGate`], one prompt
//! per operation.
//!
//! Validators are published per agent through a [`ValidatorHandle`]. Every
//! whitelist, revocation or key-set change rebuilds them from fresh snapshots
//! and swaps them in; request handlers never see a half-applied change.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use osaurus_core::IdentityConfig;
use osaurus_crypto::{
    AgentKeyDeriver, Keypair, OsRandom, OsaurusId, RecoveryCodeGenerator, SecureRandom,
};
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::access_key::{AccessKeyInfo, AccessKeyIssuer, AccessKeyRegistry, ExpirationPolicy};
use crate::agents::{AgentInfo, AgentRegistry};
use crate::counter::{CounterStore, SqliteCounterStore};
use crate::device::DeviceAttester;
use crate::error::{IdentityError, IdentityResult};
use crate::keystore::SecureKeyStore;
use crate::master::MasterIdentityStore;
use crate::presence::{PresenceGate, PresenceProof};
use crate::revocation::RevocationStore;
use crate::storage::{delete_state, read_state, write_state, IdentityDatabase};
use crate::token::{RequestToken, RequestTokenSigner, RequestTokenVerifier};
use crate::tpm::HardwareAttester;
use crate::validator::{AccessKeyValidator, ValidatorHandle};
use crate::whitelist::{WhitelistSnapshot, WhitelistStore};

/// The master address is public; it is cached so listing and validation
/// never need a presence prompt.
const MASTER_ADDRESS_KEY: &str = "master_address";

pub struct IdentityService {
    config: IdentityConfig,
    db: Arc<IdentityDatabase>,
    rng: Arc<dyn SecureRandom>,
    presence: Arc<dyn PresenceGate>,
    master: Arc<MasterIdentityStore>,
    agents: Arc<AgentRegistry>,
    device: Arc<DeviceAttester>,
    counter: Arc<dyn CounterStore>,
    signer: RequestTokenSigner,
    issuer: AccessKeyIssuer,
    access_keys: AccessKeyRegistry,
    whitelist: WhitelistStore,
    revocation: RevocationStore,
    validators: RwLock<HashMap<OsaurusId, Arc<ValidatorHandle>>>,
}

impl IdentityService {
    /// Open the engine with OS randomness.
    pub fn open(
        config: IdentityConfig,
        key_store: Arc<dyn SecureKeyStore>,
        presence: Arc<dyn PresenceGate>,
        hardware: Option<Arc<dyn HardwareAttester>>,
    ) -> IdentityResult<Self> {
        Self::open_with_random(config, key_store, presence, hardware, Arc::new(OsRandom))
    }

    pub fn open_with_random(
        config: IdentityConfig,
        key_store: Arc<dyn SecureKeyStore>,
        presence: Arc<dyn PresenceGate>,
        hardware: Option<Arc<dyn HardwareAttester>>,
        rng: Arc<dyn SecureRandom>,
    ) -> IdentityResult<Self> {
        config.validate()?;
        let db = Arc::new(IdentityDatabase::open(&config.storage.database_path)?);

        let device = Arc::new(DeviceAttester::select(
            &db,
            hardware,
            config.attestation.prefer_hardware,
            rng.as_ref(),
        )?);
        let counter: Arc<dyn CounterStore> = Arc::new(SqliteCounterStore::new(
            db.clone(),
            device.current_device_id(),
        ));
        let master = Arc::new(MasterIdentityStore::new(
            key_store,
            rng.clone(),
            Duration::from_secs(config.presence.proof_max_age_secs),
        ));
        let agents = Arc::new(AgentRegistry::new(db.clone()));

        let signer = RequestTokenSigner::new(
            master.clone(),
            agents.clone(),
            device.clone(),
            counter.clone(),
            config.tokens.request_ttl_secs,
        );
        let issuer = AccessKeyIssuer::new(counter.clone(), rng.clone());

        info!(
            device_id = %device.current_device_id(),
            hardware = device.is_hardware_backed(),
            "Identity service started"
        );

        Ok(Self {
            access_keys: AccessKeyRegistry::new(db.clone()),
            whitelist: WhitelistStore::new(db.clone()),
            revocation: RevocationStore::open(db.clone())?,
            validators: RwLock::new(HashMap::new()),
            config,
            db,
            rng,
            presence,
            master,
            agents,
            device,
            counter,
            signer,
            issuer,
        })
    }

    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    // -- identity lifecycle ------------------------------------------------

    /// Create the master identity. Returns its address and a one-time
    /// recovery code; the code is not stored anywhere.
    pub fn setup(&self) -> IdentityResult<(OsaurusId, Zeroizing<String>)> {
        let address = self.master.generate()?;
        write_state(&self.db.lock(), MASTER_ADDRESS_KEY, &address.to_lowercase_hex())?;
        let recovery_code = RecoveryCodeGenerator::generate(self.rng.as_ref())?;
        info!(address = %address, device_id = %self.device_id(), "Identity setup complete");
        Ok((address, recovery_code))
    }

    /// Whether a master identity exists. Never prompts.
    pub fn has_identity(&self) -> IdentityResult<bool> {
        self.master.exists()
    }

    pub fn master_address(&self) -> IdentityResult<OsaurusId> {
        let stored = read_state(&self.db.lock(), MASTER_ADDRESS_KEY)?;
        match stored {
            Some(address) => Ok(address.parse()?),
            None => Err(IdentityError::NotFound("master identity".to_string())),
        }
    }

    pub fn device_id(&self) -> &str {
        self.device.current_device_id()
    }

    pub fn is_hardware_backed(&self) -> bool {
        self.device.is_hardware_backed()
    }

    /// Destroy the master key and everything derived from it.
    ///
    /// Published validators are swapped to an empty whitelist first, so keys
    /// stop validating even for callers still holding a handle.
    pub fn reset_identity(&self) -> IdentityResult<()> {
        let proof = self.authorize("Reset Osaurus identity")?;
        self.master.reset(&proof)?;
        {
            let conn = self.db.lock();
            delete_state(&conn, MASTER_ADDRESS_KEY)?;
        }
        self.db.wipe_identity_state()?;
        let revocation = self.revocation.reload()?;

        let mut validators = self.validators.write().unwrap_or_else(|e| e.into_inner());
        for handle in validators.values() {
            let old = handle.current();
            handle.swap(AccessKeyValidator::new(
                *old.agent(),
                *old.master(),
                WhitelistSnapshot::default(),
                revocation.clone(),
                false,
            ));
        }
        validators.clear();

        warn!(device_id = %self.device_id(), "Identity reset");
        Ok(())
    }

    fn authorize(&self, reason: &str) -> IdentityResult<PresenceProof> {
        self.master.authorize(self.presence.as_ref(), reason)
    }

    // -- agents ------------------------------------------------------------

    pub fn create_agent(&self, label: &str) -> IdentityResult<AgentInfo> {
        let proof = self.authorize("Create agent identity")?;
        let secret = self.master.raw_secret(&proof)?;
        self.agents.create(label, &secret[..])
    }

    pub fn list_agents(&self) -> IdentityResult<Vec<AgentInfo>> {
        self.agents.list()
    }

    pub fn rename_agent(&self, index: u32, label: &str) -> IdentityResult<()> {
        self.agents.rename(index, label)
    }

    /// Remove an agent. Its published validator stops accepting keys.
    pub fn remove_agent(&self, index: u32) -> IdentityResult<()> {
        let agent = self
            .agents
            .get_by_index(index)?
            .ok_or_else(|| IdentityError::NotFound(format!("agent {index}")))?;
        self.agents.remove(index)?;

        let removed = self
            .validators
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&agent.address);
        if let Some(handle) = removed {
            let old = handle.current();
            handle.swap(AccessKeyValidator::new(
                agent.address,
                *old.master(),
                WhitelistSnapshot::default(),
                self.revocation.snapshot(),
                false,
            ));
        }
        Ok(())
    }

    /// Keypair for the master or one of its agents.
    fn signing_keypair(&self, issuer: &OsaurusId, proof: &PresenceProof) -> IdentityResult<Keypair> {
        let master = self.master.keypair(proof)?;
        if *issuer == master.address() {
            return Ok(master);
        }
        let agent = self
            .agents
            .get_by_address(issuer)?
            .ok_or_else(|| IdentityError::UnknownIssuer(issuer.to_string()))?;
        let secret = self.master.raw_secret(proof)?;
        let (keypair, _) = AgentKeyDeriver::derive(&secret[..], agent.index)?;
        Ok(keypair)
    }

    // -- request tokens ----------------------------------------------------

    pub fn sign_request(
        &self,
        issuer: &OsaurusId,
        method: &str,
        path: &str,
        audience: &str,
    ) -> IdentityResult<RequestToken> {
        let proof = self.authorize("Sign request")?;
        self.signer.sign(issuer, method, path, audience, &proof)
    }

    /// Verifier trusting this identity's master and its current agents.
    pub fn request_verifier(&self, audience: &str) -> IdentityResult<RequestTokenVerifier> {
        let agents = self
            .agents
            .list()?
            .into_iter()
            .map(|agent| (agent.address, agent.index));
        Ok(RequestTokenVerifier::new(audience, self.master_address()?)
            .with_agents(agents)
            .with_clock_skew(self.config.tokens.clock_skew_secs))
    }

    // -- access keys -------------------------------------------------------

    /// Issue a self-scoped key for `signer` (master or agent).
    ///
    /// The full key is returned exactly once.
    pub fn issue_access_key(
        &self,
        signer: &OsaurusId,
        label: Option<&str>,
        policy: ExpirationPolicy,
    ) -> IdentityResult<(AccessKeyInfo, Zeroizing<String>)> {
        let proof = self.authorize("Create access key")?;
        let keypair = self.signing_keypair(signer, &proof)?;
        let (info, key) = self
            .issuer
            .issue(&keypair, &keypair.address(), label, policy)?;
        self.access_keys.insert(&info)?;
        self.refresh_validators()?;
        Ok((info, key))
    }

    pub fn list_access_keys(&self) -> IdentityResult<Vec<AccessKeyInfo>> {
        self.access_keys.list()
    }

    pub fn list_access_keys_for(&self, issuer: &OsaurusId) -> IdentityResult<Vec<AccessKeyInfo>> {
        self.access_keys.list_for_issuer(issuer)
    }

    pub fn revoke_access_key(&self, id: &Uuid) -> IdentityResult<()> {
        let info = self
            .access_keys
            .get(id)?
            .ok_or_else(|| IdentityError::NotFound(format!("access key {id}")))?;
        self.revocation.revoke_individual(&info.iss, &info.nonce)?;
        self.access_keys.mark_revoked(id)?;
        self.refresh_validators()
    }

    /// Revoke every key `address` has issued so far. Returns the threshold.
    pub fn revoke_all_access_keys(&self, address: &OsaurusId) -> IdentityResult<u64> {
        let threshold = self
            .revocation
            .revoke_bulk(address, self.counter.current()?)?;
        let marked = self.access_keys.mark_revoked_through(address, threshold)?;
        info!(address = %address, threshold, marked, "All access keys revoked");
        self.refresh_validators()?;
        Ok(threshold)
    }

    /// Forget a key's metadata. Does not revoke it.
    pub fn delete_access_key(&self, id: &Uuid) -> IdentityResult<bool> {
        self.access_keys.delete(id)
    }

    // -- whitelist ---------------------------------------------------------

    pub fn add_to_master_whitelist(&self, address: &OsaurusId) -> IdentityResult<()> {
        self.whitelist.add_master(address)?;
        self.refresh_validators()
    }

    pub fn remove_from_master_whitelist(&self, address: &OsaurusId) -> IdentityResult<()> {
        self.whitelist.remove_master(address)?;
        self.refresh_validators()
    }

    pub fn add_to_agent_whitelist(
        &self,
        agent: &OsaurusId,
        address: &OsaurusId,
    ) -> IdentityResult<()> {
        self.whitelist.add_for_agent(agent, address)?;
        self.refresh_validators()
    }

    pub fn remove_from_agent_whitelist(
        &self,
        agent: &OsaurusId,
        address: &OsaurusId,
    ) -> IdentityResult<()> {
        self.whitelist.remove_for_agent(agent, address)?;
        self.refresh_validators()
    }

    pub fn master_whitelist(&self) -> IdentityResult<Vec<OsaurusId>> {
        self.whitelist.master_entries()
    }

    pub fn agent_whitelist(&self, agent: &OsaurusId) -> IdentityResult<Vec<OsaurusId>> {
        self.whitelist.agent_entries(agent)
    }

    // -- validation --------------------------------------------------------

    /// A fresh validator for `agent` built from current state.
    pub fn validator_for(&self, agent: &OsaurusId) -> IdentityResult<AccessKeyValidator> {
        let master = self.master_address()?;
        let whitelist = self.whitelist.effective_whitelist(agent, &master)?;
        let has_keys = self
            .access_keys
            .list()?
            .iter()
            .any(|key| !key.revoked && (key.aud == *agent || key.aud == master));
        Ok(AccessKeyValidator::new(
            *agent,
            master,
            whitelist,
            self.revocation.snapshot(),
            has_keys,
        ))
    }

    /// The published validator for `agent`, kept current across mutations.
    pub fn validator_handle(&self, agent: &OsaurusId) -> IdentityResult<Arc<ValidatorHandle>> {
        if let Some(handle) = self
            .validators
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(agent)
        {
            return Ok(handle.clone());
        }

        let mut validators = self.validators.write().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = validators.get(agent) {
            return Ok(handle.clone());
        }
        let handle = Arc::new(ValidatorHandle::new(self.validator_for(agent)?));
        validators.insert(*agent, handle.clone());
        Ok(handle)
    }

    /// Rebuild and swap every published validator.
    fn refresh_validators(&self) -> IdentityResult<()> {
        // The write lock orders concurrent refreshes.
        let validators = self.validators.write().unwrap_or_else(|e| e.into_inner());
        for (agent, handle) in validators.iter() {
            handle.swap(self.validator_for(agent)?);
        }
        Ok(())
    }
}

impl std::fmt::Debug for IdentityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityService")
            .field("device", &self.device)
            .field("database", &self.config.storage.database_path)
            .finish_non_exhaustive()
    }
}
