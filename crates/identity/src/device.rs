//! Device identity and per-request attestation.
//!
//! Every physical device has one stable 8-hex-character id and an assertion
//! primitive. Two variants share that contract:
//!
//! - **Hardware**: a hardware-backed key created once; the id is the first
//!   4 bytes of SHA-256 over the key handle, and assertions are hardware
//!   signatures over `sha256(data)`.
//! - **Software**: 4 random bytes persisted locally; assertions are empty.
//!   Weaker, but never an error.
//!
//! The variant is chosen once at startup by probing the hardware attester.

use std::sync::Arc;

use osaurus_crypto::{sha256, SecureRandom};
use tracing::{info, warn};

use crate::error::{IdentityError, IdentityResult};
use crate::storage::{read_state, write_state, IdentityDatabase};
use crate::tpm::HardwareAttester;

const HARDWARE_HANDLE_KEY: &str = "hardware_key_handle";
const SOFTWARE_DEVICE_ID_KEY: &str = "software_device_id";

/// Byte length of a device id before hex encoding.
pub const DEVICE_ID_BYTES: usize = 4;

/// Hardware-backed device identity.
pub struct HardwareDevice {
    attester: Arc<dyn HardwareAttester>,
    key_handle: String,
    device_id: String,
}

impl HardwareDevice {
    pub fn key_handle(&self) -> &str {
        &self.key_handle
    }
}

/// Software-only device identity.
#[derive(Debug, Clone)]
pub struct SoftwareDevice {
    device_id: String,
}

/// The device attester selected for this process.
pub enum DeviceAttester {
    Hardware(HardwareDevice),
    Software(SoftwareDevice),
}

impl DeviceAttester {
    /// Load or create the device identity, preferring hardware when available.
    pub fn select(
        db: &IdentityDatabase,
        hardware: Option<Arc<dyn HardwareAttester>>,
        prefer_hardware: bool,
        rng: &dyn SecureRandom,
    ) -> IdentityResult<Self> {
        if prefer_hardware {
            if let Some(attester) = hardware.filter(|a| a.is_supported()) {
                match Self::load_hardware(db, attester) {
                    Ok(device) => return Ok(device),
                    Err(e) => {
                        warn!(error = %e, "Hardware attestation unavailable, using software device identity")
                    }
                }
            }
        }
        Self::load_software(db, rng)
    }

    fn load_hardware(
        db: &IdentityDatabase,
        attester: Arc<dyn HardwareAttester>,
    ) -> IdentityResult<Self> {
        let conn = db.lock();
        let key_handle = match read_state(&conn, HARDWARE_HANDLE_KEY)? {
            Some(handle) if attester.has_key(&handle) => handle,
            stored => {
                if stored.is_some() {
                    warn!("Hardware key was invalidated by the OS, rotating device identity");
                }
                let handle = attester.generate_key()?;
                write_state(&conn, HARDWARE_HANDLE_KEY, &handle)?;
                handle
            }
        };

        let device_id = hex::encode(&sha256(key_handle.as_bytes())[..DEVICE_ID_BYTES]);
        info!(device_id = %device_id, "Device identity :: hardware-backed");
        Ok(Self::Hardware(HardwareDevice {
            attester,
            key_handle,
            device_id,
        }))
    }

    fn load_software(db: &IdentityDatabase, rng: &dyn SecureRandom) -> IdentityResult<Self> {
        let conn = db.lock();
        let device_id = match read_state(&conn, SOFTWARE_DEVICE_ID_KEY)? {
            Some(id) => id,
            None => {
                let id = hex::encode(rng.bytes(DEVICE_ID_BYTES)?);
                write_state(&conn, SOFTWARE_DEVICE_ID_KEY, &id)?;
                id
            }
        };
        warn!(device_id = %device_id, "Device identity :: software fallback");
        Ok(Self::Software(SoftwareDevice { device_id }))
    }

    pub fn current_device_id(&self) -> &str {
        match self {
            Self::Hardware(device) => &device.device_id,
            Self::Software(device) => &device.device_id,
        }
    }

    pub fn is_hardware_backed(&self) -> bool {
        matches!(self, Self::Hardware(_))
    }

    /// Attest over `data`. Hardware failures surface as `AttestationFailed`.
    pub fn assert(&self, data: &[u8]) -> IdentityResult<Vec<u8>> {
        match self {
            Self::Hardware(device) => {
                let client_data_hash = sha256(data);
                device
                    .attester
                    .assert(&device.key_handle, &client_data_hash)
                    .map_err(|e| match e {
                        IdentityError::AttestationFailed(_) => e,
                        other => IdentityError::AttestationFailed(other.to_string()),
                    })
            }
            Self::Software(_) => Ok(Vec::new()),
        }
    }
}

impl std::fmt::Debug for DeviceAttester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = if self.is_hardware_backed() {
            "Hardware"
        } else {
            "Software"
        };
        f.debug_struct("DeviceAttester")
            .field("variant", &variant)
            .field("device_id", &self.current_device_id())
            .finish()
    }
}
