//! One-time human recovery codes.
//!
//! Format: `OSAURUS-XXXX-XXXX-XXXX-XXXX`, sixteen uppercase hex digits drawn
//! from 8 random bytes. The code is shown once at identity creation and never
//! persisted in plaintext.

use zeroize::Zeroizing;

use crate::error::Result;
use crate::random::{random_secret, SecureRandom};

pub const RECOVERY_CODE_PREFIX: &str = "OSAURUS-";

const RECOVERY_CODE_BYTES: usize = 8;
const GROUP_LEN: usize = 4;

#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryCodeGenerator;

impl RecoveryCodeGenerator {
    pub fn generate(rng: &dyn SecureRandom) -> Result<Zeroizing<String>> {
        let bytes: Zeroizing<[u8; RECOVERY_CODE_BYTES]> = random_secret(rng)?;
        let digits = Zeroizing::new(hex::encode_upper(&bytes[..]));

        let mut code = Zeroizing::new(String::with_capacity(RECOVERY_CODE_PREFIX.len() + 19));
        code.push_str(RECOVERY_CODE_PREFIX);
        for (i, c) in digits.chars().enumerate() {
            if i > 0 && i % GROUP_LEN == 0 {
                code.push('-');
            }
            code.push(c);
        }
        Ok(code)
    }

    /// Shape check only; a well-formed code proves nothing by itself.
    pub fn is_well_formed(code: &str) -> bool {
        let Some(body) = code.strip_prefix(RECOVERY_CODE_PREFIX) else {
            return false;
        };
        let groups: Vec<&str> = body.split('-').collect();
        groups.len() == RECOVERY_CODE_BYTES * 2 / GROUP_LEN
            && groups.iter().all(|g| {
                g.len() == GROUP_LEN
                    && g.chars()
                        .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
            })
    }
}
