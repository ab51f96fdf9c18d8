//! Known-answer vectors for address derivation and recovery.
//!
//! The keys below are the publicly known development accounts shipped with
//! common Ethereum tooling; the expected addresses pin the Keccak/EIP-55
//! pipeline to an independent implementation.
//!
//! ⚠️ WARNING: DO NOT USE IN PRODUCTION ⚠️

use crate::address::OsaurusId;
use crate::hashing::ACCESS_KEY_DOMAIN;
use crate::keys::Keypair;

pub struct AddressTestVector {
    pub name: &'static str,
    pub private_key_hex: &'static str,
    pub expected_address: &'static str,
}

pub fn get_test_vectors() -> Vec<AddressTestVector> {
    vec![
        AddressTestVector {
            name: "dev_account_0",
            private_key_hex: "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
            expected_address: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266",
        },
        AddressTestVector {
            name: "dev_account_1",
            private_key_hex: "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d",
            expected_address: "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
        },
        AddressTestVector {
            name: "dev_account_2",
            private_key_hex: "5de4111afa1a4b94908f83103eb1f1706367c2e68ca870fc3fb9a804cdab365a",
            expected_address: "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC",
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keypair_for(vector: &AddressTestVector) -> Keypair {
        let secret = hex::decode(vector.private_key_hex).unwrap();
        Keypair::from_secret_bytes(&secret).unwrap()
    }

    #[test]
    fn test_vectors_derive_expected_addresses() {
        for vector in get_test_vectors() {
            let keypair = keypair_for(&vector);
            assert_eq!(
                keypair.address().to_checksum(),
                vector.expected_address,
                "vector {} failed",
                vector.name
            );
        }
    }

    #[test]
    fn test_vectors_recover_through_signature() {
        for vector in get_test_vectors() {
            let keypair = keypair_for(&vector);
            let signature = keypair
                .sign_in_domain(ACCESS_KEY_DOMAIN, vector.name.as_bytes())
                .unwrap();
            let recovered = signature
                .recover_in_domain(ACCESS_KEY_DOMAIN, vector.name.as_bytes())
                .unwrap();
            let expected: OsaurusId = vector.expected_address.parse().unwrap();
            assert_eq!(recovered, expected, "vector {} failed", vector.name);
        }
    }
}
