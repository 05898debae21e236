//! Status blob codec
//!
//! The device polls activation status and receives exactly 16 encrypted
//! bytes. Layout of the plaintext block:
//!
//! ```text
//! [0]      status tag
//! [1]      current protocol version
//! [2]      upgrade protocol version
//! [3]      failed attempts
//! [4]      max failed attempts
//! [5]      counter distance (0 outside upgrade flows)
//! [6..16]  random padding
//! ```
//!
//! The block is AES-128-CBC encrypted (single block, no padding) under the
//! transport key with a counter-derived IV. Responses for unknown or
//! keyless activations are unkeyed random bytes, indistinguishable from a
//! real blob.

use rand::rngs::OsRng;
use rand::RngCore;

use super::aes::{decrypt_block, encrypt_block};
use super::kdf::derive_status_iv;
use crate::error::{ServiceError, ServiceResult};

/// Decoded status blob fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusBlob {
    pub status: u8,
    pub current_version: u8,
    pub upgrade_version: u8,
    pub failed_attempts: u8,
    pub max_failed_attempts: u8,
    pub counter_distance: u8,
}

impl StatusBlob {
    fn to_block(self) -> [u8; 16] {
        let mut block = [0u8; 16];
        block[0] = self.status;
        block[1] = self.current_version;
        block[2] = self.upgrade_version;
        block[3] = self.failed_attempts;
        block[4] = self.max_failed_attempts;
        block[5] = self.counter_distance;
        OsRng.fill_bytes(&mut block[6..]);
        block
    }

    fn from_block(block: &[u8; 16]) -> Self {
        Self {
            status: block[0],
            current_version: block[1],
            upgrade_version: block[2],
            failed_attempts: block[3],
            max_failed_attempts: block[4],
            counter_distance: block[5],
        }
    }
}

/// Encrypt a status blob under the transport key at the given counter
pub fn encrypt_status_blob(blob: StatusBlob, transport_key: &[u8; 16], counter: u64) -> [u8; 16] {
    let iv = derive_status_iv(transport_key, counter);
    encrypt_block(transport_key, &iv, &blob.to_block())
}

/// Decrypt a status blob (device side, also used in tests)
pub fn decrypt_status_blob(
    ciphertext: &[u8],
    transport_key: &[u8; 16],
    counter: u64,
) -> ServiceResult<StatusBlob> {
    let block: [u8; 16] = ciphertext
        .try_into()
        .map_err(|_| ServiceError::Cryptography("status blob must be 16 bytes".to_string()))?;
    let iv = derive_status_iv(transport_key, counter);
    Ok(StatusBlob::from_block(&decrypt_block(transport_key, &iv, &block)))
}

/// Fresh unkeyed random blob for unknown or keyless activations
pub fn random_status_blob() -> [u8; 16] {
    let mut blob = [0u8; 16];
    OsRng.fill_bytes(&mut blob);
    blob
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> StatusBlob {
        StatusBlob {
            status: 3,
            current_version: 3,
            upgrade_version: 3,
            failed_attempts: 1,
            max_failed_attempts: 5,
            counter_distance: 0,
        }
    }

    #[test]
    fn test_round_trip() {
        let key = [0x11u8; 16];
        let ct = encrypt_status_blob(sample(), &key, 42);
        let decoded = decrypt_status_blob(&ct, &key, 42).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_padding_makes_ciphertext_fresh() {
        let key = [0x11u8; 16];
        let a = encrypt_status_blob(sample(), &key, 42);
        let b = encrypt_status_blob(sample(), &key, 42);
        // same fields, different random padding, different ciphertext
        assert_ne!(a, b);
    }

    #[test]
    fn test_counter_mismatch_garbles_fields() {
        let key = [0x11u8; 16];
        let ct = encrypt_status_blob(sample(), &key, 42);
        let decoded = decrypt_status_blob(&ct, &key, 43).unwrap();
        assert_ne!(decoded, sample());
    }

    #[test]
    fn test_random_blobs_differ() {
        assert_ne!(random_status_blob(), random_status_blob());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let key = [0u8; 16];
        assert!(decrypt_status_blob(&[0u8; 15], &key, 0).is_err());
        assert!(decrypt_status_blob(&[0u8; 17], &key, 0).is_err());
    }
}
