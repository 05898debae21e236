//! Device public key fingerprint
//!
//! A short decimal the user can visually compare on both sides of the
//! activation: SHA-256 over (device X || activation_id || server X), taken
//! big-endian modulo 10^8, zero-padded to 8 digits.

use sha2::{Digest, Sha256};

use super::keys::EcPublicKey;

/// Digits in the fingerprint
const FINGERPRINT_DIGITS: u32 = 8;

/// Compute the activation fingerprint
pub fn compute_fingerprint(
    device_public: &EcPublicKey,
    activation_id: &str,
    server_public: &EcPublicKey,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device_public.x_coordinate());
    hasher.update(activation_id.as_bytes());
    hasher.update(server_public.x_coordinate());
    let hash = hasher.finalize();

    // big-endian residue mod 10^8, folded byte by byte to avoid bigint math
    let modulus = 10u64.pow(FINGERPRINT_DIGITS);
    let mut residue: u64 = 0;
    for &byte in hash.iter() {
        residue = (residue * 256 + byte as u64) % modulus;
    }
    format!("{:08}", residue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_crypto::keys::EcKeyPair;

    #[test]
    fn test_fingerprint_shape() {
        let device = EcKeyPair::generate().public_key();
        let server = EcKeyPair::generate().public_key();
        let fp = compute_fingerprint(&device, "a1b2c3", &server);
        assert_eq!(fp.len(), 8);
        assert!(fp.bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let device = EcKeyPair::generate().public_key();
        let server = EcKeyPair::generate().public_key();
        let a = compute_fingerprint(&device, "same-id", &server);
        let b = compute_fingerprint(&device, "same-id", &server);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_binds_all_inputs() {
        let device = EcKeyPair::generate().public_key();
        let server = EcKeyPair::generate().public_key();
        let other = EcKeyPair::generate().public_key();
        let base = compute_fingerprint(&device, "id", &server);
        assert_ne!(base, compute_fingerprint(&device, "id2", &server));
        assert_ne!(base, compute_fingerprint(&other, "id", &server));
        assert_ne!(base, compute_fingerprint(&device, "id", &other));
    }
}
