//! Key derivation
//!
//! Every symmetric key in the protocol derives from the 32-byte activation
//! master secret (the ECDH X coordinate) by HMAC-SHA256 with a
//! domain-separation label, truncated to 16 bytes for AES-128.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Authentication factors in their canonical derivation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Factor {
    Possession,
    Knowledge,
    Biometry,
}

impl Factor {
    fn label(&self) -> &'static [u8] {
        match self {
            Factor::Possession => b"signature_possession",
            Factor::Knowledge => b"signature_knowledge",
            Factor::Biometry => b"signature_biometry",
        }
    }
}

/// Full HMAC-SHA256 output
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// HMAC-SHA256 truncated to an AES-128 key
pub fn derive_key16(secret: &[u8], label: &[u8]) -> [u8; 16] {
    let full = hmac_sha256(secret, label);
    let mut out = [0u8; 16];
    out.copy_from_slice(&full[..16]);
    out
}

/// Transport key: encrypts status blobs and the vault key envelope
pub fn derive_transport_key(master_secret: &[u8; 32]) -> [u8; 16] {
    derive_key16(master_secret, b"transport")
}

/// Per-factor signature key
pub fn derive_factor_key(master_secret: &[u8; 32], factor: Factor) -> [u8; 16] {
    derive_key16(master_secret, factor.label())
}

/// Token key: protects the token-issuance envelope
pub fn derive_token_key(master_secret: &[u8; 32]) -> [u8; 16] {
    derive_key16(master_secret, b"token")
}

/// Vault key: unlocks device-side encrypted secret storage
pub fn derive_vault_key(master_secret: &[u8; 32]) -> [u8; 16] {
    derive_key16(master_secret, b"vault")
}

/// IV for status-blob encryption, bound to the activation counter so each
/// counter position produces a distinct ciphertext
pub fn derive_status_iv(transport_key: &[u8; 16], counter: u64) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[8..].copy_from_slice(&counter.to_be_bytes());
    derive_key16(transport_key, &block)
}

/// Counter block for signature key derivation: 16 bytes, counter in the
/// trailing 8 bytes, big-endian
pub fn counter_bytes(counter: u64) -> [u8; 16] {
    let mut block = [0u8; 16];
    block[8..].copy_from_slice(&counter.to_be_bytes());
    block
}
