//! Key-at-rest codec
//!
//! Server private keys are stored base64-encoded, either in plaintext
//! (`NoEncryption`) or AES-encrypted under a per-row secret derived from
//! the master database key and the row's `(user_id, activation_id)`
//! (`AesHmac`). The mode is persisted next to the payload, so changing the
//! configured mode only affects new writes and key rotation stays an
//! additive migration.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use zeroize::Zeroizing;

use crate::core_crypto::aes::{cbc_decrypt, cbc_encrypt, random_iv};
use crate::core_crypto::kdf::hmac_sha256;
use crate::error::{ServiceError, ServiceResult};

/// Per-row encryption mode, persisted as a small integer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    NoEncryption,
    AesHmac,
}

impl EncryptionMode {
    /// Column value for this mode
    pub fn as_i64(&self) -> i64 {
        match self {
            EncryptionMode::NoEncryption => 0,
            EncryptionMode::AesHmac => 1,
        }
    }

    /// Decode a column value
    pub fn from_i64(value: i64) -> ServiceResult<Self> {
        match value {
            0 => Ok(EncryptionMode::NoEncryption),
            1 => Ok(EncryptionMode::AesHmac),
            other => Err(ServiceError::Storage(format!(
                "unknown encryption mode: {}",
                other
            ))),
        }
    }
}

/// Encoder/decoder for server private keys at rest
pub struct KeyAtRestCodec {
    master_key: Option<Zeroizing<Vec<u8>>>,
}

impl KeyAtRestCodec {
    /// Build from the configured base64 master key; empty selects the
    /// identity codec for writes
    pub fn new(master_key_base64: &str) -> ServiceResult<Self> {
        if master_key_base64.is_empty() {
            return Ok(Self { master_key: None });
        }
        let key = BASE64
            .decode(master_key_base64)
            .map_err(|_| ServiceError::Cryptography("invalid master DB key encoding".to_string()))?;
        if key.len() < 16 {
            return Err(ServiceError::Cryptography(
                "master DB key must be at least 16 bytes".to_string(),
            ));
        }
        Ok(Self {
            master_key: Some(Zeroizing::new(key)),
        })
    }

    /// Whether writes will be encrypted
    pub fn encrypts(&self) -> bool {
        self.master_key.is_some()
    }

    /// Derive the 16-byte per-row secret
    fn row_secret(&self, user_id: &str, activation_id: &str) -> Option<[u8; 16]> {
        let master = self.master_key.as_ref()?;
        let mut context = Vec::with_capacity(user_id.len() + activation_id.len());
        context.extend_from_slice(user_id.as_bytes());
        context.extend_from_slice(activation_id.as_bytes());
        let full = hmac_sha256(master, &context);
        let mut secret = [0u8; 16];
        secret.copy_from_slice(&full[..16]);
        Some(secret)
    }

    /// Encode a server private key for storage, returning the payload and
    /// the mode to persist with it
    pub fn encrypt(
        &self,
        private_key: &[u8],
        user_id: &str,
        activation_id: &str,
    ) -> (String, EncryptionMode) {
        match self.row_secret(user_id, activation_id) {
            None => (BASE64.encode(private_key), EncryptionMode::NoEncryption),
            Some(secret) => {
                let iv = random_iv();
                let ciphertext = cbc_encrypt(&secret, &iv, private_key);
                let mut body = Vec::with_capacity(16 + ciphertext.len());
                body.extend_from_slice(&iv);
                body.extend_from_slice(&ciphertext);
                (BASE64.encode(&body), EncryptionMode::AesHmac)
            }
        }
    }

    /// Decode a stored server private key, honouring the row's mode
    pub fn decrypt(
        &self,
        stored: &str,
        mode: EncryptionMode,
        user_id: &str,
        activation_id: &str,
    ) -> ServiceResult<Zeroizing<Vec<u8>>> {
        let body = BASE64
            .decode(stored)
            .map_err(|_| ServiceError::Cryptography("invalid stored key encoding".to_string()))?;

        match mode {
            EncryptionMode::NoEncryption => Ok(Zeroizing::new(body)),
            EncryptionMode::AesHmac => {
                let secret = self.row_secret(user_id, activation_id).ok_or_else(|| {
                    ServiceError::Cryptography(
                        "row is encrypted but no master DB key is configured".to_string(),
                    )
                })?;
                if body.len() < 32 {
                    return Err(ServiceError::Cryptography(
                        "stored key payload too short".to_string(),
                    ));
                }
                let iv: [u8; 16] = body[..16].try_into().expect("length checked");
                cbc_decrypt(&secret, &iv, &body[16..]).map(Zeroizing::new)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master_b64() -> String {
        BASE64.encode([0x5Au8; 16])
    }

    #[test]
    fn test_plaintext_mode_round_trip() {
        let codec = KeyAtRestCodec::new("").unwrap();
        assert!(!codec.encrypts());
        let (stored, mode) = codec.encrypt(b"private-key", "alice", "act-1");
        assert_eq!(mode, EncryptionMode::NoEncryption);
        let out = codec.decrypt(&stored, mode, "alice", "act-1").unwrap();
        assert_eq!(out.as_slice(), b"private-key");
    }

    #[test]
    fn test_encrypted_mode_round_trip() {
        let codec = KeyAtRestCodec::new(&master_b64()).unwrap();
        assert!(codec.encrypts());
        let (stored, mode) = codec.encrypt(b"private-key", "alice", "act-1");
        assert_eq!(mode, EncryptionMode::AesHmac);
        let out = codec.decrypt(&stored, mode, "alice", "act-1").unwrap();
        assert_eq!(out.as_slice(), b"private-key");
    }

    #[test]
    fn test_wrong_master_key_fails() {
        let codec = KeyAtRestCodec::new(&master_b64()).unwrap();
        let (stored, mode) = codec.encrypt(b"private-key", "alice", "act-1");

        let wrong = KeyAtRestCodec::new(&BASE64.encode([0x11u8; 16])).unwrap();
        match wrong.decrypt(&stored, mode, "alice", "act-1") {
            Ok(out) => assert_ne!(out.as_slice(), b"private-key"),
            Err(_) => {}
        }
    }

    #[test]
    fn test_row_identity_binds_secret() {
        let codec = KeyAtRestCodec::new(&master_b64()).unwrap();
        let (stored, mode) = codec.encrypt(b"private-key", "alice", "act-1");
        match codec.decrypt(&stored, mode, "bob", "act-1") {
            Ok(out) => assert_ne!(out.as_slice(), b"private-key"),
            Err(_) => {}
        }
    }

    #[test]
    fn test_decoder_accepts_either_mode_per_row() {
        // rows written without encryption stay readable after a key is
        // configured
        let plain = KeyAtRestCodec::new("").unwrap();
        let (stored, mode) = plain.encrypt(b"old-key", "alice", "act-1");

        let encrypting = KeyAtRestCodec::new(&master_b64()).unwrap();
        let out = encrypting.decrypt(&stored, mode, "alice", "act-1").unwrap();
        assert_eq!(out.as_slice(), b"old-key");
    }

    #[test]
    fn test_encrypted_row_without_key_is_error() {
        let codec = KeyAtRestCodec::new(&master_b64()).unwrap();
        let (stored, mode) = codec.encrypt(b"private-key", "alice", "act-1");

        let plain = KeyAtRestCodec::new("").unwrap();
        assert!(plain.decrypt(&stored, mode, "alice", "act-1").is_err());
    }
}
