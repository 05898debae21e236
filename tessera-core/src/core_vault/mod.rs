//! Vault unlock
//!
//! The device keeps secondary secrets in an encrypted vault whose key the
//! server holds in derivable form. Unlocking is a signed request: the
//! signature must verify (with the usual counter discipline and audit
//! trail), after which the vault key is returned encrypted under keys
//! derived from the activation's transport key.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::info;

use crate::core_activation::master_secret;
use crate::core_crypto::aes::{cbc_decrypt, cbc_encrypt, random_iv};
use crate::core_crypto::kdf::{derive_key16, derive_transport_key, derive_vault_key, hmac_sha256};
use crate::core_signature::{SignatureService, VerifySignatureRequest};
use crate::core_store::repository;
use crate::error::{ServiceError, ServiceResult};

/// Vault unlock request; `reason` is free-form and lands in the audit note
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultUnlockRequest {
    pub activation_id: String,
    pub application_key: String,
    /// Canonicalized request payload, base64
    pub data: String,
    pub signature: String,
    pub signature_type: String,
    pub reason: Option<String>,
}

/// Vault unlock response; the key ciphertext is present only after a valid
/// signature
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultUnlockResponse {
    pub signature_valid: bool,
    pub activation_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_vault_key: Option<String>,
}

const VAULT_ENC_LABEL: &[u8] = b"vault-envelope-encryption";
const VAULT_MAC_LABEL: &[u8] = b"vault-envelope-mac";

/// Seal the vault key under the transport key:
/// `base64(iv || ciphertext || mac)`
fn seal_vault_key(transport_key: &[u8; 16], vault_key: &[u8; 16]) -> String {
    let enc_key = derive_key16(transport_key, VAULT_ENC_LABEL);
    let mac_key = hmac_sha256(transport_key, VAULT_MAC_LABEL);

    let iv = random_iv();
    let ciphertext = cbc_encrypt(&enc_key, &iv, vault_key);

    let mut body = Vec::with_capacity(16 + ciphertext.len() + 32);
    body.extend_from_slice(&iv);
    body.extend_from_slice(&ciphertext);
    let mac = hmac_sha256(&mac_key, &body);
    body.extend_from_slice(&mac);
    BASE64.encode(body)
}

/// Open a sealed vault key (device side, used in tests)
pub fn open_vault_key(transport_key: &[u8; 16], sealed: &str) -> ServiceResult<[u8; 16]> {
    let body = BASE64
        .decode(sealed)
        .map_err(|_| ServiceError::Cryptography("invalid vault envelope".to_string()))?;
    if body.len() < 16 + 16 + 32 {
        return Err(ServiceError::Cryptography("vault envelope too short".to_string()));
    }

    let (sealed_body, mac) = body.split_at(body.len() - 32);
    let mac_key = hmac_sha256(transport_key, VAULT_MAC_LABEL);
    let expected = hmac_sha256(&mac_key, sealed_body);
    if !bool::from(expected.ct_eq(mac)) {
        return Err(ServiceError::Cryptography("vault envelope MAC mismatch".to_string()));
    }

    let enc_key = derive_key16(transport_key, VAULT_ENC_LABEL);
    let iv: [u8; 16] = sealed_body[..16].try_into().expect("length checked");
    let plaintext = cbc_decrypt(&enc_key, &iv, &sealed_body[16..])?;
    plaintext
        .as_slice()
        .try_into()
        .map_err(|_| ServiceError::Cryptography("vault key has wrong length".to_string()))
}

/// Vault unlock service
pub struct VaultService {
    signature: Arc<SignatureService>,
}

impl VaultService {
    pub fn new(signature: Arc<SignatureService>) -> Self {
        Self { signature }
    }

    /// Verify the unlock signature and, on success, return the sealed
    /// vault key
    pub fn unlock(&self, request: VaultUnlockRequest) -> ServiceResult<VaultUnlockResponse> {
        let verification = self.signature.verify_with_note(
            VerifySignatureRequest {
                activation_id: request.activation_id.clone(),
                application_key: request.application_key,
                data: request.data,
                signature: request.signature,
                signature_type: request.signature_type,
                protocol_version: None,
            },
            Some("VAULT_UNLOCK"),
        )?;

        if !verification.signature_valid {
            return Ok(VaultUnlockResponse {
                signature_valid: false,
                activation_status: verification.activation_status,
                encrypted_vault_key: None,
            });
        }

        let activation = self.signature.activation();
        let codec = activation.codec();
        let record = activation
            .store()
            .read(|conn| repository::find_activation(conn, &request.activation_id))?
            .ok_or(ServiceError::ActivationNotFound)?;

        let secret = master_secret(codec, &record)?;
        let sealed = seal_vault_key(&derive_transport_key(&secret), &derive_vault_key(&secret));

        info!(
            activation_id = %request.activation_id,
            reason = request.reason.as_deref().unwrap_or("-"),
            "vault unlocked"
        );
        Ok(VaultUnlockResponse {
            signature_valid: true,
            activation_status: verification.activation_status,
            encrypted_vault_key: Some(sealed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_round_trip() {
        let transport = [0x31u8; 16];
        let vault = [0x77u8; 16];
        let sealed = seal_vault_key(&transport, &vault);
        assert_eq!(open_vault_key(&transport, &sealed).unwrap(), vault);
    }

    #[test]
    fn test_wrong_transport_key_fails() {
        let sealed = seal_vault_key(&[1u8; 16], &[9u8; 16]);
        assert!(open_vault_key(&[2u8; 16], &sealed).is_err());
    }

    #[test]
    fn test_truncated_envelope_fails() {
        assert!(open_vault_key(&[1u8; 16], "AAAA").is_err());
    }
}
