//! ECIES-shaped envelope
//!
//! Encrypted request/response exchange between a device and the server,
//! keyed by an ephemeral ECDH against a server key and bound to the
//! application secret. Used by activation Prepare (device public key
//! delivery) and token issuance.
//!
//! Request: the sender generates an ephemeral P-256 pair, derives
//! encryption and MAC keys from the shared X coordinate with
//! domain-separated labels that fold in the application secret, and ships
//! `ephemeral_public_key || iv || ciphertext || mac`. The response reuses
//! the established shared secret under response-scoped labels, so no
//! second ECDH is needed.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use super::aes::{cbc_decrypt, cbc_encrypt, random_iv};
use super::kdf::{derive_key16, hmac_sha256};
use super::keys::{EcKeyPair, EcPublicKey};
use crate::error::{ServiceError, ServiceResult};

/// Wire form of an encrypted request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EciesEnvelope {
    /// Base64 SEC1 point of the sender's ephemeral key
    pub ephemeral_public_key: String,
    /// Base64 of `iv || ciphertext`
    pub encrypted_data: String,
    /// Base64 HMAC-SHA256 over `iv || ciphertext`
    pub mac: String,
}

/// Wire form of an encrypted response (no ephemeral key; the request's
/// shared secret is reused)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EciesPayload {
    /// Base64 of `iv || ciphertext`
    pub encrypted_data: String,
    /// Base64 HMAC-SHA256 over `iv || ciphertext`
    pub mac: String,
}

/// Established shared-secret context, able to seal the response leg
pub struct EciesContext {
    shared: [u8; 32],
    app_secret: Vec<u8>,
}

const REQUEST_ENC: &[u8] = b"ecies-request-encryption/";
const REQUEST_MAC: &[u8] = b"ecies-request-mac/";
const RESPONSE_ENC: &[u8] = b"ecies-response-encryption/";
const RESPONSE_MAC: &[u8] = b"ecies-response-mac/";

impl EciesContext {
    fn enc_key(&self, label: &[u8]) -> [u8; 16] {
        derive_key16(&self.shared, &[label, self.app_secret.as_slice()].concat())
    }

    fn mac_key(&self, label: &[u8]) -> [u8; 32] {
        hmac_sha256(&self.shared, &[label, self.app_secret.as_slice()].concat())
    }

    fn seal(&self, enc_label: &[u8], mac_label: &[u8], plaintext: &[u8]) -> (String, String) {
        let iv = random_iv();
        let ciphertext = cbc_encrypt(&self.enc_key(enc_label), &iv, plaintext);

        let mut body = Vec::with_capacity(16 + ciphertext.len());
        body.extend_from_slice(&iv);
        body.extend_from_slice(&ciphertext);

        let mac = hmac_sha256(&self.mac_key(mac_label), &body);
        (BASE64.encode(&body), BASE64.encode(mac))
    }

    fn open(
        &self,
        enc_label: &[u8],
        mac_label: &[u8],
        encrypted_data: &str,
        mac: &str,
    ) -> ServiceResult<Vec<u8>> {
        let body = BASE64
            .decode(encrypted_data)
            .map_err(|_| ServiceError::InvalidRequest("invalid envelope encoding".to_string()))?;
        let claimed_mac = BASE64
            .decode(mac)
            .map_err(|_| ServiceError::InvalidRequest("invalid envelope encoding".to_string()))?;
        if body.len() < 32 {
            return Err(ServiceError::InvalidRequest("envelope too short".to_string()));
        }

        let expected_mac = hmac_sha256(&self.mac_key(mac_label), &body);
        if !bool::from(expected_mac.ct_eq(claimed_mac.as_slice())) {
            return Err(ServiceError::Cryptography("envelope MAC mismatch".to_string()));
        }

        let iv: [u8; 16] = body[..16].try_into().expect("length checked");
        cbc_decrypt(&self.enc_key(enc_label), &iv, &body[16..])
    }

    /// Seal the response leg
    pub fn encrypt_response(&self, plaintext: &[u8]) -> EciesPayload {
        let (encrypted_data, mac) = self.seal(RESPONSE_ENC, RESPONSE_MAC, plaintext);
        EciesPayload { encrypted_data, mac }
    }

    /// Open the response leg (device side, also used in tests)
    pub fn decrypt_response(&self, payload: &EciesPayload) -> ServiceResult<Vec<u8>> {
        self.open(RESPONSE_ENC, RESPONSE_MAC, &payload.encrypted_data, &payload.mac)
    }
}

/// Encrypt a request to `peer` (device side, also used in tests)
pub fn encrypt_request(
    peer: &EcPublicKey,
    app_secret: &[u8],
    plaintext: &[u8],
) -> (EciesEnvelope, EciesContext) {
    let ephemeral = EcKeyPair::generate();
    let context = EciesContext {
        shared: ephemeral.shared_secret(peer),
        app_secret: app_secret.to_vec(),
    };
    let (encrypted_data, mac) = context.seal(REQUEST_ENC, REQUEST_MAC, plaintext);
    let envelope = EciesEnvelope {
        ephemeral_public_key: ephemeral.public_key().to_base64(),
        encrypted_data,
        mac,
    };
    (envelope, context)
}

/// Open a request with the server private key
pub fn decrypt_request(
    private: &EcKeyPair,
    app_secret: &[u8],
    envelope: &EciesEnvelope,
) -> ServiceResult<(Vec<u8>, EciesContext)> {
    let ephemeral = EcPublicKey::from_base64(&envelope.ephemeral_public_key)?;
    let context = EciesContext {
        shared: private.shared_secret(&ephemeral),
        app_secret: app_secret.to_vec(),
    };
    let plaintext = context.open(REQUEST_ENC, REQUEST_MAC, &envelope.encrypted_data, &envelope.mac)?;
    Ok((plaintext, context))
}
