//! Short-lived tokens
//!
//! A token is a `(token_id, token_secret)` pair bound to an activation,
//! letting lightweight endpoints authenticate requests without the full
//! counter-based signature. Issuance requires an active activation and a
//! verified request signature; the pair is returned sealed under keys
//! derived from the activation's token key, so only the holding device can
//! read it. Validation recomputes the HMAC digest over `(nonce, timestamp)`
//! and enforces a freshness window.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::info;
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::core_activation::master_secret;
use crate::core_crypto::aes::{cbc_decrypt, cbc_encrypt, random_iv};
use crate::core_crypto::kdf::{derive_key16, derive_token_key, hmac_sha256};
use crate::core_signature::{SignatureService, VerifySignatureRequest};
use crate::core_store::model::{ActivationStatus, TokenRecord};
use crate::core_store::repository;
use crate::error::{ServiceError, ServiceResult};

/// Token creation request; the signature proves device possession before
/// any secret is issued
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenRequest {
    pub activation_id: String,
    pub application_key: String,
    /// Canonicalized request payload, base64
    pub data: String,
    pub signature: String,
    pub signature_type: String,
}

/// Sealed token pair; decryptable only with the device's token key
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTokenResponse {
    /// Base64 of `iv || ciphertext` over the JSON token pair
    pub encrypted_data: String,
    /// Base64 HMAC over `iv || ciphertext`
    pub mac: String,
}

/// Plaintext inside the sealed response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub token_id: String,
    pub token_secret: String,
}

/// Token validation request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateTokenRequest {
    pub token_id: String,
    /// Base64 HMAC digest computed by the device
    pub token_digest: String,
    /// Base64 nonce chosen by the device
    pub nonce: String,
    /// Device-side unix-millisecond timestamp
    pub timestamp: u64,
}

/// Token validation outcome
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateTokenResponse {
    pub token_valid: bool,
    pub activation_id: String,
    pub user_id: String,
    pub application_id: i64,
    pub signature_type: String,
}

const TOKEN_ENC_LABEL: &[u8] = b"token-envelope-encryption";
const TOKEN_MAC_LABEL: &[u8] = b"token-envelope-mac";

/// Seal a token pair under the activation token key
fn seal_token_pair(token_key: &[u8; 16], pair: &TokenPair) -> ServiceResult<CreateTokenResponse> {
    let plaintext = serde_json::to_vec(pair)
        .map_err(|e| ServiceError::Cryptography(format!("token encoding failed: {}", e)))?;

    let enc_key = derive_key16(token_key, TOKEN_ENC_LABEL);
    let mac_key = hmac_sha256(token_key, TOKEN_MAC_LABEL);

    let iv = random_iv();
    let ciphertext = cbc_encrypt(&enc_key, &iv, &plaintext);
    let mut body = Vec::with_capacity(16 + ciphertext.len());
    body.extend_from_slice(&iv);
    body.extend_from_slice(&ciphertext);

    Ok(CreateTokenResponse {
        mac: BASE64.encode(hmac_sha256(&mac_key, &body)),
        encrypted_data: BASE64.encode(body),
    })
}

/// Open a sealed token pair (device side, used in tests)
pub fn open_token_pair(token_key: &[u8; 16], sealed: &CreateTokenResponse) -> ServiceResult<TokenPair> {
    let body = BASE64
        .decode(&sealed.encrypted_data)
        .map_err(|_| ServiceError::Cryptography("invalid token envelope".to_string()))?;
    let mac = BASE64
        .decode(&sealed.mac)
        .map_err(|_| ServiceError::Cryptography("invalid token envelope".to_string()))?;
    if body.len() < 32 {
        return Err(ServiceError::Cryptography("token envelope too short".to_string()));
    }

    let mac_key = hmac_sha256(token_key, TOKEN_MAC_LABEL);
    let expected = hmac_sha256(&mac_key, &body);
    if !bool::from(expected.ct_eq(mac.as_slice())) {
        return Err(ServiceError::Cryptography("token envelope MAC mismatch".to_string()));
    }

    let enc_key = derive_key16(token_key, TOKEN_ENC_LABEL);
    let iv: [u8; 16] = body[..16].try_into().expect("length checked");
    let plaintext = cbc_decrypt(&enc_key, &iv, &body[16..])?;
    serde_json::from_slice(&plaintext)
        .map_err(|e| ServiceError::Cryptography(format!("token decoding failed: {}", e)))
}

/// Token subsystem service
pub struct TokenService {
    signature: Arc<SignatureService>,
    config: TokenConfig,
}

impl TokenService {
    pub fn new(signature: Arc<SignatureService>, config: TokenConfig) -> Self {
        Self { signature, config }
    }

    /// Issue a token for an active activation
    pub fn create_token(&self, request: CreateTokenRequest) -> ServiceResult<CreateTokenResponse> {
        let verification = self.signature.verify(VerifySignatureRequest {
            activation_id: request.activation_id.clone(),
            application_key: request.application_key,
            data: request.data,
            signature: request.signature,
            signature_type: request.signature_type.clone(),
            protocol_version: None,
        })?;
        if !verification.signature_valid {
            return Err(ServiceError::InvalidRequest("signature validation failed".to_string()));
        }

        let activation = self.signature.activation();
        let now = activation.clock().now();
        let codec = activation.codec();
        let budget = activation.crypto_config().generate_token_id_iterations;

        let mut token_secret_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut token_secret_bytes);
        let token_secret = BASE64.encode(token_secret_bytes);
        let signature_type = request.signature_type;

        let (sealed, token_id) = activation.store().transaction(|tx| {
            let record = repository::find_activation(tx, &request.activation_id)?
                .ok_or(ServiceError::ActivationNotFound)?;
            if record.status != ActivationStatus::Active {
                return Err(ServiceError::ActivationIncorrectState(
                    record.status.as_str().to_string(),
                ));
            }

            let mut token_id = None;
            for _ in 0..budget {
                let candidate = Uuid::new_v4().to_string();
                if !repository::token_id_exists(tx, &candidate)? {
                    token_id = Some(candidate);
                    break;
                }
            }
            let token_id = token_id.ok_or(ServiceError::UnableToGenerateToken)?;

            repository::insert_token(
                tx,
                &TokenRecord {
                    token_id: token_id.clone(),
                    token_secret: token_secret.clone(),
                    activation_id: record.activation_id.clone(),
                    signature_type: signature_type.clone(),
                    timestamp_created: now,
                },
            )?;

            let token_key = derive_token_key(&master_secret(codec, &record)?);
            let sealed = seal_token_pair(
                &token_key,
                &TokenPair {
                    token_id: token_id.clone(),
                    token_secret: token_secret.clone(),
                },
            )?;
            Ok((sealed, token_id))
        })?;

        info!(token_id, "token created");
        Ok(sealed)
    }

    /// Validate a token digest
    pub fn validate_token(&self, request: ValidateTokenRequest) -> ServiceResult<ValidateTokenResponse> {
        let activation = self.signature.activation();
        let now = activation.clock().now();
        let validity_ms = self.config.timestamp_validity.as_millis() as u64;

        let nonce = BASE64
            .decode(&request.nonce)
            .map_err(|_| ServiceError::InvalidRequest("nonce is not base64".to_string()))?;
        let claimed_digest = BASE64
            .decode(&request.token_digest)
            .map_err(|_| ServiceError::InvalidRequest("digest is not base64".to_string()))?;

        let (token, record) = activation.store().read(|conn| {
            let token = repository::find_token(conn, &request.token_id)?
                .ok_or(ServiceError::TokenNotFound)?;
            let record = repository::find_activation(conn, &token.activation_id)?
                .ok_or(ServiceError::ActivationNotFound)?;
            Ok((token, record))
        })?;

        let fresh = now.as_millis().abs_diff(request.timestamp) <= validity_ms;
        let secret_bytes = BASE64
            .decode(&token.token_secret)
            .map_err(|_| ServiceError::Storage("stored token secret invalid".to_string()))?;
        let expected = SignatureService::token_digest(&secret_bytes, &nonce, request.timestamp);
        let digest_ok: bool = expected.ct_eq(claimed_digest.as_slice()).into();

        let token_valid = fresh && digest_ok && record.status == ActivationStatus::Active;

        Ok(ValidateTokenResponse {
            token_valid,
            activation_id: record.activation_id,
            user_id: record.user_id,
            application_id: record.application_id,
            signature_type: token.signature_type,
        })
    }

    /// Remove a token; true when a row was deleted
    pub fn remove_token(&self, token_id: &str, activation_id: &str) -> ServiceResult<bool> {
        let activation = self.signature.activation();
        activation.store().transaction(|tx| {
            let Some(token) = repository::find_token(tx, token_id)? else {
                return Ok(false);
            };
            if token.activation_id != activation_id {
                return Err(ServiceError::InvalidRequest(
                    "token does not belong to activation".to_string(),
                ));
            }
            repository::delete_token(tx, token_id)
        })
    }
}
