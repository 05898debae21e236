//! Signature verification engine
//!
//! Validates counter-based request signatures against an activation. The
//! server accepts a signature computed at any counter offset within the
//! lookahead window; the first match wins and advances the counter past
//! it, which retroactively invalidates every earlier offset and makes
//! replay impossible. Misses count toward the failed-attempt threshold and
//! block the activation when they reach it.
//!
//! Every attempt leaves a signature-audit row, valid or not.

pub mod offline;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

use crate::core_activation::{
    expire_if_needed, master_secret, ActivationService, PROTOCOL_VERSION,
    REASON_MAX_FAILED_ATTEMPTS,
};
use crate::core_application::ApplicationService;
use crate::core_crypto::kdf::{derive_factor_key, hmac_sha256};
use crate::core_crypto::signature::{compute_signature, signatures_equal, SignatureType};
use crate::core_store::model::{ActivationRecord, ActivationStatus};
use crate::core_store::repository;
use crate::error::{ServiceError, ServiceResult};

/// Online verification request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySignatureRequest {
    pub activation_id: String,
    pub application_key: String,
    /// Canonicalized request payload, base64
    pub data: String,
    pub signature: String,
    pub signature_type: String,
    pub protocol_version: Option<u32>,
}

/// Verification outcome; a failed signature is a normal response, not an
/// error
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySignatureResponse {
    pub signature_valid: bool,
    pub activation_id: String,
    pub activation_status: String,
    pub blocked_reason: Option<String>,
    pub user_id: String,
    pub application_id: i64,
    pub remaining_attempts: u32,
}

impl VerifySignatureResponse {
    fn from_record(record: &ActivationRecord, valid: bool) -> Self {
        Self {
            signature_valid: valid,
            activation_id: record.activation_id.clone(),
            activation_status: record.status.as_str().to_string(),
            blocked_reason: record.blocked_reason.clone(),
            user_id: record.user_id.clone(),
            application_id: record.application_id,
            remaining_attempts: record.max_failed_attempts.saturating_sub(record.failed_attempts),
        }
    }
}

pub(crate) fn data_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Signature verification service
pub struct SignatureService {
    activation: Arc<ActivationService>,
    applications: Arc<ApplicationService>,
}

impl SignatureService {
    pub fn new(activation: Arc<ActivationService>, applications: Arc<ApplicationService>) -> Self {
        Self {
            activation,
            applications,
        }
    }

    pub(crate) fn activation(&self) -> &Arc<ActivationService> {
        &self.activation
    }

    /// Verify an online request signature
    pub fn verify(&self, request: VerifySignatureRequest) -> ServiceResult<VerifySignatureResponse> {
        self.verify_with_note(request, None)
    }

    /// Online verification with an audit-trail note (vault unlock, token
    /// issuance)
    pub(crate) fn verify_with_note(
        &self,
        request: VerifySignatureRequest,
        audit_note: Option<&str>,
    ) -> ServiceResult<VerifySignatureResponse> {
        let signature_type = SignatureType::parse(&request.signature_type)?;
        let data = BASE64
            .decode(&request.data)
            .map_err(|_| ServiceError::InvalidRequest("data is not base64".to_string()))?;

        let credentials = self
            .applications
            .lookup_credentials(&request.application_key)?
            .filter(|c| c.supported)
            .ok_or_else(|| ServiceError::InvalidRequest("unknown application key".to_string()))?;

        self.verify_internal(
            &request.activation_id,
            signature_type,
            &[signature_type],
            &data,
            &request.signature,
            credentials.application_secret.as_bytes(),
            Some(credentials.application_id),
            request.protocol_version,
            audit_note,
        )
    }

    /// Shared engine for online, offline, and vault verification.
    ///
    /// `accepted_types` lists the factor sets tried against the signature
    /// (offline verification may allow more than one); `audit_type` is the
    /// label written to the audit trail. When `expected_application` is
    /// set, a mismatch against the stored activation rejects without
    /// touching counter or attempt accounting.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn verify_internal(
        &self,
        activation_id: &str,
        audit_type: SignatureType,
        accepted_types: &[SignatureType],
        data: &[u8],
        signature: &str,
        application_secret: &[u8],
        expected_application: Option<i64>,
        protocol_version: Option<u32>,
        audit_note: Option<&str>,
    ) -> ServiceResult<VerifySignatureResponse> {
        let now = self.activation.clock().now();
        let lookahead = self.activation.crypto_config().signature_validation_lookahead;
        let codec = self.activation.codec();
        let hash = data_hash(data);

        enum Notify {
            None,
            Blocked(i64),
            Expired(i64),
        }

        let (response, notify) = self.activation.store().transaction(|tx| {
            let mut record = repository::find_activation(tx, activation_id)?
                .ok_or(ServiceError::ActivationNotFound)?;
            let expired = expire_if_needed(tx, &mut record, now)?;

            if let Some(expected) = expected_application {
                if expected != record.application_id {
                    // wrong application entirely; no state is touched
                    repository::insert_signature_audit(
                        tx,
                        activation_id,
                        record.counter,
                        audit_type.as_str(),
                        &hash,
                        false,
                        Some("APPLICATION_MISMATCH"),
                        now,
                    )?;
                    return Ok((VerifySignatureResponse::from_record(&record, false), Notify::None));
                }
            }

            if expired || !matches!(record.status, ActivationStatus::Active | ActivationStatus::Blocked)
            {
                repository::insert_signature_audit(
                    tx,
                    activation_id,
                    record.counter,
                    audit_type.as_str(),
                    &hash,
                    false,
                    Some(record.status.as_str()),
                    now,
                )?;
                let notify = if expired {
                    Notify::Expired(record.application_id)
                } else {
                    Notify::None
                };
                return Ok((VerifySignatureResponse::from_record(&record, false), notify));
            }

            // attempts against ACTIVE and BLOCKED stamp last-used either way
            record.timestamp_last_used = now;

            if record.status == ActivationStatus::Blocked {
                // a blocked activation never advances its counter
                repository::update_activation(tx, &record)?;
                repository::insert_signature_audit(
                    tx,
                    activation_id,
                    record.counter,
                    audit_type.as_str(),
                    &hash,
                    false,
                    Some(audit_note.unwrap_or("BLOCKED")),
                    now,
                )?;
                return Ok((VerifySignatureResponse::from_record(&record, false), Notify::None));
            }

            let secret = master_secret(codec, &record)?;

            let mut matched_offset: Option<u64> = None;
            'outer: for signature_type in accepted_types {
                let factor_keys: Vec<[u8; 16]> = signature_type
                    .factors()
                    .iter()
                    .map(|f| derive_factor_key(&secret, *f))
                    .collect();
                for offset in 0..=lookahead {
                    let expected = compute_signature(
                        &factor_keys,
                        record.counter + offset,
                        data,
                        application_secret,
                    );
                    if signatures_equal(&expected, signature) {
                        matched_offset = Some(offset);
                        break 'outer;
                    }
                }
            }

            match matched_offset {
                Some(offset) => {
                    record.counter += offset + 1;
                    record.failed_attempts = 0;
                    let requested = protocol_version.unwrap_or(PROTOCOL_VERSION);
                    record.version = Some(record.version.map_or(requested, |v| v.max(requested)));
                    repository::update_activation(tx, &record)?;
                    repository::insert_signature_audit(
                        tx,
                        activation_id,
                        record.counter,
                        audit_type.as_str(),
                        &hash,
                        true,
                        audit_note,
                        now,
                    )?;
                    Ok((VerifySignatureResponse::from_record(&record, true), Notify::None))
                }
                None => {
                    record.failed_attempts += 1;
                    let mut notify = Notify::None;
                    if record.failed_attempts >= record.max_failed_attempts {
                        record.status = ActivationStatus::Blocked;
                        record.blocked_reason = Some(REASON_MAX_FAILED_ATTEMPTS.to_string());
                        repository::insert_history(
                            tx,
                            activation_id,
                            ActivationStatus::Blocked,
                            Some(REASON_MAX_FAILED_ATTEMPTS),
                            now,
                        )?;
                        notify = Notify::Blocked(record.application_id);
                    }
                    repository::update_activation(tx, &record)?;
                    repository::insert_signature_audit(
                        tx,
                        activation_id,
                        record.counter,
                        audit_type.as_str(),
                        &hash,
                        false,
                        audit_note,
                        now,
                    )?;
                    Ok((VerifySignatureResponse::from_record(&record, false), notify))
                }
            }
        })?;

        match notify {
            Notify::Blocked(application_id) => {
                self.activation.callbacks().notify(application_id, activation_id);
                warn!(activation_id, "activation blocked after failed signatures");
            }
            Notify::Expired(application_id) => {
                self.activation.callbacks().notify(application_id, activation_id);
            }
            Notify::None => {}
        }
        if response.signature_valid {
            info!(activation_id, "signature verified");
        }
        Ok(response)
    }

    /// Derive the HMAC token digest used by `validate_token`
    pub(crate) fn token_digest(token_secret: &[u8], nonce: &[u8], timestamp_ms: u64) -> [u8; 32] {
        let mut data = Vec::with_capacity(nonce.len() + 1 + 8);
        data.extend_from_slice(nonce);
        data.push(b'&');
        data.extend_from_slice(&timestamp_ms.to_be_bytes());
        hmac_sha256(token_secret, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_hash_is_sha256_hex() {
        let hash = data_hash(b"");
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_token_digest_varies_with_inputs() {
        let base = SignatureService::token_digest(b"secret", b"nonce", 1000);
        assert_eq!(base, SignatureService::token_digest(b"secret", b"nonce", 1000));
        assert_ne!(base, SignatureService::token_digest(b"secret", b"nonce", 1001));
        assert_ne!(base, SignatureService::token_digest(b"secret", b"other", 1000));
        assert_ne!(base, SignatureService::token_digest(b"other", b"nonce", 1000));
    }
}
