//! Recovery codes and PUKs
//!
//! A recovery code lets a user re-activate after losing the device. Codes
//! share the activation-code alphabet and checksum; each owns an ordered
//! set of one-time PUKs. Only HMAC hashes of PUKs are persisted, keyed by a
//! value derived from the code itself; the plaintext PUK set leaves the
//! server exactly once, at issuance.
//!
//! Consumption walks the lowest-index VALID PUK: a match burns the PUK and
//! re-enters the activation Init path for the same user and application; a
//! mismatch counts toward the blocking threshold and reports the index the
//! client should be asking for.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::info;

use crate::clock::Timestamp;
use crate::config::RecoveryConfig;
use crate::core_activation::{ActivationService, InitActivationRequest, InitActivationResponse};
use crate::core_crypto::codes;
use crate::core_crypto::kdf::hmac_sha256;
use crate::core_store::model::{ActivationRecord, PukStatus, RecoveryCode, RecoveryCodeStatus};
use crate::core_store::repository;
use crate::error::{ServiceError, ServiceResult};

/// Plaintext recovery payload embedded in the encrypted Prepare response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationRecoveryData {
    pub recovery_code: String,
    pub puks: Vec<String>,
}

/// Response to standalone recovery code creation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRecoveryCode {
    pub recovery_code: String,
    pub puks: Vec<String>,
    pub status: String,
}

/// One row of a recovery lookup
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryCodeDetail {
    pub recovery_code: String,
    pub user_id: String,
    pub activation_id: Option<String>,
    pub status: String,
    pub failed_attempts: u32,
    pub max_failed_attempts: u32,
    pub puk_statuses: Vec<String>,
}

fn puk_status_name(status: PukStatus) -> &'static str {
    match status {
        PukStatus::Valid => "VALID",
        PukStatus::Used => "USED",
        PukStatus::Invalid => "INVALID",
    }
}

/// Hash a PUK for storage. The hashing key derives from the code so equal
/// PUKs under different codes never share a hash.
fn hash_puk(recovery_code: &str, puk: &str, index: u32) -> String {
    let key = hmac_sha256(recovery_code.as_bytes(), b"recovery-puk-hash");
    let mut data = Vec::with_capacity(puk.len() + 4);
    data.extend_from_slice(puk.as_bytes());
    data.extend_from_slice(&index.to_be_bytes());
    BASE64.encode(hmac_sha256(&key, &data))
}

fn unique_recovery_code(
    conn: &Connection,
    application_id: i64,
    budget: u32,
) -> ServiceResult<String> {
    for _ in 0..budget {
        let candidate = codes::generate_code();
        if repository::find_recovery_code(conn, application_id, &candidate)?.is_none() {
            return Ok(candidate);
        }
    }
    Err(ServiceError::UnableToGenerateRecoveryCode)
}

fn insert_code_with_puks(
    conn: &Connection,
    application_id: i64,
    user_id: &str,
    activation_id: Option<&str>,
    status: RecoveryCodeStatus,
    puk_count: u32,
    max_failed_attempts: u32,
    budget: u32,
    now: Timestamp,
) -> ServiceResult<(String, Vec<String>)> {
    let code = unique_recovery_code(conn, application_id, budget)?;
    let record = RecoveryCode {
        id: 0,
        application_id,
        user_id: user_id.to_string(),
        activation_id: activation_id.map(|s| s.to_string()),
        code: code.clone(),
        status,
        failed_attempts: 0,
        max_failed_attempts,
        timestamp_created: now,
    };
    let code_id = repository::insert_recovery_code(conn, &record)?;

    let mut puks = Vec::with_capacity(puk_count as usize);
    for index in 1..=puk_count {
        let puk = codes::generate_puk();
        repository::insert_recovery_puk(conn, code_id, index, &hash_puk(&code, &puk, index))?;
        puks.push(puk);
    }
    Ok((code, puks))
}

/// Issue an activation-linked recovery code inside the Prepare transaction.
/// Returns None when the application has recovery disabled.
pub(crate) fn issue_for_activation(
    conn: &Connection,
    defaults: &RecoveryConfig,
    record: &ActivationRecord,
    now: Timestamp,
) -> ServiceResult<Option<ActivationRecoveryData>> {
    let Some(config) = repository::get_recovery_config(conn, record.application_id)? else {
        return Ok(None);
    };
    if !config.activation_recovery_enabled {
        return Ok(None);
    }

    let (recovery_code, puks) = insert_code_with_puks(
        conn,
        record.application_id,
        &record.user_id,
        Some(&record.activation_id),
        // the device receives the code inside the activation response, so
        // no separate confirmation round-trip is needed
        RecoveryCodeStatus::Active,
        config.puk_count.clamp(1, 10),
        defaults.max_failed_attempts,
        defaults.generate_recovery_code_iterations,
        now,
    )?;

    Ok(Some(ActivationRecoveryData { recovery_code, puks }))
}

/// Recovery subsystem service
pub struct RecoveryService {
    activation: Arc<ActivationService>,
    config: RecoveryConfig,
}

impl RecoveryService {
    pub fn new(activation: Arc<ActivationService>, config: RecoveryConfig) -> Self {
        Self { activation, config }
    }

    /// Create a user-scoped recovery code (out-of-band delivery). At most
    /// one non-revoked user-scoped code may exist per user and application.
    pub fn create_recovery_code(
        &self,
        application_id: i64,
        user_id: &str,
        puk_count: Option<u32>,
    ) -> ServiceResult<CreatedRecoveryCode> {
        if user_id.trim().is_empty() {
            return Err(ServiceError::NoUserId);
        }
        let puk_count = puk_count.unwrap_or(self.config.puk_count);
        if puk_count == 0 || puk_count > 10 {
            return Err(ServiceError::InvalidRequest("puk_count must be in 1..=10".to_string()));
        }

        let now = self.activation.clock().now();
        let config = self.config.clone();

        let (code, puks) = self.activation.store().transaction(|tx| {
            repository::find_application(tx, application_id)?.ok_or(ServiceError::NoApplicationId)?;

            let live = repository::find_live_recovery_codes_for_user(tx, application_id, user_id)?;
            if live.iter().any(|c| c.activation_id.is_none()) {
                return Err(ServiceError::RecoveryCodeAlreadyExists);
            }

            insert_code_with_puks(
                tx,
                application_id,
                user_id,
                None,
                RecoveryCodeStatus::Created,
                puk_count,
                config.max_failed_attempts,
                config.generate_recovery_code_iterations,
                now,
            )
        })?;

        info!(application_id, user_id, "recovery code created");
        Ok(CreatedRecoveryCode {
            recovery_code: code,
            puks,
            status: RecoveryCodeStatus::Created.as_str().to_string(),
        })
    }

    /// Confirm receipt of a recovery code (CREATED → ACTIVE). Returns
    /// whether the code had already been confirmed.
    pub fn confirm_recovery_code(
        &self,
        application_id: i64,
        recovery_code: &str,
    ) -> ServiceResult<bool> {
        self.activation.store().transaction(|tx| {
            let mut record = repository::find_recovery_code(tx, application_id, recovery_code)?
                .ok_or(ServiceError::InvalidRecoveryCode { current_puk_index: None })?;

            match record.status {
                RecoveryCodeStatus::Active => Ok(true),
                RecoveryCodeStatus::Created => {
                    record.status = RecoveryCodeStatus::Active;
                    repository::update_recovery_code(tx, &record)?;
                    Ok(false)
                }
                _ => Err(ServiceError::InvalidRecoveryCode { current_puk_index: None }),
            }
        })
    }

    /// Search recovery codes with their PUK states
    pub fn lookup_recovery_codes(
        &self,
        application_id: i64,
        user_id: Option<&str>,
        activation_id: Option<&str>,
        status: Option<RecoveryCodeStatus>,
    ) -> ServiceResult<Vec<RecoveryCodeDetail>> {
        self.activation.store().read(|conn| {
            let records =
                repository::lookup_recovery_codes(conn, application_id, user_id, activation_id, status)?;
            let mut details = Vec::with_capacity(records.len());
            for record in records {
                let puks = repository::find_recovery_puks(conn, record.id)?;
                details.push(RecoveryCodeDetail {
                    recovery_code: record.code,
                    user_id: record.user_id,
                    activation_id: record.activation_id,
                    status: record.status.as_str().to_string(),
                    failed_attempts: record.failed_attempts,
                    max_failed_attempts: record.max_failed_attempts,
                    puk_statuses: puks
                        .iter()
                        .map(|p| puk_status_name(p.status).to_string())
                        .collect(),
                });
            }
            Ok(details)
        })
    }

    /// Revoke recovery codes and invalidate their remaining PUKs
    pub fn revoke_recovery_codes(
        &self,
        application_id: i64,
        recovery_codes: &[String],
    ) -> ServiceResult<u32> {
        self.activation.store().transaction(|tx| {
            let mut revoked = 0;
            for code in recovery_codes {
                let Some(mut record) = repository::find_recovery_code(tx, application_id, code)? else {
                    continue;
                };
                if record.status == RecoveryCodeStatus::Revoked {
                    continue;
                }
                record.status = RecoveryCodeStatus::Revoked;
                repository::update_recovery_code(tx, &record)?;
                for puk in repository::find_recovery_puks(tx, record.id)? {
                    if puk.status == PukStatus::Valid {
                        repository::update_puk_status(tx, puk.id, PukStatus::Invalid)?;
                    }
                }
                revoked += 1;
            }
            Ok(revoked)
        })
    }

    /// Consume a PUK and create a fresh activation for the code's user
    pub fn recovery_activation(
        &self,
        application_id: i64,
        recovery_code: &str,
        puk: &str,
        activation_name: Option<String>,
    ) -> ServiceResult<InitActivationResponse> {
        if !codes::validate_code(recovery_code) {
            return Err(ServiceError::InvalidRecoveryCode { current_puk_index: None });
        }
        if !codes::validate_puk(puk) {
            return Err(ServiceError::InvalidRequest("malformed PUK".to_string()));
        }

        enum Outcome {
            Matched { user_id: String },
            Mismatch { current_puk_index: Option<u32> },
        }

        let outcome = self.activation.store().transaction(|tx| {
            let mut record = repository::find_recovery_code(tx, application_id, recovery_code)?
                .ok_or(ServiceError::InvalidRecoveryCode { current_puk_index: None })?;

            if record.status != RecoveryCodeStatus::Active {
                return Err(ServiceError::InvalidRecoveryCode { current_puk_index: None });
            }

            let puks = repository::find_recovery_puks(tx, record.id)?;
            let current = puks.iter().find(|p| p.status == PukStatus::Valid);
            let Some(current) = current else {
                // no PUKs left; the code should already be revoked
                record.status = RecoveryCodeStatus::Revoked;
                repository::update_recovery_code(tx, &record)?;
                return Err(ServiceError::InvalidRecoveryCode { current_puk_index: None });
            };

            let expected = hash_puk(recovery_code, puk, current.puk_index);
            let matches: bool = expected
                .as_bytes()
                .ct_eq(current.puk_hash.as_bytes())
                .into();

            if matches {
                repository::update_puk_status(tx, current.id, PukStatus::Used)?;
                record.failed_attempts = 0;
                let remaining_valid = puks
                    .iter()
                    .any(|p| p.id != current.id && p.status == PukStatus::Valid);
                if !remaining_valid {
                    record.status = RecoveryCodeStatus::Revoked;
                }
                repository::update_recovery_code(tx, &record)?;
                Ok(Outcome::Matched {
                    user_id: record.user_id.clone(),
                })
            } else {
                record.failed_attempts += 1;
                if record.failed_attempts >= record.max_failed_attempts {
                    record.status = RecoveryCodeStatus::Blocked;
                    for p in &puks {
                        if p.status == PukStatus::Valid {
                            repository::update_puk_status(tx, p.id, PukStatus::Invalid)?;
                        }
                    }
                }
                repository::update_recovery_code(tx, &record)?;
                Ok(Outcome::Mismatch {
                    current_puk_index: Some(current.puk_index),
                })
            }
        })?;

        match outcome {
            Outcome::Matched { user_id } => {
                info!(application_id, "recovery PUK consumed, issuing activation");
                self.activation.init(InitActivationRequest {
                    user_id,
                    application_id,
                    activation_name,
                    extras: None,
                    max_failed_attempts: None,
                    expire_at: None,
                })
            }
            Outcome::Mismatch { current_puk_index } => {
                Err(ServiceError::InvalidRecoveryCode { current_puk_index })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_puk_hash_binds_code_and_index() {
        let base = hash_puk("AAAAA-BBBBB-CCCCC-DDDDD", "0123456789", 1);
        assert_eq!(base, hash_puk("AAAAA-BBBBB-CCCCC-DDDDD", "0123456789", 1));
        assert_ne!(base, hash_puk("AAAAA-BBBBB-CCCCC-EEEEE", "0123456789", 1));
        assert_ne!(base, hash_puk("AAAAA-BBBBB-CCCCC-DDDDD", "0123456789", 2));
        assert_ne!(base, hash_puk("AAAAA-BBBBB-CCCCC-DDDDD", "9876543210", 1));
    }

    #[test]
    fn test_puk_status_names() {
        assert_eq!(puk_status_name(PukStatus::Valid), "VALID");
        assert_eq!(puk_status_name(PukStatus::Used), "USED");
        assert_eq!(puk_status_name(PukStatus::Invalid), "INVALID");
    }
}
