//! Activation lifecycle
//!
//! The state machine at the center of the server: Init creates a pending
//! activation, Prepare binds the device key (CREATED → OTP_USED), Commit
//! arms it (OTP_USED → ACTIVE), and block/unblock/remove manage the rest of
//! its life. Every transition runs in one immediate transaction together
//! with its history append; the post-commit callback is fire-and-forget.
//!
//! Expiration is lazy: any read that touches a pending activation past its
//! commit window first moves it to REMOVED.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::callback::CallbackDispatcher;
use crate::clock::{Clock, Timestamp};
use crate::config::{CryptoConfig, RecoveryConfig};
use crate::core_codec::KeyAtRestCodec;
use crate::core_crypto::ecies::{decrypt_request, EciesEnvelope, EciesPayload};
use crate::core_crypto::fingerprint::compute_fingerprint;
use crate::core_crypto::kdf::derive_transport_key;
use crate::core_crypto::status_blob::{encrypt_status_blob, random_status_blob, StatusBlob};
use crate::core_crypto::{codes, EcKeyPair, EcPublicKey};
use crate::core_recovery::{self, ActivationRecoveryData};
use crate::core_store::model::{ActivationRecord, ActivationStatus};
use crate::core_store::{repository, Store};
use crate::error::{ServiceError, ServiceResult};

/// Current protocol major version
pub const PROTOCOL_VERSION: u32 = 3;

/// Reason recorded when an admin blocks without giving one
pub const REASON_NOT_SPECIFIED: &str = "NOT_SPECIFIED";

/// Reason recorded when the failed-attempt threshold blocks an activation
pub const REASON_MAX_FAILED_ATTEMPTS: &str = "MAX_FAILED_ATTEMPTS";

/// Reason recorded on lazy expiration
const REASON_EXPIRED: &str = "EXPIRED";

/// Init request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitActivationRequest {
    pub user_id: String,
    pub application_id: i64,
    pub activation_name: Option<String>,
    pub extras: Option<String>,
    pub max_failed_attempts: Option<u32>,
    /// Absolute expiration override; defaults to now + activation validity
    pub expire_at: Option<u64>,
}

/// Init response: everything the operator hands to the device out-of-band
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitActivationResponse {
    pub activation_id: String,
    pub activation_code: String,
    pub activation_signature: String,
    pub user_id: String,
    pub application_id: i64,
}

/// Prepare request: the device delivers its public key inside an encrypted
/// envelope keyed by the application secret and the master server key
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareActivationRequest {
    pub activation_code: String,
    pub application_key: String,
    pub envelope: EciesEnvelope,
}

/// Plaintext of the encrypted Prepare response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparePayload {
    pub activation_id: String,
    pub server_public_key: String,
    pub device_public_key_fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activation_recovery: Option<ActivationRecoveryData>,
}

/// Activation status response; shape is identical for real and synthesized
/// activations so an attacker learns nothing from a probe
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationStatusResponse {
    pub activation_id: String,
    pub activation_status: String,
    pub blocked_reason: Option<String>,
    pub activation_name: Option<String>,
    pub user_id: String,
    pub extras: Option<String>,
    pub application_id: i64,
    pub timestamp_created: u64,
    pub timestamp_last_used: u64,
    pub encrypted_status_blob: String,
    pub activation_code: Option<String>,
    pub activation_signature: Option<String>,
    pub device_public_key_fingerprint: Option<String>,
    pub version: u32,
}

/// Compact entry for list-by-user
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationSummary {
    pub activation_id: String,
    pub activation_status: String,
    pub blocked_reason: Option<String>,
    pub activation_name: Option<String>,
    pub user_id: String,
    pub application_id: i64,
    pub timestamp_created: u64,
    pub timestamp_last_used: u64,
    pub version: Option<u32>,
}

impl ActivationSummary {
    fn from_record(record: &ActivationRecord) -> Self {
        Self {
            activation_id: record.activation_id.clone(),
            activation_status: record.status.as_str().to_string(),
            blocked_reason: record.blocked_reason.clone(),
            activation_name: record.activation_name.clone(),
            user_id: record.user_id.clone(),
            application_id: record.application_id,
            timestamp_created: record.timestamp_created.as_millis(),
            timestamp_last_used: record.timestamp_last_used.as_millis(),
            version: record.version,
        }
    }
}

/// Activation lifecycle service
pub struct ActivationService {
    store: Store,
    clock: Arc<dyn Clock>,
    codec: KeyAtRestCodec,
    callbacks: CallbackDispatcher,
    crypto: CryptoConfig,
    recovery: RecoveryConfig,
}

/// Recompute the ECDH master secret of an activation from its stored key
/// material. Requires the device public key, i.e. a record past Prepare.
pub(crate) fn master_secret(
    codec: &KeyAtRestCodec,
    record: &ActivationRecord,
) -> ServiceResult<[u8; 32]> {
    let device_key_b64 = record
        .device_key_public
        .as_ref()
        .ok_or_else(|| ServiceError::ActivationIncorrectState(record.status.as_str().to_string()))?;
    let device_key = EcPublicKey::from_base64(device_key_b64)?;
    let server_private_bytes = codec.decrypt(
        &record.server_key_private,
        record.encryption_mode,
        &record.user_id,
        &record.activation_id,
    )?;
    let server_key = EcKeyPair::from_private_bytes(&server_private_bytes)?;
    Ok(server_key.shared_secret(&device_key))
}

/// Apply lazy expiration inside the caller's transaction. Returns true if
/// the record transitioned to REMOVED (the caller must still deliver the
/// callback after commit).
pub(crate) fn expire_if_needed(
    conn: &Connection,
    record: &mut ActivationRecord,
    now: Timestamp,
) -> ServiceResult<bool> {
    if !record.is_expired(now) {
        return Ok(false);
    }
    record.status = ActivationStatus::Removed;
    repository::update_activation(conn, record)?;
    repository::insert_history(conn, &record.activation_id, record.status, Some(REASON_EXPIRED), now)?;
    info!(activation_id = %record.activation_id, "activation expired");
    Ok(true)
}

impl ActivationService {
    pub fn new(
        store: Store,
        clock: Arc<dyn Clock>,
        codec: KeyAtRestCodec,
        callbacks: CallbackDispatcher,
        crypto: CryptoConfig,
        recovery: RecoveryConfig,
    ) -> Self {
        Self {
            store,
            clock,
            codec,
            callbacks,
            crypto,
            recovery,
        }
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn callbacks(&self) -> &CallbackDispatcher {
        &self.callbacks
    }

    pub(crate) fn codec(&self) -> &KeyAtRestCodec {
        &self.codec
    }

    pub(crate) fn crypto_config(&self) -> &CryptoConfig {
        &self.crypto
    }

    /// Initialize a new activation for a user
    pub fn init(&self, request: InitActivationRequest) -> ServiceResult<InitActivationResponse> {
        if request.user_id.trim().is_empty() {
            return Err(ServiceError::NoUserId);
        }

        let now = self.clock.now();
        let expire_at = request
            .expire_at
            .map(Timestamp::from_millis)
            .unwrap_or_else(|| now.plus_millis(self.crypto.activation_validity.as_millis() as u64));
        let max_failed_attempts = request
            .max_failed_attempts
            .unwrap_or(self.crypto.signature_max_failed_attempts);

        let id_budget = self.crypto.generate_activation_id_iterations;
        let code_budget = self.crypto.generate_activation_code_iterations;
        let codec = &self.codec;

        let response = self.store.transaction(|tx| {
            repository::find_application(tx, request.application_id)?
                .ok_or(ServiceError::NoApplicationId)?;
            let master = repository::find_current_master_key_pair(tx, request.application_id)?
                .ok_or(ServiceError::NoMasterKeyPair)?;
            let master_key = EcKeyPair::from_private_base64(&master.master_key_private)
                .map_err(|_| ServiceError::IncorrectMasterKeyPairPrivate)?;

            let activation_id = Self::unique_activation_id(tx, id_budget)?;
            let activation_code =
                Self::unique_activation_code(tx, request.application_id, now, code_budget)?;

            let activation_signature = BASE64.encode(master_key.sign(activation_code.as_bytes()));

            let server_key = EcKeyPair::generate();
            let (server_key_private, encryption_mode) =
                codec.encrypt(&server_key.private_bytes(), &request.user_id, &activation_id);

            let record = ActivationRecord {
                activation_id: activation_id.clone(),
                activation_code: activation_code.clone(),
                activation_signature: activation_signature.clone(),
                user_id: request.user_id.clone(),
                application_id: request.application_id,
                master_keypair_id: master.id,
                activation_name: request.activation_name.clone(),
                extras: request.extras.clone(),
                server_key_public: server_key.public_key().to_base64(),
                server_key_private,
                encryption_mode,
                device_key_public: None,
                counter: 0,
                failed_attempts: 0,
                max_failed_attempts,
                status: ActivationStatus::Created,
                blocked_reason: None,
                version: None,
                timestamp_created: now,
                timestamp_last_used: now,
                timestamp_activation_expire: expire_at,
            };
            repository::insert_activation(tx, &record)?;
            repository::insert_history(tx, &activation_id, ActivationStatus::Created, None, now)?;

            Ok(InitActivationResponse {
                activation_id,
                activation_code,
                activation_signature,
                user_id: request.user_id.clone(),
                application_id: request.application_id,
            })
        })?;

        self.callbacks
            .notify(response.application_id, &response.activation_id);
        info!(activation_id = %response.activation_id, "activation initialized");
        Ok(response)
    }

    fn unique_activation_id(conn: &Connection, budget: u32) -> ServiceResult<String> {
        for _ in 0..budget {
            let candidate = Uuid::new_v4().to_string();
            if !repository::activation_id_exists(conn, &candidate)? {
                return Ok(candidate);
            }
        }
        Err(ServiceError::UnableToGenerateActivationId)
    }

    fn unique_activation_code(
        conn: &Connection,
        application_id: i64,
        now: Timestamp,
        budget: u32,
    ) -> ServiceResult<String> {
        for _ in 0..budget {
            let candidate = codes::generate_code();
            if !repository::activation_code_in_use(conn, application_id, &candidate, now)? {
                return Ok(candidate);
            }
        }
        Err(ServiceError::UnableToGenerateActivationCode)
    }

    /// Bind the device public key to a pending activation
    ///
    /// An envelope that does not decrypt to a valid P-256 point burns the
    /// activation: it transitions to REMOVED in the same transaction and
    /// the caller sees the same `ACTIVATION_NOT_FOUND` as for a code that
    /// never existed.
    pub fn prepare(&self, request: PrepareActivationRequest) -> ServiceResult<EciesPayload> {
        if !codes::validate_code(&request.activation_code) {
            return Err(ServiceError::ActivationNotFound);
        }

        // resolve client credentials outside the write transaction; a
        // wrong application key never touches activation state
        let credentials = self
            .store
            .read(|conn| repository::find_version_by_application_key(conn, &request.application_key))?
            .filter(|v| v.supported)
            .ok_or(ServiceError::ActivationNotFound)?;

        let now = self.clock.now();
        let recovery_defaults = self.recovery.clone();

        enum Outcome {
            Done(Box<EciesPayload>, i64, String),
            InvalidKey(i64, String),
        }

        let outcome = self.store.transaction(|tx| {
            let mut record = repository::find_created_activation(
                tx,
                credentials.application_id,
                &request.activation_code,
                now,
            )?
            .ok_or(ServiceError::ActivationNotFound)?;

            let master = repository::find_master_key_pair(tx, record.master_keypair_id)?
                .ok_or(ServiceError::NoMasterKeyPair)?;
            let master_key = EcKeyPair::from_private_base64(&master.master_key_private)
                .map_err(|_| ServiceError::IncorrectMasterKeyPairPrivate)?;

            let decrypted = decrypt_request(
                &master_key,
                credentials.application_secret.as_bytes(),
                &request.envelope,
            );

            let (device_key_bytes, context) = match decrypted {
                Ok(out) => out,
                Err(_) => {
                    record.status = ActivationStatus::Removed;
                    repository::update_activation(tx, &record)?;
                    repository::insert_history(
                        tx,
                        &record.activation_id,
                        ActivationStatus::Removed,
                        Some("INVALID_DEVICE_KEY"),
                        now,
                    )?;
                    return Ok(Outcome::InvalidKey(
                        record.application_id,
                        record.activation_id.clone(),
                    ));
                }
            };

            let device_key = match EcPublicKey::from_bytes(&device_key_bytes) {
                Ok(key) => key,
                Err(_) => {
                    record.status = ActivationStatus::Removed;
                    repository::update_activation(tx, &record)?;
                    repository::insert_history(
                        tx,
                        &record.activation_id,
                        ActivationStatus::Removed,
                        Some("INVALID_DEVICE_KEY"),
                        now,
                    )?;
                    return Ok(Outcome::InvalidKey(
                        record.application_id,
                        record.activation_id.clone(),
                    ));
                }
            };

            record.device_key_public = Some(device_key.to_base64());
            record.status = ActivationStatus::OtpUsed;
            record.timestamp_last_used = now;
            repository::update_activation(tx, &record)?;
            repository::insert_history(tx, &record.activation_id, ActivationStatus::OtpUsed, None, now)?;

            let server_public = EcPublicKey::from_base64(&record.server_key_public)?;
            let fingerprint = compute_fingerprint(&device_key, &record.activation_id, &server_public);

            let activation_recovery =
                core_recovery::issue_for_activation(tx, &recovery_defaults, &record, now)?;

            let payload = PreparePayload {
                activation_id: record.activation_id.clone(),
                server_public_key: record.server_key_public.clone(),
                device_public_key_fingerprint: fingerprint,
                activation_recovery,
            };
            let plaintext = serde_json::to_vec(&payload)
                .map_err(|e| ServiceError::Cryptography(format!("payload encoding failed: {}", e)))?;

            Ok(Outcome::Done(
                Box::new(context.encrypt_response(&plaintext)),
                record.application_id,
                record.activation_id.clone(),
            ))
        })?;

        match outcome {
            Outcome::Done(payload, application_id, activation_id) => {
                self.callbacks.notify(application_id, &activation_id);
                info!(activation_id = %activation_id, "activation prepared");
                Ok(*payload)
            }
            Outcome::InvalidKey(application_id, activation_id) => {
                self.callbacks.notify(application_id, &activation_id);
                warn!(activation_id = %activation_id, "prepare with invalid device key");
                Err(ServiceError::ActivationNotFound)
            }
        }
    }

    /// Commit a prepared activation (OTP_USED → ACTIVE)
    pub fn commit(&self, activation_id: &str) -> ServiceResult<()> {
        let now = self.clock.now();

        let application_id = self.store.transaction(|tx| {
            let mut record = repository::find_activation(tx, activation_id)?
                .ok_or(ServiceError::ActivationNotFound)?;

            if expire_if_needed(tx, &mut record, now)? {
                return Err(ServiceError::ActivationExpired);
            }

            match record.status {
                ActivationStatus::OtpUsed => {}
                ActivationStatus::Removed => return Err(ServiceError::ActivationExpired),
                other => {
                    return Err(ServiceError::ActivationIncorrectState(
                        other.as_str().to_string(),
                    ))
                }
            }

            record.status = ActivationStatus::Active;
            record.timestamp_last_used = now;
            repository::update_activation(tx, &record)?;
            repository::insert_history(tx, activation_id, ActivationStatus::Active, None, now)?;
            Ok(record.application_id)
        });

        match application_id {
            Ok(application_id) => {
                self.callbacks.notify(application_id, activation_id);
                info!(activation_id, "activation committed");
                Ok(())
            }
            Err(e) => {
                // expiration mutated the row and must still notify; the
                // transaction for the expiry path commits separately below
                if matches!(e, ServiceError::ActivationExpired) {
                    self.expire_and_notify(activation_id, now);
                }
                Err(e)
            }
        }
    }

    /// A failed commit due to expiration still has to persist the REMOVED
    /// transition (the original transaction rolled back with the error).
    fn expire_and_notify(&self, activation_id: &str, now: Timestamp) {
        let expired = self.store.transaction(|tx| {
            let Some(mut record) = repository::find_activation(tx, activation_id)? else {
                return Ok(None);
            };
            if expire_if_needed(tx, &mut record, now)? {
                return Ok(Some(record.application_id));
            }
            Ok(None)
        });
        if let Ok(Some(application_id)) = expired {
            self.callbacks.notify(application_id, activation_id);
        }
    }

    /// Block an active activation
    pub fn block(&self, activation_id: &str, reason: Option<&str>) -> ServiceResult<()> {
        let now = self.clock.now();
        let reason = reason.unwrap_or(REASON_NOT_SPECIFIED).to_string();

        let application_id = self.store.transaction(|tx| {
            let mut record = repository::find_activation(tx, activation_id)?
                .ok_or(ServiceError::ActivationNotFound)?;

            if record.status != ActivationStatus::Active {
                return Err(ServiceError::ActivationIncorrectState(
                    record.status.as_str().to_string(),
                ));
            }

            record.status = ActivationStatus::Blocked;
            record.blocked_reason = Some(reason.clone());
            repository::update_activation(tx, &record)?;
            repository::insert_history(tx, activation_id, ActivationStatus::Blocked, Some(&reason), now)?;
            Ok(record.application_id)
        })?;

        self.callbacks.notify(application_id, activation_id);
        info!(activation_id, reason = %reason, "activation blocked");
        Ok(())
    }

    /// Unblock a blocked activation; resets the failed-attempt counter
    pub fn unblock(&self, activation_id: &str) -> ServiceResult<()> {
        let now = self.clock.now();

        let application_id = self.store.transaction(|tx| {
            let mut record = repository::find_activation(tx, activation_id)?
                .ok_or(ServiceError::ActivationNotFound)?;

            if record.status != ActivationStatus::Blocked {
                return Err(ServiceError::ActivationIncorrectState(
                    record.status.as_str().to_string(),
                ));
            }

            record.status = ActivationStatus::Active;
            record.blocked_reason = None;
            record.failed_attempts = 0;
            repository::update_activation(tx, &record)?;
            repository::insert_history(tx, activation_id, ActivationStatus::Active, Some("UNBLOCKED"), now)?;
            Ok(record.application_id)
        })?;

        self.callbacks.notify(application_id, activation_id);
        info!(activation_id, "activation unblocked");
        Ok(())
    }

    /// Remove an activation; permitted from any state and idempotent
    pub fn remove(&self, activation_id: &str) -> ServiceResult<()> {
        let now = self.clock.now();

        let notification = self.store.transaction(|tx| {
            let mut record = repository::find_activation(tx, activation_id)?
                .ok_or(ServiceError::ActivationNotFound)?;

            if record.status == ActivationStatus::Removed {
                return Ok(None);
            }

            record.status = ActivationStatus::Removed;
            repository::update_activation(tx, &record)?;
            repository::insert_history(tx, activation_id, ActivationStatus::Removed, None, now)?;
            Ok(Some(record.application_id))
        })?;

        if let Some(application_id) = notification {
            self.callbacks.notify(application_id, activation_id);
            info!(activation_id, "activation removed");
        }
        Ok(())
    }

    /// Activation status for the device
    ///
    /// Unknown activations get a synthesized REMOVED response with a fresh
    /// random blob: existing-but-removed and never-existed are
    /// indistinguishable to a probing client.
    pub fn get_status(&self, activation_id: &str) -> ServiceResult<ActivationStatusResponse> {
        let now = self.clock.now();

        let loaded = self.store.transaction(|tx| {
            let Some(mut record) = repository::find_activation(tx, activation_id)? else {
                return Ok(None);
            };
            let expired = expire_if_needed(tx, &mut record, now)?;
            Ok(Some((record, expired)))
        })?;

        let Some((record, expired)) = loaded else {
            return Ok(Self::synthesized_status(activation_id));
        };
        if expired {
            self.callbacks.notify(record.application_id, activation_id);
        }

        let version = record.version.unwrap_or(PROTOCOL_VERSION);
        let mut response = ActivationStatusResponse {
            activation_id: record.activation_id.clone(),
            activation_status: record.status.as_str().to_string(),
            blocked_reason: record.blocked_reason.clone(),
            activation_name: record.activation_name.clone(),
            user_id: record.user_id.clone(),
            extras: record.extras.clone(),
            application_id: record.application_id,
            timestamp_created: record.timestamp_created.as_millis(),
            timestamp_last_used: record.timestamp_last_used.as_millis(),
            encrypted_status_blob: BASE64.encode(random_status_blob()),
            activation_code: None,
            activation_signature: None,
            device_public_key_fingerprint: None,
            version,
        };

        match (&record.status, &record.device_key_public) {
            (ActivationStatus::Created, _) => {
                // no device key yet; the device retries Prepare with the
                // re-delivered code and signature
                response.activation_code = Some(record.activation_code.clone());
                response.activation_signature = Some(record.activation_signature.clone());
            }
            (_, Some(device_key_b64)) => {
                let device_key = EcPublicKey::from_base64(device_key_b64)?;
                let server_public = EcPublicKey::from_base64(&record.server_key_public)?;
                let server_private_bytes = self.codec.decrypt(
                    &record.server_key_private,
                    record.encryption_mode,
                    &record.user_id,
                    &record.activation_id,
                )?;
                let server_key = EcKeyPair::from_private_bytes(&server_private_bytes)?;
                let transport_key = derive_transport_key(&server_key.shared_secret(&device_key));

                let blob = StatusBlob {
                    status: record.status.as_i64() as u8,
                    current_version: version as u8,
                    upgrade_version: PROTOCOL_VERSION as u8,
                    failed_attempts: record.failed_attempts.min(u8::MAX as u32) as u8,
                    max_failed_attempts: record.max_failed_attempts.min(u8::MAX as u32) as u8,
                    counter_distance: 0,
                };
                response.encrypted_status_blob =
                    BASE64.encode(encrypt_status_blob(blob, &transport_key, record.counter));
                response.device_public_key_fingerprint = Some(compute_fingerprint(
                    &device_key,
                    &record.activation_id,
                    &server_public,
                ));
            }
            _ => {
                // device key lost without a terminal state would be a
                // storage-level inconsistency; the random blob already set
                // is the safe answer
            }
        }

        Ok(response)
    }

    fn synthesized_status(activation_id: &str) -> ActivationStatusResponse {
        ActivationStatusResponse {
            activation_id: activation_id.to_string(),
            activation_status: ActivationStatus::Removed.as_str().to_string(),
            blocked_reason: None,
            activation_name: None,
            user_id: "unknown".to_string(),
            extras: None,
            application_id: 0,
            timestamp_created: Timestamp::epoch().as_millis(),
            timestamp_last_used: Timestamp::epoch().as_millis(),
            encrypted_status_blob: BASE64.encode(random_status_blob()),
            activation_code: None,
            activation_signature: None,
            device_public_key_fingerprint: None,
            version: PROTOCOL_VERSION,
        }
    }

    /// All activations of a user, optionally narrowed to one application
    pub fn list_for_user(
        &self,
        user_id: &str,
        application_id: Option<i64>,
    ) -> ServiceResult<Vec<ActivationSummary>> {
        if user_id.trim().is_empty() {
            return Err(ServiceError::NoUserId);
        }
        let records = self
            .store
            .read(|conn| repository::find_activations_by_user(conn, user_id, application_id))?;
        Ok(records.iter().map(ActivationSummary::from_record).collect())
    }
}
