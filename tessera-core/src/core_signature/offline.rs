//! Offline signature support
//!
//! QR-code flows where the device cannot reach the server directly. The
//! server renders a payload of the form
//!
//! ```text
//! {data}\n{nonce}\n{indicator}{ecdsa_signature}
//! ```
//!
//! where the indicator is `1` for personalized payloads (signed by the
//! activation's server key) and `0` for non-personalized ones (signed by
//! the application master key). Offline verification runs the same engine
//! as online verification, with the literal `offline` standing in for the
//! application secret and an optional biometry allowance.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::SignatureService;
use crate::core_crypto::signature::SignatureType;
use crate::core_crypto::EcKeyPair;
use crate::core_store::repository;
use crate::error::{ServiceError, ServiceResult};

/// Application secret placeholder for offline signatures
const OFFLINE_SECRET: &[u8] = b"offline";

/// Indicator for payloads signed by the per-activation server key
const KEY_SERVER_PRIVATE: char = '1';

/// Indicator for payloads signed by the application master key
const KEY_SERVER_MASTER_PRIVATE: char = '0';

/// Rendered offline payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSignaturePayload {
    pub offline_data: String,
    pub nonce: String,
}

/// Offline verification request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOfflineSignatureRequest {
    pub activation_id: String,
    /// Canonicalized payload, base64
    pub data: String,
    pub signature: String,
    pub signature_type: String,
    /// Fold biometry into the accepted factor sets
    #[serde(default)]
    pub allow_biometry: bool,
}

fn render_payload(data: &str, nonce: &str, indicator: char, signature: &[u8]) -> String {
    format!("{}\n{}\n{}{}", data, nonce, indicator, BASE64.encode(signature))
}

fn fresh_nonce() -> String {
    let mut nonce = [0u8; 16];
    OsRng.fill_bytes(&mut nonce);
    BASE64.encode(nonce)
}

impl SignatureService {
    /// Payload bound to one activation, signed by its server key
    pub fn create_personalized_offline_payload(
        &self,
        activation_id: &str,
        data: &str,
    ) -> ServiceResult<OfflineSignaturePayload> {
        let activation = self.activation();
        let codec = activation.codec();

        let record = activation
            .store()
            .read(|conn| repository::find_activation(conn, activation_id))?
            .ok_or(ServiceError::ActivationNotFound)?;

        let server_private = codec.decrypt(
            &record.server_key_private,
            record.encryption_mode,
            &record.user_id,
            &record.activation_id,
        )?;
        let server_key = EcKeyPair::from_private_bytes(&server_private)?;

        let nonce = fresh_nonce();
        let signed = format!("{}\n{}", data, nonce);
        let signature = server_key.sign(signed.as_bytes());

        Ok(OfflineSignaturePayload {
            offline_data: render_payload(data, &nonce, KEY_SERVER_PRIVATE, &signature),
            nonce,
        })
    }

    /// Payload bound to an application, signed by its master key
    pub fn create_non_personalized_offline_payload(
        &self,
        application_id: i64,
        data: &str,
    ) -> ServiceResult<OfflineSignaturePayload> {
        let activation = self.activation();

        let master = activation
            .store()
            .read(|conn| repository::find_current_master_key_pair(conn, application_id))?
            .ok_or(ServiceError::NoMasterKeyPair)?;
        let master_key = EcKeyPair::from_private_base64(&master.master_key_private)
            .map_err(|_| ServiceError::IncorrectMasterKeyPairPrivate)?;

        let nonce = fresh_nonce();
        let signed = format!("{}\n{}", data, nonce);
        let signature = master_key.sign(signed.as_bytes());

        Ok(OfflineSignaturePayload {
            offline_data: render_payload(data, &nonce, KEY_SERVER_MASTER_PRIVATE, &signature),
            nonce,
        })
    }

    /// Verify an offline signature
    pub fn verify_offline(
        &self,
        request: VerifyOfflineSignatureRequest,
    ) -> ServiceResult<super::VerifySignatureResponse> {
        let requested = SignatureType::parse(&request.signature_type)?;
        let data = BASE64
            .decode(&request.data)
            .map_err(|_| ServiceError::InvalidRequest("data is not base64".to_string()))?;

        let mut accepted = vec![requested];
        if request.allow_biometry && !requested.uses_biometry() {
            accepted.push(SignatureType::PossessionBiometry);
        }

        self.verify_internal(
            &request.activation_id,
            requested,
            &accepted,
            &data,
            &request.signature,
            OFFLINE_SECRET,
            None,
            None,
            Some("OFFLINE"),
        )
    }
}
