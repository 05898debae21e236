//! Signature verification and vault endpoints
//!
//! A failed signature is a normal 200 response with
//! `signatureValid: false`; only malformed requests produce the error
//! envelope.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use tessera_core::core_signature::offline::VerifyOfflineSignatureRequest;
use tessera_core::core_signature::VerifySignatureRequest;
use tessera_core::core_vault::VaultUnlockRequest;

use crate::envelope;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizedPayloadRequest {
    pub activation_id: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonPersonalizedPayloadRequest {
    pub application_id: i64,
    pub data: String,
}

pub async fn verify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifySignatureRequest>,
) -> ApiResult<Json<Value>> {
    let response = state.signature.verify(request)?;
    Ok(envelope::ok(response))
}

pub async fn verify_offline(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VerifyOfflineSignatureRequest>,
) -> ApiResult<Json<Value>> {
    let response = state.signature.verify_offline(request)?;
    Ok(envelope::ok(response))
}

pub async fn create_personalized_payload(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PersonalizedPayloadRequest>,
) -> ApiResult<Json<Value>> {
    let payload = state
        .signature
        .create_personalized_offline_payload(&request.activation_id, &request.data)?;
    Ok(envelope::ok(payload))
}

pub async fn create_non_personalized_payload(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NonPersonalizedPayloadRequest>,
) -> ApiResult<Json<Value>> {
    let payload = state
        .signature
        .create_non_personalized_offline_payload(request.application_id, &request.data)?;
    Ok(envelope::ok(payload))
}

pub async fn vault_unlock(
    State(state): State<Arc<AppState>>,
    Json(request): Json<VaultUnlockRequest>,
) -> ApiResult<Json<Value>> {
    let response = state.vault.unlock(request)?;
    Ok(envelope::ok(response))
}
