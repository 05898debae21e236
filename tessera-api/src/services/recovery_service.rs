//! Recovery code endpoints

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use tessera_core::core_store::model::RecoveryCodeStatus;
use tessera_core::ServiceError;

use crate::envelope;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecoveryCodeRequest {
    pub application_id: i64,
    pub user_id: String,
    pub puk_count: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRecoveryCodeRequest {
    pub application_id: i64,
    pub recovery_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupRecoveryCodesRequest {
    pub application_id: i64,
    pub user_id: Option<String>,
    pub activation_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRecoveryCodesRequest {
    pub application_id: i64,
    pub recovery_codes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryActivationRequest {
    pub application_id: i64,
    pub recovery_code: String,
    pub puk: String,
    pub activation_name: Option<String>,
}

fn parse_status(value: &str) -> Result<RecoveryCodeStatus, ApiError> {
    match value.to_uppercase().as_str() {
        "CREATED" => Ok(RecoveryCodeStatus::Created),
        "ACTIVE" => Ok(RecoveryCodeStatus::Active),
        "BLOCKED" => Ok(RecoveryCodeStatus::Blocked),
        "REVOKED" => Ok(RecoveryCodeStatus::Revoked),
        other => Err(ApiError::Service(ServiceError::InvalidRequest(format!(
            "unknown recovery code status: {}",
            other
        )))),
    }
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRecoveryCodeRequest>,
) -> ApiResult<Json<Value>> {
    let created = state.recovery.create_recovery_code(
        request.application_id,
        &request.user_id,
        request.puk_count,
    )?;
    Ok(envelope::ok(created))
}

pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ConfirmRecoveryCodeRequest>,
) -> ApiResult<Json<Value>> {
    let already_confirmed = state
        .recovery
        .confirm_recovery_code(request.application_id, &request.recovery_code)?;
    Ok(envelope::ok(json!({ "alreadyConfirmed": already_confirmed })))
}

pub async fn lookup(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LookupRecoveryCodesRequest>,
) -> ApiResult<Json<Value>> {
    let status = request.status.as_deref().map(parse_status).transpose()?;
    let details = state.recovery.lookup_recovery_codes(
        request.application_id,
        request.user_id.as_deref(),
        request.activation_id.as_deref(),
        status,
    )?;
    Ok(envelope::ok(json!({ "recoveryCodes": details })))
}

pub async fn revoke(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RevokeRecoveryCodesRequest>,
) -> ApiResult<Json<Value>> {
    let revoked = state
        .recovery
        .revoke_recovery_codes(request.application_id, &request.recovery_codes)?;
    Ok(envelope::ok(json!({ "revoked": revoked })))
}

pub async fn activate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RecoveryActivationRequest>,
) -> ApiResult<Json<Value>> {
    let response = state.recovery.recovery_activation(
        request.application_id,
        &request.recovery_code,
        &request.puk,
        request.activation_name,
    )?;
    Ok(envelope::ok(response))
}
