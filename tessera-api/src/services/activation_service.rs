//! Activation lifecycle endpoints

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use tessera_core::core_activation::{InitActivationRequest, PrepareActivationRequest};

use crate::envelope;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationIdRequest {
    pub activation_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockActivationRequest {
    pub activation_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationListRequest {
    pub user_id: String,
    pub application_id: Option<i64>,
}

pub async fn init(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InitActivationRequest>,
) -> ApiResult<Json<Value>> {
    let response = state.activation.init(request)?;
    Ok(envelope::ok(response))
}

pub async fn prepare(
    State(state): State<Arc<AppState>>,
    Json(request): Json<PrepareActivationRequest>,
) -> ApiResult<Json<Value>> {
    let sealed = state.activation.prepare(request)?;
    Ok(envelope::ok(sealed))
}

pub async fn commit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ActivationIdRequest>,
) -> ApiResult<Json<Value>> {
    state.activation.commit(&request.activation_id)?;
    Ok(envelope::ok(json!({
        "activationId": request.activation_id,
        "activated": true,
    })))
}

pub async fn status(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ActivationIdRequest>,
) -> ApiResult<Json<Value>> {
    let response = state.activation.get_status(&request.activation_id)?;
    Ok(envelope::ok(response))
}

pub async fn block(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BlockActivationRequest>,
) -> ApiResult<Json<Value>> {
    state
        .activation
        .block(&request.activation_id, request.reason.as_deref())?;
    Ok(envelope::ok_empty())
}

pub async fn unblock(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ActivationIdRequest>,
) -> ApiResult<Json<Value>> {
    state.activation.unblock(&request.activation_id)?;
    Ok(envelope::ok_empty())
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ActivationIdRequest>,
) -> ApiResult<Json<Value>> {
    state.activation.remove(&request.activation_id)?;
    Ok(envelope::ok(json!({ "removed": true })))
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ActivationListRequest>,
) -> ApiResult<Json<Value>> {
    let activations = state
        .activation
        .list_for_user(&request.user_id, request.application_id)?;
    Ok(envelope::ok(json!({ "activations": activations })))
}
