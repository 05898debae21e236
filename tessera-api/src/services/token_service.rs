//! Token endpoints

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use tessera_core::core_token::{CreateTokenRequest, ValidateTokenRequest};

use crate::envelope;
use crate::error::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveTokenRequest {
    pub token_id: String,
    pub activation_id: String,
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateTokenRequest>,
) -> ApiResult<Json<Value>> {
    let sealed = state.tokens.create_token(request)?;
    Ok(envelope::ok(sealed))
}

pub async fn validate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ValidateTokenRequest>,
) -> ApiResult<Json<Value>> {
    let response = state.tokens.validate_token(request)?;
    Ok(envelope::ok(response))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RemoveTokenRequest>,
) -> ApiResult<Json<Value>> {
    let removed = state
        .tokens
        .remove_token(&request.token_id, &request.activation_id)?;
    Ok(envelope::ok(json!({ "removed": removed })))
}
