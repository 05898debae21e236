//! System status and error catalogue endpoints

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

use tessera_core::{ServiceError, SystemClock, Clock};

use crate::envelope;
use crate::error::ApiResult;
use crate::state::AppState;

pub async fn status(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let server = &state.config.server;
    Ok(envelope::ok(json!({
        "applicationName": server.application_name,
        "applicationDisplayName": server.application_display_name,
        "applicationEnvironment": server.application_environment,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": SystemClock.now().as_millis(),
    })))
}

pub async fn error_list() -> ApiResult<Json<Value>> {
    let errors: Vec<Value> = ServiceError::code_list()
        .into_iter()
        .map(|(code, message)| json!({ "code": code, "message": message }))
        .collect();
    Ok(envelope::ok(json!({ "errors": errors })))
}
