//! Boundary error rendering
//!
//! Service errors become HTTP 400 with the uniform error envelope; the
//! stable code travels in `responseError.code`. Internal detail stays in
//! the server log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tessera_core::ServiceError;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Authentication failed")]
    Unauthorized,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Service(e) => {
                let mut body = json!({
                    "code": e.code(),
                    "message": e.to_string(),
                });
                if let ServiceError::InvalidRecoveryCode {
                    current_puk_index: Some(index),
                } = &e
                {
                    body["currentRecoveryPukIndex"] = json!(index);
                }
                if matches!(e, ServiceError::Storage(_) | ServiceError::Cryptography(_)) {
                    // never leak internals; the generic code is enough
                    error!("internal error: {}", e);
                    body["message"] = json!("Internal error");
                }
                let envelope = json!({
                    "status": "ERROR",
                    "responseError": body,
                });
                (StatusCode::BAD_REQUEST, Json(envelope)).into_response()
            }
            ApiError::Unauthorized => {
                let envelope = json!({
                    "status": "ERROR",
                    "responseError": {
                        "code": "INVALID_REQUEST",
                        "message": "Authentication failed",
                    },
                });
                (StatusCode::UNAUTHORIZED, Json(envelope)).into_response()
            }
        }
    }
}
