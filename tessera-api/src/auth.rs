//! HTTP Basic authentication against the integration table
//!
//! With `restrict_access` disabled every request passes. Enabled, the
//! `Authorization: Basic` credentials must match a registered integration
//! `(client_token, client_secret)` pair.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::sync::Arc;
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

fn parse_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (user, password) = text.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !state.config.server.restrict_access {
        return Ok(next.run(request).await);
    }

    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let (client_token, client_secret) = parse_basic(header).ok_or(ApiError::Unauthorized)?;

    let authorized = state
        .applications
        .verify_integration(&client_token, &client_secret)
        .unwrap_or(false);
    if !authorized {
        warn!("rejected request with invalid integration credentials");
        return Err(ApiError::Unauthorized);
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_header() {
        let encoded = BASE64.encode("token:secret");
        let header = format!("Basic {}", encoded);
        assert_eq!(
            parse_basic(&header),
            Some(("token".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_basic("Bearer abc").is_none());
        assert!(parse_basic("Basic !!!").is_none());
        let no_colon = BASE64.encode("tokensecret");
        assert!(parse_basic(&format!("Basic {}", no_colon)).is_none());
    }
}
