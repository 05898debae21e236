//! Uniform response envelope
//!
//! Every successful response is wrapped as
//! `{"status": "OK", "responseObject": ...}`; errors render through
//! `ApiError` as `{"status": "ERROR", "responseError": ...}`.

use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

/// Wrap a payload in the OK envelope
pub fn ok<T: Serialize>(payload: T) -> Json<Value> {
    Json(json!({
        "status": "OK",
        "responseObject": payload,
    }))
}

/// OK envelope with no payload
pub fn ok_empty() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_envelope_shape() {
        let Json(value) = ok(json!({"a": 1}));
        assert_eq!(value["status"], "OK");
        assert_eq!(value["responseObject"]["a"], 1);
    }

    #[test]
    fn test_ok_empty_has_no_payload() {
        let Json(value) = ok_empty();
        assert_eq!(value["status"], "OK");
        assert!(value.get("responseObject").is_none());
    }
}
