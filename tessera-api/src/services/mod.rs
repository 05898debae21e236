//! REST surface: one module per operation group, assembled into the
//! versioned router

pub mod activation_service;
pub mod application_service;
pub mod recovery_service;
pub mod signature_service;
pub mod system_service;
pub mod token_service;

use axum::middleware;
use axum::routing::post;
use axum::Router;
use std::sync::Arc;

use crate::auth::require_auth;
use crate::state::AppState;

/// Build the full `/rest/v3` router over the shared state
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        // application
        .route("/application/create", post(application_service::create))
        .route("/application/list", post(application_service::list))
        .route("/application/detail", post(application_service::detail))
        .route("/application/version/create", post(application_service::create_version))
        .route("/application/version/support", post(application_service::support_version))
        .route("/application/version/unsupport", post(application_service::unsupport_version))
        .route("/integration/create", post(application_service::create_integration))
        .route("/integration/list", post(application_service::list_integrations))
        .route("/integration/remove", post(application_service::remove_integration))
        // activation
        .route("/activation/init", post(activation_service::init))
        .route("/activation/prepare", post(activation_service::prepare))
        .route("/activation/commit", post(activation_service::commit))
        .route("/activation/status", post(activation_service::status))
        .route("/activation/block", post(activation_service::block))
        .route("/activation/unblock", post(activation_service::unblock))
        .route("/activation/remove", post(activation_service::remove))
        .route("/activation/list", post(activation_service::list))
        // signature
        .route("/signature/verify", post(signature_service::verify))
        .route("/signature/offline/verify", post(signature_service::verify_offline))
        .route(
            "/signature/offline/personalized/create",
            post(signature_service::create_personalized_payload),
        )
        .route(
            "/signature/offline/non-personalized/create",
            post(signature_service::create_non_personalized_payload),
        )
        // vault
        .route("/vault/unlock", post(signature_service::vault_unlock))
        // token
        .route("/token/create", post(token_service::create))
        .route("/token/validate", post(token_service::validate))
        .route("/token/remove", post(token_service::remove))
        // recovery
        .route("/recovery/create", post(recovery_service::create))
        .route("/recovery/confirm", post(recovery_service::confirm))
        .route("/recovery/lookup", post(recovery_service::lookup))
        .route("/recovery/revoke", post(recovery_service::revoke))
        .route("/activation/recovery/create", post(recovery_service::activate))
        // system
        .route("/status", post(system_service::status))
        .route("/error/list", post(system_service::error_list))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().nest("/rest/v3", api)
}
