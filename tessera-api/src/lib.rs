//! Tessera REST boundary
//!
//! Axum router, HTTP Basic authentication against the integration table,
//! and the uniform `{status, responseObject|responseError}` envelope over
//! the core services.

pub mod auth;
pub mod envelope;
pub mod error;
pub mod services;
pub mod state;

pub use services::router;
pub use state::AppState;
