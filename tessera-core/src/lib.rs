//! Tessera Core Library
//!
//! Server-side trust anchor for mobile device activation and
//! request-signature authentication: activation lifecycle, counter-based
//! signature verification, recovery codes, tokens, and the crypto and
//! storage layers underneath them.

pub mod callback;
pub mod clock;
pub mod config;
pub mod core_activation;
pub mod core_application;
pub mod core_codec;
pub mod core_crypto;
pub mod core_recovery;
pub mod core_signature;
pub mod core_store;
pub mod core_token;
pub mod core_vault;
pub mod error;
pub mod logging;

pub use callback::CallbackDispatcher;
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{Config, ConfigError};
pub use core_activation::{ActivationService, PROTOCOL_VERSION};
pub use core_application::ApplicationService;
pub use core_codec::{EncryptionMode, KeyAtRestCodec};
pub use core_recovery::RecoveryService;
pub use core_signature::SignatureService;
pub use core_store::Store;
pub use core_token::TokenService;
pub use core_vault::VaultService;
pub use error::{ServiceError, ServiceResult};
pub use logging::{init_logging, LogLevel};
