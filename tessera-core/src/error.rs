//! Service error taxonomy
//!
//! Every operation in the service layer returns `ServiceResult<T>`. Each
//! error variant maps to a stable wire code surfaced in REST responses, so
//! clients can branch on `code()` without parsing messages.

use thiserror::Error;

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors that can occur in service operations
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Missing user identifier in the request
    #[error("User ID is missing")]
    NoUserId,

    /// Missing application identifier in the request
    #[error("Application ID is missing")]
    NoApplicationId,

    /// Request failed input validation
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A key could not be decoded or is not a valid curve point
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// Activation does not exist (or must be presented as such)
    #[error("Activation not found")]
    ActivationNotFound,

    /// Activation expired before the operation completed
    #[error("Activation expired")]
    ActivationExpired,

    /// Activation is not in a state that permits the operation
    #[error("Activation is in incorrect state: {0}")]
    ActivationIncorrectState(String),

    /// Signature computation failed
    #[error("Unable to compute signature: {0}")]
    UnableToComputeSignature(String),

    /// Stored master private key does not decode to a usable key
    #[error("Master key pair private key is invalid")]
    IncorrectMasterKeyPairPrivate,

    /// Application has no master key pair
    #[error("No master key pair configured for application")]
    NoMasterKeyPair,

    /// Catch-all for cryptographic failures
    #[error("Cryptography error: {0}")]
    Cryptography(String),

    /// Activation ID uniqueness retry budget exhausted
    #[error("Unable to generate a unique activation ID")]
    UnableToGenerateActivationId,

    /// Activation code uniqueness retry budget exhausted
    #[error("Unable to generate a unique activation code")]
    UnableToGenerateActivationCode,

    /// Recovery code uniqueness retry budget exhausted
    #[error("Unable to generate a unique recovery code")]
    UnableToGenerateRecoveryCode,

    /// Token ID uniqueness retry budget exhausted
    #[error("Unable to generate a unique token ID")]
    UnableToGenerateToken,

    /// Token does not exist
    #[error("Token not found")]
    TokenNotFound,

    /// Recovery code rejected; carries the index of the next valid PUK
    /// so the client can prompt for the right one
    #[error("Invalid recovery code")]
    InvalidRecoveryCode {
        current_puk_index: Option<u32>,
    },

    /// A non-revoked recovery code already exists for the user
    #[error("Recovery code already exists")]
    RecoveryCodeAlreadyExists,

    /// Lock wait timed out; the caller should retry
    #[error("Concurrent modification, retry the operation")]
    Concurrency,

    /// Storage failure outside the lock-contention path
    #[error("Storage error: {0}")]
    Storage(String),
}

impl ServiceError {
    /// Stable wire code for this error
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NoUserId => "NO_USER_ID",
            ServiceError::NoApplicationId => "NO_APPLICATION_ID",
            ServiceError::InvalidRequest(_) => "INVALID_REQUEST",
            ServiceError::InvalidKeyFormat(_) => "INVALID_KEY_FORMAT",
            ServiceError::ActivationNotFound => "ACTIVATION_NOT_FOUND",
            ServiceError::ActivationExpired => "ACTIVATION_EXPIRED",
            ServiceError::ActivationIncorrectState(_) => "ACTIVATION_INCORRECT_STATE",
            ServiceError::UnableToComputeSignature(_) => "UNABLE_TO_COMPUTE_SIGNATURE",
            ServiceError::IncorrectMasterKeyPairPrivate => {
                "INCORRECT_MASTER_SERVER_KEYPAIR_PRIVATE"
            }
            ServiceError::NoMasterKeyPair => "NO_MASTER_SERVER_KEYPAIR",
            ServiceError::Cryptography(_) => "GENERIC_CRYPTOGRAPHY_ERROR",
            ServiceError::UnableToGenerateActivationId => "UNABLE_TO_GENERATE_ACTIVATION_ID",
            ServiceError::UnableToGenerateActivationCode => {
                "UNABLE_TO_GENERATE_SHORT_ACTIVATION_ID"
            }
            ServiceError::UnableToGenerateRecoveryCode => "UNABLE_TO_GENERATE_RECOVERY_CODE",
            ServiceError::UnableToGenerateToken => "UNABLE_TO_GENERATE_TOKEN",
            ServiceError::TokenNotFound => "TOKEN_NOT_FOUND",
            ServiceError::InvalidRecoveryCode { .. } => "INVALID_RECOVERY_CODE",
            ServiceError::RecoveryCodeAlreadyExists => "RECOVERY_CODE_ALREADY_EXISTS",
            ServiceError::Concurrency => "CONCURRENCY",
            ServiceError::Storage(_) => "GENERIC_CRYPTOGRAPHY_ERROR",
        }
    }

    /// Whether the caller should retry the operation
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Concurrency)
    }

    /// All stable codes with a human-readable description, for the
    /// error-code listing endpoint
    pub fn code_list() -> Vec<(&'static str, &'static str)> {
        vec![
            ("NO_USER_ID", "User ID is missing"),
            ("NO_APPLICATION_ID", "Application ID is missing"),
            ("INVALID_REQUEST", "Request failed input validation"),
            ("INVALID_KEY_FORMAT", "Key could not be decoded"),
            ("ACTIVATION_NOT_FOUND", "Activation not found"),
            ("ACTIVATION_EXPIRED", "Activation expired"),
            ("ACTIVATION_INCORRECT_STATE", "Activation is in incorrect state"),
            ("UNABLE_TO_COMPUTE_SIGNATURE", "Unable to compute signature"),
            (
                "INCORRECT_MASTER_SERVER_KEYPAIR_PRIVATE",
                "Master key pair private key is invalid",
            ),
            ("NO_MASTER_SERVER_KEYPAIR", "No master key pair configured"),
            ("GENERIC_CRYPTOGRAPHY_ERROR", "Cryptography error"),
            ("UNABLE_TO_GENERATE_ACTIVATION_ID", "Unable to generate activation ID"),
            (
                "UNABLE_TO_GENERATE_SHORT_ACTIVATION_ID",
                "Unable to generate activation code",
            ),
            ("UNABLE_TO_GENERATE_RECOVERY_CODE", "Unable to generate recovery code"),
            ("UNABLE_TO_GENERATE_TOKEN", "Unable to generate token ID"),
            ("TOKEN_NOT_FOUND", "Token not found"),
            ("INVALID_RECOVERY_CODE", "Invalid recovery code"),
            ("RECOVERY_CODE_ALREADY_EXISTS", "Recovery code already exists"),
            ("CONCURRENCY", "Concurrent modification, retry the operation"),
        ]
    }
}

impl From<rusqlite::Error> for ServiceError {
    fn from(e: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(err, _) = &e {
            if err.code == rusqlite::ErrorCode::DatabaseBusy
                || err.code == rusqlite::ErrorCode::DatabaseLocked
            {
                return ServiceError::Concurrency;
            }
        }
        ServiceError::Storage(e.to_string())
    }
}

impl From<r2d2::Error> for ServiceError {
    fn from(e: r2d2::Error) -> Self {
        ServiceError::Storage(e.to_string())
    }
}
