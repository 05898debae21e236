//! Persistent entities
//!
//! Row-shaped structs and the small-integer status enums they persist.
//! Status tags are stable column values; renumbering them is a schema
//! migration, not a refactor.

use serde::{Deserialize, Serialize};

use crate::clock::Timestamp;
use crate::core_codec::EncryptionMode;
use crate::error::{ServiceError, ServiceResult};

/// Activation lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationStatus {
    Created,
    OtpUsed,
    Active,
    Blocked,
    Removed,
}

impl ActivationStatus {
    pub fn as_i64(&self) -> i64 {
        match self {
            ActivationStatus::Created => 1,
            ActivationStatus::OtpUsed => 2,
            ActivationStatus::Active => 3,
            ActivationStatus::Blocked => 4,
            ActivationStatus::Removed => 5,
        }
    }

    pub fn from_i64(value: i64) -> ServiceResult<Self> {
        match value {
            1 => Ok(ActivationStatus::Created),
            2 => Ok(ActivationStatus::OtpUsed),
            3 => Ok(ActivationStatus::Active),
            4 => Ok(ActivationStatus::Blocked),
            5 => Ok(ActivationStatus::Removed),
            other => Err(ServiceError::Storage(format!(
                "unknown activation status: {}",
                other
            ))),
        }
    }

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationStatus::Created => "CREATED",
            ActivationStatus::OtpUsed => "OTP_USED",
            ActivationStatus::Active => "ACTIVE",
            ActivationStatus::Blocked => "BLOCKED",
            ActivationStatus::Removed => "REMOVED",
        }
    }

    /// Removed is terminal; nothing transitions out of it
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActivationStatus::Removed)
    }

    /// States that can still expire into Removed
    pub fn is_pending_commit(&self) -> bool {
        matches!(self, ActivationStatus::Created | ActivationStatus::OtpUsed)
    }
}

/// Application row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub id: i64,
    pub name: String,
}

/// Application version (client credential pair)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationVersion {
    pub id: i64,
    pub application_id: i64,
    pub name: String,
    pub application_key: String,
    pub application_secret: String,
    pub supported: bool,
}

/// Master key pair row; keys are stored base64-encoded, the private half
/// is plaintext here because it signs activation codes on every Init
#[derive(Debug, Clone)]
pub struct MasterKeyPair {
    pub id: i64,
    pub application_id: i64,
    pub name: Option<String>,
    pub master_key_public: String,
    pub master_key_private: String,
    pub timestamp_created: Timestamp,
}

/// Activation row, the central entity
#[derive(Debug, Clone)]
pub struct ActivationRecord {
    pub activation_id: String,
    pub activation_code: String,
    pub activation_signature: String,
    pub user_id: String,
    pub application_id: i64,
    pub master_keypair_id: i64,
    pub activation_name: Option<String>,
    pub extras: Option<String>,
    pub server_key_public: String,
    pub server_key_private: String,
    pub encryption_mode: EncryptionMode,
    pub device_key_public: Option<String>,
    pub counter: u64,
    pub failed_attempts: u32,
    pub max_failed_attempts: u32,
    pub status: ActivationStatus,
    pub blocked_reason: Option<String>,
    pub version: Option<u32>,
    pub timestamp_created: Timestamp,
    pub timestamp_last_used: Timestamp,
    pub timestamp_activation_expire: Timestamp,
}

impl ActivationRecord {
    /// Whether the record sits past its commit window
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.status.is_pending_commit() && now > self.timestamp_activation_expire
    }
}

/// Append-only activation status change
#[derive(Debug, Clone)]
pub struct ActivationHistoryRecord {
    pub id: i64,
    pub activation_id: String,
    pub status: ActivationStatus,
    pub event_reason: Option<String>,
    pub timestamp_created: Timestamp,
}

/// Append-only signature verification attempt
#[derive(Debug, Clone)]
pub struct SignatureAuditRecord {
    pub id: i64,
    pub activation_id: String,
    pub activation_counter: u64,
    pub signature_type: String,
    pub data_hash: String,
    pub valid: bool,
    pub note: Option<String>,
    pub timestamp_created: Timestamp,
}

/// Recovery code lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryCodeStatus {
    Created,
    Active,
    Blocked,
    Revoked,
}

impl RecoveryCodeStatus {
    pub fn as_i64(&self) -> i64 {
        match self {
            RecoveryCodeStatus::Created => 1,
            RecoveryCodeStatus::Active => 2,
            RecoveryCodeStatus::Blocked => 3,
            RecoveryCodeStatus::Revoked => 4,
        }
    }

    pub fn from_i64(value: i64) -> ServiceResult<Self> {
        match value {
            1 => Ok(RecoveryCodeStatus::Created),
            2 => Ok(RecoveryCodeStatus::Active),
            3 => Ok(RecoveryCodeStatus::Blocked),
            4 => Ok(RecoveryCodeStatus::Revoked),
            other => Err(ServiceError::Storage(format!(
                "unknown recovery code status: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryCodeStatus::Created => "CREATED",
            RecoveryCodeStatus::Active => "ACTIVE",
            RecoveryCodeStatus::Blocked => "BLOCKED",
            RecoveryCodeStatus::Revoked => "REVOKED",
        }
    }
}

/// Recovery code row
#[derive(Debug, Clone)]
pub struct RecoveryCode {
    pub id: i64,
    pub application_id: i64,
    pub user_id: String,
    pub activation_id: Option<String>,
    pub code: String,
    pub status: RecoveryCodeStatus,
    pub failed_attempts: u32,
    pub max_failed_attempts: u32,
    pub timestamp_created: Timestamp,
}

/// Recovery PUK state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PukStatus {
    Valid,
    Used,
    Invalid,
}

impl PukStatus {
    pub fn as_i64(&self) -> i64 {
        match self {
            PukStatus::Valid => 1,
            PukStatus::Used => 2,
            PukStatus::Invalid => 3,
        }
    }

    pub fn from_i64(value: i64) -> ServiceResult<Self> {
        match value {
            1 => Ok(PukStatus::Valid),
            2 => Ok(PukStatus::Used),
            3 => Ok(PukStatus::Invalid),
            other => Err(ServiceError::Storage(format!("unknown PUK status: {}", other))),
        }
    }
}

/// Recovery PUK row; only the HMAC of the PUK is persisted
#[derive(Debug, Clone)]
pub struct RecoveryPuk {
    pub id: i64,
    pub recovery_code_id: i64,
    pub puk_index: u32,
    pub puk_hash: String,
    pub status: PukStatus,
}

/// Per-application recovery settings
#[derive(Debug, Clone)]
pub struct RecoveryConfigRow {
    pub application_id: i64,
    pub activation_recovery_enabled: bool,
    pub puk_count: u32,
}

/// Token row
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub token_id: String,
    pub token_secret: String,
    pub activation_id: String,
    pub signature_type: String,
    pub timestamp_created: Timestamp,
}

/// Integration credential row for the REST boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Integration {
    pub id: String,
    pub name: String,
    pub client_token: String,
    pub client_secret_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_status_round_trip() {
        for status in [
            ActivationStatus::Created,
            ActivationStatus::OtpUsed,
            ActivationStatus::Active,
            ActivationStatus::Blocked,
            ActivationStatus::Removed,
        ] {
            assert_eq!(ActivationStatus::from_i64(status.as_i64()).unwrap(), status);
        }
        assert!(ActivationStatus::from_i64(0).is_err());
        assert!(ActivationStatus::from_i64(6).is_err());
    }

    #[test]
    fn test_terminal_and_pending_classification() {
        assert!(ActivationStatus::Removed.is_terminal());
        assert!(!ActivationStatus::Blocked.is_terminal());
        assert!(ActivationStatus::Created.is_pending_commit());
        assert!(ActivationStatus::OtpUsed.is_pending_commit());
        assert!(!ActivationStatus::Active.is_pending_commit());
    }

    #[test]
    fn test_recovery_status_round_trip() {
        for status in [
            RecoveryCodeStatus::Created,
            RecoveryCodeStatus::Active,
            RecoveryCodeStatus::Blocked,
            RecoveryCodeStatus::Revoked,
        ] {
            assert_eq!(RecoveryCodeStatus::from_i64(status.as_i64()).unwrap(), status);
        }
        for status in [PukStatus::Valid, PukStatus::Used, PukStatus::Invalid] {
            assert_eq!(PukStatus::from_i64(status.as_i64()).unwrap(), status);
        }
    }
}
