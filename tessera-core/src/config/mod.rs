//! Configuration management
//!
//! Environment-based configuration with TOML file support, defaults that
//! match the reference deployment, and cross-field validation. Environment
//! variables follow the pattern `TESSERA_<SECTION>_<KEY>` and override both
//! defaults and file values.

use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server identity and HTTP configuration
    pub server: ServerConfig,

    /// Crypto parameters (retry budgets, windows, thresholds)
    pub crypto: CryptoConfig,

    /// Recovery-code parameters
    pub recovery: RecoveryConfig,

    /// Token parameters
    pub token: TokenConfig,

    /// Callback delivery
    pub callback: CallbackConfig,

    /// Database location and lock discipline
    pub database: DatabaseConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Machine-readable application name, returned by the system status
    pub application_name: String,

    /// Human-readable application name
    pub application_display_name: String,

    /// Deployment environment label (e.g. "production", "test")
    pub application_environment: String,

    /// HTTP bind address
    pub bind_address: SocketAddr,

    /// When true, HTTP Basic credentials are checked against the
    /// integration table
    pub restrict_access: bool,
}

/// Crypto parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Retry budget for activation ID uniqueness
    pub generate_activation_id_iterations: u32,

    /// Retry budget for activation code uniqueness
    pub generate_activation_code_iterations: u32,

    /// Retry budget for token ID uniqueness
    pub generate_token_id_iterations: u32,

    /// Window from Init to Commit
    #[serde(with = "humantime_serde")]
    pub activation_validity: Duration,

    /// Failed signature attempts before an activation is blocked
    pub signature_max_failed_attempts: u32,

    /// Counter lookahead window for signature validation
    pub signature_validation_lookahead: u64,

    /// Master key for at-rest encryption of server private keys,
    /// base64-encoded. Empty disables encryption for new rows.
    pub master_db_encryption_key: String,
}

/// Recovery-code parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Retry budget for recovery code uniqueness
    pub generate_recovery_code_iterations: u32,

    /// Failed PUK attempts before a recovery code is blocked
    pub max_failed_attempts: u32,

    /// Number of PUKs issued per recovery code (1..=10)
    pub puk_count: u32,
}

/// Token parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Accepted skew between the token timestamp and server time
    #[serde(with = "humantime_serde")]
    pub timestamp_validity: Duration,
}

/// Callback delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Target URL for post-commit notifications; None disables delivery
    pub url: Option<String>,

    /// Bounded queue capacity; the oldest entry is dropped on overflow
    pub queue_capacity: usize,

    /// HTTP connect timeout
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Optional HTTP proxy for callback delivery
    pub http_proxy: Option<String>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file; None selects a shared in-memory database
    pub path: Option<PathBuf>,

    /// Bounded wait for the write lock before surfacing CONCURRENCY
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,

    /// Connection pool size
    pub pool_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            application_name: "tessera".to_string(),
            application_display_name: "Tessera Server".to_string(),
            application_environment: "production".to_string(),
            bind_address: "127.0.0.1:8080".parse().unwrap(),
            restrict_access: false,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            generate_activation_id_iterations: 10,
            generate_activation_code_iterations: 10,
            generate_token_id_iterations: 10,
            activation_validity: Duration::from_millis(120_000),
            signature_max_failed_attempts: 5,
            signature_validation_lookahead: 20,
            master_db_encryption_key: String::new(),
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            generate_recovery_code_iterations: 10,
            max_failed_attempts: 5,
            puk_count: 3,
        }
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            timestamp_validity: Duration::from_millis(7_200_000),
        }
    }
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            url: None,
            queue_capacity: 1024,
            connection_timeout: Duration::from_secs(5),
            http_proxy: None,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            lock_timeout: Duration::from_millis(10_000),
            pool_size: 16,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_target: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables on top of defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file, then apply env overrides
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::FileReadError(e.to_string()))?;

        let mut config: Self =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(name) = env::var("TESSERA_SERVER_APPLICATION_NAME") {
            self.server.application_name = name;
        }
        if let Ok(env_name) = env::var("TESSERA_SERVER_APPLICATION_ENVIRONMENT") {
            self.server.application_environment = env_name;
        }
        if let Ok(addr) = env::var("TESSERA_SERVER_BIND_ADDRESS") {
            self.server.bind_address = addr
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid bind address: {}", e)))?;
        }
        if let Ok(restrict) = env::var("TESSERA_SERVER_RESTRICT_ACCESS") {
            self.server.restrict_access = restrict
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid restrict flag: {}", e)))?;
        }
        if let Ok(key) = env::var("TESSERA_CRYPTO_MASTER_DB_ENCRYPTION_KEY") {
            self.crypto.master_db_encryption_key = key;
        }
        if let Ok(lookahead) = env::var("TESSERA_CRYPTO_SIGNATURE_VALIDATION_LOOKAHEAD") {
            self.crypto.signature_validation_lookahead = lookahead
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid lookahead: {}", e)))?;
        }
        if let Ok(attempts) = env::var("TESSERA_CRYPTO_SIGNATURE_MAX_FAILED_ATTEMPTS") {
            self.crypto.signature_max_failed_attempts = attempts
                .parse()
                .map_err(|e| ConfigError::InvalidValue(format!("Invalid attempt count: {}", e)))?;
        }
        if let Ok(path) = env::var("TESSERA_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Ok(url) = env::var("TESSERA_CALLBACK_URL") {
            self.callback.url = Some(url);
        }
        if let Ok(level) = env::var("TESSERA_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.crypto.generate_activation_id_iterations == 0
            || self.crypto.generate_activation_code_iterations == 0
            || self.crypto.generate_token_id_iterations == 0
            || self.recovery.generate_recovery_code_iterations == 0
        {
            return Err(ConfigError::ValidationFailed(
                "retry budgets must be greater than 0".to_string(),
            ));
        }

        if self.crypto.signature_max_failed_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "signature_max_failed_attempts must be greater than 0".to_string(),
            ));
        }

        if self.recovery.puk_count == 0 || self.recovery.puk_count > 10 {
            return Err(ConfigError::ValidationFailed(
                "puk_count must be in 1..=10".to_string(),
            ));
        }

        if !self.crypto.master_db_encryption_key.is_empty() {
            use base64::Engine;
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(&self.crypto.master_db_encryption_key)
                .map_err(|e| {
                    ConfigError::InvalidValue(format!("Invalid master DB key: {}", e))
                })?;
            if decoded.len() < 16 {
                return Err(ConfigError::ValidationFailed(
                    "master_db_encryption_key must decode to at least 16 bytes".to_string(),
                ));
            }
        }

        if self.database.pool_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "pool_size must be greater than 0".to_string(),
            ));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }
}
