//! Database migrations
//!
//! Versioned migrations for the server schema. Each migration is applied
//! atomically and tracked in the schema_version table.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Migration descriptor
pub struct Migration {
    pub version: i32,
    pub description: &'static str,
    pub up_sql: &'static str,
}

/// All available migrations in order
pub fn get_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial server schema",
        up_sql: r#"
            -- Schema version tracking
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            );

            -- Applications
            CREATE TABLE IF NOT EXISTS pa_application (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );

            -- Application versions (client credential pairs)
            CREATE TABLE IF NOT EXISTS pa_application_version (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                application_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                application_key TEXT NOT NULL UNIQUE,
                application_secret TEXT NOT NULL,
                supported INTEGER NOT NULL DEFAULT 1,
                FOREIGN KEY (application_id) REFERENCES pa_application(id)
            );

            CREATE INDEX IF NOT EXISTS idx_version_app ON pa_application_version(application_id);

            -- Master key pairs, ordered by creation; the newest is current
            CREATE TABLE IF NOT EXISTS pa_master_keypair (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                application_id INTEGER NOT NULL,
                name TEXT,
                master_key_public TEXT NOT NULL,
                master_key_private TEXT NOT NULL,
                timestamp_created INTEGER NOT NULL,
                FOREIGN KEY (application_id) REFERENCES pa_application(id)
            );

            CREATE INDEX IF NOT EXISTS idx_keypair_app ON pa_master_keypair(application_id, timestamp_created);

            -- Activations
            CREATE TABLE IF NOT EXISTS pa_activation (
                activation_id TEXT PRIMARY KEY,
                activation_code TEXT NOT NULL,
                activation_signature TEXT NOT NULL,
                user_id TEXT NOT NULL,
                application_id INTEGER NOT NULL,
                master_keypair_id INTEGER NOT NULL,
                activation_name TEXT,
                extras TEXT,
                server_key_public TEXT NOT NULL,
                server_key_private TEXT NOT NULL,
                encryption_mode INTEGER NOT NULL DEFAULT 0,
                device_key_public TEXT,
                counter INTEGER NOT NULL DEFAULT 0,
                failed_attempts INTEGER NOT NULL DEFAULT 0,
                max_failed_attempts INTEGER NOT NULL DEFAULT 5,
                status INTEGER NOT NULL,
                blocked_reason TEXT,
                version INTEGER,
                timestamp_created INTEGER NOT NULL,
                timestamp_last_used INTEGER NOT NULL,
                timestamp_activation_expire INTEGER NOT NULL,
                FOREIGN KEY (application_id) REFERENCES pa_application(id),
                FOREIGN KEY (master_keypair_id) REFERENCES pa_master_keypair(id)
            );

            CREATE INDEX IF NOT EXISTS idx_activation_user ON pa_activation(user_id);
            CREATE INDEX IF NOT EXISTS idx_activation_code ON pa_activation(application_id, activation_code, status);
            CREATE INDEX IF NOT EXISTS idx_activation_expire ON pa_activation(status, timestamp_activation_expire);

            -- Activation status history, append-only
            CREATE TABLE IF NOT EXISTS pa_activation_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                activation_id TEXT NOT NULL,
                status INTEGER NOT NULL,
                event_reason TEXT,
                timestamp_created INTEGER NOT NULL,
                FOREIGN KEY (activation_id) REFERENCES pa_activation(activation_id)
            );

            CREATE INDEX IF NOT EXISTS idx_history_activation ON pa_activation_history(activation_id);

            -- Signature verification audit, append-only
            CREATE TABLE IF NOT EXISTS pa_signature_audit (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                activation_id TEXT NOT NULL,
                activation_counter INTEGER NOT NULL,
                signature_type TEXT NOT NULL,
                data_hash TEXT NOT NULL,
                valid INTEGER NOT NULL,
                note TEXT,
                timestamp_created INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_audit_activation ON pa_signature_audit(activation_id);

            -- Integration credentials for the REST boundary
            CREATE TABLE IF NOT EXISTS pa_integration (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                client_token TEXT NOT NULL UNIQUE,
                client_secret_hash TEXT NOT NULL
            );

            -- Recovery codes
            CREATE TABLE IF NOT EXISTS pa_recovery_code (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                application_id INTEGER NOT NULL,
                user_id TEXT NOT NULL,
                activation_id TEXT,
                code TEXT NOT NULL,
                status INTEGER NOT NULL,
                failed_attempts INTEGER NOT NULL DEFAULT 0,
                max_failed_attempts INTEGER NOT NULL DEFAULT 5,
                timestamp_created INTEGER NOT NULL,
                FOREIGN KEY (application_id) REFERENCES pa_application(id)
            );

            CREATE INDEX IF NOT EXISTS idx_recovery_user ON pa_recovery_code(application_id, user_id, status);
            CREATE INDEX IF NOT EXISTS idx_recovery_code ON pa_recovery_code(application_id, code);

            -- Recovery PUKs, ordered within their code
            CREATE TABLE IF NOT EXISTS pa_recovery_puk (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recovery_code_id INTEGER NOT NULL,
                puk_index INTEGER NOT NULL,
                puk_hash TEXT NOT NULL,
                status INTEGER NOT NULL,
                UNIQUE (recovery_code_id, puk_index),
                FOREIGN KEY (recovery_code_id) REFERENCES pa_recovery_code(id) ON DELETE CASCADE
            );

            -- Per-application recovery settings
            CREATE TABLE IF NOT EXISTS pa_recovery_config (
                application_id INTEGER PRIMARY KEY,
                activation_recovery_enabled INTEGER NOT NULL DEFAULT 0,
                puk_count INTEGER NOT NULL DEFAULT 3,
                FOREIGN KEY (application_id) REFERENCES pa_application(id)
            );

            -- Simple tokens
            CREATE TABLE IF NOT EXISTS pa_token (
                token_id TEXT PRIMARY KEY,
                token_secret TEXT NOT NULL,
                activation_id TEXT NOT NULL,
                signature_type TEXT NOT NULL,
                timestamp_created INTEGER NOT NULL,
                FOREIGN KEY (activation_id) REFERENCES pa_activation(activation_id)
            );

            CREATE INDEX IF NOT EXISTS idx_token_activation ON pa_token(activation_id);
        "#,
    }]
}

/// Get current schema version from database
fn get_current_version(pool: &Pool<SqliteConnectionManager>) -> Result<i32, rusqlite::Error> {
    let conn = pool.get().map_err(|e| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to get connection: {}", e),
        )))
    })?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Result<i32, _> = conn.query_row(
        "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
        [],
        |row| row.get(0),
    );

    Ok(version.unwrap_or(0))
}

/// Run all pending migrations
pub fn migrate(pool: &Pool<SqliteConnectionManager>) -> Result<(), rusqlite::Error> {
    let current_version = get_current_version(pool)?;
    let pending: Vec<_> = get_migrations()
        .into_iter()
        .filter(|m| m.version > current_version)
        .collect();

    if pending.is_empty() {
        return Ok(());
    }

    let conn = pool.get().map_err(|e| {
        rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to get connection: {}", e),
        )))
    })?;

    for migration in pending {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.up_sql)?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as i64;
        tx.execute(
            "INSERT INTO schema_version (version, applied_at) VALUES (?, ?)",
            params![migration.version, now],
        )?;

        tx.commit()?;

        tracing::info!(version = migration.version, "applied migration: {}", migration.description);
    }

    Ok(())
}
