//! Typed repository operations
//!
//! Free functions over a `rusqlite::Connection` so the same query code
//! runs inside a `Store::transaction` (which hands out the transaction's
//! connection) and on plain read connections. All row mapping lives here;
//! services never see SQL.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::model::{
    ActivationHistoryRecord, ActivationRecord, ActivationStatus, Application, ApplicationVersion,
    Integration, MasterKeyPair, PukStatus, RecoveryCode, RecoveryCodeStatus, RecoveryConfigRow,
    RecoveryPuk, SignatureAuditRecord, TokenRecord,
};
use crate::clock::Timestamp;
use crate::core_codec::EncryptionMode;
use crate::error::{ServiceError, ServiceResult};

fn conversion_error(e: ServiceError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Integer, Box::new(e))
}

// ===== Applications =====

pub fn insert_application(conn: &Connection, name: &str) -> ServiceResult<Application> {
    conn.execute("INSERT INTO pa_application (name) VALUES (?)", params![name])?;
    Ok(Application {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
    })
}

pub fn find_application(conn: &Connection, id: i64) -> ServiceResult<Option<Application>> {
    let app = conn
        .query_row(
            "SELECT id, name FROM pa_application WHERE id = ?",
            params![id],
            |row| {
                Ok(Application {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(app)
}

pub fn list_applications(conn: &Connection) -> ServiceResult<Vec<Application>> {
    let mut stmt = conn.prepare("SELECT id, name FROM pa_application ORDER BY id")?;
    let apps = stmt
        .query_map([], |row| {
            Ok(Application {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(apps)
}

// ===== Application versions =====

fn row_to_version(row: &Row) -> rusqlite::Result<ApplicationVersion> {
    Ok(ApplicationVersion {
        id: row.get(0)?,
        application_id: row.get(1)?,
        name: row.get(2)?,
        application_key: row.get(3)?,
        application_secret: row.get(4)?,
        supported: row.get::<_, i64>(5)? != 0,
    })
}

pub fn insert_application_version(
    conn: &Connection,
    application_id: i64,
    name: &str,
    application_key: &str,
    application_secret: &str,
) -> ServiceResult<ApplicationVersion> {
    conn.execute(
        "INSERT INTO pa_application_version
         (application_id, name, application_key, application_secret, supported)
         VALUES (?, ?, ?, ?, 1)",
        params![application_id, name, application_key, application_secret],
    )?;
    Ok(ApplicationVersion {
        id: conn.last_insert_rowid(),
        application_id,
        name: name.to_string(),
        application_key: application_key.to_string(),
        application_secret: application_secret.to_string(),
        supported: true,
    })
}

pub fn find_version_by_application_key(
    conn: &Connection,
    application_key: &str,
) -> ServiceResult<Option<ApplicationVersion>> {
    let version = conn
        .query_row(
            "SELECT id, application_id, name, application_key, application_secret, supported
             FROM pa_application_version WHERE application_key = ?",
            params![application_key],
            row_to_version,
        )
        .optional()?;
    Ok(version)
}

pub fn find_version(conn: &Connection, id: i64) -> ServiceResult<Option<ApplicationVersion>> {
    let version = conn
        .query_row(
            "SELECT id, application_id, name, application_key, application_secret, supported
             FROM pa_application_version WHERE id = ?",
            params![id],
            row_to_version,
        )
        .optional()?;
    Ok(version)
}

pub fn list_versions(conn: &Connection, application_id: i64) -> ServiceResult<Vec<ApplicationVersion>> {
    let mut stmt = conn.prepare(
        "SELECT id, application_id, name, application_key, application_secret, supported
         FROM pa_application_version WHERE application_id = ? ORDER BY id",
    )?;
    let versions = stmt
        .query_map(params![application_id], row_to_version)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(versions)
}

pub fn set_version_supported(conn: &Connection, id: i64, supported: bool) -> ServiceResult<bool> {
    let changed = conn.execute(
        "UPDATE pa_application_version SET supported = ? WHERE id = ?",
        params![supported as i64, id],
    )?;
    Ok(changed > 0)
}

// ===== Master key pairs =====

fn row_to_keypair(row: &Row) -> rusqlite::Result<MasterKeyPair> {
    Ok(MasterKeyPair {
        id: row.get(0)?,
        application_id: row.get(1)?,
        name: row.get(2)?,
        master_key_public: row.get(3)?,
        master_key_private: row.get(4)?,
        timestamp_created: Timestamp::from_millis(row.get::<_, i64>(5)?.max(0) as u64),
    })
}

pub fn insert_master_key_pair(
    conn: &Connection,
    application_id: i64,
    name: Option<&str>,
    public_key: &str,
    private_key: &str,
    now: Timestamp,
) -> ServiceResult<MasterKeyPair> {
    conn.execute(
        "INSERT INTO pa_master_keypair
         (application_id, name, master_key_public, master_key_private, timestamp_created)
         VALUES (?, ?, ?, ?, ?)",
        params![application_id, name, public_key, private_key, now.as_millis() as i64],
    )?;
    Ok(MasterKeyPair {
        id: conn.last_insert_rowid(),
        application_id,
        name: name.map(|s| s.to_string()),
        master_key_public: public_key.to_string(),
        master_key_private: private_key.to_string(),
        timestamp_created: now,
    })
}

/// The latest key pair is current
pub fn find_current_master_key_pair(
    conn: &Connection,
    application_id: i64,
) -> ServiceResult<Option<MasterKeyPair>> {
    let pair = conn
        .query_row(
            "SELECT id, application_id, name, master_key_public, master_key_private, timestamp_created
             FROM pa_master_keypair WHERE application_id = ?
             ORDER BY timestamp_created DESC, id DESC LIMIT 1",
            params![application_id],
            row_to_keypair,
        )
        .optional()?;
    Ok(pair)
}

pub fn find_master_key_pair(conn: &Connection, id: i64) -> ServiceResult<Option<MasterKeyPair>> {
    let pair = conn
        .query_row(
            "SELECT id, application_id, name, master_key_public, master_key_private, timestamp_created
             FROM pa_master_keypair WHERE id = ?",
            params![id],
            row_to_keypair,
        )
        .optional()?;
    Ok(pair)
}

// ===== Activations =====

fn row_to_activation(row: &Row) -> rusqlite::Result<ActivationRecord> {
    Ok(ActivationRecord {
        activation_id: row.get(0)?,
        activation_code: row.get(1)?,
        activation_signature: row.get(2)?,
        user_id: row.get(3)?,
        application_id: row.get(4)?,
        master_keypair_id: row.get(5)?,
        activation_name: row.get(6)?,
        extras: row.get(7)?,
        server_key_public: row.get(8)?,
        server_key_private: row.get(9)?,
        encryption_mode: EncryptionMode::from_i64(row.get(10)?).map_err(conversion_error)?,
        device_key_public: row.get(11)?,
        counter: row.get::<_, i64>(12)?.max(0) as u64,
        failed_attempts: row.get::<_, i64>(13)?.max(0) as u32,
        max_failed_attempts: row.get::<_, i64>(14)?.max(0) as u32,
        status: ActivationStatus::from_i64(row.get(15)?).map_err(conversion_error)?,
        blocked_reason: row.get(16)?,
        version: row.get::<_, Option<i64>>(17)?.map(|v| v.max(0) as u32),
        timestamp_created: Timestamp::from_millis(row.get::<_, i64>(18)?.max(0) as u64),
        timestamp_last_used: Timestamp::from_millis(row.get::<_, i64>(19)?.max(0) as u64),
        timestamp_activation_expire: Timestamp::from_millis(row.get::<_, i64>(20)?.max(0) as u64),
    })
}

const ACTIVATION_COLUMNS: &str = "activation_id, activation_code, activation_signature, user_id, \
     application_id, master_keypair_id, activation_name, extras, server_key_public, \
     server_key_private, encryption_mode, device_key_public, counter, failed_attempts, \
     max_failed_attempts, status, blocked_reason, version, timestamp_created, \
     timestamp_last_used, timestamp_activation_expire";

pub fn insert_activation(conn: &Connection, record: &ActivationRecord) -> ServiceResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO pa_activation ({}) VALUES \
             (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ACTIVATION_COLUMNS
        ),
        params![
            record.activation_id,
            record.activation_code,
            record.activation_signature,
            record.user_id,
            record.application_id,
            record.master_keypair_id,
            record.activation_name,
            record.extras,
            record.server_key_public,
            record.server_key_private,
            record.encryption_mode.as_i64(),
            record.device_key_public,
            record.counter as i64,
            record.failed_attempts as i64,
            record.max_failed_attempts as i64,
            record.status.as_i64(),
            record.blocked_reason,
            record.version.map(|v| v as i64),
            record.timestamp_created.as_millis() as i64,
            record.timestamp_last_used.as_millis() as i64,
            record.timestamp_activation_expire.as_millis() as i64,
        ],
    )?;
    Ok(())
}

pub fn update_activation(conn: &Connection, record: &ActivationRecord) -> ServiceResult<()> {
    let changed = conn.execute(
        "UPDATE pa_activation SET
             device_key_public = ?, counter = ?, failed_attempts = ?, max_failed_attempts = ?,
             status = ?, blocked_reason = ?, version = ?, activation_name = ?, extras = ?,
             timestamp_last_used = ?, timestamp_activation_expire = ?
         WHERE activation_id = ?",
        params![
            record.device_key_public,
            record.counter as i64,
            record.failed_attempts as i64,
            record.max_failed_attempts as i64,
            record.status.as_i64(),
            record.blocked_reason,
            record.version.map(|v| v as i64),
            record.activation_name,
            record.extras,
            record.timestamp_last_used.as_millis() as i64,
            record.timestamp_activation_expire.as_millis() as i64,
            record.activation_id,
        ],
    )?;
    if changed == 0 {
        return Err(ServiceError::ActivationNotFound);
    }
    Ok(())
}

pub fn find_activation(
    conn: &Connection,
    activation_id: &str,
) -> ServiceResult<Option<ActivationRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {} FROM pa_activation WHERE activation_id = ?", ACTIVATION_COLUMNS),
            params![activation_id],
            row_to_activation,
        )
        .optional()?;
    Ok(record)
}

pub fn find_activations_by_user(
    conn: &Connection,
    user_id: &str,
    application_id: Option<i64>,
) -> ServiceResult<Vec<ActivationRecord>> {
    let mut records = Vec::new();
    match application_id {
        Some(app_id) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM pa_activation WHERE user_id = ? AND application_id = ?
                 ORDER BY timestamp_created DESC",
                ACTIVATION_COLUMNS
            ))?;
            let rows = stmt.query_map(params![user_id, app_id], row_to_activation)?;
            for row in rows {
                records.push(row?);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM pa_activation WHERE user_id = ?
                 ORDER BY timestamp_created DESC",
                ACTIVATION_COLUMNS
            ))?;
            let rows = stmt.query_map(params![user_id], row_to_activation)?;
            for row in rows {
                records.push(row?);
            }
        }
    }
    Ok(records)
}

/// Find an unexpired activation awaiting Prepare by its code
pub fn find_created_activation(
    conn: &Connection,
    application_id: i64,
    activation_code: &str,
    now: Timestamp,
) -> ServiceResult<Option<ActivationRecord>> {
    let record = conn
        .query_row(
            &format!(
                "SELECT {} FROM pa_activation
                 WHERE application_id = ? AND activation_code = ? AND status = ?
                   AND timestamp_activation_expire >= ?",
                ACTIVATION_COLUMNS
            ),
            params![
                application_id,
                activation_code,
                ActivationStatus::Created.as_i64(),
                now.as_millis() as i64
            ],
            row_to_activation,
        )
        .optional()?;
    Ok(record)
}

/// Whether a code would collide with a non-terminal unexpired activation
pub fn activation_code_in_use(
    conn: &Connection,
    application_id: i64,
    activation_code: &str,
    now: Timestamp,
) -> ServiceResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pa_activation
         WHERE application_id = ? AND activation_code = ?
           AND status IN (?, ?) AND timestamp_activation_expire >= ?",
        params![
            application_id,
            activation_code,
            ActivationStatus::Created.as_i64(),
            ActivationStatus::OtpUsed.as_i64(),
            now.as_millis() as i64
        ],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn activation_id_exists(conn: &Connection, activation_id: &str) -> ServiceResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pa_activation WHERE activation_id = ?",
        params![activation_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

// ===== History & audit =====

pub fn insert_history(
    conn: &Connection,
    activation_id: &str,
    status: ActivationStatus,
    event_reason: Option<&str>,
    now: Timestamp,
) -> ServiceResult<()> {
    conn.execute(
        "INSERT INTO pa_activation_history (activation_id, status, event_reason, timestamp_created)
         VALUES (?, ?, ?, ?)",
        params![activation_id, status.as_i64(), event_reason, now.as_millis() as i64],
    )?;
    Ok(())
}

pub fn list_history(
    conn: &Connection,
    activation_id: &str,
) -> ServiceResult<Vec<ActivationHistoryRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, activation_id, status, event_reason, timestamp_created
         FROM pa_activation_history WHERE activation_id = ? ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![activation_id], |row| {
            Ok(ActivationHistoryRecord {
                id: row.get(0)?,
                activation_id: row.get(1)?,
                status: ActivationStatus::from_i64(row.get(2)?).map_err(conversion_error)?,
                event_reason: row.get(3)?,
                timestamp_created: Timestamp::from_millis(row.get::<_, i64>(4)?.max(0) as u64),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn insert_signature_audit(
    conn: &Connection,
    activation_id: &str,
    activation_counter: u64,
    signature_type: &str,
    data_hash: &str,
    valid: bool,
    note: Option<&str>,
    now: Timestamp,
) -> ServiceResult<()> {
    conn.execute(
        "INSERT INTO pa_signature_audit
         (activation_id, activation_counter, signature_type, data_hash, valid, note, timestamp_created)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            activation_id,
            activation_counter as i64,
            signature_type,
            data_hash,
            valid as i64,
            note,
            now.as_millis() as i64
        ],
    )?;
    Ok(())
}

pub fn list_signature_audit(
    conn: &Connection,
    activation_id: &str,
) -> ServiceResult<Vec<SignatureAuditRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, activation_id, activation_counter, signature_type, data_hash, valid, note,
                timestamp_created
         FROM pa_signature_audit WHERE activation_id = ? ORDER BY id",
    )?;
    let rows = stmt
        .query_map(params![activation_id], |row| {
            Ok(SignatureAuditRecord {
                id: row.get(0)?,
                activation_id: row.get(1)?,
                activation_counter: row.get::<_, i64>(2)?.max(0) as u64,
                signature_type: row.get(3)?,
                data_hash: row.get(4)?,
                valid: row.get::<_, i64>(5)? != 0,
                note: row.get(6)?,
                timestamp_created: Timestamp::from_millis(row.get::<_, i64>(7)?.max(0) as u64),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ===== Recovery codes =====

fn row_to_recovery_code(row: &Row) -> rusqlite::Result<RecoveryCode> {
    Ok(RecoveryCode {
        id: row.get(0)?,
        application_id: row.get(1)?,
        user_id: row.get(2)?,
        activation_id: row.get(3)?,
        code: row.get(4)?,
        status: RecoveryCodeStatus::from_i64(row.get(5)?).map_err(conversion_error)?,
        failed_attempts: row.get::<_, i64>(6)?.max(0) as u32,
        max_failed_attempts: row.get::<_, i64>(7)?.max(0) as u32,
        timestamp_created: Timestamp::from_millis(row.get::<_, i64>(8)?.max(0) as u64),
    })
}

const RECOVERY_COLUMNS: &str = "id, application_id, user_id, activation_id, code, status, \
     failed_attempts, max_failed_attempts, timestamp_created";

pub fn insert_recovery_code(conn: &Connection, code: &RecoveryCode) -> ServiceResult<i64> {
    conn.execute(
        "INSERT INTO pa_recovery_code
         (application_id, user_id, activation_id, code, status, failed_attempts,
          max_failed_attempts, timestamp_created)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            code.application_id,
            code.user_id,
            code.activation_id,
            code.code,
            code.status.as_i64(),
            code.failed_attempts as i64,
            code.max_failed_attempts as i64,
            code.timestamp_created.as_millis() as i64
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_recovery_code(
    conn: &Connection,
    application_id: i64,
    code: &str,
) -> ServiceResult<Option<RecoveryCode>> {
    let record = conn
        .query_row(
            &format!(
                "SELECT {} FROM pa_recovery_code WHERE application_id = ? AND code = ?",
                RECOVERY_COLUMNS
            ),
            params![application_id, code],
            row_to_recovery_code,
        )
        .optional()?;
    Ok(record)
}

/// Non-revoked codes for a user; used for the at-most-one-live-code rule
pub fn find_live_recovery_codes_for_user(
    conn: &Connection,
    application_id: i64,
    user_id: &str,
) -> ServiceResult<Vec<RecoveryCode>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM pa_recovery_code
         WHERE application_id = ? AND user_id = ? AND status IN (?, ?)
         ORDER BY id",
        RECOVERY_COLUMNS
    ))?;
    let rows = stmt
        .query_map(
            params![
                application_id,
                user_id,
                RecoveryCodeStatus::Created.as_i64(),
                RecoveryCodeStatus::Active.as_i64()
            ],
            row_to_recovery_code,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn lookup_recovery_codes(
    conn: &Connection,
    application_id: i64,
    user_id: Option<&str>,
    activation_id: Option<&str>,
    status: Option<RecoveryCodeStatus>,
) -> ServiceResult<Vec<RecoveryCode>> {
    let mut sql = format!(
        "SELECT {} FROM pa_recovery_code WHERE application_id = ?",
        RECOVERY_COLUMNS
    );
    let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(application_id)];
    if let Some(user_id) = user_id {
        sql.push_str(" AND user_id = ?");
        args.push(Box::new(user_id.to_string()));
    }
    if let Some(activation_id) = activation_id {
        sql.push_str(" AND activation_id = ?");
        args.push(Box::new(activation_id.to_string()));
    }
    if let Some(status) = status {
        sql.push_str(" AND status = ?");
        args.push(Box::new(status.as_i64()));
    }
    sql.push_str(" ORDER BY id");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            row_to_recovery_code,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update_recovery_code(conn: &Connection, code: &RecoveryCode) -> ServiceResult<()> {
    let changed = conn.execute(
        "UPDATE pa_recovery_code SET status = ?, failed_attempts = ?, activation_id = ?
         WHERE id = ?",
        params![
            code.status.as_i64(),
            code.failed_attempts as i64,
            code.activation_id,
            code.id
        ],
    )?;
    if changed == 0 {
        return Err(ServiceError::Storage("recovery code vanished".to_string()));
    }
    Ok(())
}

pub fn insert_recovery_puk(
    conn: &Connection,
    recovery_code_id: i64,
    puk_index: u32,
    puk_hash: &str,
) -> ServiceResult<()> {
    conn.execute(
        "INSERT INTO pa_recovery_puk (recovery_code_id, puk_index, puk_hash, status)
         VALUES (?, ?, ?, ?)",
        params![recovery_code_id, puk_index as i64, puk_hash, PukStatus::Valid.as_i64()],
    )?;
    Ok(())
}

pub fn find_recovery_puks(
    conn: &Connection,
    recovery_code_id: i64,
) -> ServiceResult<Vec<RecoveryPuk>> {
    let mut stmt = conn.prepare(
        "SELECT id, recovery_code_id, puk_index, puk_hash, status
         FROM pa_recovery_puk WHERE recovery_code_id = ? ORDER BY puk_index",
    )?;
    let rows = stmt
        .query_map(params![recovery_code_id], |row| {
            Ok(RecoveryPuk {
                id: row.get(0)?,
                recovery_code_id: row.get(1)?,
                puk_index: row.get::<_, i64>(2)?.max(0) as u32,
                puk_hash: row.get(3)?,
                status: PukStatus::from_i64(row.get(4)?).map_err(conversion_error)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update_puk_status(conn: &Connection, puk_id: i64, status: PukStatus) -> ServiceResult<()> {
    conn.execute(
        "UPDATE pa_recovery_puk SET status = ? WHERE id = ?",
        params![status.as_i64(), puk_id],
    )?;
    Ok(())
}

pub fn get_recovery_config(
    conn: &Connection,
    application_id: i64,
) -> ServiceResult<Option<RecoveryConfigRow>> {
    let row = conn
        .query_row(
            "SELECT application_id, activation_recovery_enabled, puk_count
             FROM pa_recovery_config WHERE application_id = ?",
            params![application_id],
            |row| {
                Ok(RecoveryConfigRow {
                    application_id: row.get(0)?,
                    activation_recovery_enabled: row.get::<_, i64>(1)? != 0,
                    puk_count: row.get::<_, i64>(2)?.max(0) as u32,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn upsert_recovery_config(conn: &Connection, config: &RecoveryConfigRow) -> ServiceResult<()> {
    conn.execute(
        "INSERT INTO pa_recovery_config (application_id, activation_recovery_enabled, puk_count)
         VALUES (?, ?, ?)
         ON CONFLICT(application_id) DO UPDATE SET
             activation_recovery_enabled = excluded.activation_recovery_enabled,
             puk_count = excluded.puk_count",
        params![
            config.application_id,
            config.activation_recovery_enabled as i64,
            config.puk_count as i64
        ],
    )?;
    Ok(())
}

// ===== Tokens =====

pub fn insert_token(conn: &Connection, token: &TokenRecord) -> ServiceResult<()> {
    conn.execute(
        "INSERT INTO pa_token (token_id, token_secret, activation_id, signature_type, timestamp_created)
         VALUES (?, ?, ?, ?, ?)",
        params![
            token.token_id,
            token.token_secret,
            token.activation_id,
            token.signature_type,
            token.timestamp_created.as_millis() as i64
        ],
    )?;
    Ok(())
}

pub fn find_token(conn: &Connection, token_id: &str) -> ServiceResult<Option<TokenRecord>> {
    let token = conn
        .query_row(
            "SELECT token_id, token_secret, activation_id, signature_type, timestamp_created
             FROM pa_token WHERE token_id = ?",
            params![token_id],
            |row| {
                Ok(TokenRecord {
                    token_id: row.get(0)?,
                    token_secret: row.get(1)?,
                    activation_id: row.get(2)?,
                    signature_type: row.get(3)?,
                    timestamp_created: Timestamp::from_millis(row.get::<_, i64>(4)?.max(0) as u64),
                })
            },
        )
        .optional()?;
    Ok(token)
}

pub fn token_id_exists(conn: &Connection, token_id: &str) -> ServiceResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pa_token WHERE token_id = ?",
        params![token_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn delete_token(conn: &Connection, token_id: &str) -> ServiceResult<bool> {
    let changed = conn.execute("DELETE FROM pa_token WHERE token_id = ?", params![token_id])?;
    Ok(changed > 0)
}

// ===== Integrations =====

pub fn insert_integration(conn: &Connection, integration: &Integration) -> ServiceResult<()> {
    conn.execute(
        "INSERT INTO pa_integration (id, name, client_token, client_secret_hash)
         VALUES (?, ?, ?, ?)",
        params![
            integration.id,
            integration.name,
            integration.client_token,
            integration.client_secret_hash
        ],
    )?;
    Ok(())
}

pub fn list_integrations(conn: &Connection) -> ServiceResult<Vec<Integration>> {
    let mut stmt =
        conn.prepare("SELECT id, name, client_token, client_secret_hash FROM pa_integration ORDER BY name")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(Integration {
                id: row.get(0)?,
                name: row.get(1)?,
                client_token: row.get(2)?,
                client_secret_hash: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn find_integration_by_token(
    conn: &Connection,
    client_token: &str,
) -> ServiceResult<Option<Integration>> {
    let row = conn
        .query_row(
            "SELECT id, name, client_token, client_secret_hash
             FROM pa_integration WHERE client_token = ?",
            params![client_token],
            |row| {
                Ok(Integration {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    client_token: row.get(2)?,
                    client_secret_hash: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

pub fn delete_integration(conn: &Connection, id: &str) -> ServiceResult<bool> {
    let changed = conn.execute("DELETE FROM pa_integration WHERE id = ?", params![id])?;
    Ok(changed > 0)
}
