//! SQL store
//!
//! Connection pooling, migrations, and the transaction discipline. Every
//! mutating service operation runs inside `Store::transaction`, which opens
//! an immediate (write-locking) transaction with a bounded busy wait; a
//! lock that cannot be acquired in time surfaces as the transient
//! `CONCURRENCY` error so the caller can retry. Mutations of a single
//! activation therefore never interleave.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

pub mod migrations;
pub mod model;
pub mod repository;

use crate::error::{ServiceError, ServiceResult};

/// Pool-owning handle to the database
#[derive(Clone)]
pub struct Store {
    pool: Pool<SqliteConnectionManager>,
}

impl Store {
    /// Open (or create) a database file
    pub fn open(path: impl AsRef<Path>, lock_timeout: Duration, pool_size: u32) -> ServiceResult<Self> {
        let manager =
            SqliteConnectionManager::file(path).with_init(move |conn| configure(conn, lock_timeout));
        Self::build(manager, pool_size)
    }

    /// Open a process-private in-memory database. A shared-cache URI with a
    /// unique name makes all pooled connections see the same data.
    pub fn in_memory() -> ServiceResult<Self> {
        let uri = format!(
            "file:tessera-{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        );
        let lock_timeout = Duration::from_millis(10_000);
        let manager = SqliteConnectionManager::file(uri)
            .with_flags(
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .with_init(move |conn| configure(conn, lock_timeout));
        Self::build(manager, 4)
    }

    fn build(manager: SqliteConnectionManager, pool_size: u32) -> ServiceResult<Self> {
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| ServiceError::Storage(format!("failed to create pool: {}", e)))?;
        migrations::migrate(&pool)?;
        Ok(Self { pool })
    }

    /// Run a read-only closure on a pooled connection (committed-read view)
    pub fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> ServiceResult<T>,
    ) -> ServiceResult<T> {
        let conn = self.pool.get()?;
        f(&conn)
    }

    /// Run a closure inside an immediate transaction. The write lock is
    /// taken up front; commit on `Ok`, rollback on `Err`. Busy/locked maps
    /// to `ServiceError::Concurrency`.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> ServiceResult<T>,
    ) -> ServiceResult<T> {
        let mut conn = self.pool.get()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(ServiceError::from)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

fn configure(conn: &Connection, lock_timeout: Duration) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(lock_timeout)?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}
