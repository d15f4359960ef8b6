//! Persistent relational store: schema lifecycle, connection pool,
//! prepared-statement cache, and transactions.

mod migrations;
mod pool;
mod schema;

pub use pool::PooledConnection;
pub use schema::TARGET_SCHEMA_VERSION;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use rusqlite::Connection;

use crate::context::Context;
use crate::error::{store_err, LotError, Result};

const OP_OPEN: &str = "store_open";
const ENV_LOT_HOME: &str = "LOT_HOME";

/// Canonical `lot_home`-relative location of the database file.
pub const DB_RELATIVE_PATH: &str = ".lot/lotman_cpp.sqlite";

/// Tunable knobs for [`Store::open`].
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub busy_timeout_ms: u64,
    pub pool_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { busy_timeout_ms: 5_000, pool_capacity: 5 }
    }
}

/// The three transaction flavors a `Txn` can begin with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    /// Read-oriented: the snapshot is fixed at first statement execution.
    Deferred,
    /// Write lock acquired immediately at `BEGIN`.
    Immediate,
    /// Exclusive lock: no other connection may read or write concurrently.
    Exclusive,
}

impl TransactionKind {
    fn begin_sql(self) -> &'static str {
        match self {
            TransactionKind::Deferred => "BEGIN DEFERRED",
            TransactionKind::Immediate => "BEGIN IMMEDIATE",
            TransactionKind::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// Resolves the `lot_home` directory: `Context` override, then `LOT_HOME`,
/// then the calling user's home directory.
pub fn resolve_lot_home(ctx: &Context) -> Result<PathBuf> {
    if let Some(dir) = ctx.lot_home_override() {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(dir) = env::var(ENV_LOT_HOME) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::home_dir().ok_or_else(|| {
        LotError::HomeDirError {
            op: OP_OPEN,
            path: PathBuf::new(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no home directory for current user"),
        }
    })
}

fn ensure_dir_mode_0700(path: &Path) -> Result<()> {
    match fs::create_dir(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(e) => {
            return Err(LotError::HomeDirError { op: OP_OPEN, path: path.to_path_buf(), source: e });
        }
    }
    #[cfg(unix)]
    {
        let perms = fs::Permissions::from_mode(0o700);
        fs::set_permissions(path, perms)
            .map_err(|e| LotError::HomeDirError { op: OP_OPEN, path: path.to_path_buf(), source: e })?;
    }
    Ok(())
}

/// The persistent store: owns the connection pool and drives schema
/// migration on open. `Send + Sync` so an embedder can wrap it in `Arc`
/// and call it from multiple threads.
pub struct Store {
    pool: pool::Pool,
    db_path: PathBuf,
}

impl Store {
    /// Opens (creating if absent) the database under the resolved
    /// `lot_home`, applying WAL mode and running schema migration.
    ///
    /// # Errors
    /// Returns [`LotError::HomeDirError`] if `lot_home/.lot` cannot be
    /// created, [`LotError::MigrationRefused`] if the existing schema is
    /// incompatible, or [`LotError::StoreError`] for any other SQLite
    /// failure.
    pub fn open(ctx: &Context, config: StoreConfig) -> Result<Self> {
        let lot_home = resolve_lot_home(ctx)?;
        ensure_dir_mode_0700(&lot_home)?;
        let dot_lot = lot_home.join(".lot");
        ensure_dir_mode_0700(&dot_lot)?;
        let db_path = lot_home.join(DB_RELATIVE_PATH);
        Self::open_at(db_path, config)
    }

    /// Opens a store at an explicit path, bypassing `lot_home` resolution.
    /// Used by tests and by callers that manage their own scratch directory.
    pub fn open_at(db_path: PathBuf, config: StoreConfig) -> Result<Self> {
        tracing::info!(path = %db_path.display(), "opening lotman store");
        let pool = pool::Pool::new(&db_path, config.pool_capacity, Duration::from_millis(config.busy_timeout_ms));
        {
            let conn = pool.acquire()?;
            migrations::migrate(&conn).map_err(|e| {
                tracing::error!(error = %e, "schema migration failed");
                e
            })?;
        }
        Ok(Self { pool, db_path })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Acquires a pooled connection outside of any transaction.
    pub fn acquire(&self) -> Result<PooledConnection<'_>> {
        self.pool.acquire()
    }

    /// Begins a transaction of the given kind on a freshly acquired
    /// connection.
    pub fn transaction(&self, kind: TransactionKind) -> Result<Txn<'_>> {
        let conn = self.pool.acquire()?;
        conn.execute_batch(kind.begin_sql()).map_err(store_err("begin_transaction"))?;
        Ok(Txn { conn, done: false })
    }

    /// Drops all idle pooled connections. Exposed for tests that need a
    /// clean pool between scenarios.
    pub fn reset_pool(&self) {
        self.pool.clear();
    }
}

/// A scoped transaction guard. Rolls back on `Drop` unless explicitly
/// committed or rolled back.
pub struct Txn<'p> {
    conn: PooledConnection<'p>,
    done: bool,
}

impl Txn<'_> {
    /// Commits the transaction.
    ///
    /// # Errors
    /// Returns [`LotError::StoreError`] if `COMMIT` fails.
    pub fn commit(mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT").map_err(store_err("commit"))?;
        self.done = true;
        Ok(())
    }

    /// Explicitly rolls back the transaction.
    ///
    /// # Errors
    /// Returns [`LotError::StoreError`] if `ROLLBACK` fails.
    pub fn rollback(mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK").map_err(store_err("rollback"))?;
        self.done = true;
        Ok(())
    }
}

impl std::ops::Deref for Txn<'_> {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        &self.conn
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        if !self.done {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn store_is_send_and_sync() {
        assert_send_sync::<Store>();
    }

    fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open_at(dir.path().join("lotman.sqlite"), StoreConfig::default()).unwrap();
        (dir, store)
    }

    #[test]
    fn open_creates_target_schema() {
        let (_dir, store) = temp_store();
        let conn = store.acquire().unwrap();
        let version: i64 = conn
            .query_row("SELECT version FROM schema_versions WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, TARGET_SCHEMA_VERSION);
    }

    #[test]
    fn reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lotman.sqlite");
        Store::open_at(path.clone(), StoreConfig::default()).unwrap();
        let store2 = Store::open_at(path, StoreConfig::default()).unwrap();
        let conn = store2.acquire().unwrap();
        let version: i64 = conn
            .query_row("SELECT version FROM schema_versions WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, TARGET_SCHEMA_VERSION);
    }

    #[test]
    fn uncommitted_transaction_rolls_back_on_drop() {
        let (_dir, store) = temp_store();
        {
            let txn = store.transaction(TransactionKind::Immediate).unwrap();
            txn.execute("INSERT INTO owners (lot_name, owner) VALUES ('x', 'alice')", [])
                .unwrap();
            // txn dropped without commit
        }
        let conn = store.acquire().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM owners", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn committed_transaction_persists() {
        let (_dir, store) = temp_store();
        {
            let txn = store.transaction(TransactionKind::Immediate).unwrap();
            txn.execute("INSERT INTO owners (lot_name, owner) VALUES ('x', 'alice')", [])
                .unwrap();
            txn.commit().unwrap();
        }
        let conn = store.acquire().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM owners", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }
}
