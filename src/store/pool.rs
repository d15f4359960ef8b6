//! Bounded connection pool.
//!
//! Hand-rolled rather than built on `r2d2`: `acquire`/`release` here have a
//! specific contract (over-capacity release finalizes the connection's
//! cached statements by simply dropping it, since `rusqlite::Connection`
//! finalizes its own statement cache on `Drop`) that a generic pool crate
//! would only get in the way of -- the same judgment call this crate's
//! ancestry makes hand-rolling a `StorageEngine` instead of reaching for an
//! off-the-shelf KV store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::{store_err, Result};

const OP: &str = "pool";

struct PoolInner {
    idle: Vec<Connection>,
}

pub struct Pool {
    inner: Mutex<PoolInner>,
    db_path: PathBuf,
    capacity: usize,
    busy_timeout: Duration,
}

impl Pool {
    pub fn new(db_path: impl AsRef<Path>, capacity: usize, busy_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(PoolInner { idle: Vec::new() }),
            db_path: db_path.as_ref().to_path_buf(),
            capacity: capacity.max(1),
            busy_timeout,
        }
    }

    fn open_new(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path).map_err(store_err(OP))?;
        conn.busy_timeout(self.busy_timeout).map_err(store_err(OP))?;
        // WAL is a database-level (not per-connection) mode; re-asserting it
        // on every new connection is idempotent once the file is in WAL mode.
        conn.pragma_update(None, "journal_mode", "WAL").map_err(store_err(OP))?;
        conn.pragma_update(None, "foreign_keys", "ON").map_err(store_err(OP))?;
        Ok(conn)
    }

    /// Acquires a pooled connection, opening a new one if the pool is empty.
    pub fn acquire(&self) -> Result<PooledConnection<'_>> {
        let existing = {
            let mut inner = self.inner.lock();
            inner.idle.pop()
        };
        let conn = match existing {
            Some(conn) => conn,
            None => self.open_new()?,
        };
        Ok(PooledConnection { pool: self, conn: Some(conn) })
    }

    fn release(&self, conn: Connection) {
        let mut inner = self.inner.lock();
        if inner.idle.len() < self.capacity {
            inner.idle.push(conn);
        }
        // Else: `conn` drops here, finalizing its cached statements and
        // closing the file descriptor.
    }

    /// Drops every idle connection. Used when resetting the store (tests).
    pub fn clear(&self) {
        self.inner.lock().idle.clear();
    }
}

/// RAII guard: returns its connection to the pool on drop (success, error,
/// or unwind -- every exit path releases "Ownership of
/// in-memory state").
pub struct PooledConnection<'p> {
    pool: &'p Pool,
    conn: Option<Connection>,
}

impl std::ops::Deref for PooledConnection<'_> {
    type Target = Connection;
    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken before drop")
    }
}

impl std::ops::DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection taken before drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_reuses_released_connection() {
        let pool = Pool::new(":memory:", 2, Duration::from_millis(100));
        {
            let _conn = pool.acquire().unwrap();
        }
        assert_eq!(pool.inner.lock().idle.len(), 1);
        let _conn = pool.acquire().unwrap();
        assert_eq!(pool.inner.lock().idle.len(), 0);
    }

    #[test]
    fn release_over_capacity_drops_connection() {
        let pool = Pool::new(":memory:", 1, Duration::from_millis(100));
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        drop(a);
        drop(b);
        assert_eq!(pool.inner.lock().idle.len(), 1);
    }
}
