use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use rusqlite::Connection;

use crate::StoreError;

/// Fixed-size set of SQLite connections.
///
/// Every connection is opened up front. `get` blocks until one is idle or the
/// acquire timeout passes, and the returned guard hands the connection back
/// when dropped, whether the work on it succeeded or not.
pub struct ConnectionPool {
    idle: Mutex<Vec<Connection>>,
    available: Condvar,
    size: usize,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    pub fn open(path: &Path, size: usize, acquire_timeout: Duration) -> Result<Self, StoreError> {
        let size = size.max(1);
        let connections = (0..size)
            .map(|_| open_connection(path, acquire_timeout))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::info!(path = %path.display(), size, "database pool opened");
        Ok(ConnectionPool {
            idle: Mutex::new(connections),
            available: Condvar::new(),
            size,
            acquire_timeout,
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn lock_idle(&self) -> MutexGuard<'_, Vec<Connection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self) -> Result<PooledConnection<'_>, StoreError> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut idle = self.lock_idle();
        loop {
            if let Some(connection) = idle.pop() {
                return Ok(PooledConnection {
                    pool: self,
                    connection: Some(connection),
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::PoolTimeout(self.acquire_timeout));
            }
            idle = self
                .available
                .wait_timeout(idle, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn release(&self, connection: Connection) {
        self.lock_idle().push(connection);
        self.available.notify_one();
    }
}

fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection, StoreError> {
    let connection = Connection::open(path)?;
    connection.busy_timeout(busy_timeout)?;
    connection.query_row("PRAGMA journal_mode = WAL", [], |row| row.get::<_, String>(0))?;
    Ok(connection)
}

/// A connection borrowed from a [`ConnectionPool`].
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    connection: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only taken in `drop`.
        self.connection.as_ref().unwrap()
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.connection.as_mut().unwrap()
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            self.pool.release(connection);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_returns_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::open(&dir.path().join("pool.db"), 1, Duration::from_millis(50))
            .unwrap();

        {
            let conn = pool.get().unwrap();
            conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        }
        let conn = pool.get().unwrap();
        conn.execute("INSERT INTO t (x) VALUES (1)", []).unwrap();
    }

    #[test]
    fn test_exhausted_pool_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::open(&dir.path().join("pool.db"), 1, Duration::from_millis(20))
            .unwrap();

        let _held = pool.get().unwrap();
        assert!(matches!(pool.get(), Err(StoreError::PoolTimeout(_))));
    }

    #[test]
    fn test_zero_size_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::open(&dir.path().join("pool.db"), 0, Duration::from_millis(20))
            .unwrap();
        assert_eq!(pool.size(), 1);
        assert!(pool.get().is_ok());
    }
}
