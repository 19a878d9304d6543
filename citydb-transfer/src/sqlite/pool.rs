//! Bounded pool of configured SQLite connections.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use citydb_core::{AdapterError, ConnectionPool};
use log::debug;
use parking_lot::{Condvar, Mutex};
use rusqlite::{Connection, Error as SqliteError};
use thiserror::Error;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors raised while lending out connections.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool was closed.
    #[error("connection pool is closed")]
    Closed,
    /// Opening a new connection failed.
    #[error("failed to open SQLite database at {path:?}")]
    Open {
        /// Database path.
        path: Utf8PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
    /// Applying connection pragmas failed.
    #[error("failed to configure SQLite connection")]
    Configure {
        /// Source error returned by `rusqlite`.
        #[source]
        source: SqliteError,
    },
}

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<Connection>,
    open: usize,
    closed: bool,
}

#[derive(Debug)]
struct Inner {
    state: Mutex<PoolState>,
    released: Condvar,
    capacity: usize,
    path: Utf8PathBuf,
}

/// Pool of at most `capacity` connections to one database file.
///
/// Connections are opened lazily. [`SqlitePool::acquire`] blocks while every
/// connection is lent out.
#[derive(Debug, Clone)]
pub struct SqlitePool {
    inner: Arc<Inner>,
}

impl SqlitePool {
    /// Pool over the database at `path`; a capacity of zero is raised to one.
    #[must_use]
    pub fn new(path: &Utf8Path, capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(PoolState::default()),
                released: Condvar::new(),
                capacity: capacity.max(1),
                path: path.to_path_buf(),
            }),
        }
    }

    /// Maximum number of connections lent out at once.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of connections currently lent out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        let state = self.inner.state.lock();
        state.open - state.idle.len()
    }

    /// Borrow a connection.
    ///
    /// With `auto_commit` disabled the guard rolls back any transaction left
    /// open when it is dropped.
    ///
    /// # Errors
    /// Returns [`PoolError::Closed`] after [`SqlitePool::close`], or an open
    /// or configuration error for a fresh connection.
    pub fn acquire(&self, auto_commit: bool) -> Result<PooledConnection, PoolError> {
        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(connection) = state.idle.pop() {
                return Ok(self.lend(connection, auto_commit));
            }
            if state.open < self.inner.capacity {
                state.open += 1;
                drop(state);
                return match open_connection(&self.inner.path) {
                    Ok(connection) => Ok(self.lend(connection, auto_commit)),
                    Err(err) => {
                        self.forget_one();
                        Err(err)
                    }
                };
            }
            self.inner.released.wait(&mut state);
        }
    }

    /// Refuse further borrowing and drop idle connections.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        let idle = state.idle.len();
        state.open -= idle;
        state.idle.clear();
        drop(state);
        self.inner.released.notify_all();
    }

    fn lend(&self, connection: Connection, auto_commit: bool) -> PooledConnection {
        PooledConnection {
            connection: Some(connection),
            pool: Arc::clone(&self.inner),
            auto_commit,
        }
    }

    fn forget_one(&self) {
        let mut state = self.inner.state.lock();
        state.open -= 1;
        drop(state);
        self.inner.released.notify_one();
    }
}

impl ConnectionPool for SqlitePool {
    type Connection = PooledConnection;

    fn get(&self, auto_commit: bool) -> Result<Self::Connection, AdapterError> {
        self.acquire(auto_commit).map_err(Into::into)
    }
}

/// Open and configure a connection the way every pooled connection is.
pub(crate) fn open_connection(path: &Utf8Path) -> Result<Connection, PoolError> {
    let connection =
        Connection::open(path.as_std_path()).map_err(|source| PoolError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    connection
        .busy_timeout(BUSY_TIMEOUT)
        .map_err(|source| PoolError::Configure { source })?;
    connection
        .pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
        .map_err(|source| PoolError::Configure { source })?;
    connection
        .pragma_update(None, "foreign_keys", true)
        .map_err(|source| PoolError::Configure { source })?;
    debug!("opened SQLite connection to {path}");
    Ok(connection)
}

/// Connection lent out by a [`SqlitePool`].
#[derive(Debug)]
pub struct PooledConnection {
    connection: Option<Connection>,
    pool: Arc<Inner>,
    auto_commit: bool,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match &self.connection {
            Some(connection) => connection,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        match &mut self.connection {
            Some(connection) => connection,
            None => unreachable!("connection is only taken on drop"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        if !self.auto_commit && !connection.is_autocommit() {
            if let Err(err) = connection.execute_batch("ROLLBACK") {
                debug!("rollback on connection release failed: {err}");
            }
        }
        let mut state = self.pool.state.lock();
        if state.closed {
            state.open -= 1;
        } else {
            state.idle.push(connection);
        }
        drop(state);
        self.pool.released.notify_one();
    }
}
