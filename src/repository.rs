//! Client feature store.
//!
//! Single-row lookups against the `clients` table of a SQLite file. The
//! file to use is resolved once per lifecycle from an ordered candidate
//! list; lookups go through a small bounded pool of read-only connections
//! so concurrent load cannot exhaust file descriptors.

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex, PoisonError};

/// Primary-key column of the `clients` table.
pub const ID_COLUMN: &str = "SK_ID_CURR";
/// Training label column; present in some exports, never a model input.
pub const LABEL_COLUMN: &str = "TARGET";

/// Pick the database file: first existing candidate, else the default.
///
/// Runs once per lifecycle load; the resolved path is held by the service
/// until `reset()`.
pub fn resolve_database_path(candidates: &[PathBuf], default: &Path) -> PathBuf {
    for candidate in candidates {
        if candidate.exists() {
            tracing::info!("using client database {}", candidate.display());
            return candidate.clone();
        }
    }
    tracing::warn!(
        "no client database candidate found, falling back to {}",
        default.display()
    );
    default.to_path_buf()
}

/// One client's feature row: an ordered name→value mapping with the id and
/// label columns already stripped. Missing or malformed cells are NaN.
#[derive(Debug, Clone)]
pub struct ClientFeatures {
    client_id: i64,
    names: Vec<String>,
    values: Vec<f64>,
}

impl ClientFeatures {
    pub fn client_id(&self) -> i64 {
        self.client_id
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Feature values in column order, ready for the model input row.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(client_id: i64, names: Vec<String>, values: Vec<f64>) -> Self {
        Self {
            client_id,
            names,
            values,
        }
    }

    /// Value by feature name; NaN cells answer None.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
            .filter(|v| !v.is_nan())
    }
}

struct PoolInner {
    idle: Vec<Connection>,
    open: usize,
}

/// Bounded pool of read-only SQLite connections. `acquire` blocks when all
/// connections are checked out.
pub struct ConnectionPool {
    path: PathBuf,
    max_open: usize,
    inner: Mutex<PoolInner>,
    available: Condvar,
}

impl ConnectionPool {
    pub fn new(path: PathBuf, max_open: usize) -> Self {
        Self {
            path,
            max_open: max_open.max(1),
            inner: Mutex::new(PoolInner {
                idle: Vec::new(),
                open: 0,
            }),
            available: Condvar::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check out a connection, opening a new one only while below the cap.
    pub fn acquire(&self) -> Result<PooledConnection<'_>> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(conn) = inner.idle.pop() {
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                });
            }
            if inner.open < self.max_open {
                inner.open += 1;
                drop(inner);
                match self.open_connection() {
                    Ok(conn) => {
                        return Ok(PooledConnection {
                            pool: self,
                            conn: Some(conn),
                        })
                    }
                    Err(e) => {
                        let mut inner =
                            self.inner.lock().unwrap_or_else(PoisonError::into_inner);
                        inner.open -= 1;
                        self.available.notify_one();
                        return Err(e);
                    }
                }
            }
            inner = self
                .available
                .wait(inner)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn open_connection(&self) -> Result<Connection> {
        Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open client database: {}", self.path.display()))
    }

    fn release(&self, conn: Connection) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.idle.push(conn);
        drop(inner);
        self.available.notify_one();
    }
}

/// RAII connection checkout; returns to the pool on drop.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection already released")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// Read-side repository over the resolved client database.
pub struct ClientRepository {
    pool: ConnectionPool,
}

impl ClientRepository {
    pub fn new(path: PathBuf, pool_size: usize) -> Self {
        Self {
            pool: ConnectionPool::new(path, pool_size),
        }
    }

    pub fn database_path(&self) -> &Path {
        self.pool.path()
    }

    /// Fetch one client's feature row by primary key. No matching row is
    /// `Ok(None)`, not an error. Non-numeric cells coerce to NaN so a
    /// single bad column never discards the row.
    pub fn fetch(&self, client_id: i64) -> Result<Option<ClientFeatures>> {
        let conn = self.pool.acquire()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT * FROM clients WHERE {ID_COLUMN} = ?1"
            ))
            .context("failed to prepare client lookup")?;

        let columns: Vec<String> = stmt
            .column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let mut rows = stmt
            .query(rusqlite::params![client_id])
            .context("client lookup failed")?;
        let row = match rows.next().context("client lookup failed")? {
            Some(row) => row,
            None => return Ok(None),
        };

        let mut names = Vec::with_capacity(columns.len());
        let mut values = Vec::with_capacity(columns.len());
        for (index, column) in columns.iter().enumerate() {
            if column == ID_COLUMN || column == LABEL_COLUMN {
                continue;
            }
            let value = match row.get_ref(index).context("failed to read column")? {
                rusqlite::types::ValueRef::Integer(v) => v as f64,
                rusqlite::types::ValueRef::Real(v) => v,
                rusqlite::types::ValueRef::Text(text) => std::str::from_utf8(text)
                    .ok()
                    .and_then(|s| s.trim().parse::<f64>().ok())
                    .unwrap_or(f64::NAN),
                // NULLs and blobs become the missing-value marker.
                _ => f64::NAN,
            };
            names.push(column.clone());
            values.push(value);
        }

        Ok(Some(ClientFeatures {
            client_id,
            names,
            values,
        }))
    }
}
