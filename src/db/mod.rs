//! Database plumbing shared by the SQL importers and the local collection.
//!
//! [`SqlConnection`] confines a handle to its owner thread. The backends here
//! adapt SQLite (rusqlite) and DuckDB to it, [`ServerBackend`] reaches MySQL
//! and PostgreSQL through sqlx, and [`EmbeddedServer`] supervises a database
//! server subprocess for connections that need one.

mod connection;
mod embedded;
mod handle;
mod server;
mod update;

pub use connection::{Backend, Session, SqlConnection};
pub use embedded::{EmbeddedServer, ServerConfig, ServerState};
pub use handle::{Row, SqlHandle};
pub use server::{ServerBackend, ServerDriver, ServerHandle};
pub use update::UpdateBuilder;

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::OpenFlags;

use crate::error::Result;

/// How long SQLite waits on a lock held by the player owning the file.
const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite database file of another player.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    path: PathBuf,
    read_only: bool,
}

impl SqliteBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            read_only: false,
        }
    }

    #[must_use]
    pub const fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Backend for SqliteBackend {
    type Handle = rusqlite::Connection;

    fn open(&self) -> Result<Self::Handle> {
        // Never create the file: a missing database means a misconfigured importer.
        let access = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        let conn = rusqlite::Connection::open_with_flags(
            &self.path,
            access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(SQLITE_BUSY_TIMEOUT)?;
        Ok(conn)
    }

    fn begin(handle: &mut Self::Handle) -> Result<()> {
        handle.execute_batch("BEGIN")?;
        Ok(())
    }

    fn commit(handle: &mut Self::Handle) -> Result<()> {
        handle.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(handle: &mut Self::Handle) -> Result<()> {
        handle.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

/// DuckDB database, on disk or in memory.
#[derive(Debug, Clone, Default)]
pub struct DuckDbBackend {
    path: Option<PathBuf>,
}

impl DuckDbBackend {
    pub fn open_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    #[must_use]
    pub const fn in_memory() -> Self {
        Self { path: None }
    }
}

impl Backend for DuckDbBackend {
    type Handle = duckdb::Connection;

    fn open(&self) -> Result<Self::Handle> {
        let conn = match &self.path {
            Some(path) => duckdb::Connection::open(path)?,
            None => duckdb::Connection::open_in_memory()?,
        };
        Ok(conn)
    }

    fn begin(handle: &mut Self::Handle) -> Result<()> {
        handle.execute_batch("BEGIN TRANSACTION")?;
        Ok(())
    }

    fn commit(handle: &mut Self::Handle) -> Result<()> {
        handle.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(handle: &mut Self::Handle) -> Result<()> {
        handle.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// An in-memory database lives only as long as its handle.
    fn close_between_queries(&self) -> bool {
        self.path.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sqlite_backend_does_not_create_missing_file() {
        let dir = TempDir::new().unwrap();
        let backend = SqliteBackend::new(dir.path().join("missing.db"));
        assert!(backend.open().is_err());
        assert!(!backend.path().exists());
    }

    #[test]
    fn test_sqlite_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ro.db");
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE t (v INTEGER)")
            .unwrap();

        let conn = SqlConnection::new("ro", SqliteBackend::new(&path).read_only(true)).unwrap();
        let result = conn.query(|db| {
            db.execute("INSERT INTO t (v) VALUES (1)", &[])?;
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_in_memory_duckdb_keeps_handle() {
        let conn = SqlConnection::new("mem", DuckDbBackend::in_memory()).unwrap();
        conn.query(|db| {
            db.execute_batch("CREATE TABLE t (v INTEGER); INSERT INTO t VALUES (1);")?;
            Ok(())
        })
        .unwrap();
        let count: i64 = conn
            .query(|db| Ok(db.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_duckdb_transaction_rollback() {
        let dir = TempDir::new().unwrap();
        let conn =
            SqlConnection::new("duck", DuckDbBackend::open_path(dir.path().join("c.duckdb")))
                .unwrap();
        conn.query(|db| {
            db.execute_batch("CREATE TABLE t (v INTEGER)")?;
            Ok(())
        })
        .unwrap();

        conn.transaction().unwrap();
        conn.query(|db| {
            db.execute("INSERT INTO t VALUES (1)", [])?;
            Ok(())
        })
        .unwrap();
        conn.rollback().unwrap();

        let count: i64 = conn
            .query(|db| Ok(db.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(count, 0);
    }
}
