//! Thread-affine database connections.
//!
//! Database handles of the players we import from must never be shared
//! between threads. A [`SqlConnection`] owns one dedicated thread that is the
//! only one ever opening, querying or closing its handle; every other thread
//! submits closures over a channel and blocks until the owner replies.
//!
//! Outside a transaction the handle is opened for a single query and closed
//! right after, so external library files are not kept locked. A transaction
//! keeps it open and excludes every other calling thread until it ends.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use super::embedded::EmbeddedServer;
use crate::error::{Error, Result};

/// A database engine as seen by [`SqlConnection`].
pub trait Backend: Send + 'static {
    /// Open handle; lives on the owner thread only.
    type Handle;

    fn open(&self) -> Result<Self::Handle>;
    fn begin(handle: &mut Self::Handle) -> Result<()>;
    fn commit(handle: &mut Self::Handle) -> Result<()>;
    fn rollback(handle: &mut Self::Handle) -> Result<()>;

    /// Whether the handle is closed after every query outside a transaction.
    fn close_between_queries(&self) -> bool {
        true
    }
}

/// State living on the owner thread.
pub struct Session<B: Backend> {
    backend: B,
    handle: Option<B::Handle>,
    in_transaction: bool,
    server: Option<Arc<EmbeddedServer>>,
}

impl<B: Backend> Session<B> {
    fn handle(&mut self) -> Result<&mut B::Handle> {
        if let Some(server) = &self.server {
            server.ensure_running()?;
            server.touch();
        }
        if self.handle.is_none() {
            self.handle = Some(self.backend.open()?);
        }
        self.handle
            .as_mut()
            .ok_or_else(|| Error::connection("database handle unavailable"))
    }

    fn release(&mut self) {
        if !self.in_transaction && self.backend.close_between_queries() {
            self.handle = None;
        }
    }

    fn begin(&mut self) -> Result<()> {
        let handle = self.handle()?;
        if let Err(e) = B::begin(handle) {
            self.release();
            return Err(e);
        }
        self.in_transaction = true;
        Ok(())
    }

    fn finish(&mut self, commit: bool) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        let result = match self.handle.as_mut() {
            Some(handle) if commit => B::commit(handle),
            Some(handle) => B::rollback(handle),
            None => Err(Error::connection("transaction lost its handle")),
        };
        self.in_transaction = false;
        self.release();
        result
    }
}

type Task<B> = Box<dyn FnOnce(&mut Session<B>) + Send>;

/// A connection whose handle is confined to one owner thread.
pub struct SqlConnection<B: Backend> {
    name: String,
    sender: Option<Sender<Task<B>>>,
    owner: Option<JoinHandle<()>>,
    owner_id: ThreadId,
    /// Thread currently holding the transaction, if any.
    transaction: Mutex<Option<ThreadId>>,
    released: Condvar,
}

impl<B: Backend> SqlConnection<B> {
    pub fn new(name: impl Into<String>, backend: B) -> Result<Self> {
        Self::build(name.into(), backend, None)
    }

    /// A connection to a database served by a supervised subprocess. The
    /// server is started before the handle is opened and touched on every use.
    pub fn with_server(
        name: impl Into<String>,
        backend: B,
        server: Arc<EmbeddedServer>,
    ) -> Result<Self> {
        Self::build(name.into(), backend, Some(server))
    }

    fn build(name: String, backend: B, server: Option<Arc<EmbeddedServer>>) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded::<Task<B>>();
        let owner = thread::Builder::new()
            .name(format!("sql-{name}"))
            .spawn(move || {
                let session = Session {
                    backend,
                    handle: None,
                    in_transaction: false,
                    server,
                };
                run_owner(session, &receiver);
            })?;
        let owner_id = owner.thread().id();
        debug!(connection = %name, "Started connection owner thread");

        Ok(Self {
            name,
            sender: Some(sender),
            owner: Some(owner),
            owner_id,
            transaction: Mutex::new(None),
            released: Condvar::new(),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when called from the thread that owns the handle.
    #[must_use]
    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner_id
    }

    /// Run `f` against the handle on the owner thread.
    ///
    /// Waits while another thread holds a transaction.
    pub fn query<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut B::Handle) -> Result<T> + Send + 'static,
    {
        let _guard = self.acquire()?;
        self.dispatch(move |session| {
            let result = session.handle().and_then(f);
            session.release();
            result
        })
    }

    /// Begin a transaction owned by the calling thread. A nested call from
    /// the owning thread does nothing.
    pub fn transaction(&self) -> Result<()> {
        let current = thread::current().id();
        let mut guard = self.acquire()?;
        if *guard == Some(current) {
            return Ok(());
        }
        self.dispatch(Session::begin)?;
        *guard = Some(current);
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.end_transaction(true)
    }

    pub fn rollback(&self) -> Result<()> {
        self.end_transaction(false)
    }

    /// Whether the calling thread holds an open transaction.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        *self.lock_state() == Some(thread::current().id())
    }

    /// Run `f` inside a transaction: committed on `Ok`, rolled back on `Err`.
    /// Inside an already open transaction `f` simply joins it.
    pub fn run_in_transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        if self.in_transaction() {
            return f(self);
        }
        self.transaction()?;
        match f(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_error) = self.rollback() {
                    warn!(connection = %self.name, error = %rollback_error, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Whether the owner thread currently holds an open handle.
    pub fn is_open(&self) -> Result<bool> {
        self.dispatch(|session| Ok(session.handle.is_some()))
    }

    fn end_transaction(&self, commit: bool) -> Result<()> {
        let mut guard = self.lock_state();
        if *guard != Some(thread::current().id()) {
            warn!(
                connection = %self.name,
                "{} called outside of a transaction",
                if commit { "commit" } else { "rollback" }
            );
            return Ok(());
        }
        let result = self.dispatch(move |session| session.finish(commit));
        *guard = None;
        drop(guard);
        self.released.notify_all();
        result
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.transaction
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the transaction state once no other thread holds a transaction.
    fn acquire(&self) -> Result<MutexGuard<'_, Option<ThreadId>>> {
        if self.is_owner_thread() {
            return Err(Error::connection(format!(
                "re-entrant call on connection '{}' from its owner thread",
                self.name
            )));
        }
        let current = thread::current().id();
        let guard = self.lock_state();
        Ok(self
            .released
            .wait_while(guard, |owner| owner.is_some_and(|id| id != current))
            .unwrap_or_else(PoisonError::into_inner))
    }

    fn dispatch<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session<B>) -> Result<T> + Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| Error::connection("connection is shutting down"))?;
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        sender
            .send(Box::new(move |session| {
                let _ = reply_tx.send(task(session));
            }))
            .map_err(|_| Error::connection(format!("owner thread of '{}' is gone", self.name)))?;
        reply_rx
            .recv()
            .map_err(|_| Error::connection(format!("owner thread of '{}' died", self.name)))?
    }
}

fn run_owner<B: Backend>(mut session: Session<B>, receiver: &Receiver<Task<B>>) {
    for task in receiver {
        task(&mut session);
    }
}

impl<B: Backend> Drop for SqlConnection<B> {
    fn drop(&mut self) {
        let open = self.lock_state().take();
        if open.is_some() {
            warn!(connection = %self.name, "Connection dropped inside a transaction, rolling back");
            if let Err(e) = self.dispatch(|session| session.finish(false)) {
                warn!(connection = %self.name, error = %e, "Rollback on drop failed");
            }
        }
        self.sender.take();
        if let Some(owner) = self.owner.take() {
            if owner.join().is_err() {
                warn!(connection = %self.name, "Connection owner thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteBackend;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn connection(dir: &TempDir) -> SqlConnection<SqliteBackend> {
        let path = dir.path().join("test.db");
        rusqlite::Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE t (v INTEGER)")
            .unwrap();
        SqlConnection::new("test", SqliteBackend::new(path)).unwrap()
    }

    fn count(conn: &SqlConnection<SqliteBackend>) -> i64 {
        conn.query(|db| Ok(db.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))?))
            .unwrap()
    }

    fn insert(conn: &SqlConnection<SqliteBackend>, v: i64) {
        conn.query(move |db| {
            db.execute("INSERT INTO t (v) VALUES (?1)", [v])?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_query_runs_on_owner_thread() {
        let dir = TempDir::new().unwrap();
        let conn = connection(&dir);
        let name = conn
            .query(|_| Ok(thread::current().name().map(String::from)))
            .unwrap();
        assert_eq!(name.as_deref(), Some("sql-test"));
        assert!(!conn.is_owner_thread());
    }

    #[test]
    fn test_handle_closed_between_queries() {
        let dir = TempDir::new().unwrap();
        let conn = connection(&dir);
        insert(&conn, 1);
        assert!(!conn.is_open().unwrap());
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_reentrant_call_is_rejected() {
        let dir = TempDir::new().unwrap();
        let conn = Arc::new(connection(&dir));
        let inner = Arc::clone(&conn);
        let rejected = conn
            .query(move |_| Ok(inner.query(|_| Ok(())).is_err()))
            .unwrap();
        assert!(rejected);
    }

    #[test]
    fn test_transaction_keeps_handle_open_until_commit() {
        let dir = TempDir::new().unwrap();
        let conn = connection(&dir);
        conn.transaction().unwrap();
        assert!(conn.in_transaction());
        insert(&conn, 1);
        assert!(conn.is_open().unwrap());
        conn.commit().unwrap();
        assert!(!conn.in_transaction());
        assert!(!conn.is_open().unwrap());
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_rollback_discards_changes() {
        let dir = TempDir::new().unwrap();
        let conn = connection(&dir);
        conn.transaction().unwrap();
        insert(&conn, 1);
        conn.rollback().unwrap();
        assert_eq!(count(&conn), 0);
    }

    #[test]
    fn test_nested_transaction_is_noop() {
        let dir = TempDir::new().unwrap();
        let conn = connection(&dir);
        conn.transaction().unwrap();
        conn.transaction().unwrap();
        insert(&conn, 1);
        conn.commit().unwrap();
        assert!(!conn.in_transaction());
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_commit_outside_transaction_is_harmless() {
        let dir = TempDir::new().unwrap();
        let conn = connection(&dir);
        assert!(conn.commit().is_ok());
        assert!(conn.rollback().is_ok());
    }

    #[test]
    fn test_run_in_transaction_rolls_back_on_error() {
        let dir = TempDir::new().unwrap();
        let conn = connection(&dir);
        let result: Result<()> = conn.run_in_transaction(|c| {
            insert(c, 1);
            Err(Error::commit("constraint violation"))
        });
        assert!(result.is_err());
        assert_eq!(count(&conn), 0);

        conn.run_in_transaction(|c| {
            insert(c, 2);
            Ok(())
        })
        .unwrap();
        assert_eq!(count(&conn), 1);
    }

    #[test]
    fn test_other_threads_wait_for_transaction() {
        let dir = TempDir::new().unwrap();
        let conn = connection(&dir);
        let (started_tx, started_rx) = mpsc::channel();

        thread::scope(|s| {
            s.spawn(|| {
                conn.transaction().unwrap();
                insert(&conn, 1);
                started_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(100));
                insert(&conn, 2);
                conn.commit().unwrap();
            });

            started_rx.recv().unwrap();
            // Blocks until the other thread commits, so both rows are visible.
            assert_eq!(count(&conn), 2);
        });
    }

    #[test]
    fn test_drop_inside_transaction_rolls_back() {
        let dir = TempDir::new().unwrap();
        {
            let conn = connection(&dir);
            conn.transaction().unwrap();
            insert(&conn, 1);
        }
        let conn = SqlConnection::new("again", SqliteBackend::new(dir.path().join("test.db")))
            .unwrap();
        assert_eq!(count(&conn), 0);
    }
}
