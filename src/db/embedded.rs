//! Supervised embedded database server.
//!
//! Some importers talk to a database that has to be served by a bundled
//! server process. The server is started lazily on first use, is considered
//! ready once it has written a non-empty pid file, and is stopped again after
//! a period without use. The next use simply starts it again.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Default idle period after which the server is stopped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default time the server gets to write its pid file.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How to launch the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Written by the server once it accepts connections.
    pub pid_file: PathBuf,
    pub idle_timeout: Duration,
    pub startup_timeout: Duration,
}

impl ServerConfig {
    pub fn new(program: impl Into<PathBuf>, pid_file: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            pid_file: pid_file.into(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug)]
struct Inner {
    state: ServerState,
    child: Option<Child>,
    last_used: Instant,
    shutdown: bool,
}

#[derive(Debug)]
struct Shared {
    inner: Mutex<Inner>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A database server subprocess with lazy start and idle shutdown.
#[derive(Debug)]
pub struct EmbeddedServer {
    config: ServerConfig,
    shared: Arc<Shared>,
    watchdog: Option<JoinHandle<()>>,
}

impl EmbeddedServer {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: ServerState::NotStarted,
                child: None,
                last_used: Instant::now(),
                shutdown: false,
            }),
            changed: Condvar::new(),
        });

        let watchdog = {
            let shared = Arc::clone(&shared);
            let config = config.clone();
            thread::Builder::new()
                .name("embedded-db-watchdog".to_string())
                .spawn(move || watch_idle(&shared, &config))?
        };

        Ok(Self {
            config,
            shared,
            watchdog: Some(watchdog),
        })
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        self.shared.lock().state
    }

    /// Reset the idle timer.
    pub fn touch(&self) {
        self.shared.lock().last_used = Instant::now();
    }

    /// Start the server unless it is already running and wait until it is ready.
    pub fn ensure_running(&self) -> Result<()> {
        let mut inner = self.shared.lock();
        loop {
            match inner.state {
                ServerState::Running => {
                    let exited = match inner.child.as_mut() {
                        Some(child) => child.try_wait()?.is_some(),
                        None => true,
                    };
                    if !exited {
                        inner.last_used = Instant::now();
                        return Ok(());
                    }
                    warn!(program = %self.config.program.display(), "Embedded server exited unexpectedly");
                    inner.child = None;
                    inner.state = ServerState::NotStarted;
                }
                ServerState::NotStarted => break,
                ServerState::Starting | ServerState::Stopping => {
                    inner = self
                        .shared
                        .changed
                        .wait(inner)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }

        inner.state = ServerState::Starting;
        drop(inner);

        let started = self.start();

        let mut inner = self.shared.lock();
        let result = match started {
            Ok(child) => {
                info!(pid = child.id(), "Embedded database server running");
                inner.child = Some(child);
                inner.state = ServerState::Running;
                inner.last_used = Instant::now();
                Ok(())
            }
            Err(e) => {
                inner.state = ServerState::NotStarted;
                Err(e)
            }
        };
        drop(inner);
        self.shared.changed.notify_all();
        result
    }

    /// Stop the server if it is running.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        stop_locked(&mut inner, &self.config);
        drop(inner);
        self.shared.changed.notify_all();
    }

    fn start(&self) -> Result<Child> {
        remove_pid_file(&self.config)?;

        debug!(
            program = %self.config.program.display(),
            args = ?self.config.args,
            "Starting embedded database server"
        );
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                Error::connection(format!(
                    "cannot start {}: {e}",
                    self.config.program.display()
                ))
            })?;

        let deadline = Instant::now() + self.config.startup_timeout;
        loop {
            if pid_file_ready(&self.config) {
                return Ok(child);
            }
            if let Some(status) = child.try_wait()? {
                return Err(Error::connection(format!(
                    "embedded server exited during startup ({status})"
                )));
            }
            if Instant::now() >= deadline {
                kill(&mut child);
                return Err(Error::connection(format!(
                    "embedded server did not become ready within {}",
                    humantime::format_duration(self.config.startup_timeout)
                )));
            }
            thread::sleep(STARTUP_POLL_INTERVAL);
        }
    }
}

impl Drop for EmbeddedServer {
    fn drop(&mut self) {
        {
            let mut inner = self.shared.lock();
            inner.shutdown = true;
            stop_locked(&mut inner, &self.config);
        }
        self.shared.changed.notify_all();
        if let Some(watchdog) = self.watchdog.take() {
            let _ = watchdog.join();
        }
    }
}

fn watch_idle(shared: &Shared, config: &ServerConfig) {
    let interval = (config.idle_timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(1));
    let mut inner = shared.lock();
    while !inner.shutdown {
        if inner.state == ServerState::Running && inner.last_used.elapsed() >= config.idle_timeout {
            info!(
                idle = %humantime::format_duration(config.idle_timeout),
                "Stopping idle embedded database server"
            );
            stop_locked(&mut inner, config);
            shared.changed.notify_all();
        }
        inner = shared
            .changed
            .wait_timeout(inner, interval)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
}

fn stop_locked(inner: &mut Inner, config: &ServerConfig) {
    if inner.state != ServerState::Running {
        return;
    }
    inner.state = ServerState::Stopping;
    if let Some(mut child) = inner.child.take() {
        kill(&mut child);
    }
    if let Err(e) = remove_pid_file(config) {
        warn!(error = %e, "Could not remove embedded server pid file");
    }
    inner.state = ServerState::NotStarted;
}

fn kill(child: &mut Child) {
    if let Err(e) = child.kill() {
        debug!(error = %e, "Embedded server already gone");
    }
    let _ = child.wait();
}

fn pid_file_ready(config: &ServerConfig) -> bool {
    fs::read_to_string(&config.pid_file).is_ok_and(|pid| !pid.trim().is_empty())
}

fn remove_pid_file(config: &ServerConfig) -> Result<()> {
    match fs::remove_file(&config.pid_file) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
