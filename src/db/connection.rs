use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{bail, Context};
use log::{error, info, warn};
use rusqlite::{Connection, OpenFlags};
use tokio::sync::oneshot;

use crate::error::StoreError;

use super::lock::WriterLock;
use super::migrations::run_migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Upper bound for a single read or write, queueing included.
    pub op_timeout: Duration,
    /// Upper bound for draining the workers on close.
    pub shutdown_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Writer,
    Reader,
}

impl Role {
    fn thread_name(&self) -> &'static str {
        match self {
            Role::Writer => "shelfwatch-db-writer",
            Role::Reader => "shelfwatch-db-reader",
        }
    }
}

struct Worker {
    role: Role,
    sender: mpsc::Sender<DbCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    fn spawn(role: Role, path: &Path) -> Result<Self, StoreError> {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<anyhow::Result<()>>();
        let path_for_thread = path.to_path_buf();

        let handle = thread::Builder::new()
            .name(role.thread_name().into())
            .spawn(move || {
                let mut conn = match open_connection(&path_for_thread, role) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                if ready_tx.send(Ok(())).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => task(&mut conn),
                        DbCommand::Shutdown => break,
                    }
                }

                info!("{} thread shutting down", role.thread_name());
            })
            .map_err(|err| StoreError::Unreadable {
                path: path.to_path_buf(),
                reason: format!("failed to spawn {}: {err}", role.thread_name()),
            })?;

        let ready = ready_rx.recv().map_err(|_| StoreError::Unreadable {
            path: path.to_path_buf(),
            reason: format!("{} exited before signaling readiness", role.thread_name()),
        })?;
        ready.map_err(|err| StoreError::Unreadable {
            path: path.to_path_buf(),
            reason: format!("{err:#}"),
        })?;

        Ok(Self {
            role,
            sender: command_tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queues a shutdown behind any pending work and hands back the thread
    /// handle to join. `None` once shutdown has already begun.
    fn begin_shutdown(&self) -> Option<JoinHandle<()>> {
        let mut guard = self.handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let handle = guard.take()?;
        if let Err(err) = self.sender.send(DbCommand::Shutdown) {
            error!("Failed to send shutdown to {}: {err}", self.role.thread_name());
        }
        Some(handle)
    }
}

fn open_connection(path: &Path, role: Role) -> anyhow::Result<Connection> {
    match role {
        Role::Writer => {
            let mut conn = Connection::open(path).context("failed to open SQLite database")?;

            let journal_mode: String = conn
                .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
                .context("failed to enable WAL mode")?;
            if !journal_mode.eq_ignore_ascii_case("wal") {
                warn!("SQLite refused WAL mode; journal_mode is {journal_mode}");
            }
            conn.pragma_update(None, "synchronous", "NORMAL")
                .context("failed to set synchronous mode")?;
            conn.busy_timeout(BUSY_TIMEOUT)
                .context("failed to set busy timeout")?;

            let check: String = conn
                .query_row("PRAGMA quick_check", [], |row| row.get(0))
                .context("integrity check failed to run")?;
            if check != "ok" {
                bail!("integrity check reported: {check}");
            }

            run_migrations(&mut conn).context("failed to run database migrations")?;
            Ok(conn)
        }
        Role::Reader => {
            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .context("failed to open read-only SQLite connection")?;
            conn.busy_timeout(BUSY_TIMEOUT)
                .context("failed to set busy timeout")?;
            Ok(conn)
        }
    }
}

struct DatabaseInner {
    writer: Worker,
    reader: Worker,
    options: StoreOptions,
    lock: Mutex<Option<WriterLock>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        for worker in [&self.writer, &self.reader] {
            if let Some(handle) = worker.begin_shutdown() {
                if let Err(join_err) = handle.join() {
                    error!("Failed to join {}: {join_err:?}", worker.role.thread_name());
                }
            }
        }
    }
}

/// Handle to the inventory store.
///
/// All writes run on one dedicated thread that owns the write connection;
/// queries run on a second, read-only connection so WAL readers never wait
/// behind a write. Clones share the same workers.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    /// Opens (or bootstraps) the store and takes the single-writer lock.
    pub fn open(db_path: PathBuf, options: StoreOptions) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|err| StoreError::Unreadable {
                path: db_path.clone(),
                reason: format!("failed to create directory {}: {err}", parent.display()),
            })?;
        }

        let lock = WriterLock::acquire(&db_path)?;
        let writer = Worker::spawn(Role::Writer, &db_path)?;
        let reader = Worker::spawn(Role::Reader, &db_path)?;

        info!("Database initialized at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                writer,
                reader,
                options,
                lock: Mutex::new(Some(lock)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Runs `task` on the writer connection.
    pub async fn execute<F, T>(&self, task: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.dispatch(&self.inner.writer, task).await
    }

    /// Runs `task` on the read-only connection.
    pub async fn read<F, T>(&self, task: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.dispatch(&self.inner.reader, task).await
    }

    async fn dispatch<F, T>(&self, worker: &Worker, task: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                warn!("DB caller dropped before receiving result");
            }
        }));

        worker
            .sender
            .send(command)
            .map_err(|_| StoreError::Closed)?;

        let timeout = self.inner.options.op_timeout;
        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(result)) => result.map_err(StoreError::from),
            Ok(Err(_)) => Err(StoreError::Closed),
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }

    /// Drains queued work, stops both workers and releases the writer lock.
    /// Bounded by the configured shutdown timeout.
    pub async fn close(&self) -> Result<(), StoreError> {
        let handles: Vec<(Role, JoinHandle<()>)> = [&self.inner.writer, &self.inner.reader]
            .into_iter()
            .filter_map(|worker| worker.begin_shutdown().map(|handle| (worker.role, handle)))
            .collect();

        let timeout = self.inner.options.shutdown_timeout;
        let join = tokio::task::spawn_blocking(move || {
            for (role, handle) in handles {
                if let Err(join_err) = handle.join() {
                    error!("Failed to join {}: {join_err:?}", role.thread_name());
                }
            }
        });

        match tokio::time::timeout(timeout, join).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(StoreError::Io(format!("failed to join database workers: {err}"))),
            Err(_) => return Err(StoreError::Timeout(timeout)),
        }

        let released = self
            .inner
            .lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(lock) = released {
            info!("Releasing writer lock {}", lock.path().display());
        }

        info!("Database at {} closed", self.db_path.display());
        Ok(())
    }
}
