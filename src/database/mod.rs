use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use rusqlite::{Connection, InterruptHandle, Transaction, TransactionBehavior};
use snafu::{ensure, ResultExt};
use tokio_util::sync::CancellationToken;

pub use error::*;

mod error;

const SETUP: &str = include_str!("schema.sql");

/// How long a connection waits on a lock held by another writer before giving up.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the SQLite file that backs the stats ledger.
///
/// The store is cheap to clone, every clone shares one connection. Isolation between
/// operations comes from SQLite transactions, so several processes may share one file.
#[derive(Debug, Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    connection: Mutex<Connection>,
    interrupt: InterruptHandle,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) the database at `path`, switch it to WAL mode and create the schema.
    #[tracing::instrument]
    pub fn open(path: impl AsRef<Path> + std::fmt::Debug) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context(CreateDirectorySnafu { path: parent })?;
        }

        let connection = connect(&path)?;

        let mode: String = connection
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
            .context(PragmaSnafu {
                pragma: "journal_mode",
            })?;
        ensure!(mode.eq_ignore_ascii_case("wal"), JournalModeSnafu { mode });

        connection.execute_batch(SETUP).context(SchemaSnafu)?;

        tracing::info!(path = %path.display(), "opened stats database");

        Ok(Self {
            inner: Arc::new(Inner {
                path,
                interrupt: connection.get_interrupt_handle(),
                connection: Mutex::new(connection),
            }),
        })
    }

    /// Location of the database file on disk.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Size of the database file in bytes, `None` if it cannot be read.
    pub async fn file_size(&self) -> Option<u64> {
        tokio::fs::metadata(self.path())
            .await
            .ok()
            .map(|metadata| metadata.len())
    }

    /// Run `operation` inside one `BEGIN IMMEDIATE` transaction in the blocking thread pool,
    /// committing only if it succeeds.
    ///
    /// When `deadline` passes first, the operation is aborted: a statement in flight is
    /// interrupted and the transaction rolls back instead of committing. The result is
    /// decided by the worker, so [DatabaseError::Deadline] always means nothing was written,
    /// and an operation that committed right at the deadline still reports success. Dropping
    /// the returned future aborts the operation the same way.
    pub async fn transaction<T, F>(&self, deadline: Duration, operation: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let cancel = CancellationToken::new();
        let _abort = cancel.clone().drop_guard();
        let running = Arc::new(Mutex::new(false));

        let mut task = {
            let store = self.clone();
            let cancel = cancel.clone();
            let running = running.clone();
            tokio::task::spawn_blocking(move || store.execute(&cancel, &running, operation))
        };

        let joined = match tokio::time::timeout(deadline, &mut task).await {
            Ok(joined) => joined,
            Err(_elapsed) => {
                tracing::warn!(?deadline, "database operation ran past its deadline, aborting");
                cancel.cancel();
                self.interrupt(&running);
                task.await
            }
        };

        match joined.context(WorkerSnafu)? {
            Err(error) if cancel.is_cancelled() => {
                tracing::debug!(%error, "aborted database operation");
                DeadlineSnafu { deadline }.fail()
            }
            result => result,
        }
    }

    /// Blocking half of [Store::transaction].
    fn execute<T>(
        &self, cancel: &CancellationToken, running: &Mutex<bool>,
        operation: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut connection = self
            .inner
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        ensure!(!cancel.is_cancelled(), AbandonedSnafu);

        *running.lock().unwrap_or_else(PoisonError::into_inner) = true;
        let result = in_transaction(&mut connection, cancel, operation);
        // Cleared while the connection is still held, so a late interrupt cannot reach
        // whichever operation runs next.
        *running.lock().unwrap_or_else(PoisonError::into_inner) = false;

        if !connection.is_autocommit() {
            tracing::warn!("transaction left open after an interrupt, rolling back");
            if let Err(error) = connection.execute_batch("ROLLBACK") {
                tracing::error!(%error, "could not roll back the open transaction");
            }
        }

        result
    }

    /// Interrupt the statement in flight, if the operation tracked by `running` holds the
    /// connection right now.
    fn interrupt(&self, running: &Mutex<bool>) {
        let running = running.lock().unwrap_or_else(PoisonError::into_inner);

        if *running {
            self.inner.interrupt.interrupt();
        }
    }
}

fn in_transaction<T>(
    connection: &mut Connection, cancel: &CancellationToken,
    operation: impl FnOnce(&Transaction<'_>) -> Result<T>,
) -> Result<T> {
    let transaction = connection
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context(QuerySnafu)?;
    ensure!(!cancel.is_cancelled(), AbandonedSnafu);

    let value = operation(&transaction)?;

    // Dropping the transaction rolls it back.
    ensure!(!cancel.is_cancelled(), AbandonedSnafu);
    transaction.commit().context(CommitSnafu)?;

    Ok(value)
}

/// Open a connection with the per-connection settings. Journal mode and schema are
/// properties of the file and are handled once in [Store::open].
fn connect(path: &Path) -> Result<Connection> {
    let connection = Connection::open(path).context(OpenSnafu { path })?;

    connection
        .busy_timeout(BUSY_TIMEOUT)
        .context(PragmaSnafu {
            pragma: "busy_timeout",
        })?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context(PragmaSnafu {
            pragma: "synchronous",
        })?;
    connection
        .pragma_update(None, "foreign_keys", "ON")
        .context(PragmaSnafu {
            pragma: "foreign_keys",
        })?;

    Ok(connection)
}
