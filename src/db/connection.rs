use std::{
    panic::{self, AssertUnwindSafe},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU8, Ordering},
        mpsc, Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use rusqlite::{Connection, Transaction};
use thiserror::Error;
use tokio::sync::oneshot;

use super::migrations::run_migrations;
use crate::error::{classify, ServiceError};

/// SQLite VM steps between two deadline checks of a running statement.
const PROGRESS_CHECK_OPS: i32 = 1_000;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

/// A storage call ran past its per-call deadline and was aborted.
#[derive(Debug, Error)]
#[error("storage call exceeded its {0:?} deadline")]
pub struct QueryTimeout(pub Duration);

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

const RUNNING: u8 = 0;
const ABANDONED: u8 = 1;
const COMMITTING: u8 = 2;

/// Deadline and lifecycle of one submitted call, shared by caller and worker.
///
/// The caller may abandon the call only while it is still running, and the
/// worker may commit only while nobody has abandoned it. Whichever side moves
/// first wins, so a failure reported to the caller is never followed by a
/// commit.
struct CallGuard {
    deadline: Instant,
    timeout: Duration,
    state: AtomicU8,
}

impl CallGuard {
    fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
            timeout,
            state: AtomicU8::new(RUNNING),
        }
    }

    fn should_abort(&self) -> bool {
        self.state.load(Ordering::Acquire) == ABANDONED || Instant::now() >= self.deadline
    }

    fn expired(&self) -> anyhow::Error {
        QueryTimeout(self.timeout).into()
    }

    /// `false` once a commit is already under way; its outcome then decides.
    fn abandon(&self) -> bool {
        match self
            .state
            .compare_exchange(RUNNING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == ABANDONED,
        }
    }

    fn begin_commit(&self) -> Result<()> {
        if Instant::now() >= self.deadline {
            return Err(self.expired());
        }
        self.state
            .compare_exchange(RUNNING, COMMITTING, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| self.expired())
    }
}

/// Abandons the call once the awaiting future is gone.
struct CancelOnDrop(Arc<CallGuard>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.abandon();
    }
}

enum Location {
    File(PathBuf),
    Memory,
}

impl Location {
    fn open(&self) -> rusqlite::Result<Connection> {
        match self {
            Location::File(path) => Connection::open(path),
            Location::Memory => Connection::open_in_memory(),
        }
    }
}

/// Handle to the single SQLite connection, owned by a dedicated worker thread.
///
/// Cloning is cheap; the worker shuts down when the last clone is dropped.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<Option<PathBuf>>,
    query_timeout: Duration,
}

impl Database {
    pub fn new(db_path: PathBuf, query_timeout: Duration) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let database = Self::spawn(Location::File(db_path.clone()), query_timeout)?;
        info!("Database initialized at {}", db_path.display());

        Ok(Self {
            db_path: Arc::new(Some(db_path)),
            ..database
        })
    }

    /// Private in-memory database, mostly for tests.
    pub fn in_memory(query_timeout: Duration) -> Result<Self> {
        Self::spawn(Location::Memory, query_timeout)
    }

    fn spawn(location: Location, query_timeout: Duration) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("zenlist-db".into())
            .spawn(move || {
                let mut conn = match location.open() {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }
                if let Err(err) = conn.busy_timeout(query_timeout) {
                    error!("Failed to set busy timeout: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            if panic::catch_unwind(AssertUnwindSafe(|| task(&mut conn))).is_err() {
                                error!("Database task panicked; caller will see an aborted call");
                            }
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(None),
            query_timeout,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Runs `task` on the worker thread under the per-call deadline.
    ///
    /// Once the deadline passes, or the returned future is dropped, the running
    /// statement is interrupted and the task fails; a task still queued at that
    /// point never touches the connection.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.submit(move |conn, _| task(conn)).await
    }

    async fn submit<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection, &CallGuard) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.query_timeout;
        let guard = Arc::new(CallGuard::new(timeout));
        let _cancel_on_drop = CancelOnDrop(guard.clone());

        let sender = self.inner.sender.clone();
        let (reply_tx, mut reply_rx) = oneshot::channel();

        let worker_guard = guard.clone();
        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = run_guarded(conn, worker_guard, task);
            if reply_tx.send(result).is_err() {
                warn!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        let waited = tokio::time::timeout(timeout, &mut reply_rx).await;
        let reply = match waited {
            Ok(reply) => reply,
            Err(_) if guard.abandon() => {
                warn!("Storage call exceeded {timeout:?}; aborting");
                return Err(QueryTimeout(timeout).into());
            }
            // The commit started before the deadline; report what it did.
            Err(_) => reply_rx.await,
        };
        reply.map_err(|_| anyhow!("database task aborted before replying"))?
    }

    /// Runs `work` as one atomic unit.
    ///
    /// The transaction commits only when `work` returns `Ok` and the call is
    /// still within its deadline and awaited. An `Err`, a panic, a deadline, a
    /// dropped caller or a failed commit all drop the transaction, and dropping
    /// rolls it back. Failures outside `work` are classified with `fallback`.
    pub async fn with_tx<F, T>(&self, fallback: &str, work: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, ServiceError> + Send + 'static,
        T: Send + 'static,
    {
        let outcome = self
            .submit(move |conn, guard| {
                let tx = conn.transaction().context("failed to begin transaction")?;
                let result = panic::catch_unwind(AssertUnwindSafe(|| work(&tx)))
                    .map_err(|_| anyhow!("transaction body panicked"))?;
                match result {
                    Ok(value) => {
                        guard.begin_commit()?;
                        tx.commit().context("failed to commit transaction")?;
                        Ok(Ok(value))
                    }
                    Err(err) => Ok(Err(err)),
                }
            })
            .await;

        match outcome {
            Ok(result) => result,
            Err(err) => Err(classify(err, fallback)),
        }
    }
}

fn run_guarded<F, T>(conn: &mut Connection, guard: Arc<CallGuard>, task: F) -> Result<T>
where
    F: FnOnce(&mut Connection, &CallGuard) -> Result<T>,
{
    if guard.should_abort() {
        return Err(guard.expired());
    }

    let watcher = guard.clone();
    conn.progress_handler(PROGRESS_CHECK_OPS, Some(move || watcher.should_abort()));
    let result = task(conn, &guard);
    conn.progress_handler(0, None::<fn() -> bool>);

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn project_count(conn: &Connection) -> Result<i64> {
        Ok(conn.query_row("SELECT COUNT(*) FROM projects", [], |row| row.get(0))?)
    }

    fn seed_owner(conn: &Connection) -> Result<()> {
        conn.execute(
            "INSERT INTO users (id, name, email, timezone, created_at, updated_at)
             VALUES ('00000000-0000-0000-0000-000000000001', 'Owner', 'owner@example.com', 'UTC',
                     '2026-01-01T00:00:00.000000000Z', '2026-01-01T00:00:00.000000000Z')",
            [],
        )?;
        Ok(())
    }

    const INSERT_PROJECT: &str = "INSERT INTO projects (id, user_id, title, created_at, updated_at)
         VALUES ('00000000-0000-0000-0000-0000000000aa', '00000000-0000-0000-0000-000000000001', 'Inbox',
                 '2026-01-01T00:00:00.000000000Z', '2026-01-01T00:00:00.000000000Z')";

    #[tokio::test]
    async fn execute_runs_on_migrated_connection() {
        let db = Database::in_memory(Duration::from_secs(3)).unwrap();
        let version: i32 = db
            .execute(|conn| {
                Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert!(version >= 1);
        assert!(db.path().is_none());
    }

    #[tokio::test]
    async fn with_tx_commits_on_success() {
        let db = Database::in_memory(Duration::from_secs(3)).unwrap();
        db.execute(|conn| seed_owner(conn)).await.unwrap();

        db.with_tx("insert failed", |tx| {
            tx.execute(INSERT_PROJECT, [])
                .map_err(|err| classify(err.into(), "insert failed"))?;
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(db.execute(|conn| project_count(conn)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn with_tx_rolls_back_on_failure() {
        let db = Database::in_memory(Duration::from_secs(3)).unwrap();
        db.execute(|conn| seed_owner(conn)).await.unwrap();

        let err = db
            .with_tx("insert failed", |tx| {
                tx.execute(INSERT_PROJECT, [])
                    .map_err(|err| classify(err.into(), "insert failed"))?;
                Err::<(), _>(ServiceError::bad_input("changed my mind"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.message(), "changed my mind");
        assert_eq!(db.execute(|conn| project_count(conn)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn with_tx_rolls_back_on_panic() {
        let db = Database::in_memory(Duration::from_secs(3)).unwrap();
        db.execute(|conn| seed_owner(conn)).await.unwrap();

        let err = db
            .with_tx("failed to create project", |tx| -> Result<(), ServiceError> {
                tx.execute(INSERT_PROJECT, [])
                    .map_err(|err| classify(err.into(), "insert failed"))?;
                panic!("boom");
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(err.message(), "failed to create project");
        assert_eq!(db.execute(|conn| project_count(conn)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn with_tx_past_deadline_rolls_back() {
        let db = Database::in_memory(Duration::from_millis(100)).unwrap();
        db.execute(|conn| seed_owner(conn)).await.unwrap();

        let err = db
            .with_tx("failed to create project", |tx| {
                thread::sleep(Duration::from_millis(300));
                tx.execute(INSERT_PROJECT, [])
                    .map_err(|err| classify(err.into(), "insert failed"))?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(err.message(), "failed to create project");

        // Let the worker finish the late body before starting a fresh deadline.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(db.execute(|conn| project_count(conn)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn dropped_caller_rolls_back_transaction() {
        let db = Database::in_memory(Duration::from_secs(3)).unwrap();
        db.execute(|conn| seed_owner(conn)).await.unwrap();

        let abandoned = tokio::time::timeout(
            Duration::from_millis(50),
            db.with_tx("failed to create project", |tx| {
                thread::sleep(Duration::from_millis(200));
                tx.execute(INSERT_PROJECT, [])
                    .map_err(|err| classify(err.into(), "insert failed"))?;
                Ok(())
            }),
        )
        .await;
        assert!(abandoned.is_err());

        assert_eq!(db.execute(|conn| project_count(conn)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn commit_in_time_is_reported_as_success() {
        let db = Database::in_memory(Duration::from_millis(500)).unwrap();
        db.execute(|conn| seed_owner(conn)).await.unwrap();

        db.with_tx("failed to create project", |tx| {
            thread::sleep(Duration::from_millis(50));
            tx.execute(INSERT_PROJECT, [])
                .map_err(|err| classify(err.into(), "insert failed"))?;
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(db.execute(|conn| project_count(conn)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn runaway_query_is_interrupted_at_deadline() {
        let db = Database::in_memory(Duration::from_millis(100)).unwrap();

        let result = db
            .execute(|conn| {
                let n: i64 = conn.query_row(
                    "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c)
                     SELECT COUNT(*) FROM c",
                    [],
                    |row| row.get(0),
                )?;
                Ok(n)
            })
            .await;
        assert!(result.is_err());

        // The worker is free again once the statement has been interrupted.
        let one: i64 = db
            .execute(|conn| Ok(conn.query_row("SELECT 1", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(one, 1);
    }
}
