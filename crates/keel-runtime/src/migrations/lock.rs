//! Store-scoped mutual exclusion between migration runners.
//!
//! PostgreSQL uses a session-level advisory lock held on a dedicated
//! connection. SQLite files use an OS file lock on a `<database>.lock`
//! sidecar. Both disappear when the holding process dies.

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use sqlx::pool::PoolConnection;
use sqlx::Postgres;
use tracing::{debug, warn};

use crate::db::Store;
use keel_core::error::{KeelError, Result};

/// Advisory lock key, "KEEL" in ascii.
const MIGRATION_LOCK_ID: i64 = 0x4B45454C;

/// How often a waiting runner retries.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

enum Held {
    Postgres(PoolConnection<Postgres>),
    File { file: File, path: PathBuf },
    /// In-memory SQLite: no other process can reach the database.
    Unshared,
}

/// A held migration lock. Call [`MigrationLock::release`] when done; dropping
/// it without releasing still frees the store-level lock.
pub struct MigrationLock {
    held: Option<Held>,
}

impl MigrationLock {
    /// Acquire the lock for `store`, waiting up to `timeout`.
    pub async fn acquire(store: &Store, timeout: Duration) -> Result<Self> {
        debug!("Acquiring migration lock...");
        let deadline = Instant::now() + timeout;

        let held = match store {
            Store::Postgres { pool } => {
                let mut conn = pool.acquire().await.map_err(|e| {
                    KeelError::Lock(format!("Failed to get a connection for the lock: {}", e))
                })?;

                loop {
                    let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
                        .bind(MIGRATION_LOCK_ID)
                        .fetch_one(&mut *conn)
                        .await
                        .map_err(|e| {
                            KeelError::Lock(format!("Failed to acquire migration lock: {}", e))
                        })?;
                    if acquired {
                        break;
                    }
                    wait_or_give_up(deadline, timeout).await?;
                }
                Held::Postgres(conn)
            }
            Store::Sqlite {
                path: Some(db_path),
                ..
            } => {
                let path = lock_path(db_path);
                let file = OpenOptions::new()
                    .create(true)
                    .write(true)
                    .truncate(false)
                    .open(&path)
                    .map_err(|e| {
                        KeelError::Lock(format!(
                            "Failed to open lock file {}: {}",
                            path.display(),
                            e
                        ))
                    })?;

                loop {
                    match file.try_lock() {
                        Ok(()) => break,
                        Err(TryLockError::WouldBlock) => {
                            wait_or_give_up(deadline, timeout).await?
                        }
                        Err(TryLockError::Error(e)) => {
                            return Err(KeelError::Lock(format!(
                                "Failed to lock {}: {}",
                                path.display(),
                                e
                            )))
                        }
                    }
                }
                Held::File { file, path }
            }
            Store::Sqlite { path: None, .. } => Held::Unshared,
        };

        debug!("Migration lock acquired");
        Ok(Self { held: Some(held) })
    }

    /// Release the lock.
    pub async fn release(mut self) -> Result<()> {
        match self.held.take() {
            Some(Held::Postgres(mut conn)) => {
                let result = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
                    .bind(MIGRATION_LOCK_ID)
                    .fetch_one(&mut *conn)
                    .await;
                if let Err(e) = result {
                    // Closing the session drops the lock server-side
                    drop(conn.detach());
                    return Err(KeelError::Lock(format!(
                        "Failed to release migration lock: {}",
                        e
                    )));
                }
            }
            Some(Held::File { file, path }) => {
                file.unlock().map_err(|e| {
                    KeelError::Lock(format!("Failed to unlock {}: {}", path.display(), e))
                })?;
            }
            Some(Held::Unshared) | None => {}
        }

        debug!("Migration lock released");
        Ok(())
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        match self.held.take() {
            Some(Held::Postgres(conn)) => {
                warn!("Migration lock dropped without release, closing its session");
                drop(conn.detach());
            }
            // Closing the handle releases the OS lock
            Some(Held::File { .. }) | Some(Held::Unshared) | None => {}
        }
    }
}

async fn wait_or_give_up(deadline: Instant, timeout: Duration) -> Result<()> {
    if Instant::now() >= deadline {
        return Err(KeelError::Lock(format!(
            "Timed out after {:?} waiting for another runner to release the migration lock",
            timeout
        )));
    }
    debug!("Migration lock busy, retrying");
    tokio::time::sleep(POLL_INTERVAL).await;
    Ok(())
}

/// Sidecar lock file for a SQLite database file.
pub fn lock_path(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}
