use sqlx::{Connection, Database, Executor};
use tracing::debug;

use super::loader::MigrationScript;
use crate::db::Store;
use keel_core::config::ExecutionMode;
use keel_core::error::{KeelError, Result};

/// Applies the statements of one script against a store.
pub struct MigrationExecutor<'a> {
    store: &'a Store,
    mode: ExecutionMode,
}

impl<'a> MigrationExecutor<'a> {
    pub fn new(store: &'a Store, mode: ExecutionMode) -> Self {
        Self { store, mode }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Apply a script, stopping at the first failing statement.
    ///
    /// In transactional mode a failure rolls back the whole script. In
    /// per-statement mode statements before the failing one stay applied.
    pub async fn apply(&self, script: &MigrationScript) -> Result<()> {
        let start = std::time::Instant::now();

        match (self.store, self.mode) {
            (Store::Sqlite { pool, .. }, ExecutionMode::Transactional) => {
                let mut conn = pool.acquire().await.map_err(|e| connection_error(script, e))?;
                run_in_transaction(&mut *conn, script).await?;
            }
            (Store::Sqlite { pool, .. }, ExecutionMode::PerStatement) => {
                let mut conn = pool.acquire().await.map_err(|e| connection_error(script, e))?;
                run_statements(&mut *conn, script).await?;
            }
            (Store::Postgres { pool }, ExecutionMode::Transactional) => {
                let mut conn = pool.acquire().await.map_err(|e| connection_error(script, e))?;
                run_in_transaction(&mut *conn, script).await?;
            }
            (Store::Postgres { pool }, ExecutionMode::PerStatement) => {
                let mut conn = pool.acquire().await.map_err(|e| connection_error(script, e))?;
                run_statements(&mut *conn, script).await?;
            }
        }

        debug!(
            "Applied {} statements of {} in {:?}",
            script.statements.len(),
            script.filename,
            start.elapsed()
        );
        Ok(())
    }
}

fn connection_error(script: &MigrationScript, e: sqlx::Error) -> KeelError {
    KeelError::Connection(format!(
        "Failed to acquire a connection for '{}': {}",
        script.filename, e
    ))
}

/// Run every statement inside one transaction, rolling back on failure.
async fn run_in_transaction<C>(conn: &mut C, script: &MigrationScript) -> Result<()>
where
    C: Connection,
    for<'c> &'c mut <C::Database as Database>::Connection: Executor<'c, Database = C::Database>,
{
    let mut tx = conn.begin().await.map_err(|e| {
        KeelError::Connection(format!(
            "Failed to begin transaction for '{}': {}",
            script.filename, e
        ))
    })?;

    if let Err(err) = run_statements(&mut *tx, script).await {
        if let Err(e) = tx.rollback().await {
            tracing::warn!("Rollback of '{}' failed: {}", script.filename, e);
        }
        return Err(err);
    }

    tx.commit().await.map_err(|e| KeelError::Statement {
        filename: script.filename.clone(),
        index: script.statements.len(),
        line: script.statements.last().map(|s| s.line).unwrap_or(1),
        detail: format!("commit failed: {}", e),
    })
}

/// Run statements in order on one connection, stopping at the first failure.
async fn run_statements<C>(conn: &mut C, script: &MigrationScript) -> Result<()>
where
    for<'c> &'c mut C: Executor<'c>,
{
    for statement in &script.statements {
        debug!(
            "{} statement {}: {}",
            script.filename, statement.index, statement.sql
        );

        (&mut *conn)
            .execute(statement.sql.as_str())
            .await
            .map_err(|e| KeelError::Statement {
                filename: script.filename.clone(),
                index: statement.index,
                line: statement.line,
                detail: e.to_string(),
            })?;
    }
    Ok(())
}
