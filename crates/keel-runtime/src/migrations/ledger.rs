//! Durable record of applied migration scripts.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::db::Store;
use keel_core::config::is_valid_identifier;
use keel_core::error::{KeelError, Result};

/// Default ledger table name.
pub const DEFAULT_LEDGER_TABLE: &str = "schema_migrations";

/// A script that has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub filename: String,
    pub applied_at: DateTime<Utc>,
}

/// Append-only table of applied script filenames.
///
/// Nothing is cached: every call reads or writes the store.
pub struct Ledger<'a> {
    store: &'a Store,
    table: String,
}

impl<'a> Ledger<'a> {
    /// Ledger stored in `table`, which must be a plain identifier.
    pub fn new(store: &'a Store, table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        if !is_valid_identifier(&table) {
            return Err(KeelError::Config(format!(
                "Invalid ledger table name '{}'",
                table
            )));
        }
        Ok(Self { store, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the ledger table if it is absent. Safe to call on every run.
    pub async fn ensure_exists(&self) -> Result<()> {
        let result = match self.store {
            Store::Sqlite { pool, .. } => {
                let sql = format!(
                    r#"
                    CREATE TABLE IF NOT EXISTS {} (
                        id INTEGER PRIMARY KEY AUTOINCREMENT,
                        filename TEXT NOT NULL UNIQUE,
                        applied_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
                    )
                    "#,
                    self.table
                );
                sqlx::query(&sql).execute(pool).await.map(|_| ())
            }
            Store::Postgres { pool } => {
                let sql = format!(
                    r#"
                    CREATE TABLE IF NOT EXISTS {} (
                        id BIGSERIAL PRIMARY KEY,
                        filename TEXT NOT NULL UNIQUE,
                        applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    )
                    "#,
                    self.table
                );
                sqlx::query(&sql).execute(pool).await.map(|_| ())
            }
        };

        result.map_err(|e| {
            KeelError::Ledger(format!(
                "Failed to create ledger table '{}': {}",
                self.table, e
            ))
        })?;
        debug!("Ledger table '{}' ready", self.table);
        Ok(())
    }

    /// Whether the ledger table has been created.
    pub async fn exists(&self) -> Result<bool> {
        let found: bool = match self.store {
            Store::Sqlite { pool, .. } => {
                sqlx::query_scalar(
                    "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
                )
                .bind(&self.table)
                .fetch_one(pool)
                .await
            }
            Store::Postgres { pool } => {
                sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
                    .bind(&self.table)
                    .fetch_one(pool)
                    .await
            }
        }
        .map_err(|e| KeelError::Ledger(format!("Failed to look up ledger table: {}", e)))?;

        Ok(found)
    }

    /// Filenames of every applied script.
    pub async fn list_applied(&self) -> Result<HashSet<String>> {
        let sql = format!("SELECT filename FROM {}", self.table);
        let rows: Vec<(String,)> = match self.store {
            Store::Sqlite { pool, .. } => sqlx::query_as(&sql).fetch_all(pool).await,
            Store::Postgres { pool } => sqlx::query_as(&sql).fetch_all(pool).await,
        }
        .map_err(|e| KeelError::Ledger(format!("Failed to read applied migrations: {}", e)))?;

        Ok(rows.into_iter().map(|(filename,)| filename).collect())
    }

    /// Every record, ordered by filename.
    pub async fn records(&self) -> Result<Vec<MigrationRecord>> {
        let sql = format!(
            "SELECT filename, applied_at FROM {} ORDER BY filename",
            self.table
        );
        let rows: Vec<(String, DateTime<Utc>)> = match self.store {
            Store::Sqlite { pool, .. } => sqlx::query_as(&sql).fetch_all(pool).await,
            Store::Postgres { pool } => sqlx::query_as(&sql).fetch_all(pool).await,
        }
        .map_err(|e| KeelError::Ledger(format!("Failed to read migration records: {}", e)))?;

        Ok(rows
            .into_iter()
            .map(|(filename, applied_at)| MigrationRecord {
                filename,
                applied_at,
            })
            .collect())
    }

    /// Record `filename` as applied.
    ///
    /// Fails with [`KeelError::DuplicateRecord`] when it is already present.
    pub async fn record(&self, filename: &str) -> Result<()> {
        let applied_at = Utc::now();
        let result = match self.store {
            Store::Sqlite { pool, .. } => {
                let sql = format!(
                    "INSERT INTO {} (filename, applied_at) VALUES (?, ?)",
                    self.table
                );
                sqlx::query(&sql)
                    .bind(filename)
                    .bind(applied_at)
                    .execute(pool)
                    .await
                    .map(|_| ())
            }
            Store::Postgres { pool } => {
                let sql = format!(
                    "INSERT INTO {} (filename, applied_at) VALUES ($1, $2)",
                    self.table
                );
                sqlx::query(&sql)
                    .bind(filename)
                    .bind(applied_at)
                    .execute(pool)
                    .await
                    .map(|_| ())
            }
        };

        match result {
            Ok(()) => {
                debug!("Recorded migration {}", filename);
                Ok(())
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(KeelError::DuplicateRecord(filename.to_string()))
            }
            Err(e) => Err(KeelError::Ledger(format!(
                "Failed to record migration '{}': {}",
                filename, e
            ))),
        }
    }
}
