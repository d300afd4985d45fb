//! Explicit store provisioning for tests.
//!
//! SQLite stores are created on demand. PostgreSQL is only used when
//! `TEST_DATABASE_URL` is set; the `DATABASE_URL` of the environment is never
//! read, so tests cannot touch a real deployment by accident.

use std::path::Path;

use keel_core::config::DatabaseConfig;
use keel_core::error::{KeelError, Result};

use crate::db::Store;

/// A store handed to a test.
pub struct TestStore {
    store: Store,
}

impl TestStore {
    /// Fresh private in-memory SQLite database.
    pub async fn sqlite_memory() -> Result<Self> {
        let store = Store::connect(&DatabaseConfig::with_url("sqlite::memory:")).await?;
        Ok(Self { store })
    }

    /// SQLite database stored at `path`, created if missing.
    pub async fn sqlite_file(path: &Path) -> Result<Self> {
        let url = format!("sqlite://{}", path.display());
        let store = Store::connect(&DatabaseConfig::with_url(url)).await?;
        Ok(Self { store })
    }

    /// PostgreSQL from `TEST_DATABASE_URL`, `None` when it is not set.
    pub async fn from_env() -> Result<Option<Self>> {
        let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
            return Ok(None);
        };
        let store = Store::connect(&DatabaseConfig::with_url(url)).await?;
        Ok(Some(Self { store }))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run raw SQL to set up or inspect test state.
    pub async fn execute(&self, sql: &str) -> Result<()> {
        let result = match &self.store {
            Store::Sqlite { pool, .. } => sqlx::query(sql).execute(pool).await.map(|_| ()),
            Store::Postgres { pool } => sqlx::query(sql).execute(pool).await.map(|_| ()),
        };
        result.map_err(|e| KeelError::Connection(e.to_string()))
    }

    /// First column of every row returned by `sql`, as text.
    pub async fn query_strings(&self, sql: &str) -> Result<Vec<String>> {
        match &self.store {
            Store::Sqlite { pool, .. } => sqlx::query_scalar(sql).fetch_all(pool).await,
            Store::Postgres { pool } => sqlx::query_scalar(sql).fetch_all(pool).await,
        }
        .map_err(|e| KeelError::Connection(e.to_string()))
    }

    /// Whether a table named `name` exists.
    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = match &self.store {
            Store::Sqlite { pool, .. } => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                )
                .bind(name)
                .fetch_one(pool)
                .await
            }
            Store::Postgres { pool } => {
                sqlx::query_scalar(
                    "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = $1",
                )
                .bind(name)
                .fetch_one(pool)
                .await
            }
        }
        .map_err(|e| KeelError::Connection(e.to_string()))?;

        Ok(count > 0)
    }
}
