use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::debug;

use keel_core::config::DatabaseConfig;
use keel_core::error::{KeelError, Result};

/// Kind of store behind a [`Store`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

impl Backend {
    /// Pick the backend from a connection URL scheme.
    pub fn from_url(url: &str) -> Result<Self> {
        if url.starts_with("sqlite:") {
            Ok(Backend::Sqlite)
        } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            Ok(Backend::Postgres)
        } else {
            Err(KeelError::Config(format!(
                "Unsupported database URL '{}': expected sqlite: or postgres://",
                url
            )))
        }
    }
}

/// Handle to the target store.
///
/// Cloning is cheap; clones share the underlying pool.
#[derive(Debug, Clone)]
pub enum Store {
    Sqlite {
        pool: SqlitePool,
        /// Database file, `None` for in-memory databases.
        path: Option<PathBuf>,
    },
    Postgres {
        pool: PgPool,
    },
}

impl Store {
    /// Open a connection pool for the configured URL.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.pool_timeout_secs);

        match Backend::from_url(&config.url)? {
            Backend::Sqlite => {
                let options = SqliteConnectOptions::from_str(&config.url)
                    .map_err(|e| KeelError::Config(format!("Invalid SQLite URL: {}", e)))?
                    .create_if_missing(true);

                let path = sqlite_file_path(&config.url);
                let pool_options = SqlitePoolOptions::new().acquire_timeout(timeout);
                // An in-memory database lives exactly as long as its one connection
                let pool_options = match path {
                    Some(_) => pool_options.max_connections(config.pool_size),
                    None => pool_options
                        .max_connections(1)
                        .idle_timeout(None)
                        .max_lifetime(None),
                };

                let pool = pool_options.connect_with(options).await.map_err(|e| {
                    KeelError::Connection(format!("Failed to open SQLite database: {}", e))
                })?;

                debug!("Connected to SQLite database {:?}", path);
                Ok(Store::Sqlite { pool, path })
            }
            Backend::Postgres => {
                // The migration lock pins one connection for the whole run
                let size = config.pool_size.max(2);
                let pool = PgPoolOptions::new()
                    .max_connections(size)
                    .acquire_timeout(timeout)
                    .connect(&config.url)
                    .await
                    .map_err(|e| {
                        KeelError::Connection(format!("Failed to connect to PostgreSQL: {}", e))
                    })?;

                debug!("Connected to PostgreSQL");
                Ok(Store::Postgres { pool })
            }
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            Store::Sqlite { .. } => Backend::Sqlite,
            Store::Postgres { .. } => Backend::Postgres,
        }
    }

    /// Close all connections gracefully.
    pub async fn close(&self) {
        match self {
            Store::Sqlite { pool, .. } => pool.close().await,
            Store::Postgres { pool } => pool.close().await,
        }
    }
}

/// Database file named by a SQLite URL, `None` for in-memory databases.
pub fn sqlite_file_path(url: &str) -> Option<PathBuf> {
    let rest = url.strip_prefix("sqlite:")?;
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((path, query)) => (path, query),
        None => (rest, ""),
    };

    let in_memory = path.is_empty()
        || path == ":memory:"
        || query.split('&').any(|kv| kv == "mode=memory");
    if in_memory {
        return None;
    }

    Some(PathBuf::from(path))
}
