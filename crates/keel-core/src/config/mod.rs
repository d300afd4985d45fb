mod database;
mod migrations;

pub use database::DatabaseConfig;
pub use migrations::{is_valid_identifier, ExecutionMode, MigrationsConfig};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{KeelError, Result};

/// Environment variable overriding `database.url`.
pub const DATABASE_URL_ENV: &str = "KEEL_DATABASE_URL";
/// Fallback for `database.url` shared with most tooling.
pub const FALLBACK_DATABASE_URL_ENV: &str = "DATABASE_URL";
/// Environment variable overriding `migrations.dir`.
pub const MIGRATIONS_DIR_ENV: &str = "KEEL_MIGRATIONS_DIR";

/// Root configuration for keel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeelConfig {
    /// Target store.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Script source and ledger.
    #[serde(default)]
    pub migrations: MigrationsConfig,
}

impl KeelConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| KeelError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Load from `path` when it exists, otherwise start from defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            tracing::debug!("Loading configuration from {}", path.display());
            Self::from_file(path)
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        // Substitute environment variables
        let content = substitute_env_vars(content);

        toml::from_str(&content)
            .map_err(|e| KeelError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides using `lookup` as the environment.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let url = lookup(DATABASE_URL_ENV).or_else(|| lookup(FALLBACK_DATABASE_URL_ENV));
        if let Some(url) = url.filter(|u| !u.is_empty()) {
            self.database.url = url;
        }
        if let Some(dir) = lookup(MIGRATIONS_DIR_ENV).filter(|d| !d.is_empty()) {
            self.migrations.dir = PathBuf::from(dir);
        }
    }

    /// Reject settings the runner cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(KeelError::Config("database.url must not be empty".into()));
        }
        if self.database.pool_size == 0 {
            return Err(KeelError::Config("database.pool_size must be at least 1".into()));
        }
        if !is_valid_identifier(&self.migrations.ledger_table) {
            return Err(KeelError::Config(format!(
                "migrations.ledger_table '{}' is not a plain SQL identifier",
                self.migrations.ledger_table
            )));
        }
        if self.migrations.extension.is_empty() || self.migrations.extension.contains('.') {
            return Err(KeelError::Config(
                "migrations.extension must be a bare extension such as \"sql\"".into(),
            ));
        }
        Ok(())
    }
}

/// Substitute `${VAR_NAME}` placeholders with environment values.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return result,
    };

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = KeelConfig::default();
        assert_eq!(config.database.url, "sqlite://database.sqlite");
        assert_eq!(config.migrations.dir, PathBuf::from("migrations"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_empty_config() {
        let config = KeelConfig::parse_toml("").unwrap();
        assert_eq!(config.migrations.ledger_table, "schema_migrations");
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
            [database]
            url = "postgres://localhost/campus"
            pool_size = 3

            [migrations]
            dir = "backend/migrations"
            ledger_table = "applied_scripts"
            mode = "per_statement"
            lock_timeout_secs = 5
        "#;

        let config = KeelConfig::parse_toml(toml).unwrap();
        assert_eq!(config.database.url, "postgres://localhost/campus");
        assert_eq!(config.database.pool_size, 3);
        assert_eq!(config.migrations.dir, PathBuf::from("backend/migrations"));
        assert_eq!(config.migrations.ledger_table, "applied_scripts");
        assert_eq!(config.migrations.mode, ExecutionMode::PerStatement);
        assert_eq!(config.migrations.lock_timeout_secs, 5);
    }

    #[test]
    fn test_parse_invalid_config() {
        let err = KeelConfig::parse_toml("[database]\nurl = 42").unwrap_err();
        assert!(matches!(err, KeelError::Config(_)));
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("KEEL_TEST_SUBST_URL", "sqlite://subst.sqlite");

        let toml = r#"
            [database]
            url = "${KEEL_TEST_SUBST_URL}"
        "#;

        let config = KeelConfig::parse_toml(toml).unwrap();
        assert_eq!(config.database.url, "sqlite://subst.sqlite");

        std::env::remove_var("KEEL_TEST_SUBST_URL");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = KeelConfig::parse_toml(
            r#"
            [database]
            url = "sqlite://from_file.sqlite"
        "#,
        )
        .unwrap();

        let env: HashMap<&str, &str> = [
            ("DATABASE_URL", "sqlite://fallback.sqlite"),
            ("KEEL_DATABASE_URL", "sqlite://keel.sqlite"),
            ("KEEL_MIGRATIONS_DIR", "db/migrations"),
        ]
        .into_iter()
        .collect();
        config.apply_env_with(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.database.url, "sqlite://keel.sqlite");
        assert_eq!(config.migrations.dir, PathBuf::from("db/migrations"));
    }

    #[test]
    fn test_env_fallback_database_url() {
        let mut config = KeelConfig::default();
        config.apply_env_with(|k| (k == "DATABASE_URL").then(|| "postgres://db/app".to_string()));
        assert_eq!(config.database.url, "postgres://db/app");
        assert_eq!(config.migrations.dir, PathBuf::from("migrations"));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = KeelConfig::load_or_default("/nonexistent/keel.toml").unwrap();
        assert_eq!(config.database.url, "sqlite://database.sqlite");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = KeelConfig::default();
        config.migrations.ledger_table = "bad-name".into();
        assert!(config.validate().is_err());

        let mut config = KeelConfig::default();
        config.migrations.extension = ".sql".into();
        assert!(config.validate().is_err());

        let mut config = KeelConfig::default();
        config.database.url = "  ".into();
        assert!(config.validate().is_err());

        let mut config = KeelConfig::default();
        config.database.pool_size = 0;
        assert!(config.validate().is_err());
    }
}
