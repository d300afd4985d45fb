use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How the statements of one script are grouped when executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One transaction per script; a failing statement leaves no partial effect.
    #[default]
    Transactional,
    /// Every statement autocommits. Scripts must use guarded statements
    /// (`IF NOT EXISTS` and friends) so a re-run after a failure is safe.
    PerStatement,
}

/// Migration source and ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Directory holding the migration scripts.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,

    /// File extension of eligible scripts, without the dot.
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Name of the table recording applied scripts.
    #[serde(default = "default_ledger_table")]
    pub ledger_table: String,

    #[serde(default)]
    pub mode: ExecutionMode,

    /// How long to wait for another runner to release the migration lock.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            extension: default_extension(),
            ledger_table: default_ledger_table(),
            mode: ExecutionMode::default(),
            lock_timeout_secs: default_lock_timeout(),
        }
    }
}

impl MigrationsConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

fn default_dir() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_extension() -> String {
    "sql".to_string()
}

fn default_ledger_table() -> String {
    "schema_migrations".to_string()
}

fn default_lock_timeout() -> u64 {
    60
}

/// Check that `name` can be spliced into SQL as an unquoted identifier.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
