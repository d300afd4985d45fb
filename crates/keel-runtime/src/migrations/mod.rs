mod executor;
mod ledger;
mod loader;
mod lock;
mod runner;
mod splitter;

pub use executor::MigrationExecutor;
pub use ledger::{Ledger, MigrationRecord, DEFAULT_LEDGER_TABLE};
pub use loader::{MigrationScript, ScriptLoader};
pub use lock::{lock_path, MigrationLock};
pub use runner::{diff, Diff, MigrationRunner, RunFailure, RunPhase, RunReport, StatusReport};
pub use splitter::{split_statements, split_statements_for, Statement};
