//! Schema migration engine: applies ordered SQL scripts to SQLite or
//! PostgreSQL exactly once each, recording progress in a ledger table.

pub mod db;
pub mod migrations;
pub mod testing;

pub use db::{Backend, Store};
pub use migrations::{MigrationRunner, RunReport, StatusReport};
