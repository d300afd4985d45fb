pub mod config;
pub mod error;

pub use config::{DatabaseConfig, ExecutionMode, KeelConfig, MigrationsConfig};
pub use error::{KeelError, Result};
