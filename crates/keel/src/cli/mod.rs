mod migrate;

pub use migrate::{MigrateArgs, StatusCommand, UpCommand};

use anyhow::Result;
use clap::{Parser, Subcommand};

/// keel - ordered, exactly-once schema migrations
#[derive(Parser)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub args: MigrateArgs,
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Apply all pending migrations (default).
    Up(UpCommand),

    /// Show applied and pending migrations.
    Status(StatusCommand),
}

impl Cli {
    /// Execute the CLI command.
    pub async fn execute(self) -> Result<()> {
        init_tracing(self.args.verbose);

        match self.command {
            None => UpCommand::default().execute(self.args).await,
            Some(Commands::Up(cmd)) => cmd.execute(self.args).await,
            Some(Commands::Status(cmd)) => cmd.execute(self.args).await,
        }
    }
}

/// Log to stderr so the summary on stdout stays readable.
fn init_tracing(verbose: bool) {
    let log_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()))
        .with_writer(std::io::stderr)
        .init();
}
