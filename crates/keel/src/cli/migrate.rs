use anyhow::{Context, Result};
use clap::{Args, Parser};
use console::style;
use std::path::{Path, PathBuf};

use keel_core::config::{ExecutionMode, KeelConfig};
use keel_runtime::{MigrationRunner, Store};

/// Config file read when `--config` is not given, if it exists.
const DEFAULT_CONFIG_PATH: &str = "keel.toml";

/// Options shared by every command.
#[derive(Args, Debug, Default)]
pub struct MigrateArgs {
    /// Configuration file path [default: keel.toml, if present].
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Target store URL (overrides config, KEEL_DATABASE_URL and DATABASE_URL).
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Migrations directory path (overrides config and KEEL_MIGRATIONS_DIR).
    #[arg(short, long, global = true)]
    pub migrations_dir: Option<String>,

    /// Autocommit each statement instead of one transaction per script.
    #[arg(long, global = true)]
    pub per_statement: bool,

    /// Seconds to wait for another runner to release the migration lock.
    #[arg(long, global = true)]
    pub lock_timeout: Option<u64>,

    /// Verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl MigrateArgs {
    /// Resolve configuration: defaults, then file, then environment, then flags.
    pub fn load_config(&self) -> Result<KeelConfig> {
        let mut config = match &self.config {
            Some(path) => {
                if !Path::new(path).exists() {
                    anyhow::bail!("Configuration file not found: {}", path);
                }
                KeelConfig::from_file(path)?
            }
            None => KeelConfig::load_or_default(DEFAULT_CONFIG_PATH)?,
        };

        config.apply_env();
        self.apply_overrides(&mut config);
        config.validate()?;

        tracing::debug!(
            "Resolved configuration: store {}, scripts in {}, {:?} mode",
            redact_url(&config.database.url),
            config.migrations.dir.display(),
            config.migrations.mode
        );
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut KeelConfig) {
        if let Some(url) = &self.database_url {
            config.database.url = url.clone();
        }
        if let Some(dir) = &self.migrations_dir {
            config.migrations.dir = PathBuf::from(dir);
        }
        if self.per_statement {
            config.migrations.mode = ExecutionMode::PerStatement;
        }
        if let Some(secs) = self.lock_timeout {
            config.migrations.lock_timeout_secs = secs;
        }
    }
}

/// Apply all pending migrations.
#[derive(Parser, Debug, Default)]
pub struct UpCommand {}

impl UpCommand {
    pub async fn execute(self, args: MigrateArgs) -> Result<()> {
        let config = args.load_config()?;
        print_header("Migrations", &config);

        let store = Store::connect(&config.database).await?;
        let runner = MigrationRunner::new(store.clone(), &config.migrations);
        let result = runner.run().await;
        store.close().await;
        let report = result?;

        for name in &report.applied {
            println!("  {} {}", style("✓").green(), name);
        }
        if let Some(failure) = &report.failure {
            println!("  {} {}", style("✗").red(), style(&failure.filename).red());
            println!("    {}", failure.error);
        }
        if !report.applied.is_empty() || report.failure.is_some() {
            println!();
        }

        println!(
            "  {} {} found, {} previously applied, {} newly applied",
            style("ℹ").blue(),
            report.found,
            report.skipped,
            report.applied.len()
        );

        if let Some(failure) = report.failure {
            println!();
            return Err(anyhow::Error::new(failure.error))
                .with_context(|| format!("Migration {} failed", failure.filename));
        }

        if report.applied.is_empty() {
            println!("  {} Database is up to date", style("✓").green());
        } else {
            println!("  {} Migrations complete", style("✓").green());
        }
        println!();
        Ok(())
    }
}

/// Show applied and pending migrations.
#[derive(Parser, Debug, Default)]
pub struct StatusCommand {}

impl StatusCommand {
    pub async fn execute(self, args: MigrateArgs) -> Result<()> {
        let config = args.load_config()?;
        print_header("Migration Status", &config);

        let store = Store::connect(&config.database).await?;
        let runner = MigrationRunner::new(store.clone(), &config.migrations);
        let result = runner.status().await;
        store.close().await;
        let status = result?;

        if status.applied.is_empty() && status.pending.is_empty() {
            println!("  {} No migrations found", style("ℹ").blue());
            println!();
            return Ok(());
        }

        // Show applied migrations
        if !status.applied.is_empty() {
            println!("  {} Applied:", style("✓").green());
            for m in &status.applied {
                let marker = if status.orphaned.contains(&m.filename) {
                    style("?").red().to_string()
                } else {
                    style("-").dim().to_string()
                };
                println!(
                    "    {} {} {} ({})",
                    marker,
                    style(&m.filename).cyan(),
                    style("at").dim(),
                    m.applied_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        // Show pending migrations
        if !status.pending.is_empty() {
            if !status.applied.is_empty() {
                println!();
            }
            println!("  {} Pending:", style("○").yellow());
            for name in &status.pending {
                println!("    {} {}", style("→").dim(), style(name).yellow());
            }
        }

        println!();
        println!(
            "  {} {} applied, {} pending",
            style("ℹ").blue(),
            status.applied.len(),
            status.pending.len()
        );
        if !status.orphaned.is_empty() {
            println!(
                "  {} {} = recorded but missing from {}",
                style("?").red(),
                status.orphaned.len(),
                config.migrations.dir.display()
            );
        }
        println!();
        Ok(())
    }
}

fn print_header(title: &str, config: &KeelConfig) {
    println!();
    println!(
        "  {}  {} {}",
        style("⚓").bold(),
        style("KEEL").bold().cyan(),
        title
    );
    println!();
    println!(
        "  {} {} ({})",
        style("→").dim(),
        redact_url(&config.database.url),
        config.migrations.dir.display()
    );
    println!();
}

/// Hide the password part of a connection URL.
fn redact_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let rest = &url[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let authority = &rest[..authority_end];

    match authority.rfind('@') {
        Some(at) => match authority[..at].find(':') {
            Some(colon) => format!(
                "{}{}:***{}",
                &url[..scheme_end + 3],
                &authority[..colon],
                &rest[at..]
            ),
            None => url.to_string(),
        },
        None => url.to_string(),
    }
}
