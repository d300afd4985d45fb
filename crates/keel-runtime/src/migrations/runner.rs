//! Migration runner with store-scoped locking.
//!
//! Only one runner applies scripts to a store at a time. Scripts are applied in
//! file name order, each one recorded in the ledger as soon as it succeeds, and
//! the run stops at the first failure.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::executor::MigrationExecutor;
use super::ledger::{Ledger, MigrationRecord};
use super::loader::{MigrationScript, ScriptLoader};
use super::lock::MigrationLock;
use crate::db::Store;
use keel_core::config::{ExecutionMode, MigrationsConfig};
use keel_core::error::{KeelError, Result};

/// Where a run is, or where it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Locking,
    EnsuringLedger,
    Diffing,
    /// Running the statements of the pending script at this position.
    Executing(usize),
    /// Writing the ledger entry of the pending script at this position.
    Recording(usize),
    Done,
    Failed,
}

/// A failure while applying scripts.
#[derive(Debug)]
pub struct RunFailure {
    pub filename: String,
    pub phase: RunPhase,
    pub error: KeelError,
}

/// Outcome of [`MigrationRunner::run`].
#[derive(Debug)]
pub struct RunReport {
    /// Scripts found in the source directory.
    pub found: usize,
    /// Scripts already in the ledger before this run.
    pub skipped: usize,
    /// Scripts applied by this run, in order.
    pub applied: Vec<String>,
    pub failure: Option<RunFailure>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Ledger state against the script source, without applying anything.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub applied: Vec<MigrationRecord>,
    pub pending: Vec<String>,
    /// Recorded scripts whose file is gone.
    pub orphaned: Vec<String>,
}

/// Scripts split into what is done and what is left.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    /// (ordinal, filename) of scripts not yet applied, in load order.
    pub pending: Vec<(usize, String)>,
    pub skipped: usize,
    pub orphaned: Vec<String>,
}

/// Compute the pending set from the ordered script list and the ledger.
pub fn diff(scripts: &[String], applied: &HashSet<String>) -> Diff {
    let present: HashSet<&str> = scripts.iter().map(String::as_str).collect();
    let mut orphaned: Vec<String> = applied
        .iter()
        .filter(|f| !present.contains(f.as_str()))
        .cloned()
        .collect();
    orphaned.sort();

    let pending: Vec<(usize, String)> = scripts
        .iter()
        .enumerate()
        .filter(|(_, f)| !applied.contains(*f))
        .map(|(ordinal, f)| (ordinal, f.clone()))
        .collect();

    Diff {
        skipped: scripts.len() - pending.len(),
        pending,
        orphaned,
    }
}

/// Applies pending scripts from a directory to a store.
pub struct MigrationRunner {
    store: Store,
    loader: ScriptLoader,
    ledger_table: String,
    mode: ExecutionMode,
    lock_timeout: Duration,
}

impl MigrationRunner {
    pub fn new(store: Store, config: &MigrationsConfig) -> Self {
        let loader =
            ScriptLoader::new(&config.dir, &config.extension).for_backend(store.backend());
        Self {
            store,
            loader,
            ledger_table: config.ledger_table.clone(),
            mode: config.mode,
            lock_timeout: config.lock_timeout(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Apply every pending script.
    ///
    /// Failures before any script is attempted (lock, ledger setup, unreadable
    /// source) are returned as errors. A failure while applying is reported in
    /// [`RunReport::failure`] together with what was applied before it.
    pub async fn run(&self) -> Result<RunReport> {
        let mut phase = RunPhase::Idle;
        enter(&mut phase, RunPhase::Locking);

        // Blocks until acquired or timed out
        let lock = MigrationLock::acquire(&self.store, self.lock_timeout).await?;

        let result = self.run_locked(&mut phase).await;

        // Always release lock, even on error
        if let Err(e) = lock.release().await {
            warn!("Failed to release migration lock: {}", e);
        }

        if result.is_err() {
            enter(&mut phase, RunPhase::Failed);
        }
        result
    }

    async fn run_locked(&self, phase: &mut RunPhase) -> Result<RunReport> {
        let ledger = Ledger::new(&self.store, &self.ledger_table)?;
        let executor = MigrationExecutor::new(&self.store, self.mode);

        enter(phase, RunPhase::EnsuringLedger);
        ledger.ensure_exists().await?;

        enter(phase, RunPhase::Diffing);
        let scripts = self.loader.list_scripts()?;
        let applied = ledger.list_applied().await?;
        let diff = diff(&scripts, &applied);
        info!(
            "Found {} migration scripts, {} previously applied",
            scripts.len(),
            diff.skipped
        );
        self.warn_about_drift(&diff, &applied);

        // Read everything up front so a bad file aborts before anything runs
        let pending = diff
            .pending
            .iter()
            .map(|(ordinal, filename)| self.loader.load(filename, *ordinal))
            .collect::<Result<Vec<MigrationScript>>>()?;

        let mut report = RunReport {
            found: scripts.len(),
            skipped: diff.skipped,
            applied: Vec::with_capacity(pending.len()),
            failure: None,
        };

        for (i, script) in pending.iter().enumerate() {
            enter(phase, RunPhase::Executing(i));
            info!("Applying migration: {}", script.filename);
            if let Err(error) = executor.apply(script).await {
                return Ok(fail(phase, report, script, error));
            }

            enter(phase, RunPhase::Recording(i));
            if let Err(error) = ledger.record(&script.filename).await {
                return Ok(fail(phase, report, script, error));
            }

            info!("Migration applied: {}", script.filename);
            report.applied.push(script.filename.clone());
        }

        enter(phase, RunPhase::Done);
        if report.applied.is_empty() {
            info!("Database is up to date");
        }
        Ok(report)
    }

    /// Compare the ledger with the script source without applying anything.
    pub async fn status(&self) -> Result<StatusReport> {
        let ledger = Ledger::new(&self.store, &self.ledger_table)?;
        let scripts = self.loader.list_scripts()?;

        let records = if ledger.exists().await? {
            ledger.records().await?
        } else {
            debug!("Ledger table '{}' does not exist yet", ledger.table());
            Vec::new()
        };
        let applied: HashSet<String> = records.iter().map(|r| r.filename.clone()).collect();
        let diff = diff(&scripts, &applied);

        Ok(StatusReport {
            applied: records,
            pending: diff.pending.into_iter().map(|(_, f)| f).collect(),
            orphaned: diff.orphaned,
        })
    }

    fn warn_about_drift(&self, diff: &Diff, applied: &HashSet<String>) {
        for filename in &diff.orphaned {
            warn!(
                "Ledger records {} but no such script exists in {}",
                filename,
                self.loader.dir().display()
            );
        }

        if let Some(newest) = applied.iter().max() {
            for (_, filename) in diff.pending.iter().filter(|(_, f)| f < newest) {
                warn!(
                    "{} sorts before already-applied {}; it will be applied out of order",
                    filename, newest
                );
            }
        }
    }
}

fn enter(phase: &mut RunPhase, next: RunPhase) {
    debug!("Migration run: {:?} -> {:?}", phase, next);
    *phase = next;
}

fn fail(
    phase: &mut RunPhase,
    mut report: RunReport,
    script: &MigrationScript,
    error: KeelError,
) -> RunReport {
    warn!("Migration {} failed: {}", script.filename, error);
    report.failure = Some(RunFailure {
        filename: script.filename.clone(),
        phase: *phase,
        error,
    });
    enter(phase, RunPhase::Failed);
    report
}
