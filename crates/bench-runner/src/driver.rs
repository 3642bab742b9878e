use crate::error::RunnerError;
use crate::executor::{display_command, RunExecutor, RunOutcome};
use crate::ledger::{LedgerEntry, RunLedger};
use bench_core::Configuration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread;
use std::time::Instant;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetPolicy {
    Wipe,
    #[default]
    Preserve,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Halt,
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    pub reset: ResetPolicy,
    pub on_failure: FailurePolicy,
    pub jobs: usize,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            reset: ResetPolicy::default(),
            on_failure: FailurePolicy::default(),
            jobs: 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarnessReport {
    pub succeeded: usize,
    pub skipped: usize,
    pub timed_out: Vec<String>,
    pub failed: Vec<String>,
}

impl HarnessReport {
    fn record(&mut self, identity: String, outcome: RunOutcome) {
        match outcome {
            RunOutcome::Succeeded => self.succeeded += 1,
            RunOutcome::Skipped => self.skipped += 1,
            RunOutcome::TimedOut => self.timed_out.push(identity),
            RunOutcome::Failed { .. } => self.failed.push(identity),
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.timed_out.len() + self.failed.len()
    }
}

pub fn prepare_results_root(results_root: &Path, reset: ResetPolicy) -> Result<(), RunnerError> {
    if reset == ResetPolicy::Wipe {
        match fs::remove_dir_all(results_root) {
            Ok(()) => info!(path = %results_root.display(), "wiped results directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(RunnerError::io("remove", results_root, e)),
        }
    }
    fs::create_dir_all(results_root).map_err(|e| RunnerError::io("create", results_root, e))
}

/// Run every configuration through `executor`.
///
/// A subject failure under [`FailurePolicy::Halt`] stops the pass with
/// [`RunnerError::SubprocessFailure`]; timeouts never do. With more than one
/// job, workers pull configurations from a shared cursor and stop picking up
/// new ones after the first fatal error.
pub fn run_all<I>(
    executor: &RunExecutor,
    configs: I,
    options: &DriverOptions,
) -> Result<HarnessReport, RunnerError>
where
    I: IntoIterator<Item = Configuration>,
{
    prepare_results_root(executor.results_root(), options.reset)?;
    let ledger = RunLedger::open(executor.results_root())?;
    let started = Instant::now();

    let report = if options.jobs <= 1 {
        let mut report = HarnessReport::default();
        for config in configs {
            let outcome = run_one(executor, &ledger, &config, options.on_failure)?;
            report.record(config.identity(), outcome);
        }
        report
    } else {
        run_parallel(executor, &ledger, configs.into_iter().collect(), options)?
    };

    info!(
        succeeded = report.succeeded,
        skipped = report.skipped,
        timed_out = report.timed_out.len(),
        failed = report.failed.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "harness pass complete"
    );
    Ok(report)
}

fn run_parallel(
    executor: &RunExecutor,
    ledger: &RunLedger,
    configs: Vec<Configuration>,
    options: &DriverOptions,
) -> Result<HarnessReport, RunnerError> {
    let cursor = AtomicUsize::new(0);
    let stop = AtomicBool::new(false);
    let report = Mutex::new(HarnessReport::default());
    let first_error: Mutex<Option<RunnerError>> = Mutex::new(None);

    thread::scope(|scope| {
        for _ in 0..options.jobs.min(configs.len().max(1)) {
            scope.spawn(|| {
                while !stop.load(Ordering::SeqCst) {
                    let Some(config) = configs.get(cursor.fetch_add(1, Ordering::SeqCst)) else {
                        break;
                    };
                    match run_one(executor, ledger, config, options.on_failure) {
                        Ok(outcome) => report
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .record(config.identity(), outcome),
                        Err(err) => {
                            stop.store(true, Ordering::SeqCst);
                            first_error
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .get_or_insert(err);
                        }
                    }
                }
            });
        }
    });

    if let Some(err) = first_error.into_inner().unwrap_or_else(PoisonError::into_inner) {
        return Err(err);
    }
    Ok(report.into_inner().unwrap_or_else(PoisonError::into_inner))
}

fn run_one(
    executor: &RunExecutor,
    ledger: &RunLedger,
    config: &Configuration,
    on_failure: FailurePolicy,
) -> Result<RunOutcome, RunnerError> {
    let identity = config.identity();
    let command = display_command(&executor.command_line(config));
    info!(identity = %identity, command = %command, "running configuration");

    let started = Instant::now();
    let outcome = executor.execute(config)?;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        RunOutcome::Skipped => {
            info!(identity = %identity, outcome = outcome.label(), "results already present");
            return Ok(outcome);
        }
        RunOutcome::Succeeded => {
            info!(identity = %identity, outcome = outcome.label(), elapsed_ms, "configuration finished")
        }
        RunOutcome::TimedOut => warn!(
            identity = %identity,
            outcome = outcome.label(),
            elapsed_ms,
            "subject killed after timeout; output kept"
        ),
        RunOutcome::Failed { code } => error!(
            identity = %identity,
            outcome = outcome.label(),
            exit_code = ?code,
            elapsed_ms,
            "subject failed"
        ),
    }
    ledger.append(&LedgerEntry::new(identity.clone(), command, outcome, elapsed_ms))?;

    match outcome {
        RunOutcome::Failed { code } if on_failure == FailurePolicy::Halt => {
            Err(RunnerError::SubprocessFailure { identity, code })
        }
        _ => Ok(outcome),
    }
}
