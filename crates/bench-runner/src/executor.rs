//! Execution of a single configuration as an external subject process.
//!
//! The run directory doubles as the completion marker: creating it is the
//! atomic check-and-claim for an identity, so a second executor (or a second
//! worker) that finds it present skips without touching the subject.

use crate::error::RunnerError;
use bench_analysis::OUTPUT_FILE;
use bench_core::Configuration;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Skipped,
    TimedOut,
    Failed { code: Option<i32> },
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::Skipped => "skipped",
            RunOutcome::TimedOut => "timed_out",
            RunOutcome::Failed { .. } => "failed",
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunOutcome::Succeeded => Some(0),
            RunOutcome::Failed { code } => *code,
            RunOutcome::Skipped | RunOutcome::TimedOut => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    template: Vec<String>,
}

impl Launcher {
    pub const SUBJECT_PLACEHOLDER: &'static str = "{subject}";

    pub fn new(template: Vec<String>) -> Result<Self, RunnerError> {
        if template.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(RunnerError::Launcher("command template is empty".to_string()));
        }
        if !template.iter().any(|part| part.contains(Self::SUBJECT_PLACEHOLDER)) {
            return Err(RunnerError::Launcher(format!(
                "command template must mention {}",
                Self::SUBJECT_PLACEHOLDER
            )));
        }
        Ok(Self { template })
    }

    pub fn direct() -> Self {
        Self {
            template: vec![Self::SUBJECT_PLACEHOLDER.to_string()],
        }
    }

    pub fn argv(&self, config: &Configuration) -> Vec<String> {
        let mut argv: Vec<String> = self
            .template
            .iter()
            .map(|part| part.replace(Self::SUBJECT_PLACEHOLDER, config.subject()))
            .collect();
        argv.extend(config.command_args());
        argv
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Self::direct()
    }
}

#[derive(Debug, Clone)]
pub struct RunExecutor {
    results_root: PathBuf,
    launcher: Launcher,
    timeout: Duration,
    poll_interval: Duration,
}

impl RunExecutor {
    pub fn new(results_root: impl Into<PathBuf>) -> Self {
        Self {
            results_root: results_root.into(),
            launcher: Launcher::default(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_launcher(mut self, launcher: Launcher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn results_root(&self) -> &Path {
        &self.results_root
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn run_dir(&self, config: &Configuration) -> PathBuf {
        self.results_root.join(config.identity())
    }

    pub fn command_line(&self, config: &Configuration) -> Vec<String> {
        self.launcher.argv(config)
    }

    /// Run one configuration unless its run directory already exists.
    ///
    /// Output of the subject (stdout and stderr) lands in `out` inside the run
    /// directory and is kept whatever the outcome. Only infrastructure
    /// problems are errors; a failing or hanging subject is an outcome.
    pub fn execute(&self, config: &Configuration) -> Result<RunOutcome, RunnerError> {
        let run_dir = self.run_dir(config);
        match fs::create_dir(&run_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %run_dir.display(), "run directory exists");
                return Ok(RunOutcome::Skipped);
            }
            Err(e) => return Err(RunnerError::io("create", run_dir, e)),
        }

        let child = match self.spawn(config, &run_dir) {
            Ok(child) => child,
            Err(err) => {
                // Leave no marker for a run that never started.
                let _ = fs::remove_dir_all(&run_dir);
                return Err(err);
            }
        };

        let status = wait_with_timeout(child, self.timeout, self.poll_interval)
            .map_err(|e| RunnerError::io("wait for subject in", &run_dir, e))?;
        Ok(match status {
            None => RunOutcome::TimedOut,
            Some(status) if status.success() => RunOutcome::Succeeded,
            Some(status) => RunOutcome::Failed {
                code: status.code(),
            },
        })
    }

    fn spawn(&self, config: &Configuration, run_dir: &Path) -> Result<Child, RunnerError> {
        let out_path = run_dir.join(OUTPUT_FILE);
        let stdout =
            fs::File::create(&out_path).map_err(|e| RunnerError::io("create", &out_path, e))?;
        let stderr = stdout
            .try_clone()
            .map_err(|e| RunnerError::io("duplicate handle for", &out_path, e))?;

        let argv = self.launcher.argv(config);
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::from(stdout));
        cmd.stderr(Stdio::from(stderr));
        cmd.spawn().map_err(|source| RunnerError::Spawn {
            identity: config.identity(),
            program: argv[0].clone(),
            source,
        })
    }
}

fn wait_with_timeout(
    mut child: Child,
    timeout: Duration,
    poll_interval: Duration,
) -> io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(Some(status)),
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    child.wait()?;
                    return Ok(None);
                }
                thread::sleep(poll_interval.min(timeout.saturating_sub(start.elapsed())));
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        }
    }
}

pub fn display_command(argv: &[String]) -> String {
    argv.iter()
        .map(|part| shell_quote(part))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:=,{}".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}
