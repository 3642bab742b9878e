use bench_core::ConfigError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to spawn '{program}' for {identity}: {source}")]
    Spawn {
        identity: String,
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("subject failed for {identity}: {}", exit_label(.code))]
    SubprocessFailure { identity: String, code: Option<i32> },
    #[error("malformed ledger {}: {source}", path.display())]
    Ledger {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid launcher command: {0}")]
    Launcher(String),
    #[error("invalid plan {}: {source}", path.display())]
    PlanSyntax {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid plan: {0}")]
    InvalidPlan(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl RunnerError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        RunnerError::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            RunnerError::Io { .. } => "io_error",
            RunnerError::Spawn { .. } => "spawn_failed",
            RunnerError::SubprocessFailure { .. } => "subprocess_failure",
            RunnerError::Ledger { .. } => "ledger_error",
            RunnerError::Launcher(_) => "invalid_launcher",
            RunnerError::PlanSyntax { .. } | RunnerError::InvalidPlan(_) => "invalid_plan",
            RunnerError::Config(_) => "invalid_configuration",
        }
    }
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}
