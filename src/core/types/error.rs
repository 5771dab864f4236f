use std::io;

use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Top-level failures that abort the run (as opposed to per-suite step
/// failures, which travel as `SuiteResult` data).
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to create venv: {0}")]
    VenvCreation(String),

    #[error("failed to initialize logging: {0}")]
    Logging(#[from] log::SetLoggerError),

    #[error(transparent)]
    TaskJoin(#[from] tokio::task::JoinError),
}

/// Outcome classification for a single spawned command.
///
/// A non-zero exit is a value, not a panic path: callers format the captured
/// output into their own failure reporting.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("`{command}` exited with status {exit_code}")]
    Failed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("`{command}` timed out after {timeout}s")]
    TimedOut { command: String, timeout: u64 },

    #[error("unable to run `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
}

impl ProcessError {
    /// Captured output suitable for failure reports. Spawn errors have no
    /// captured streams, so the error text itself is returned.
    pub fn output(&self) -> String {
        match self {
            ProcessError::Failed { stdout, stderr, .. } => format!("{stdout}{stderr}"),
            other => other.to_string(),
        }
    }
}
