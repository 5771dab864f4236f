use std::path::PathBuf;

use serde::Serialize;
use strum::Display;

/// The fixed set of quality gates, in pipeline order.
///
/// Each gate carries a stable numeric identity used in result reporting;
/// the identity is data on the enum rather than an integer that could
/// collide with real process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
pub enum StepName {
    PipInstall,
    TestsRun,
    AnalyzeCoverage,
    MypyRun,
    UsortRun,
    BlackRun,
    Flake8Run,
    PyreRun,
}

impl StepName {
    pub const fn code(self) -> u8 {
        match self {
            StepName::PipInstall => 1,
            StepName::TestsRun => 2,
            StepName::AnalyzeCoverage => 3,
            StepName::MypyRun => 4,
            StepName::UsortRun => 5,
            StepName::BlackRun => 6,
            StepName::Flake8Run => 7,
            StepName::PyreRun => 8,
        }
    }
}

/// One line of a parsed `coverage report -m` table.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageLine {
    pub stmts: u64,
    pub miss: u64,
    pub cover: f64,
    pub missing: String,
}

/// The single outcome a suite produces per run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteResult {
    pub pyproject_path: PathBuf,
    /// `None` means every attempted step passed.
    pub failed_step: Option<StepName>,
    pub output: String,
    /// Seconds. For timeouts this is the step's configured timeout, not the
    /// observed wall time.
    pub runtime: u64,
    pub timed_out: bool,
}

impl SuiteResult {
    pub fn passed(pyproject_path: PathBuf, output: String, runtime: u64) -> Self {
        Self {
            pyproject_path,
            failed_step: None,
            output,
            runtime,
            timed_out: false,
        }
    }

    pub fn result_code(&self) -> u8 {
        self.failed_step.map_or(0, StepName::code)
    }
}
