use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Deserializer, Serialize};

pub const CONFIG_FILENAME: &str = "gauntlet.toml";
pub const DEFAULT_PYPI_URL: &str = "https://pypi.org/simple/";

/// Run-wide settings, read from the nearest `gauntlet.toml` found by walking
/// up from the working directory. Everything is optional; accessors apply the
/// defaults. The loaded value is passed down explicitly, never stored in a
/// global.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RunnerConfig {
    pub atonce: Option<usize>,
    pub exclude_patterns: Option<Vec<String>>,
    pub pypi_url: Option<String>,
    pub venv_pkgs: Option<Vec<String>>,
    pub venv_timeout: Option<u64>,
    pub extra_build_env_prefix: Option<PathBuf>,
    pub python: Option<String>,
}

impl RunnerConfig {
    pub fn atonce(&self) -> usize {
        self.atonce.unwrap_or_else(|| {
            let cpus = std::thread::available_parallelism().map_or(20, |n| n.get());
            (cpus / 2).max(1)
        })
    }

    pub fn exclude_patterns(&self) -> Vec<String> {
        self.exclude_patterns
            .clone()
            .unwrap_or_else(|| vec!["build*".to_string(), "yocto".to_string()])
    }

    pub fn pypi_url(&self) -> &str {
        self.pypi_url.as_deref().unwrap_or(DEFAULT_PYPI_URL)
    }

    pub fn venv_pkgs(&self) -> Vec<String> {
        self.venv_pkgs.clone().unwrap_or_else(|| {
            [
                "black",
                "coverage",
                "flake8",
                "mypy",
                "pip",
                "pyre-check",
                "setuptools",
                "usort",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect()
        })
    }

    pub fn venv_timeout(&self) -> u64 {
        self.venv_timeout.unwrap_or(120)
    }

    pub fn python(&self) -> &str {
        self.python.as_deref().unwrap_or("python3")
    }

    /// Walk `start_dir` and its ancestors for the first `gauntlet.toml`.
    /// Falls back to defaults when none is found or the file does not parse.
    pub fn load(start_dir: &Path) -> Self {
        for dir in start_dir.ancestors() {
            let candidate = dir.join(CONFIG_FILENAME);
            if !candidate.exists() {
                continue;
            }
            match fs::read_to_string(&candidate)
                .ok()
                .and_then(|contents| toml::from_str::<RunnerConfig>(&contents).ok())
            {
                Some(config) => {
                    info!("Loading found config @ {}", candidate.display());
                    return config;
                }
                None => break,
            }
        }
        info!("Using default config settings");
        RunnerConfig::default()
    }
}

fn default_suite_timeout() -> u64 {
    30
}

/// Coverage values may be written as TOML integers or floats; both normalize
/// to f64.
fn de_coverage<'de, D>(deserializer: D) -> Result<BTreeMap<String, f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Num {
        Int(i64),
        Float(f64),
    }

    let raw = BTreeMap::<String, Num>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, value)| {
            let pct = match value {
                Num::Int(n) => n as f64,
                Num::Float(f) => f,
            };
            (key, pct)
        })
        .collect())
}

/// Per-suite settings from a `[tool.gauntlet]` table in `pyproject.toml`.
/// Resolved once at discovery and immutable afterwards. Keys this version
/// does not recognize are retained in `extra` rather than rejected.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SuiteConfig {
    /// Dotted module path of the unittest entry file, e.g. "coop.tests.base".
    pub test_suite: Option<String>,
    #[serde(default = "default_suite_timeout")]
    pub test_suite_timeout: u64,
    /// File path (relative to the suite directory) to minimum coverage
    /// percent. "TOTAL" addresses the aggregate row of the report.
    #[serde(default, deserialize_with = "de_coverage")]
    pub required_coverage: BTreeMap<String, f64>,
    #[serde(default)]
    pub run_mypy: bool,
    #[serde(default)]
    pub run_usort: bool,
    #[serde(default)]
    pub run_black: bool,
    #[serde(default)]
    pub run_flake8: bool,
    #[serde(default)]
    pub run_pyre: bool,
    #[serde(default)]
    pub disabled: bool,
    /// Module mypy type-checks, e.g. "coop" for coop.py.
    pub entry_point_module: Option<String>,
    /// Extra packages appended to the suite's pip install.
    #[serde(default)]
    pub tests_require: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        SuiteConfig {
            test_suite: None,
            test_suite_timeout: default_suite_timeout(),
            required_coverage: BTreeMap::new(),
            run_mypy: false,
            run_usort: false,
            run_black: false,
            run_flake8: false,
            run_pyre: false,
            disabled: false,
            entry_point_module: None,
            tests_require: Vec::new(),
            extra: BTreeMap::new(),
        }
    }
}
