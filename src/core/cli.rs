use std::path::PathBuf;

use clap::Parser;

/// Find pyproject.toml-defined test suites and run their quality gates in
/// parallel inside a shared venv.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// How many test suites to run at once.
    /// Replaces config `atonce` if provided [default: half the CPUs]
    #[arg(short, long)]
    pub atonce: Option<usize>,

    /// Path to recursively look for pyproject.toml files [default: cwd]
    #[arg(short, long)]
    pub base_dir: Option<String>,

    /// Verbose debug output
    #[arg(short, long)]
    pub debug: bool,

    /// Do not remove the created venv when the run finishes
    #[arg(short, long)]
    pub keep_venv: bool,

    /// URL for pip to use for the Simple API.
    /// Replaces config `pypi_url` if provided
    #[arg(short, long, env = "GAUNTLET_MIRROR")]
    pub mirror: Option<String>,

    /// Print each suite's coverage report
    #[arg(long)]
    pub print_cov: bool,

    /// Seconds between status updates on test running [default: disabled]
    #[arg(long, default_value_t = 0.0)]
    pub progress_interval: f64,

    /// Run suites even when their config marks them disabled
    #[arg(long)]
    pub run_disabled: bool,

    /// JSON statistics file [default: <tmpdir>/gauntlet_stats_<pid>]
    #[arg(long)]
    pub stats_file: Option<PathBuf>,

    /// Path to an existing venv to reuse (never removed afterwards)
    #[arg(long)]
    pub venv: Option<PathBuf>,

    /// Timeout in seconds for each venv creation step.
    /// Replaces config `venv_timeout` if provided
    #[arg(long)]
    pub venv_timeout: Option<u64>,

    /// Python interpreter used to create the venv.
    /// Replaces config `python` if provided
    #[arg(long)]
    pub python: Option<String>,

    /// Give the venv access to the system site-packages
    #[arg(long)]
    pub system_site_packages: bool,

    /// Local build prefix whose bin/sbin/include dirs are prepended to the
    /// build environment
    #[arg(long, env = "GAUNTLET_BUILD_PREFIX")]
    pub build_prefix: Option<PathBuf>,
}
