use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use log::{error, info};

use crate::core::cli::Args;
use crate::core::logging::init_logging;
use crate::core::venv::{Venv, create_venv};
use crate::core::{discovery, report, runner};
use crate::types::config::RunnerConfig;
use crate::types::{AppResult, RunStats};

/// Resolve the discovery root against the cwd. An unusable base directory
/// means there is nothing meaningful to run.
pub fn validate_base_dir(base_dir: Option<&str>, cwd: &Path) -> Option<PathBuf> {
    let base_dir_path = match base_dir {
        Some(dir) => {
            let path = PathBuf::from(dir);
            if path.is_absolute() {
                path
            } else {
                cwd.join(path)
            }
        }
        None => cwd.to_path_buf(),
    };

    if !base_dir_path.exists() {
        error!(
            "{} does not exist. Not running tests",
            base_dir_path.display()
        );
        return None;
    }
    Some(base_dir_path)
}

/// CLI entry point: parse args, set up logging and configuration, then hand
/// off. Returns the process exit code.
pub async fn run_main() -> AppResult<i32> {
    let args = Args::parse();
    init_logging(args.debug)?;
    info!("Starting gauntlet");

    let cwd = std::env::current_dir()?;
    let config = RunnerConfig::load(&cwd);

    let Some(base_dir) = validate_base_dir(args.base_dir.as_deref(), &cwd) else {
        return Ok(69);
    };

    async_main(&args, &config, &base_dir).await
}

/// Drive one full run: discovery, venv bootstrap, scheduling, aggregation.
///
/// Exit codes: 0 all suites passed, 1 nothing to test, 2 a requested venv is
/// missing, 3 venv creation failed, otherwise fails + timeouts.
pub async fn async_main(args: &Args, config: &RunnerConfig, base_dir: &Path) -> AppResult<i32> {
    let stats = Arc::new(RunStats::new());

    let targets = discovery::load_targets(base_dir, config, args.run_disabled, &stats)?;
    if targets.is_empty() {
        error!(
            "{} has no pyproject.toml files with tests defined. Exiting",
            base_dir.display()
        );
        return Ok(1);
    }

    let tests_start = Instant::now();
    let venv = match &args.venv {
        Some(venv_path) => {
            if !venv_path.exists() {
                error!("{} venv does not exist. Please correct!", venv_path.display());
                return Ok(2);
            }
            Venv::reused(venv_path.clone())
        }
        None => {
            let venv_create_start = Instant::now();
            let created = create_venv(
                args.python.as_deref().unwrap_or_else(|| config.python()),
                args.mirror.as_deref().unwrap_or_else(|| config.pypi_url()),
                &config.venv_pkgs(),
                args.venv_timeout.unwrap_or_else(|| config.venv_timeout()),
                args.system_site_packages,
                true,
            )
            .await;
            match created {
                Ok(venv) => {
                    stats.set_count(
                        "venv_create_time",
                        venv_create_start.elapsed().as_secs() as i64,
                    );
                    venv
                }
                Err(err) => {
                    error!("Unable to make a venv to run tests in ({err}). Exiting");
                    return Ok(3);
                }
            }
        }
    };
    let venv = Arc::new(venv);

    let atonce = args.atonce.unwrap_or_else(|| config.atonce());
    let build_prefix = args
        .build_prefix
        .clone()
        .or_else(|| config.extra_build_env_prefix.clone());

    let run_result = runner::run_all(
        targets,
        Arc::clone(&venv),
        atonce,
        args.progress_interval,
        args.print_cov,
        build_prefix.as_deref(),
        Arc::clone(&stats),
    )
    .await;
    let results = match run_result {
        Ok(results) => results,
        Err(err) => {
            venv.destroy(args.keep_venv);
            return Err(err);
        }
    };

    stats.set_count("runtime.all_tests", tests_start.elapsed().as_secs() as i64);
    report::print_test_results(&results, &stats);

    let stats_file = args.stats_file.clone().unwrap_or_else(|| {
        std::env::temp_dir().join(format!("gauntlet_stats_{}", std::process::id()))
    });
    report::write_stats_file(&stats_file, &stats);

    venv.destroy(args.keep_venv);

    Ok(report::exit_code(&stats))
}
