use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info};
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::core::steps::run_steps;
use crate::core::venv::Venv;
use crate::types::{AppError, AppResult, RunStats, SuiteResult, TestTarget};

/// The full invoking environment, optionally extended with a local build
/// prefix so suites compiling native extensions pick up its binaries and
/// headers first.
pub fn build_env(build_base_path: Option<&Path>) -> HashMap<String, String> {
    let mut build_environ: HashMap<String, String> = std::env::vars().collect();
    let Some(base) = build_base_path else {
        return build_environ;
    };

    if !base.exists() {
        error!(
            "{} does not exist. Not adding PATH + INCLUDE env variables",
            base.display()
        );
        return build_environ;
    }

    let build_env_vars = [
        ("PATH", base.join("sbin")),
        ("PATH", base.join("bin")),
        ("C_INCLUDE_PATH", base.join("include")),
        ("CPLUS_INCLUDE_PATH", base.join("include")),
    ];
    for (var_name, value) in build_env_vars {
        let value = value.to_string_lossy().to_string();
        match build_environ.get(var_name) {
            Some(existing) => {
                let combined = format!("{value}:{existing}");
                build_environ.insert(var_name.to_string(), combined);
            }
            None => {
                build_environ.insert(var_name.to_string(), value);
            }
        }
    }
    build_environ
}

async fn progress_reporter(
    progress_interval: f64,
    queue: Arc<Mutex<VecDeque<TestTarget>>>,
    total_tests: usize,
) {
    loop {
        let remaining = queue.lock().await.len();
        if remaining == 0 {
            break;
        }
        let done_count = total_tests - remaining;
        info!(
            "{} / {} test suites ran ({}%)",
            done_count,
            total_tests,
            done_count * 100 / total_tests.max(1)
        );
        sleep(Duration::from_secs_f64(progress_interval)).await;
    }
    debug!("progress_reporter finished");
}

async fn test_runner(
    idx: usize,
    queue: Arc<Mutex<VecDeque<TestTarget>>>,
    results: Arc<Mutex<Vec<SuiteResult>>>,
    venv: Arc<Venv>,
    print_cov: bool,
    stats: Arc<RunStats>,
    base_env: HashMap<String, String>,
) {
    // Each worker gets its own coverage data file so concurrent suites do
    // not clobber each other's instrumentation output.
    let cov_data_path = std::env::temp_dir().join(format!(
        "gauntlet.{}.{}.coverage",
        std::process::id(),
        idx
    ));
    let mut env = base_env;
    env.insert(
        "COVERAGE_FILE".to_string(),
        cov_data_path.to_string_lossy().to_string(),
    );

    loop {
        let next = queue.lock().await.pop_front();
        let Some(target) = next else {
            debug!("test runner {idx} exiting");
            if cov_data_path.exists() {
                let _ = std::fs::remove_file(&cov_data_path);
            }
            return;
        };

        let run_start = Instant::now();
        let (failure, steps_ran) =
            run_steps(&target, &venv, &env, &stats, print_cov, run_start).await;
        let runtime = run_start.elapsed().as_secs();

        let result = match failure {
            Some(result) => result,
            None => {
                let success_output = format!("{} has passed all configured tests", target.display());
                info!("{success_output}");
                SuiteResult::passed(target.pyproject_path.clone(), success_output, runtime)
            }
        };

        let suite_name = target.suite_name();
        stats.set_count(format!("suite.{suite_name}_runtime"), runtime as i64);
        stats.set_count(format!("suite.{suite_name}_completed_steps"), steps_ran as i64);
        results.lock().await.push(result);
    }
}

/// Run every suite through the step pipeline across `atonce` workers.
///
/// Dispatch order is the sorted path order, independent of discovery order
/// and concurrency; completion order is whatever the workers produce.
pub async fn run_all(
    mut targets: Vec<TestTarget>,
    venv: Arc<Venv>,
    atonce: usize,
    progress_interval: f64,
    print_cov: bool,
    build_prefix: Option<&Path>,
    stats: Arc<RunStats>,
) -> AppResult<Vec<SuiteResult>> {
    if atonce == 0 {
        return Err(AppError::InvalidConfig(
            "refusing to run with 0 workers (atonce must be at least 1)".to_string(),
        ));
    }

    targets.sort_by(|a, b| {
        a.pyproject_path
            .to_string_lossy()
            .cmp(&b.pyproject_path.to_string_lossy())
    });
    let total_tests = targets.len();
    let queue = Arc::new(Mutex::new(VecDeque::from(targets)));
    let results = Arc::new(Mutex::new(Vec::with_capacity(total_tests)));
    let base_env = build_env(build_prefix);

    let mut consumers = Vec::with_capacity(atonce + 1);
    for idx in 1..=atonce {
        consumers.push(tokio::spawn(test_runner(
            idx,
            Arc::clone(&queue),
            Arc::clone(&results),
            Arc::clone(&venv),
            print_cov,
            Arc::clone(&stats),
            base_env.clone(),
        )));
    }
    if progress_interval > 0.0 {
        debug!("Adding progress reporter to report every {progress_interval}s");
        consumers.push(tokio::spawn(progress_reporter(
            progress_interval,
            Arc::clone(&queue),
            total_tests,
        )));
    }

    debug!("Starting to run tests");
    for consumer in consumers {
        consumer.await?;
    }

    let mut collected = results.lock().await;
    Ok(collected.drain(..).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn build_env_prepends_prefix_paths() {
        let td = tempfile::tempdir().unwrap();
        for dir in ["bin", "sbin", "include"] {
            std::fs::create_dir_all(td.path().join(dir)).unwrap();
        }

        let env = build_env(Some(td.path()));
        let include = td.path().join("include").to_string_lossy().to_string();
        assert!(env["C_INCLUDE_PATH"].contains(&include));
        assert!(env["CPLUS_INCLUDE_PATH"].contains(&include));

        let bin = td.path().join("bin").to_string_lossy().to_string();
        assert!(env["PATH"].starts_with(&bin));
    }

    #[test]
    fn build_env_ignores_missing_prefix() {
        let env = build_env(Some(Path::new("/gauntlet/does/not/exist/6969")));
        assert_eq!(env.get("C_INCLUDE_PATH"), std::env::var("C_INCLUDE_PATH").ok().as_ref());
    }

    #[test]
    fn build_env_passes_through_without_prefix() {
        let env = build_env(None);
        assert_eq!(env.get("PATH"), std::env::var("PATH").ok().as_ref());
    }
}
