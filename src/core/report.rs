use std::path::Path;

use console::style;
use log::error;

use crate::types::{RunStats, SuiteResult};

/// Fold per-suite outcomes into the run counters and print the summary plus
/// a detail section for every failure. Display order is by suite path, not
/// completion order.
pub fn print_test_results(test_results: &[SuiteResult], stats: &RunStats) {
    stats.set_count("total.test_suites", test_results.len() as i64);

    let mut sorted: Vec<&SuiteResult> = test_results.iter().collect();
    sorted.sort_by(|a, b| {
        a.pyproject_path
            .to_string_lossy()
            .cmp(&b.pyproject_path.to_string_lossy())
    });

    let mut fail_output = String::new();
    for result in sorted {
        match result.failed_step {
            None => stats.add("total.passes", 1),
            Some(step) => {
                if result.timed_out {
                    stats.add("total.timeouts", 1);
                } else {
                    stats.add("total.fails", 1);
                }
                fail_output.push_str(&format!(
                    "{} ({} step):\n{}\n",
                    result.pyproject_path.display(),
                    step,
                    result.output
                ));
            }
        }
    }

    let total_time = stats.get_count("runtime.all_tests").unwrap_or(-1);
    println!("-- Summary (total time {total_time}s):\n");
    println!(
        "{}: {}\n{}: {}\n{}: {}\nTOTAL: {}\n",
        style("PASS").green(),
        stats.get_count("total.passes").unwrap_or(0),
        style("FAIL").red(),
        stats.get_count("total.fails").unwrap_or(0),
        style("TIMEOUT").yellow(),
        stats.get_count("total.timeouts").unwrap_or(0),
        stats.get_count("total.test_suites").unwrap_or(0),
    );

    if let Some(total_pyprojects) = stats.get_count("total.pyproject_files") {
        if total_pyprojects > 0 {
            let test_suites = stats.get_count("total.test_suites").unwrap_or(0);
            let pct = test_suites * 100 / total_pyprojects;
            stats.set_count("pct.pyproject_gauntlet_enabled", pct);
            println!(
                "-- {test_suites} / {total_pyprojects} ({pct}%) `pyproject.toml`'s have `gauntlet` tests running\n"
            );
        }
    }

    if !fail_output.is_empty() {
        println!("-- Failure Output --\n");
        println!("{fail_output}");
    }
}

/// Persist the stats snapshot as pretty JSON with sorted keys. Write
/// failures are logged and swallowed so they cannot mask the run's result.
pub fn write_stats_file(stats_file: &Path, stats: &RunStats) {
    let path = if stats_file.is_absolute() {
        stats_file.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(stats_file),
            Err(_) => stats_file.to_path_buf(),
        }
    };

    match serde_json::to_string_pretty(&stats.snapshot()) {
        Ok(json) => {
            if let Err(err) = std::fs::write(&path, json) {
                error!(
                    "Unable to write out JSON statistics file to {} ({})",
                    path.display(),
                    err
                );
            }
        }
        Err(err) => error!("Unable to serialize run statistics ({err})"),
    }
}

/// The whole run's numeric outcome.
pub fn exit_code(stats: &RunStats) -> i32 {
    let fails = stats.get_count("total.fails").unwrap_or(0);
    let timeouts = stats.get_count("total.timeouts").unwrap_or(0);
    (fails + timeouts) as i32
}
