use std::collections::BTreeMap;
use std::path::Path;
use std::time::Instant;

use log::error;

use crate::core::venv::Venv;
use crate::types::{CoverageLine, RunStats, StepName, SuiteResult, TestTarget};

/// Split a report data line into at most 5 whitespace-delimited fields:
/// path, statements, missed, percent, missing-ranges. The 5th field keeps
/// its internal whitespace (", "-joined line ranges).
fn split_report_line(line: &str) -> Vec<&str> {
    let mut fields = Vec::with_capacity(5);
    let mut rest = line.trim_start();
    while fields.len() < 4 && !rest.is_empty() {
        match rest.find(char::is_whitespace) {
            Some(idx) => {
                fields.push(&rest[..idx]);
                rest = rest[idx..].trim_start();
            }
            None => {
                fields.push(rest);
                rest = "";
            }
        }
    }
    let rest = rest.trim_end();
    if !rest.is_empty() {
        fields.push(rest);
    }
    fields
}

fn parse_percent(token: &str) -> Option<f64> {
    token.strip_suffix('%').unwrap_or(token).parse().ok()
}

/// Normalize a report path so it can be matched against the keys of
/// `required_coverage`. The `TOTAL` row is never path-resolved.
///
/// Some coverage tools report absolute paths through the resolved `/private`
/// symlink on macOS temp dirs; that prefix is stripped whenever the venv
/// itself is not rooted under it. Absolute paths are then expressed relative
/// to the suite directory or the venv's site-packages, whichever contains
/// them; everything else falls back to deleting the venv-relative
/// site-packages prefix from the path string.
fn resolve_report_path(
    raw: &str,
    module_dir: &Path,
    site_packages: &Path,
    relative_site_packages: &str,
    venv_root: &Path,
) -> Option<String> {
    if raw == "TOTAL" {
        return Some("TOTAL".to_string());
    }

    let mut path_str = raw.to_string();
    if Path::new(raw).is_absolute() {
        if !venv_root.starts_with("/private") && path_str.starts_with("/private") {
            path_str = path_str.replacen("/private", "", 1);
        }
        let stripped = Path::new(&path_str);
        for base in [module_dir, site_packages] {
            if let Ok(relative) = stripped.strip_prefix(base) {
                return Some(relative.to_string_lossy().to_string());
            }
        }
    }

    let fallback = path_str.replace(relative_site_packages, "");
    if fallback.is_empty() {
        return None;
    }
    Some(fallback)
}

fn parse_report(
    report: &str,
    module_dir: &Path,
    site_packages: &Path,
    relative_site_packages: &str,
    venv_root: &Path,
) -> BTreeMap<String, CoverageLine> {
    let mut coverage_lines = BTreeMap::new();
    for line in report.lines() {
        if line.is_empty() || line.starts_with('-') || line.starts_with("Name") {
            continue;
        }

        let fields = split_report_line(line);
        if fields.len() < 4 {
            continue;
        }
        let (Ok(stmts), Ok(miss)) = (fields[1].parse::<u64>(), fields[2].parse::<u64>()) else {
            continue;
        };
        let Some(cover) = parse_percent(fields[3]) else {
            continue;
        };
        let Some(key) = resolve_report_path(
            fields[0],
            module_dir,
            site_packages,
            relative_site_packages,
            venv_root,
        ) else {
            error!("Unable to find relative path for {}", fields[0]);
            continue;
        };

        coverage_lines.insert(
            key,
            CoverageLine {
                stmts,
                miss,
                cover,
                missing: fields.get(4).copied().unwrap_or("").to_string(),
            },
        );
    }
    coverage_lines
}

/// Enforce the suite's coverage thresholds against a `coverage report -m`
/// text dump.
///
/// Returns `None` both on success and when enforcement was impossible
/// (no report, no requirements, undiscoverable site-packages) — the latter
/// cases are logged, not silently treated as passing thresholds. A required
/// file absent from the report fails immediately, before any further file is
/// evaluated. Comparison is strict: a file exactly at its threshold passes.
pub fn analyze_coverage(
    venv: &Venv,
    target: &TestTarget,
    required_coverage: &BTreeMap<String, f64>,
    coverage_report: &str,
    stats: &RunStats,
    run_start: Instant,
) -> Option<SuiteResult> {
    let module_dir = target.module_dir();
    let site_packages = venv.site_packages()?;
    let relative_site_packages = match site_packages.strip_prefix(venv.root()) {
        Ok(relative) => format!("{}/", relative.to_string_lossy()),
        Err(_) => format!("{}/", site_packages.to_string_lossy()),
    };

    if coverage_report.is_empty() {
        error!(
            "No coverage report for {} - Unable to enforce coverage requirements",
            target.display()
        );
        return None;
    }
    if required_coverage.is_empty() {
        error!("No required coverage to enforce for {}", target.display());
        return None;
    }

    let coverage_lines = parse_report(
        coverage_report,
        module_dir,
        &site_packages,
        &relative_site_packages,
        venv.root(),
    );

    let suite_name = target.suite_name();
    for (file, line) in &coverage_lines {
        if file == "TOTAL" {
            stats.set_metric(format!("suite.{suite_name}_coverage.total"), line.cover);
        } else {
            stats.set_metric(
                format!("suite.{suite_name}_coverage.file.{file}"),
                line.cover,
            );
        }
    }

    let mut failed_output =
        String::from("The following files did not meet coverage requirements:\n");
    let mut failed_coverage = false;
    for (afile, cov_req) in required_coverage {
        let Some(line) = coverage_lines.get(afile) else {
            return Some(SuiteResult {
                pyproject_path: target.pyproject_path.clone(),
                failed_step: Some(StepName::AnalyzeCoverage),
                output: format!(
                    "{afile} has not reported any coverage. Does the file exist? \
                     Does it get ran during tests? Remove it from required_coverage."
                ),
                runtime: run_start.elapsed().as_secs(),
                timed_out: false,
            });
        };
        if line.cover < *cov_req {
            failed_coverage = true;
            failed_output.push_str(&format!(
                "  {}: {} < {} - Missing: {}\n",
                afile, line.cover, cov_req, line.missing
            ));
        }
    }

    if failed_coverage {
        return Some(SuiteResult {
            pyproject_path: target.pyproject_path.clone(),
            failed_step: Some(StepName::AnalyzeCoverage),
            output: failed_output,
            runtime: run_start.elapsed().as_secs(),
            timed_out: false,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use crate::types::config::SuiteConfig;

    const SAMPLE_REPORT: &str = "\
Name                                Stmts   Miss  Cover   Missing
------------------------------------------------------------------
unittest/coop.py                     59     14     69%     70-72, 76-94, 98
unittest/coop_tests.py               24      0     100%
unittest/coop_fixtures.py        1      0     100%
------------------------------------------------------------------
TOTAL                                84     14    99%
";

    const SAMPLE_FLOAT_REPORT: &str = "\
Name                                Stmts   Miss  Cover   Missing
------------------------------------------------------------------
unittest/coop.py                     59     14     69.00%     70-72, 76-94, 98
unittest/coop_tests.py               24      0     100.00%
------------------------------------------------------------------
TOTAL                                84     14    99.00%
";

    struct Fixture {
        _td: tempfile::TempDir,
        venv: Venv,
        target: TestTarget,
    }

    fn fixture() -> Fixture {
        let td = tempfile::tempdir().unwrap();
        let venv_root = td.path().join("venv");
        fs::create_dir_all(venv_root.join("lib/python3.11/site-packages")).unwrap();
        let module_dir = td.path().join("unittest");
        fs::create_dir_all(&module_dir).unwrap();
        Fixture {
            venv: Venv::created(venv_root),
            target: TestTarget::new(module_dir.join("pyproject.toml"), SuiteConfig::default()),
            _td: td,
        }
    }

    fn required(pairs: &[(&str, f64)]) -> BTreeMap<String, f64> {
        pairs
            .iter()
            .map(|(file, pct)| (file.to_string(), *pct))
            .collect()
    }

    #[test]
    fn no_report_or_requirements_is_not_enforceable() {
        let fx = fixture();
        let stats = RunStats::new();
        let now = Instant::now();
        assert_eq!(
            analyze_coverage(&fx.venv, &fx.target, &required(&[]), "", &stats, now),
            None
        );
        assert_eq!(
            analyze_coverage(
                &fx.venv,
                &fx.target,
                &required(&[("bla", 69.0)]),
                "",
                &stats,
                now
            ),
            None
        );
        assert_eq!(
            analyze_coverage(
                &fx.venv,
                &fx.target,
                &required(&[]),
                "Fake Cov Report",
                &stats,
                now
            ),
            None
        );
    }

    #[test]
    fn missing_site_packages_yields_no_result() {
        let td = tempfile::tempdir().unwrap();
        let venv_root = td.path().join("venv");
        fs::create_dir_all(venv_root.join("lib")).unwrap();
        let venv = Venv::created(venv_root);
        let target = TestTarget::new(td.path().join("pyproject.toml"), SuiteConfig::default());
        let stats = RunStats::new();
        assert_eq!(
            analyze_coverage(
                &venv,
                &target,
                &required(&[("a.py", 1.0)]),
                SAMPLE_REPORT,
                &stats,
                Instant::now()
            ),
            None
        );
    }

    #[test]
    fn below_threshold_fails_with_detail() {
        let fx = fixture();
        let stats = RunStats::new();
        let result = analyze_coverage(
            &fx.venv,
            &fx.target,
            &required(&[("unittest/coop.py", 99.0), ("TOTAL", 99.0)]),
            SAMPLE_REPORT,
            &stats,
            Instant::now(),
        )
        .expect("coverage should fail");

        assert_eq!(result.failed_step, Some(StepName::AnalyzeCoverage));
        assert!(!result.timed_out);
        assert!(
            result
                .output
                .starts_with("The following files did not meet coverage requirements:\n")
        );
        assert!(
            result
                .output
                .contains("unittest/coop.py: 69 < 99 - Missing: 70-72, 76-94, 98")
        );
        // TOTAL is at exactly 99 and equality passes
        assert!(!result.output.contains("TOTAL:"));
    }

    #[test]
    fn thresholds_met_passes_despite_extra_rows() {
        let fx = fixture();
        let stats = RunStats::new();
        assert_eq!(
            analyze_coverage(
                &fx.venv,
                &fx.target,
                &required(&[("unittest/coop_tests.py", 100.0), ("TOTAL", 99.0)]),
                SAMPLE_REPORT,
                &stats,
                Instant::now()
            ),
            None
        );
    }

    #[test]
    fn strictly_below_aggregate_fails() {
        let fx = fixture();
        let stats = RunStats::new();
        let result = analyze_coverage(
            &fx.venv,
            &fx.target,
            &required(&[("TOTAL", 99.5)]),
            SAMPLE_REPORT,
            &stats,
            Instant::now(),
        )
        .expect("aggregate should fail");
        assert!(result.output.contains("TOTAL: 99 < 99.5"));
    }

    #[test]
    fn missing_file_fails_before_other_checks() {
        let fx = fixture();
        let stats = RunStats::new();
        let result = analyze_coverage(
            &fx.venv,
            &fx.target,
            // BTreeMap order puts the absent file first; coop.py at 69 < 99
            // must never be reached.
            &required(&[("aaa_gone.py", 10.0), ("unittest/coop.py", 99.0)]),
            SAMPLE_REPORT,
            &stats,
            Instant::now(),
        )
        .expect("missing file should fail");
        assert!(
            result
                .output
                .starts_with("aaa_gone.py has not reported any coverage.")
        );
        assert!(!result.output.contains("unittest/coop.py"));
    }

    #[test]
    fn float_percents_parse() {
        let fx = fixture();
        let stats = RunStats::new();
        let result = analyze_coverage(
            &fx.venv,
            &fx.target,
            &required(&[("unittest/coop.py", 99.0)]),
            SAMPLE_FLOAT_REPORT,
            &stats,
            Instant::now(),
        )
        .expect("float report should fail");
        assert!(result.output.contains("unittest/coop.py: 69 < 99"));
    }

    #[test]
    fn records_per_file_and_total_stats() {
        let fx = fixture();
        let stats = RunStats::new();
        let _ = analyze_coverage(
            &fx.venv,
            &fx.target,
            &required(&[("TOTAL", 1.0)]),
            SAMPLE_REPORT,
            &stats,
            Instant::now(),
        );
        assert_eq!(
            stats.get_metric("suite.unittest_coverage.file.unittest/coop.py"),
            Some(69.0)
        );
        assert_eq!(stats.get_metric("suite.unittest_coverage.total"), Some(99.0));
    }

    #[test]
    fn absolute_site_packages_paths_resolve() {
        let fx = fixture();
        let sp = fx.venv.site_packages().unwrap();
        let report = format!(
            "Name    Stmts   Miss  Cover   Missing\n\
             ---------------------------------------\n\
             {}/tg/tg.py    116     90    22%   39-59, 62-73\n\
             ---------------------------------------\n\
             TOTAL    116   90    22%\n",
            sp.display()
        );
        let stats = RunStats::new();
        let result = analyze_coverage(
            &fx.venv,
            &fx.target,
            &required(&[("tg/tg.py", 99.0)]),
            &report,
            &stats,
            Instant::now(),
        )
        .expect("tg should fail");
        assert!(result.output.contains("tg/tg.py: 22 < 99 - Missing: 39-59, 62-73"));
    }

    #[test]
    fn private_prefix_is_stripped_when_venv_is_not_private() {
        let fx = fixture();
        let module_dir = fx.target.module_dir().to_path_buf();
        let report = format!(
            "Name    Stmts   Miss  Cover   Missing\n\
             ---------------------------------------\n\
             /private{}/coop.py    10     5    50%   1-5\n\
             ---------------------------------------\n\
             TOTAL    10   5    50%\n",
            module_dir.display()
        );
        let stats = RunStats::new();
        let result = analyze_coverage(
            &fx.venv,
            &fx.target,
            &required(&[("coop.py", 99.0)]),
            &report,
            &stats,
            Instant::now(),
        )
        .expect("coop should fail");
        assert!(result.output.contains("coop.py: 50 < 99"));
    }

    #[test]
    fn module_dir_relative_paths_resolve() {
        let fx = fixture();
        let module_dir = fx.target.module_dir().to_path_buf();
        let report = format!(
            "Name    Stmts   Miss  Cover   Missing\n\
             ---------------------------------------\n\
             {}/coop.py    10     0    100%\n\
             ---------------------------------------\n\
             TOTAL    10   0    100%\n",
            module_dir.display()
        );
        let stats = RunStats::new();
        assert_eq!(
            analyze_coverage(
                &fx.venv,
                &fx.target,
                &required(&[("coop.py", 100.0)]),
                &report,
                &stats,
                Instant::now()
            ),
            None
        );
    }

    #[test]
    fn split_keeps_missing_ranges_whole() {
        let fields = split_report_line("a/b.py    59     14     69%     70-72, 76-94, 98");
        assert_eq!(fields, vec!["a/b.py", "59", "14", "69%", "70-72, 76-94, 98"]);

        let fields = split_report_line("a/b.py    24      0     100%");
        assert_eq!(fields, vec!["a/b.py", "24", "0", "100%"]);
    }
}
