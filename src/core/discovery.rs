use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use glob::Pattern;
use log::{debug, error, info, warn};
use serde::Deserialize;

use crate::types::config::{RunnerConfig, SuiteConfig};
use crate::types::{AppResult, RunStats, TestTarget};

pub const MANIFEST_NAME: &str = "pyproject.toml";

#[derive(Deserialize)]
struct PyprojectDoc {
    tool: Option<ToolTable>,
}

#[derive(Deserialize)]
struct ToolTable {
    gauntlet: Option<SuiteConfig>,
}

pub fn compile_exclude_patterns(patterns: &[String]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|raw| match Pattern::new(raw) {
            Ok(pattern) => Some(pattern),
            Err(err) => {
                error!("Ignoring invalid exclude pattern '{raw}': {err}");
                None
            }
        })
        .collect()
}

/// Walk `base_path` for pyproject.toml files with an explicit worklist
/// (deep trees must not recurse). Directories matching an exclude pattern
/// are pruned whole; symlinked directories are not followed.
pub fn find_pyprojects(base_path: &Path, exclude_patterns: &[Pattern]) -> io::Result<Vec<PathBuf>> {
    let mut pyprojects = Vec::new();
    let mut dirs = vec![base_path.to_path_buf()];

    while let Some(dir) = dirs.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();

            if file_type.is_file() {
                if path.file_name().is_some_and(|name| name == MANIFEST_NAME) {
                    pyprojects.push(path);
                }
                continue;
            }
            // read_dir file types do not follow symlinks, so a symlinked
            // directory never reaches the is_dir branch.
            if !file_type.is_dir() {
                continue;
            }

            let dir_name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            if let Some(pattern) = exclude_patterns.iter().find(|p| p.matches(&dir_name)) {
                debug!(
                    "Skipping {} due to exclude pattern {}",
                    path.display(),
                    pattern
                );
                continue;
            }
            dirs.push(path);
        }
    }

    Ok(pyprojects)
}

/// Discover every suite under `base_path`: each pyproject.toml with a
/// `[tool.gauntlet]` table becomes a target, minus the disabled ones
/// (unless the run overrides that).
pub fn load_targets(
    base_path: &Path,
    config: &RunnerConfig,
    run_disabled: bool,
    stats: &RunStats,
) -> AppResult<Vec<TestTarget>> {
    let discovery_start = Instant::now();
    let exclude_patterns = compile_exclude_patterns(&config.exclude_patterns());
    let mut pyprojects = find_pyprojects(base_path, &exclude_patterns)?;
    pyprojects.sort();
    stats.set_count("total.pyproject_files", pyprojects.len() as i64);

    let mut targets = Vec::new();
    for pyproject in pyprojects {
        let contents = match fs::read_to_string(&pyproject) {
            Ok(contents) => contents,
            Err(err) => {
                warn!("Unable to read {}: {}", pyproject.display(), err);
                continue;
            }
        };
        let doc: PyprojectDoc = match toml::from_str(&contents) {
            Ok(doc) => doc,
            Err(err) => {
                warn!("Skipping {}: invalid TOML ({})", pyproject.display(), err);
                continue;
            }
        };
        let Some(suite_config) = doc.tool.and_then(|tool| tool.gauntlet) else {
            info!(
                "{} does not have a gauntlet config. Nothing to run",
                pyproject.display()
            );
            continue;
        };
        if suite_config.disabled && !run_disabled {
            info!(
                "Not running {} as it is disabled via config",
                pyproject.display()
            );
            stats.add("total.disabled", 1);
            continue;
        }
        targets.push(TestTarget::new(pyproject, suite_config));
    }

    stats.set_count("total.gauntlet_pyprojects", targets.len() as i64);
    stats.set_count(
        "runtime.parse_pyprojects",
        discovery_start.elapsed().as_secs() as i64,
    );
    Ok(targets)
}
