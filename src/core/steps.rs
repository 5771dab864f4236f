use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Instant;

use log::{debug, info};

use crate::core::coverage::analyze_coverage;
use crate::core::process::check_output;
use crate::core::venv::Venv;
use crate::types::config::SuiteConfig;
use crate::types::{ProcessError, RunStats, StepName, SuiteResult, TestTarget};

/// One gate of the pipeline. An empty `cmd` means the step counts as
/// attempted but executes nothing.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: StepName,
    pub run_condition: bool,
    pub cmd: Vec<String>,
    pub log_message: String,
    pub timeout: u64,
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Collect every .py file under `base_dir`, sorted, via an explicit worklist
/// so deep trees cannot exhaust the stack.
pub fn find_py_files(base_dir: &Path) -> Vec<String> {
    let mut py_files = Vec::new();
    let mut dirs = vec![base_dir.to_path_buf()];
    while let Some(dir) = dirs.pop() {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            } else if path.extension().is_some_and(|ext| ext == "py") {
                py_files.push(path_str(&path));
            }
        }
    }
    py_files.sort();
    py_files
}

fn generate_install_cmd(pip_exe: &Path, module_dir: &Path, config: &SuiteConfig) -> Vec<String> {
    let mut cmds = vec![
        path_str(pip_exe),
        "-v".to_string(),
        "install".to_string(),
        path_str(module_dir),
    ];
    cmds.extend(config.tests_require.iter().cloned());
    cmds
}

fn test_entry_point(module_dir: &Path, test_suite: &str) -> String {
    let relative = test_suite.replace('.', std::path::MAIN_SEPARATOR_STR);
    path_str(&module_dir.join(format!("{relative}.py")))
}

fn generate_mypy_cmd(module_dir: &Path, mypy_exe: &Path, config: &SuiteConfig) -> Vec<String> {
    // Without an entry point module there is nothing for mypy to check; the
    // step still counts as attempted.
    let Some(entry_module) = config.entry_point_module.as_deref() else {
        return Vec::new();
    };
    let mut cmds = vec![path_str(mypy_exe)];
    let mypy_ini_path = module_dir.join("mypy.ini");
    if mypy_ini_path.exists() {
        cmds.push("--config".to_string());
        cmds.push(path_str(&mypy_ini_path));
    }
    cmds.push(path_str(&module_dir.join(format!("{entry_module}.py"))));
    cmds
}

fn generate_usort_cmd(module_dir: &Path, usort_exe: &Path) -> Vec<String> {
    vec![
        path_str(usort_exe),
        "check".to_string(),
        path_str(module_dir),
    ]
}

fn generate_black_cmd(module_dir: &Path, black_exe: &Path) -> Vec<String> {
    let mut cmds = vec![path_str(black_exe), "--check".to_string()];
    cmds.extend(find_py_files(module_dir));
    cmds
}

fn generate_flake8_cmd(module_dir: &Path, flake8_exe: &Path) -> Vec<String> {
    let mut cmds = vec![path_str(flake8_exe)];
    let flake8_config = module_dir.join(".flake8");
    if flake8_config.exists() {
        cmds.push("--config".to_string());
        cmds.push(path_str(&flake8_config));
    }
    cmds.extend(find_py_files(module_dir));
    cmds
}

fn generate_pyre_cmd(module_dir: &Path, pyre_exe: &Path) -> Vec<String> {
    vec![
        path_str(pyre_exe),
        "--source-directory".to_string(),
        path_str(module_dir),
        "check".to_string(),
    ]
}

/// Build the fixed, ordered gate list for one suite from its resolved config.
pub fn build_steps(target: &TestTarget, venv: &Venv) -> Vec<Step> {
    let config = &target.config;
    let module_dir = target.module_dir();
    let display = target.display();
    let timeout = config.test_suite_timeout;

    let tests_cmd = match config.test_suite.as_deref() {
        Some(suite) => {
            let entry = test_entry_point(module_dir, suite);
            vec![path_str(&venv.tool("coverage")), "run".to_string(), entry]
        }
        None => Vec::new(),
    };
    let tests_log = match config.test_suite.as_deref() {
        Some(suite) => format!(
            "Running {} tests via coverage",
            test_entry_point(module_dir, suite)
        ),
        None => format!("Running {display} tests via coverage"),
    };

    vec![
        Step {
            name: StepName::PipInstall,
            run_condition: true,
            cmd: generate_install_cmd(&venv.tool("pip"), module_dir, config),
            log_message: format!("Installing {display} + deps"),
            timeout,
        },
        Step {
            name: StepName::TestsRun,
            run_condition: config.test_suite.is_some(),
            cmd: tests_cmd,
            log_message: tests_log,
            timeout,
        },
        Step {
            name: StepName::AnalyzeCoverage,
            run_condition: !config.required_coverage.is_empty(),
            cmd: vec![
                path_str(&venv.tool("coverage")),
                "report".to_string(),
                "-m".to_string(),
            ],
            log_message: format!("Analyzing coverage report for {display}"),
            timeout,
        },
        Step {
            name: StepName::MypyRun,
            run_condition: config.run_mypy,
            cmd: generate_mypy_cmd(module_dir, &venv.tool("mypy"), config),
            log_message: format!("Running mypy for {display}"),
            timeout,
        },
        Step {
            name: StepName::UsortRun,
            run_condition: config.run_usort,
            cmd: generate_usort_cmd(module_dir, &venv.tool("usort")),
            log_message: format!("Running usort for {display}"),
            timeout,
        },
        Step {
            name: StepName::BlackRun,
            run_condition: config.run_black,
            cmd: generate_black_cmd(module_dir, &venv.tool("black")),
            log_message: format!("Running black for {display}"),
            timeout,
        },
        Step {
            name: StepName::Flake8Run,
            run_condition: config.run_flake8,
            cmd: generate_flake8_cmd(module_dir, &venv.tool("flake8")),
            log_message: format!("Running flake8 for {display}"),
            timeout,
        },
        Step {
            name: StepName::PyreRun,
            // pyre has no Windows support
            run_condition: config.run_pyre && !cfg!(windows),
            cmd: generate_pyre_cmd(module_dir, &venv.tool("pyre")),
            log_message: format!("Running pyre for {display}"),
            timeout,
        },
    ]
}

/// Steps sharing the base environment by reference keeps them from bleeding
/// settings into each other; only these two need a private copy.
fn step_env(
    step: &Step,
    target: &TestTarget,
    base: &HashMap<String, String>,
) -> Option<HashMap<String, String>> {
    match step.name {
        StepName::TestsRun => {
            let mut env = base.clone();
            env.insert("PYTHONWARNINGS".to_string(), "error".to_string());
            Some(env)
        }
        StepName::MypyRun => {
            let mut env = base.clone();
            env.insert("MYPYPATH".to_string(), path_str(target.module_dir()));
            Some(env)
        }
        _ => None,
    }
}

/// Drive one suite through its gates, stopping at the first failure.
///
/// Returns the failure (if any) and how many steps were attempted. Steps
/// whose run condition is off are skipped without counting; the coverage
/// report step additionally runs whenever `print_cov` asks for the report.
pub async fn run_steps(
    target: &TestTarget,
    venv: &Venv,
    env: &HashMap<String, String>,
    stats: &RunStats,
    print_cov: bool,
    run_start: Instant,
) -> (Option<SuiteResult>, usize) {
    let mut steps_ran = 0;

    for step in build_steps(target, venv) {
        let print_cov_override = print_cov && step.name == StepName::AnalyzeCoverage;
        if !step.run_condition && !print_cov_override {
            info!("Not running {} step", step.log_message);
            continue;
        }
        steps_ran += 1;
        info!("{}", step.log_message);

        let mut failure: Option<SuiteResult> = None;
        let mut report_text = String::new();

        if step.cmd.is_empty() {
            debug!("No command to run for the {} step", step.name);
        } else {
            debug!("CMD: {}", step.cmd.join(" "));
            let output = match step_env(&step, target, env) {
                Some(step_env) => {
                    check_output(&step.cmd, step.timeout, &step_env, Some(venv.root())).await
                }
                None => check_output(&step.cmd, step.timeout, env, Some(venv.root())).await,
            };
            match output {
                Ok(captured) => report_text = captured.stdout,
                Err(ProcessError::TimedOut { .. }) => {
                    debug!("{} timed out running {}", target.display(), step.log_message);
                    failure = Some(SuiteResult {
                        pyproject_path: target.pyproject_path.clone(),
                        failed_step: Some(step.name),
                        output: format!("Timeout during {}", step.log_message),
                        runtime: step.timeout,
                        timed_out: true,
                    });
                }
                Err(err) => {
                    debug!("{} FAILED for {}", step.log_message, target.display());
                    failure = Some(SuiteResult {
                        pyproject_path: target.pyproject_path.clone(),
                        failed_step: Some(step.name),
                        output: err.output(),
                        runtime: run_start.elapsed().as_secs(),
                        timed_out: false,
                    });
                }
            }
        }

        if step.name == StepName::AnalyzeCoverage && failure.is_none() {
            if print_cov {
                println!("{}:\n{}", target.display(), report_text);
            }
            if step.run_condition {
                failure = analyze_coverage(
                    venv,
                    target,
                    &target.config.required_coverage,
                    &report_text,
                    stats,
                    run_start,
                );
            }
        }

        if let Some(result) = failure {
            return (Some(result), steps_ran);
        }
    }

    (None, steps_ran)
}
