use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{error, info};

use crate::core::process::check_output;
use crate::types::{AppError, AppResult, ProcessError};

/// The virtualenv every gate of a run executes inside. Read-only once
/// created; shared by all workers.
#[derive(Debug, Clone)]
pub struct Venv {
    root: PathBuf,
    reused: bool,
}

impl Venv {
    pub fn created(root: PathBuf) -> Self {
        Self {
            root,
            reused: false,
        }
    }

    /// Wrap a venv supplied by the caller. Reused venvs are never destroyed.
    pub fn reused(root: PathBuf) -> Self {
        Self { root, reused: true }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn bin_dir(&self) -> PathBuf {
        if cfg!(windows) {
            self.root.join("Scripts")
        } else {
            self.root.join("bin")
        }
    }

    pub fn tool(&self, name: &str) -> PathBuf {
        self.bin_dir().join(name)
    }

    /// Locate the venv's site-packages directory. Coverage report paths are
    /// resolved relative to it.
    pub fn site_packages(&self) -> Option<PathBuf> {
        if cfg!(windows) {
            let candidate = self.root.join("Lib").join("site-packages");
            return candidate.is_dir().then_some(candidate);
        }

        let lib_path = self.root.join("lib");
        let entries = match fs::read_dir(&lib_path) {
            Ok(entries) => entries,
            Err(_) => {
                error!("Unable to find a python lib dir in {}", lib_path.display());
                return None;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_python_dir = path.is_dir()
                && path
                    .file_name()
                    .map(|name| name.to_string_lossy().starts_with("python"))
                    .unwrap_or(false);
            if is_python_dir {
                return Some(path.join("site-packages"));
            }
        }
        error!("Unable to find a python lib dir in {}", lib_path.display());
        None
    }

    /// Remove the venv root recursively. Reused venvs and `--keep-venv` runs
    /// are left on disk.
    pub fn destroy(&self, keep: bool) {
        if self.reused || keep {
            info!(
                "Not removing venv @ {} due to CLI arguments",
                self.root.display()
            );
            return;
        }
        if let Err(err) = fs::remove_dir_all(&self.root) {
            error!("Unable to remove venv @ {}: {}", self.root.display(), err);
        }
    }
}

/// Point pip at the configured package index for everything run inside the
/// venv.
pub fn write_pip_mirror(root: &Path, mirror: &str) -> io::Result<()> {
    let contents = format!("[global]\nindex-url = {mirror}\ntimeout = 2\n");
    fs::write(root.join("pip.conf"), contents)
}

/// Create the run's venv: interpreter bootstrap, pip mirror config, then the
/// fixed toolchain install. Each stage runs under the same timeout budget and
/// aborts creation on failure.
pub async fn create_venv(
    python: &str,
    mirror: &str,
    venv_pkgs: &[String],
    timeout_secs: u64,
    system_site_packages: bool,
    install_pkgs: bool,
) -> AppResult<Venv> {
    let start = Instant::now();
    let root = std::env::temp_dir().join(format!("gauntlet_venv_{}", std::process::id()));
    let env: HashMap<String, String> = std::env::vars().collect();

    let mut venv_cmd = vec![python.to_string(), "-m".to_string(), "venv".to_string()];
    if system_site_packages {
        venv_cmd.push("--system-site-packages".to_string());
    }
    venv_cmd.push(root.to_string_lossy().to_string());
    run_create_step(&venv_cmd, timeout_secs, &env).await?;

    let venv = Venv::created(root);
    write_pip_mirror(venv.root(), mirror)
        .map_err(|err| AppError::VenvCreation(format!("unable to write pip.conf: {err}")))?;

    if install_pkgs {
        let mut install_cmd = vec![
            venv.tool("pip").to_string_lossy().to_string(),
            "install".to_string(),
            "--upgrade".to_string(),
        ];
        install_cmd.extend(venv_pkgs.iter().cloned());
        run_create_step(&install_cmd, timeout_secs, &env).await?;
    }

    info!(
        "Successfully created venv @ {} to run tests ({}s)",
        venv.root().display(),
        start.elapsed().as_secs()
    );
    Ok(venv)
}

async fn run_create_step(
    cmd: &[String],
    timeout_secs: u64,
    env: &HashMap<String, String>,
) -> AppResult<()> {
    match check_output(cmd, timeout_secs, env, None).await {
        Ok(_) => Ok(()),
        Err(ProcessError::Failed {
            command,
            exit_code,
            stdout,
            stderr,
        }) => {
            error!("`{command}` exited with status {exit_code} during venv setup");
            error!("stdout:\n{stdout}");
            error!("stderr:\n{stderr}");
            Err(AppError::VenvCreation(format!(
                "`{command}` exited with status {exit_code}"
            )))
        }
        Err(err) => {
            error!("{err}");
            Err(AppError::VenvCreation(err.to_string()))
        }
    }
}
