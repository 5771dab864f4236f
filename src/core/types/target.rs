use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::types::config::SuiteConfig;

/// One discovered, independently testable project unit: the `pyproject.toml`
/// that declared it plus its resolved settings.
#[derive(Debug, Clone, Serialize)]
pub struct TestTarget {
    pub pyproject_path: PathBuf,
    pub config: SuiteConfig,
}

impl TestTarget {
    pub fn new(pyproject_path: PathBuf, config: SuiteConfig) -> Self {
        Self {
            pyproject_path,
            config,
        }
    }

    /// Directory holding the project's sources.
    pub fn module_dir(&self) -> &Path {
        self.pyproject_path.parent().unwrap_or(Path::new("."))
    }

    /// Short name used to scope this suite's stats keys.
    pub fn suite_name(&self) -> String {
        self.module_dir()
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.pyproject_path.to_string_lossy().to_string())
    }

    /// Returns a cwd-relative path string suitable for logging
    pub fn display(&self) -> String {
        if let Ok(cwd) = std::env::current_dir() {
            let target_abs = if self.pyproject_path.is_absolute() {
                self.pyproject_path.clone()
            } else {
                cwd.join(&self.pyproject_path)
            };

            if let Ok(relative) = target_abs.strip_prefix(&cwd) {
                let s = relative.to_string_lossy().to_string();
                if s.is_empty() {
                    return ".".to_string();
                }
                return s;
            }
        }
        self.pyproject_path.to_string_lossy().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suite_name_is_parent_dir() {
        let target = TestTarget::new(
            PathBuf::from("/repo/coop/pyproject.toml"),
            SuiteConfig::default(),
        );
        assert_eq!(target.suite_name(), "coop");
        assert_eq!(target.module_dir(), Path::new("/repo/coop"));
    }
}
