use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Locates tools either from an explicit override or by searching `PATH`.
#[derive(Debug, Clone, Default)]
pub struct ExecutableResolver {
    overrides: HashMap<String, PathBuf>,
    search_path: Option<Vec<PathBuf>>,
}

impl ExecutableResolver {
    pub fn new(overrides: HashMap<String, PathBuf>) -> Self {
        Self {
            overrides,
            search_path: None,
        }
    }

    /// Search these directories instead of the process `PATH`.
    #[cfg(test)]
    pub fn with_search_path(mut self, dirs: Vec<PathBuf>) -> Self {
        self.search_path = Some(dirs);
        self
    }

    /// The override configured for `tool`, whether or not it exists.
    pub fn configured(&self, tool: &str) -> Option<&Path> {
        self.overrides.get(tool).map(PathBuf::as_path)
    }

    pub fn resolve(&self, tool: &str) -> Option<PathBuf> {
        if let Some(path) = self.overrides.get(tool) {
            if path.is_file() {
                return Some(path.clone());
            }
            debug!(tool, path = %path.display(), "Configured executable does not exist");
            return None;
        }

        let dirs = match &self.search_path {
            Some(dirs) => dirs.clone(),
            None => std::env::var_os("PATH")
                .map(|p| std::env::split_paths(&p).collect())
                .unwrap_or_default(),
        };

        dirs.iter().find_map(|dir| find_in(dir, tool))
    }
}

fn find_in(dir: &Path, tool: &str) -> Option<PathBuf> {
    let candidate = dir.join(tool);
    if is_executable(&candidate) {
        return Some(candidate);
    }
    if cfg!(windows) {
        for ext in ["exe", "cmd", "bat"] {
            let candidate = dir.join(format!("{tool}.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
