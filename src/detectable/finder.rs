use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};
use tracing::warn;

/// Looks up files and directories directly beneath a directory by name or
/// glob pattern (`Package.resolved`, `*.xcodeproj`). Results are sorted so
/// repeated scans pick the same match.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFinder;

impl FileFinder {
    pub fn new() -> Self {
        Self
    }

    pub fn find_files(&self, directory: &Path, pattern: &str) -> Vec<PathBuf> {
        self.find(directory, pattern, |p| p.is_file())
    }

    pub fn find_file(&self, directory: &Path, pattern: &str) -> Option<PathBuf> {
        self.find_files(directory, pattern).into_iter().next()
    }

    pub fn find_directories(&self, directory: &Path, pattern: &str) -> Vec<PathBuf> {
        self.find(directory, pattern, |p| p.is_dir())
    }

    pub fn find_directory(&self, directory: &Path, pattern: &str) -> Option<PathBuf> {
        self.find_directories(directory, pattern).into_iter().next()
    }

    fn find(&self, directory: &Path, pattern: &str, keep: impl Fn(&Path) -> bool) -> Vec<PathBuf> {
        let Some(matcher) = compile(pattern) else {
            return Vec::new();
        };

        let Ok(entries) = std::fs::read_dir(directory) else {
            return Vec::new();
        };

        let mut found: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .map(|name| matcher.is_match(Path::new(name)))
                    .unwrap_or(false)
            })
            .filter(|path| keep(path.as_path()))
            .collect();
        found.sort();
        found
    }
}

fn compile(pattern: &str) -> Option<GlobMatcher> {
    match Glob::new(pattern) {
        Ok(glob) => Some(glob.compile_matcher()),
        Err(e) => {
            warn!(pattern, error = %e, "Invalid file pattern");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_find_by_glob() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("App.xcodeproj")).unwrap();
        fs::write(dir.path().join("Other.xcodeproj"), "not a dir").unwrap();

        let finder = FileFinder::new();
        assert_eq!(
            finder.find_directory(dir.path(), "*.xcodeproj"),
            Some(dir.path().join("App.xcodeproj"))
        );
        assert_eq!(
            finder.find_file(dir.path(), "*.xcodeproj"),
            Some(dir.path().join("Other.xcodeproj"))
        );
    }

    #[test]
    fn test_exact_name_and_sorting() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.d"), "").unwrap();
        fs::write(dir.path().join("a.d"), "").unwrap();
        fs::write(dir.path().join("setup.py"), "").unwrap();

        let finder = FileFinder::new();
        assert_eq!(
            finder.find_files(dir.path(), "*.d"),
            vec![dir.path().join("a.d"), dir.path().join("b.d")]
        );
        assert!(finder.find_file(dir.path(), "setup.py").is_some());
        assert!(finder.find_file(dir.path(), "setup.cfg").is_none());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let finder = FileFinder::new();
        assert!(finder
            .find_files(Path::new("/definitely/not/here"), "*")
            .is_empty());
    }
}
