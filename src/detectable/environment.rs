use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::executable::{ExecutableResolver, ExecutableRunner};
use crate::graph::ExternalIdFactory;

use super::{DetectableFailure, DetectableResult, FileFinder, StatusCode};

/// Read-only view of the directory being evaluated.
#[derive(Debug, Clone)]
pub struct DetectableEnvironment {
    pub directory: PathBuf,
    pub root: PathBuf,
    pub depth: usize,
    /// An ancestor directory already produced an extraction.
    pub nested: bool,
    finder: FileFinder,
    resolver: Arc<ExecutableResolver>,
}

impl DetectableEnvironment {
    pub fn new(directory: impl Into<PathBuf>, root: impl Into<PathBuf>, resolver: Arc<ExecutableResolver>) -> Self {
        Self {
            directory: directory.into(),
            root: root.into(),
            depth: 0,
            nested: false,
            finder: FileFinder::new(),
            resolver,
        }
    }

    pub fn at_depth(mut self, depth: usize, nested: bool) -> Self {
        self.depth = depth;
        self.nested = nested;
        self
    }

    pub fn file(&self, pattern: &str) -> DetectableResult<PathBuf> {
        self.finder
            .find_file(&self.directory, pattern)
            .ok_or_else(|| DetectableFailure::file_not_found(pattern))
    }

    /// Passes when at least one pattern matches; returns every match.
    pub fn any_file(&self, patterns: &[&str]) -> DetectableResult<Vec<PathBuf>> {
        let found: Vec<PathBuf> = patterns
            .iter()
            .filter_map(|p| self.finder.find_file(&self.directory, p))
            .collect();
        if found.is_empty() {
            Err(DetectableFailure::files_not_found(patterns))
        } else {
            Ok(found)
        }
    }

    pub fn directory(&self, pattern: &str) -> DetectableResult<PathBuf> {
        self.finder
            .find_directory(&self.directory, pattern)
            .ok_or_else(|| DetectableFailure::directory_not_found(pattern))
    }

    pub fn optional_file(&self, directory: &Path, pattern: &str) -> Option<PathBuf> {
        self.finder.find_file(directory, pattern)
    }

    pub fn executable(&self, tool: &str) -> DetectableResult<PathBuf> {
        self.optional_executable(tool)?
            .ok_or_else(|| DetectableFailure::executable_not_found(tool))
    }

    /// `Ok(None)` when the tool is simply absent. A configured override that
    /// does not exist is an error either way.
    pub fn optional_executable(&self, tool: &str) -> DetectableResult<Option<PathBuf>> {
        if let Some(path) = self.resolver.resolve(tool) {
            return Ok(Some(path));
        }
        match self.resolver.configured(tool) {
            Some(path) => Err(DetectableFailure::new(
                StatusCode::PropertyInsufficient,
                format!("The configured {tool} executable {} does not exist", path.display()),
            )),
            None => Ok(None),
        }
    }
}

/// Everything the extract phase may touch besides the scanned directory.
#[derive(Clone)]
pub struct ExtractionEnvironment {
    output_directory: PathBuf,
    pub runner: Arc<dyn ExecutableRunner>,
    pub id_factory: ExternalIdFactory,
}

impl ExtractionEnvironment {
    pub fn new(output_directory: impl Into<PathBuf>, runner: Arc<dyn ExecutableRunner>) -> Self {
        Self {
            output_directory: output_directory.into(),
            runner,
            id_factory: ExternalIdFactory::new(),
        }
    }

    /// Scratch directory for tool output. Created on first use; never inside
    /// the scanned project.
    pub fn output_directory(&self) -> std::io::Result<&Path> {
        std::fs::create_dir_all(&self.output_directory)?;
        Ok(&self.output_directory)
    }
}

impl std::fmt::Debug for ExtractionEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionEnvironment")
            .field("output_directory", &self.output_directory)
            .finish_non_exhaustive()
    }
}
