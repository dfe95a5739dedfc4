//! The three-phase detector contract.
//!
//! A [`Detectable`] decides whether one directory holds inputs for one
//! ecosystem and, if so, turns them into dependency graphs:
//!
//! 1. [`Detectable::applicable`] checks file/directory existence only.
//! 2. [`Detectable::extractable`] performs cheap shape checks (optional lock
//!    files, executables on the path).
//! 3. [`Detectable::extract`] parses files and/or runs tools.
//!
//! Each phase hands its findings to the next through the associated types,
//! so `extract` can only ever run with the value produced by a passed
//! `extractable`, which in turn needs a passed `applicable`.

pub mod environment;
pub mod finder;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

use crate::graph::{DependencyGraph, ExternalId, Forge};

pub use environment::{DetectableEnvironment, ExtractionEnvironment};
pub use finder::FileFinder;

/// Terminal status of a directory/detector combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatusCode {
    Passed,
    FileNotFound,
    FilesNotFound,
    DirectoryNotFound,
    ExecutableNotFound,
    PropertyInsufficient,
    Exception,
    ExtractionFailed,
    Yielded,
    NotNestable,
    Excluded,
    Cancelled,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusCode::Passed => "passed",
            StatusCode::FileNotFound => "file not found",
            StatusCode::FilesNotFound => "files not found",
            StatusCode::DirectoryNotFound => "directory not found",
            StatusCode::ExecutableNotFound => "executable not found",
            StatusCode::PropertyInsufficient => "property insufficient",
            StatusCode::Exception => "exception",
            StatusCode::ExtractionFailed => "extraction failed",
            StatusCode::Yielded => "yielded",
            StatusCode::NotNestable => "not nestable",
            StatusCode::Excluded => "excluded",
            StatusCode::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Why a phase did not pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetectableFailure {
    pub code: StatusCode,
    pub reason: String,
}

impl DetectableFailure {
    pub fn new(code: StatusCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn file_not_found(pattern: &str) -> Self {
        Self::new(
            StatusCode::FileNotFound,
            format!("No file was found with pattern: {pattern}"),
        )
    }

    pub fn files_not_found(patterns: &[&str]) -> Self {
        Self::new(
            StatusCode::FilesNotFound,
            format!("No files were found with any of the patterns: {}", patterns.join(", ")),
        )
    }

    pub fn directory_not_found(pattern: &str) -> Self {
        Self::new(
            StatusCode::DirectoryNotFound,
            format!("No directory was found with pattern: {pattern}"),
        )
    }

    pub fn executable_not_found(tool: &str) -> Self {
        Self::new(
            StatusCode::ExecutableNotFound,
            format!("No {tool} executable was found"),
        )
    }
}

impl fmt::Display for DetectableFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.reason)
    }
}

impl std::error::Error for DetectableFailure {}

/// Outcome of the `applicable` and `extractable` phases: the findings on
/// success, the specific unmet requirement otherwise.
pub type DetectableResult<T> = Result<T, DetectableFailure>;

/// A dependency graph tied to the file or directory it was derived from.
#[derive(Debug, Clone)]
pub struct CodeLocation {
    pub graph: DependencyGraph,
    pub source_path: PathBuf,
    /// Identifier of the project itself, when the manifest names one.
    pub external_id: Option<ExternalId>,
}

impl CodeLocation {
    pub fn new(graph: DependencyGraph, source_path: impl Into<PathBuf>) -> Self {
        Self {
            graph,
            source_path: source_path.into(),
            external_id: None,
        }
    }

    pub fn with_external_id(mut self, external_id: ExternalId) -> Self {
        self.external_id = Some(external_id);
        self
    }
}

/// Outcome of the extract phase.
#[derive(Debug)]
pub enum Extraction {
    Success {
        code_locations: Vec<CodeLocation>,
    },
    Failure {
        reason: String,
        cause: Option<anyhow::Error>,
    },
}

impl Extraction {
    pub fn success(code_location: CodeLocation) -> Self {
        Self::Success {
            code_locations: vec![code_location],
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
            cause: None,
        }
    }

    /// A failure with the underlying error attached for diagnostics.
    pub fn exception(reason: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self::Failure {
            reason: reason.into(),
            cause: Some(cause.into()),
        }
    }
}

/// Static description of a detector, shown in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DetectableInfo {
    pub name: &'static str,
    pub language: &'static str,
    pub forge: Forge,
    pub requirements: &'static str,
}

#[async_trait]
pub trait Detectable: Send + Sync {
    /// Markers located by [`Detectable::applicable`].
    type Applicable: Send + 'static;
    /// Inputs confirmed by [`Detectable::extractable`].
    type Extractable: Send + 'static;

    fn info(&self) -> DetectableInfo;

    /// Existence checks only; must not read file contents or run tools.
    fn applicable(&self, env: &DetectableEnvironment) -> DetectableResult<Self::Applicable>;

    /// Absent optional inputs are recorded in the returned value, not failed.
    fn extractable(
        &self,
        env: &DetectableEnvironment,
        found: Self::Applicable,
    ) -> DetectableResult<Self::Extractable>;

    /// Every I/O or subprocess error must come back as [`Extraction::Failure`].
    async fn extract(&self, env: &ExtractionEnvironment, ready: Self::Extractable) -> Extraction;
}
