//! Swift Package Manager lock files (`Package.resolved`).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::detectable::{
    CodeLocation, Detectable, DetectableEnvironment, DetectableInfo, DetectableResult, Extraction,
    ExtractionEnvironment,
};
use crate::graph::{Dependency, DependencyGraph, ExternalIdFactory, Forge};

pub const PACKAGE_RESOLVED_FILENAME: &str = "Package.resolved";

#[derive(Debug, Error)]
pub enum PackageResolvedError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse '{path}': {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("unsupported Package.resolved format version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Debug, Deserialize)]
struct FormatVersion {
    version: u32,
}

#[derive(Debug, Deserialize)]
struct PackageResolvedV1 {
    object: PinsV1,
}

#[derive(Debug, Deserialize)]
struct PinsV1 {
    #[serde(default)]
    pins: Vec<PinV1>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PinV1 {
    repository_url: String,
    #[serde(default)]
    state: PinState,
}

#[derive(Debug, Deserialize)]
struct PackageResolvedV2 {
    #[serde(default)]
    pins: Vec<PinV2>,
}

#[derive(Debug, Deserialize)]
struct PinV2 {
    location: String,
    #[serde(default)]
    state: PinState,
}

#[derive(Debug, Default, Deserialize)]
struct PinState {
    branch: Option<String>,
    revision: Option<String>,
    version: Option<String>,
}

impl PinState {
    fn resolved_version(&self) -> Option<&str> {
        self.version
            .as_deref()
            .or(self.branch.as_deref())
            .or(self.revision.as_deref())
    }
}

/// Turns a `Package.resolved` file into a flat graph of pinned packages.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackageResolvedExtractor {
    id_factory: ExternalIdFactory,
}

impl PackageResolvedExtractor {
    pub fn new(id_factory: ExternalIdFactory) -> Self {
        Self { id_factory }
    }

    pub fn extract(&self, path: &Path) -> Result<DependencyGraph, PackageResolvedError> {
        let content = std::fs::read_to_string(path).map_err(|source| PackageResolvedError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse(&content).map_err(|e| match e {
            PackageResolvedError::Json { source, .. } => PackageResolvedError::Json {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn parse(&self, content: &str) -> Result<DependencyGraph, PackageResolvedError> {
        let json_error = |source| PackageResolvedError::Json {
            path: PathBuf::from(PACKAGE_RESOLVED_FILENAME),
            source,
        };
        let format: FormatVersion = serde_json::from_str(content).map_err(json_error)?;

        let pins: Vec<(String, PinState)> = match format.version {
            1 => {
                let resolved: PackageResolvedV1 = serde_json::from_str(content).map_err(json_error)?;
                resolved
                    .object
                    .pins
                    .into_iter()
                    .map(|p| (p.repository_url, p.state))
                    .collect()
            }
            2 | 3 => {
                let resolved: PackageResolvedV2 = serde_json::from_str(content).map_err(json_error)?;
                resolved
                    .pins
                    .into_iter()
                    .map(|p| (p.location, p.state))
                    .collect()
            }
            other => return Err(PackageResolvedError::UnsupportedVersion(other)),
        };

        let mut graph = DependencyGraph::new();
        for (location, state) in pins {
            let id = self.id_factory.name_version(
                Forge::Github,
                &package_name(&location),
                state.resolved_version(),
            );
            graph.add_child_to_root(Dependency::new(id));
        }
        Ok(graph)
    }
}

/// `https://github.com/apple/swift-log.git` becomes `github.com/apple/swift-log`.
fn package_name(location: &str) -> String {
    let without_scheme = location
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(location);
    let without_scheme = without_scheme
        .strip_prefix("git@")
        .map(|rest| rest.replacen(':', "/", 1))
        .unwrap_or_else(|| without_scheme.to_string());
    let trimmed = without_scheme.trim_end_matches('/');
    trimmed.strip_suffix(".git").unwrap_or(trimmed).to_string()
}

#[derive(Default)]
pub struct SwiftPackageResolvedDetectable;

impl SwiftPackageResolvedDetectable {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Detectable for SwiftPackageResolvedDetectable {
    type Applicable = PathBuf;
    type Extractable = (PathBuf, PathBuf);

    fn info(&self) -> DetectableInfo {
        DetectableInfo {
            name: "Swift Package Resolved",
            language: "Swift",
            forge: Forge::Github,
            requirements: "File: Package.resolved",
        }
    }

    fn applicable(&self, env: &DetectableEnvironment) -> DetectableResult<PathBuf> {
        env.file(PACKAGE_RESOLVED_FILENAME)
    }

    fn extractable(
        &self,
        env: &DetectableEnvironment,
        resolved: PathBuf,
    ) -> DetectableResult<(PathBuf, PathBuf)> {
        Ok((env.directory.clone(), resolved))
    }

    async fn extract(&self, env: &ExtractionEnvironment, ready: (PathBuf, PathBuf)) -> Extraction {
        let (directory, resolved) = ready;
        match PackageResolvedExtractor::new(env.id_factory).extract(&resolved) {
            Ok(graph) => Extraction::success(CodeLocation::new(graph, directory)),
            Err(e) => Extraction::exception("Unable to parse Package.resolved", e),
        }
    }
}
