//! Rust projects: `Cargo.lock` with full edges, `Cargo.toml` as a fallback.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::detectable::{
    CodeLocation, Detectable, DetectableEnvironment, DetectableInfo, DetectableResult, Extraction,
    ExtractionEnvironment,
};
use crate::graph::{Dependency, DependencyGraph, ExternalId, ExternalIdFactory, Forge};

pub const CARGO_LOCK: &str = "Cargo.lock";
pub const CARGO_TOML: &str = "Cargo.toml";

#[derive(Debug, Deserialize)]
struct CargoLock {
    #[serde(default)]
    package: Vec<CargoLockPackage>,
}

#[derive(Debug, Deserialize)]
struct CargoLockPackage {
    name: String,
    version: String,
    /// Packages without a `source` field are local workspace members.
    source: Option<String>,
    /// `name` or `name version` or `name version (source)`.
    #[serde(default)]
    dependencies: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CargoToml {
    package: Option<CargoTomlPackage>,
    #[serde(default)]
    dependencies: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Deserialize)]
struct CargoTomlPackage {
    name: String,
    version: Option<toml::Value>,
}

/// Build the lock file graph. Dependencies of workspace members are roots;
/// the members themselves are not part of the graph.
pub fn parse_cargo_lock(content: &str, ids: ExternalIdFactory) -> Result<DependencyGraph> {
    let lock: CargoLock = toml::from_str(content)?;

    let mut by_name: HashMap<&str, Vec<&CargoLockPackage>> = HashMap::new();
    for package in &lock.package {
        by_name.entry(package.name.as_str()).or_default().push(package);
    }

    let id = |package: &CargoLockPackage| -> ExternalId {
        ids.name_version(Forge::Crates, &package.name, Some(&package.version))
    };

    let mut graph = DependencyGraph::new();
    for package in &lock.package {
        let is_member = package.source.is_none();
        let parent = Dependency::new(id(package));
        for reference in &package.dependencies {
            let Some(child) = lookup(&by_name, reference) else {
                continue;
            };
            if child.source.is_none() {
                continue;
            }
            let child = Dependency::new(id(child));
            if is_member {
                graph.add_child_to_root(child);
            } else {
                graph.add_child_with_parent(child, &parent);
            }
        }
    }
    Ok(graph)
}

/// A bare name is unambiguous; otherwise the reference carries the version.
fn lookup<'a>(
    by_name: &HashMap<&str, Vec<&'a CargoLockPackage>>,
    reference: &str,
) -> Option<&'a CargoLockPackage> {
    let mut parts = reference.split_whitespace();
    let name = parts.next()?;
    let version = parts.next();
    let candidates = by_name.get(name)?;
    match version {
        Some(version) => candidates.iter().copied().find(|p| p.version == version),
        None => candidates.first().copied(),
    }
}

pub struct CargoTomlResult {
    pub project: Option<ExternalId>,
    pub graph: DependencyGraph,
}

/// `[dependencies]` only. Path and git dependencies are kept without a version.
pub fn parse_cargo_toml(content: &str, ids: ExternalIdFactory) -> Result<CargoTomlResult> {
    let manifest: CargoToml = toml::from_str(content)?;

    let project = manifest.package.as_ref().map(|package| {
        let version = package.version.as_ref().and_then(toml::Value::as_str);
        ids.name_version(Forge::Crates, &package.name, version)
    });

    let mut graph = DependencyGraph::new();
    for (key, spec) in &manifest.dependencies {
        let (name, version) = match spec {
            toml::Value::String(version) => (key.as_str(), Some(version.as_str())),
            toml::Value::Table(table) => (
                table.get("package").and_then(toml::Value::as_str).unwrap_or(key),
                table.get("version").and_then(toml::Value::as_str),
            ),
            _ => (key.as_str(), None),
        };
        graph.add_child_to_root(Dependency::new(ids.name_version(Forge::Crates, name, version)));
    }
    Ok(CargoTomlResult { project, graph })
}

fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

#[derive(Default)]
pub struct CargoLockDetectable;

impl CargoLockDetectable {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Detectable for CargoLockDetectable {
    type Applicable = PathBuf;
    type Extractable = (PathBuf, PathBuf);

    fn info(&self) -> DetectableInfo {
        DetectableInfo {
            name: "Cargo Lock",
            language: "Rust",
            forge: Forge::Crates,
            requirements: "File: Cargo.lock",
        }
    }

    fn applicable(&self, env: &DetectableEnvironment) -> DetectableResult<PathBuf> {
        env.file(CARGO_LOCK)
    }

    fn extractable(&self, env: &DetectableEnvironment, lock: PathBuf) -> DetectableResult<(PathBuf, PathBuf)> {
        Ok((env.directory.clone(), lock))
    }

    async fn extract(&self, env: &ExtractionEnvironment, ready: (PathBuf, PathBuf)) -> Extraction {
        let (directory, lock) = ready;
        let graph = read(&lock).and_then(|content| {
            parse_cargo_lock(&content, env.id_factory).with_context(|| format!("parsing {}", lock.display()))
        });
        match graph {
            Ok(graph) => Extraction::success(CodeLocation::new(graph, directory)),
            Err(e) => Extraction::exception("Unable to parse Cargo.lock", e),
        }
    }
}

#[derive(Default)]
pub struct CargoTomlDetectable;

impl CargoTomlDetectable {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Detectable for CargoTomlDetectable {
    type Applicable = PathBuf;
    type Extractable = (PathBuf, PathBuf);

    fn info(&self) -> DetectableInfo {
        DetectableInfo {
            name: "Cargo Toml",
            language: "Rust",
            forge: Forge::Crates,
            requirements: "File: Cargo.toml",
        }
    }

    fn applicable(&self, env: &DetectableEnvironment) -> DetectableResult<PathBuf> {
        env.file(CARGO_TOML)
    }

    fn extractable(&self, env: &DetectableEnvironment, manifest: PathBuf) -> DetectableResult<(PathBuf, PathBuf)> {
        Ok((env.directory.clone(), manifest))
    }

    async fn extract(&self, env: &ExtractionEnvironment, ready: (PathBuf, PathBuf)) -> Extraction {
        let (directory, manifest) = ready;
        let parsed = read(&manifest).and_then(|content| {
            parse_cargo_toml(&content, env.id_factory)
                .with_context(|| format!("parsing {}", manifest.display()))
        });
        match parsed {
            Ok(CargoTomlResult { project, graph }) => {
                let mut location = CodeLocation::new(graph, directory);
                if let Some(id) = project {
                    location = location.with_external_id(id);
                }
                Extraction::success(location)
            }
            Err(e) => Extraction::exception("Unable to parse Cargo.toml", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LOCK: &str = r#"
version = 3

[[package]]
name = "my-app"
version = "0.1.0"
dependencies = ["serde", "tokio", "util"]

[[package]]
name = "util"
version = "0.1.0"

[[package]]
name = "serde"
version = "1.0.150"
source = "registry+https://github.com/rust-lang/crates.io-index"
checksum = "abc123"
dependencies = ["serde_derive"]

[[package]]
name = "serde_derive"
version = "1.0.150"
source = "registry+https://github.com/rust-lang/crates.io-index"

[[package]]
name = "tokio"
version = "1.25.0"
source = "registry+https://github.com/rust-lang/crates.io-index"
dependencies = ["bytes 1.4.0"]

[[package]]
name = "bytes"
version = "0.5.0"
source = "registry+https://github.com/rust-lang/crates.io-index"

[[package]]
name = "bytes"
version = "1.4.0"
source = "registry+https://github.com/rust-lang/crates.io-index"
"#;

    fn rendered(deps: Vec<&Dependency>) -> Vec<String> {
        deps.iter().map(|d| d.external_id.to_string()).collect()
    }

    #[test]
    fn test_parse_cargo_lock() {
        let ids = ExternalIdFactory::new();
        let graph = parse_cargo_lock(LOCK, ids).unwrap();

        assert_eq!(
            rendered(graph.root_dependencies()),
            vec!["crates:serde/1.0.150", "crates:tokio/1.25.0"]
        );
        let serde = ids.name_version(Forge::Crates, "serde", Some("1.0.150"));
        assert_eq!(rendered(graph.children_of(&serde)), vec!["crates:serde_derive/1.0.150"]);
        let tokio = ids.name_version(Forge::Crates, "tokio", Some("1.25.0"));
        assert_eq!(rendered(graph.children_of(&tokio)), vec!["crates:bytes/1.4.0"]);
        assert!(graph.find_by_name("my-app").is_none());
        assert!(graph.find_by_name("util").is_none());
    }

    #[test]
    fn test_parse_cargo_toml() {
        let parsed = parse_cargo_toml(
            r#"
[package]
name = "demo"
version = "0.2.0"

[dependencies]
anyhow = "1"
serde = { version = "1", features = ["derive"] }
local = { path = "../local" }
renamed = { package = "tokio", version = "1.25" }
"#,
            ExternalIdFactory::new(),
        )
        .unwrap();

        assert_eq!(parsed.project.map(|p| p.to_string()).as_deref(), Some("crates:demo/0.2.0"));
        assert_eq!(
            rendered(parsed.graph.root_dependencies()),
            vec!["crates:anyhow/1", "crates:local", "crates:serde/1", "crates:tokio/1.25"]
        );
    }
}
