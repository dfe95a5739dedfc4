//! npm projects: `package-lock.json` (v2/v3) and bare `package.json`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::detectable::{
    CodeLocation, Detectable, DetectableEnvironment, DetectableInfo, DetectableResult, Extraction,
    ExtractionEnvironment,
};
use crate::graph::{Dependency, DependencyGraph, ExternalId, ExternalIdFactory, Forge};

pub const PACKAGE_LOCK_JSON: &str = "package-lock.json";
pub const PACKAGE_JSON: &str = "package.json";

#[derive(Debug, Deserialize)]
struct PackageLock {
    name: Option<String>,
    version: Option<String>,
    #[serde(rename = "lockfileVersion", default)]
    lockfile_version: u32,
    packages: Option<BTreeMap<String, LockPackage>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockPackage {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    link: bool,
    resolved: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    optional_dependencies: BTreeMap<String, String>,
}

impl LockPackage {
    fn declared(&self) -> impl Iterator<Item = &String> {
        self.dependencies
            .keys()
            .chain(self.optional_dependencies.keys())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageJson {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default)]
    dev_dependencies: BTreeMap<String, String>,
    #[serde(default)]
    optional_dependencies: BTreeMap<String, String>,
}

/// Project id and dependency graph from one npm input.
pub struct NpmParseResult {
    pub project: Option<ExternalId>,
    pub graph: DependencyGraph,
}

/// Parse a v2/v3 lock file. Each declared dependency is resolved the way
/// node does: the nearest `node_modules/<name>` walking up from the
/// declaring package's own path.
pub fn parse_package_lock(content: &str, ids: ExternalIdFactory) -> Result<NpmParseResult> {
    let lock: PackageLock = serde_json::from_str(content)?;
    let Some(packages) = lock.packages else {
        bail!(
            "lockfileVersion {} has no packages map; regenerate it with npm 7 or newer",
            lock.lockfile_version
        );
    };

    let root_entry = packages.get("").context("lock file has no root package entry")?;
    let project = lock
        .name
        .as_deref()
        .or(root_entry.name.as_deref())
        .map(|name| {
            ids.name_version(
                Forge::Npmjs,
                name,
                lock.version.as_deref().or(root_entry.version.as_deref()),
            )
        });

    let dependency_at = |path: &str| -> Option<Dependency> {
        let entry = packages.get(path)?;
        let name = entry
            .name
            .clone()
            .unwrap_or_else(|| package_name_from_path(path).to_string());
        let version = entry.version.as_deref().or_else(|| {
            link_target(&packages, entry).and_then(|target| target.version.as_deref())
        });
        Some(Dependency::new(ids.name_version(Forge::Npmjs, &name, version)))
    };

    let mut graph = DependencyGraph::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack: Vec<String> = Vec::new();

    let root_declared = root_entry
        .declared()
        .chain(root_entry.dev_dependencies.keys());
    for name in root_declared {
        match resolve(&packages, "", name) {
            Some(path) => {
                if let Some(dependency) = dependency_at(&path) {
                    graph.add_child_to_root(dependency);
                    stack.push(path);
                }
            }
            None => debug!(package = %name, "Declared dependency is not in the lock file"),
        }
    }

    while let Some(path) = stack.pop() {
        if !visited.insert(path.clone()) {
            continue;
        }
        let (Some(entry), Some(parent)) = (packages.get(&path), dependency_at(&path)) else {
            continue;
        };
        let entry = link_target(&packages, entry).unwrap_or(entry);
        for name in entry.declared() {
            let Some(child_path) = resolve(&packages, &path, name) else {
                continue;
            };
            if let Some(child) = dependency_at(&child_path) {
                graph.add_child_with_parent(child, &parent);
                stack.push(child_path);
            }
        }
    }

    Ok(NpmParseResult { project, graph })
}

/// Manifest only: declared names become versionless root dependencies,
/// since ranges are not versions.
pub fn parse_package_json(content: &str, ids: ExternalIdFactory) -> Result<NpmParseResult> {
    let manifest: PackageJson = serde_json::from_str(content)?;
    let project = manifest
        .name
        .as_deref()
        .map(|name| ids.name_version(Forge::Npmjs, name, manifest.version.as_deref()));

    let mut graph = DependencyGraph::new();
    graph.add_children_to_root(
        manifest
            .dependencies
            .keys()
            .chain(manifest.dev_dependencies.keys())
            .chain(manifest.optional_dependencies.keys())
            .map(|name| Dependency::new(ids.name_version(Forge::Npmjs, name, None))),
    );
    Ok(NpmParseResult { project, graph })
}

fn link_target<'a>(
    packages: &'a BTreeMap<String, LockPackage>,
    entry: &LockPackage,
) -> Option<&'a LockPackage> {
    if !entry.link {
        return None;
    }
    packages.get(entry.resolved.as_deref()?)
}

/// `node_modules/a/node_modules/@s/b` becomes `@s/b`.
fn package_name_from_path(path: &str) -> &str {
    path.rsplit_once("node_modules/")
        .map(|(_, name)| name)
        .unwrap_or(path)
}

fn resolve(packages: &BTreeMap<String, LockPackage>, from: &str, name: &str) -> Option<String> {
    let mut base = from.to_string();
    loop {
        let candidate = if base.is_empty() {
            format!("node_modules/{name}")
        } else {
            format!("{base}/node_modules/{name}")
        };
        if packages.contains_key(&candidate) {
            return Some(candidate);
        }
        if base.is_empty() {
            return None;
        }
        base = match base.rfind("/node_modules/") {
            Some(index) => base[..index].to_string(),
            None => String::new(),
        };
    }
}

fn extract_with(
    directory: PathBuf,
    file: &Path,
    ids: ExternalIdFactory,
    parse: fn(&str, ExternalIdFactory) -> Result<NpmParseResult>,
) -> Extraction {
    let parsed = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))
        .and_then(|content| parse(&content, ids).with_context(|| format!("parsing {}", file.display())));
    match parsed {
        Ok(NpmParseResult { project, graph }) => {
            let mut location = CodeLocation::new(graph, directory);
            if let Some(id) = project {
                location = location.with_external_id(id);
            }
            Extraction::success(location)
        }
        Err(e) => Extraction::exception("Unable to parse npm project files", e),
    }
}

#[derive(Default)]
pub struct NpmPackageLockDetectable;

impl NpmPackageLockDetectable {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Detectable for NpmPackageLockDetectable {
    type Applicable = PathBuf;
    type Extractable = (PathBuf, PathBuf);

    fn info(&self) -> DetectableInfo {
        DetectableInfo {
            name: "NPM Package Lock",
            language: "Node JS",
            forge: Forge::Npmjs,
            requirements: "File: package-lock.json",
        }
    }

    fn applicable(&self, env: &DetectableEnvironment) -> DetectableResult<PathBuf> {
        env.file(PACKAGE_LOCK_JSON)
    }

    fn extractable(&self, env: &DetectableEnvironment, lock: PathBuf) -> DetectableResult<(PathBuf, PathBuf)> {
        Ok((env.directory.clone(), lock))
    }

    async fn extract(&self, env: &ExtractionEnvironment, ready: (PathBuf, PathBuf)) -> Extraction {
        let (directory, lock) = ready;
        extract_with(directory, &lock, env.id_factory, parse_package_lock)
    }
}

#[derive(Default)]
pub struct NpmPackageJsonDetectable;

impl NpmPackageJsonDetectable {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Detectable for NpmPackageJsonDetectable {
    type Applicable = PathBuf;
    type Extractable = (PathBuf, PathBuf);

    fn info(&self) -> DetectableInfo {
        DetectableInfo {
            name: "NPM Package Json",
            language: "Node JS",
            forge: Forge::Npmjs,
            requirements: "File: package.json",
        }
    }

    fn applicable(&self, env: &DetectableEnvironment) -> DetectableResult<PathBuf> {
        env.file(PACKAGE_JSON)
    }

    fn extractable(&self, env: &DetectableEnvironment, manifest: PathBuf) -> DetectableResult<(PathBuf, PathBuf)> {
        Ok((env.directory.clone(), manifest))
    }

    async fn extract(&self, env: &ExtractionEnvironment, ready: (PathBuf, PathBuf)) -> Extraction {
        let (directory, manifest) = ready;
        extract_with(directory, &manifest, env.id_factory, parse_package_json)
    }
}
