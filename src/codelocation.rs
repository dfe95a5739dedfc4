//! Turns successful extractions into named code locations and writes them.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use crate::detector::PipelineResult;
use crate::graph::{DependencyGraph, ExternalId, Forge, GraphDocument};

/// A code location after naming. Locations that end up with the same name
/// are merged into one graph.
#[derive(Debug, Clone)]
pub struct NamedCodeLocation {
    pub name: String,
    pub source_path: PathBuf,
    pub forge: Forge,
    pub external_id: Option<ExternalId>,
    pub graph: DependencyGraph,
}

pub struct CodeLocationAssembler {
    root: PathBuf,
    project_name: Option<String>,
    project_version: Option<String>,
}

impl CodeLocationAssembler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            project_name: None,
            project_version: None,
        }
    }

    pub fn with_project(mut self, name: Option<String>, version: Option<String>) -> Self {
        self.project_name = name;
        self.project_version = version;
        self
    }

    /// Name every code location `<project>[/<version>]/<relative path>/<forge>`
    /// and merge those sharing a name. The project name falls back to the
    /// first project id found at the scan root, then to the root's directory
    /// name.
    pub fn assemble(&self, result: &PipelineResult) -> Vec<NamedCodeLocation> {
        let project = self.project_prefix(result);
        let mut named: BTreeMap<String, NamedCodeLocation> = BTreeMap::new();

        for (evaluation, location) in result.code_locations() {
            let forge = evaluation.info.forge;
            let relative = relative_path(&self.root, &location.source_path);
            let name = if relative.is_empty() {
                format!("{project}/{forge}")
            } else {
                format!("{project}/{relative}/{forge}")
            };

            match named.get_mut(&name) {
                Some(existing) => {
                    debug!(name = %name, detector = %evaluation.kind, "Merging into existing code location");
                    existing.graph.merge(&location.graph);
                    if existing.external_id.is_none() {
                        existing.external_id = location.external_id.clone();
                    }
                }
                None => {
                    named.insert(
                        name.clone(),
                        NamedCodeLocation {
                            name,
                            source_path: location.source_path.clone(),
                            forge,
                            external_id: location.external_id.clone(),
                            graph: location.graph.clone(),
                        },
                    );
                }
            }
        }

        named.into_values().collect()
    }

    fn project_prefix(&self, result: &PipelineResult) -> String {
        let discovered = result
            .code_locations()
            .filter(|(_, location)| location.source_path == self.root)
            .find_map(|(_, location)| location.external_id.as_ref());

        let name = self
            .project_name
            .clone()
            .or_else(|| discovered.map(|id| id.name.clone()))
            .or_else(|| {
                self.root
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "project".to_string());
        let version = self
            .project_version
            .clone()
            .or_else(|| discovered.and_then(|id| id.version.clone()));

        match version {
            Some(version) => format!("{name}/{version}"),
            None => name,
        }
    }
}

/// `/` separated path of `path` below `root`; empty for the root itself.
fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Serialize)]
struct CodeLocationDocument<'a> {
    name: &'a str,
    source_path: &'a Path,
    forge: Forge,
    #[serde(skip_serializing_if = "Option::is_none")]
    project: Option<String>,
    #[serde(flatten)]
    graph: GraphDocument,
}

/// Writes each code location to `<directory>/<sanitized name>.json`.
pub struct JsonFileSink {
    directory: PathBuf,
}

impl JsonFileSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Writes every location. Names that sanitize to the same file stem get
    /// a numeric suffix so no location overwrites another.
    pub fn write_all(&self, locations: &[NamedCodeLocation]) -> Result<Vec<PathBuf>> {
        let mut used: HashSet<String> = HashSet::new();
        locations
            .iter()
            .map(|location| {
                let base = file_stem(&location.name);
                let mut stem = base.clone();
                let mut suffix = 1;
                while !used.insert(stem.clone()) {
                    suffix += 1;
                    stem = format!("{base}-{suffix}");
                }
                if stem != base {
                    debug!(name = %location.name, file = %stem, "File name already taken, using suffix");
                }
                self.write_as(location, &stem)
            })
            .collect()
    }

    fn write_as(&self, location: &NamedCodeLocation, stem: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.directory)
            .with_context(|| format!("creating {}", self.directory.display()))?;

        let document = CodeLocationDocument {
            name: &location.name,
            source_path: &location.source_path,
            forge: location.forge,
            project: location.external_id.as_ref().map(ToString::to_string),
            graph: location.graph.to_node_list(),
        };
        let path = self.directory.join(format!("{stem}.json"));
        let content = serde_json::to_string_pretty(&document)?;
        std::fs::write(&path, content).with_context(|| format!("writing {}", path.display()))?;

        info!(name = %location.name, path = %path.display(), nodes = location.graph.len(), "Wrote code location");
        Ok(path)
    }
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectable::{CodeLocation, DetectableInfo};
    use crate::detector::{DetectorEvaluation, DetectorKind, PhaseOutcome};
    use crate::graph::{Dependency, ExternalIdFactory};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn info(forge: Forge) -> DetectableInfo {
        DetectableInfo {
            name: "Test",
            language: "Test",
            forge,
            requirements: "",
        }
    }

    fn extracted(kind: DetectorKind, forge: Forge, locations: Vec<CodeLocation>) -> DetectorEvaluation {
        DetectorEvaluation::from_outcome(
            PathBuf::from("/scan"),
            0,
            kind,
            info(forge),
            PhaseOutcome::Extracted(locations),
        )
    }

    fn graph_of(names: &[&str]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        graph.add_children_to_root(
            names
                .iter()
                .map(|n| Dependency::new(ExternalIdFactory::new().name_version(Forge::Pypi, n, None))),
        );
        graph
    }

    #[test]
    fn test_same_logical_location_is_merged() {
        let result = PipelineResult {
            evaluations: vec![
                extracted(
                    DetectorKind::Setuptools,
                    Forge::Pypi,
                    vec![CodeLocation::new(graph_of(&["a"]), "/scan")],
                ),
                extracted(
                    DetectorKind::PipRequirements,
                    Forge::Pypi,
                    vec![CodeLocation::new(graph_of(&["b"]), "/scan")],
                ),
                extracted(
                    DetectorKind::NpmPackageLock,
                    Forge::Npmjs,
                    vec![CodeLocation::new(graph_of(&["c"]), "/scan/web")],
                ),
            ],
            directories: 2,
            cancelled: false,
        };

        let named = CodeLocationAssembler::new("/scan")
            .with_project(Some("demo".to_string()), Some("1.0".to_string()))
            .assemble(&result);

        let names: Vec<&str> = named.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["demo/1.0/pypi", "demo/1.0/web/npmjs"]);
        assert_eq!(named[0].graph.len(), 2);
    }

    #[test]
    fn test_project_name_from_root_external_id() {
        let project = ExternalIdFactory::new().name_version(Forge::Pypi, "tool", Some("2.1"));
        let result = PipelineResult {
            evaluations: vec![extracted(
                DetectorKind::Setuptools,
                Forge::Pypi,
                vec![CodeLocation::new(graph_of(&[]), "/scan").with_external_id(project)],
            )],
            directories: 1,
            cancelled: false,
        };

        let named = CodeLocationAssembler::new("/scan").assemble(&result);
        assert_eq!(named[0].name, "tool/2.1/pypi");

        let unnamed = PipelineResult::default();
        assert!(CodeLocationAssembler::new("/scan").assemble(&unnamed).is_empty());
    }

    #[test]
    fn test_json_sink_writes_node_list() {
        let out = TempDir::new().unwrap();
        let mut graph = graph_of(&["parent"]);
        let ids = ExternalIdFactory::new();
        graph.add_child_with_parent(
            Dependency::new(ids.name_version(Forge::Pypi, "child", Some("1"))),
            &Dependency::new(ids.name_version(Forge::Pypi, "parent", None)),
        );
        let location = NamedCodeLocation {
            name: "demo/pypi".to_string(),
            source_path: PathBuf::from("/scan"),
            forge: Forge::Pypi,
            external_id: None,
            graph,
        };

        let files = JsonFileSink::new(out.path()).write_all(&[location]).unwrap();
        assert_eq!(files, vec![out.path().join("demo_pypi.json")]);
        let path = &files[0];

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["name"], "demo/pypi");
        assert_eq!(json["roots"], serde_json::json!(["pypi:parent"]));
        assert_eq!(json["nodes"].as_array().unwrap().len(), 2);
        assert!(json.get("project").is_none());
    }

    #[test]
    fn test_sanitized_name_clash_keeps_both_files() {
        let out = TempDir::new().unwrap();
        let location = |name: &str, dependency: &str| NamedCodeLocation {
            name: name.to_string(),
            source_path: PathBuf::from("/scan"),
            forge: Forge::Npmjs,
            external_id: None,
            graph: graph_of(&[dependency]),
        };
        let locations = vec![
            location("demo/a/b/npmjs", "left"),
            location("demo/a_b/npmjs", "right"),
        ];

        let files = JsonFileSink::new(out.path()).write_all(&locations).unwrap();

        assert_eq!(
            files,
            vec![
                out.path().join("demo_a_b_npmjs.json"),
                out.path().join("demo_a_b_npmjs-2.json"),
            ]
        );
        assert!(std::fs::read_to_string(&files[0]).unwrap().contains("pypi:left"));
        assert!(std::fs::read_to_string(&files[1]).unwrap().contains("pypi:right"));
    }
}
