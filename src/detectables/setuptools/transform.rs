use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::detectable::ExtractionEnvironment;
use crate::executable::{Executable, ExecutableRunnerError};
use crate::graph::{Dependency, DependencyGraph, Forge};

use super::parse::{normalize_name, SetupToolsParsedResult};

/// How transitive dependencies are discovered, chosen once in `extractable`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipResolution {
    /// Walk `pip show` output starting from each direct dependency.
    WithTool(PathBuf),
    /// No resolver available: direct dependencies only, without versions.
    ManifestOnly,
}

/// The `Version` and `Requires` fields of `pip show` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipShow {
    pub version: Option<String>,
    pub requires: Vec<String>,
}

/// Parse `key: value` lines, keeping only `Version` and `Requires`.
/// Lines without the separator are ignored.
pub fn parse_pip_show(output: &str) -> PipShow {
    let mut show = PipShow::default();
    for line in output.lines() {
        let Some((key, value)) = line.split_once(": ") else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "Version" if !value.is_empty() => show.version = Some(value.to_string()),
            "Requires" => {
                show.requires = value
                    .split(", ")
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => {}
        }
    }
    show
}

pub struct SetupToolsGraphTransformer<'a> {
    source_directory: &'a Path,
}

impl<'a> SetupToolsGraphTransformer<'a> {
    pub fn new(source_directory: &'a Path) -> Self {
        Self { source_directory }
    }

    pub async fn transform(
        &self,
        env: &ExtractionEnvironment,
        resolution: &PipResolution,
        parsed: &SetupToolsParsedResult,
    ) -> Result<DependencyGraph, ExecutableRunnerError> {
        match resolution {
            PipResolution::WithTool(pip) => self.resolve_with_pip(env, pip, parsed).await,
            PipResolution::ManifestOnly => Ok(manifest_only(env, parsed)),
        }
    }

    /// Depth-first walk over `Requires` with an explicit stack. Each package
    /// is shown once; meeting it again only adds the edge, which keeps
    /// dependency cycles finite.
    async fn resolve_with_pip(
        &self,
        env: &ExtractionEnvironment,
        pip: &Path,
        parsed: &SetupToolsParsedResult,
    ) -> Result<DependencyGraph, ExecutableRunnerError> {
        let mut graph = DependencyGraph::new();
        let mut resolved: HashMap<String, Dependency> = HashMap::new();
        let mut stack: Vec<(String, Option<Dependency>)> = parsed
            .direct_dependencies
            .iter()
            .rev()
            .map(|name| (name.clone(), None))
            .collect();

        while let Some((name, parent)) = stack.pop() {
            let key = normalize_name(&name);
            let (dependency, requires) = match resolved.get(&key) {
                Some(known) => (known.clone(), Vec::new()),
                None => {
                    let show = self.pip_show(env, pip, &name).await?;
                    let id = env
                        .id_factory
                        .name_version(Forge::Pypi, &name, show.version.as_deref());
                    let dependency = Dependency::new(id);
                    resolved.insert(key, dependency.clone());
                    (dependency, show.requires)
                }
            };

            match &parent {
                None => graph.add_child_to_root(dependency.clone()),
                Some(parent) => graph.add_child_with_parent(dependency.clone(), parent),
            }

            for required in requires.into_iter().rev() {
                stack.push((required, Some(dependency.clone())));
            }
        }

        Ok(graph)
    }

    async fn pip_show(
        &self,
        env: &ExtractionEnvironment,
        pip: &Path,
        name: &str,
    ) -> Result<PipShow, ExecutableRunnerError> {
        let exe = Executable::new(self.source_directory, pip, ["show", name])
            .with_env("PIP_DISABLE_PIP_VERSION_CHECK", "1");
        let output = env.runner.execute(&exe).await?;
        if !output.success() {
            debug!(package = name, exit_code = ?output.exit_code, "pip show found no installed package");
        }
        Ok(parse_pip_show(&output.stdout))
    }
}

fn manifest_only(env: &ExtractionEnvironment, parsed: &SetupToolsParsedResult) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    graph.add_children_to_root(
        parsed
            .direct_dependencies
            .iter()
            .map(|name| Dependency::new(env.id_factory.name_version(Forge::Pypi, name, None))),
    );
    graph
}
