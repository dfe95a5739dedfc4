//! Flat Python inputs: `requirements.txt` and `Pipfile.lock`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::detectable::{
    CodeLocation, Detectable, DetectableEnvironment, DetectableInfo, DetectableResult, Extraction,
    ExtractionEnvironment,
};
use crate::graph::{Dependency, DependencyGraph, ExternalIdFactory, Forge};

use super::setuptools::parse::requirement_name;

pub const REQUIREMENTS_TXT: &str = "requirements.txt";
pub const PIPFILE_LOCK: &str = "Pipfile.lock";

/// Parse `requirements.txt`: `name==version` lines are pinned, any other
/// requirement is kept without a version. Options (`-r`, `-e`, `--hash`)
/// and comments are skipped.
pub fn parse_requirements_txt(content: &str, ids: ExternalIdFactory) -> Result<DependencyGraph> {
    let pinned = Regex::new(r"^([A-Za-z0-9][A-Za-z0-9_\-\.]*)(?:\[[^\]]*\])?\s*===?\s*([^\s;#]+)")?;
    let mut graph = DependencyGraph::new();

    for line in joined_lines(content) {
        let line = strip_comment(&line).trim().to_string();
        if line.is_empty() || line.starts_with('-') {
            continue;
        }
        let id = match pinned.captures(&line) {
            Some(caps) => ids.name_version(Forge::Pypi, &caps[1], Some(&caps[2])),
            None => match requirement_name(&line) {
                Some(name) => ids.name_version(Forge::Pypi, &name, None),
                None => continue,
            },
        };
        graph.add_child_to_root(Dependency::new(id));
    }
    Ok(graph)
}

/// Backslash continuations joined into single logical lines.
fn joined_lines(content: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for line in content.lines() {
        match line.strip_suffix('\\') {
            Some(head) => {
                current.push_str(head);
                current.push(' ');
            }
            None => {
                current.push_str(line);
                lines.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Comments start at `#` preceded by whitespace or at the line start.
fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find(" #") {
        Some(index) => &line[..index],
        None => line,
    }
}

#[derive(Debug, Deserialize)]
struct PipfileLock {
    #[serde(default)]
    default: BTreeMap<String, PipfileLockEntry>,
}

#[derive(Debug, Deserialize)]
struct PipfileLockEntry {
    version: Option<String>,
}

/// `default` section of `Pipfile.lock`; `develop` is not part of the
/// shipped dependency set.
pub fn parse_pipfile_lock(content: &str, ids: ExternalIdFactory) -> Result<DependencyGraph> {
    let lock: PipfileLock = serde_json::from_str(content)?;
    let mut graph = DependencyGraph::new();
    graph.add_children_to_root(lock.default.iter().map(|(name, entry)| {
        let version = entry
            .version
            .as_deref()
            .map(|v| v.trim_start_matches("=="));
        Dependency::new(ids.name_version(Forge::Pypi, name, version))
    }));
    Ok(graph)
}

async fn extract_file(
    directory: PathBuf,
    file: &Path,
    ids: ExternalIdFactory,
    parse: fn(&str, ExternalIdFactory) -> Result<DependencyGraph>,
) -> Extraction {
    let graph = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))
        .and_then(|content| parse(&content, ids).with_context(|| format!("parsing {}", file.display())));
    match graph {
        Ok(graph) => Extraction::success(CodeLocation::new(graph, directory)),
        Err(e) => Extraction::exception("Unable to parse pip dependency file", e),
    }
}

#[derive(Default)]
pub struct PipRequirementsDetectable;

impl PipRequirementsDetectable {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Detectable for PipRequirementsDetectable {
    type Applicable = PathBuf;
    type Extractable = (PathBuf, PathBuf);

    fn info(&self) -> DetectableInfo {
        DetectableInfo {
            name: "Pip Requirements File Parse",
            language: "Python",
            forge: Forge::Pypi,
            requirements: "File: requirements.txt",
        }
    }

    fn applicable(&self, env: &DetectableEnvironment) -> DetectableResult<PathBuf> {
        env.file(REQUIREMENTS_TXT)
    }

    fn extractable(&self, env: &DetectableEnvironment, file: PathBuf) -> DetectableResult<(PathBuf, PathBuf)> {
        Ok((env.directory.clone(), file))
    }

    async fn extract(&self, env: &ExtractionEnvironment, ready: (PathBuf, PathBuf)) -> Extraction {
        let (directory, file) = ready;
        extract_file(directory, &file, env.id_factory, parse_requirements_txt).await
    }
}

#[derive(Default)]
pub struct PipfileLockDetectable;

impl PipfileLockDetectable {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Detectable for PipfileLockDetectable {
    type Applicable = PathBuf;
    type Extractable = (PathBuf, PathBuf);

    fn info(&self) -> DetectableInfo {
        DetectableInfo {
            name: "Pipfile Lock",
            language: "Python",
            forge: Forge::Pypi,
            requirements: "File: Pipfile.lock",
        }
    }

    fn applicable(&self, env: &DetectableEnvironment) -> DetectableResult<PathBuf> {
        env.file(PIPFILE_LOCK)
    }

    fn extractable(&self, env: &DetectableEnvironment, file: PathBuf) -> DetectableResult<(PathBuf, PathBuf)> {
        Ok((env.directory.clone(), file))
    }

    async fn extract(&self, env: &ExtractionEnvironment, ready: (PathBuf, PathBuf)) -> Extraction {
        let (directory, file) = ready;
        extract_file(directory, &file, env.id_factory, parse_pipfile_lock).await
    }
}
