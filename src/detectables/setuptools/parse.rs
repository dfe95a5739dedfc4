use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

/// Project metadata and direct requirements gathered from setuptools
/// manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupToolsParsedResult {
    pub project_name: Option<String>,
    pub project_version: Option<String>,
    /// Requirement names in declaration order, deduplicated.
    pub direct_dependencies: Vec<String>,
}

impl SetupToolsParsedResult {
    fn add_requirements<'a>(&mut self, specs: impl IntoIterator<Item = &'a str>) {
        let mut seen: HashSet<String> = self
            .direct_dependencies
            .iter()
            .map(|d| normalize_name(d))
            .collect();
        for spec in specs {
            if let Some(name) = requirement_name(spec) {
                if seen.insert(normalize_name(&name)) {
                    self.direct_dependencies.push(name);
                }
            }
        }
    }
}

/// Parse whichever of `pyproject.toml`, `setup.cfg` and `setup.py` exist.
/// Earlier files take precedence for project metadata.
pub fn parse_manifests(
    pyproject: Option<&Path>,
    setup_cfg: Option<&Path>,
    setup_py: Option<&Path>,
) -> Result<SetupToolsParsedResult> {
    let mut result = SetupToolsParsedResult::default();

    if let Some(path) = pyproject {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        parse_pyproject_toml(&content, &mut result)
            .with_context(|| format!("parsing {}", path.display()))?;
    }
    if let Some(path) = setup_cfg {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        parse_setup_cfg(&content, &mut result);
    }
    if let Some(path) = setup_py {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        parse_setup_py(&content, &mut result)
            .with_context(|| format!("parsing {}", path.display()))?;
    }

    Ok(result)
}

#[derive(Debug, Deserialize)]
struct Pyproject {
    project: Option<PyprojectProject>,
}

#[derive(Debug, Deserialize)]
struct PyprojectProject {
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    dependencies: Vec<String>,
}

fn parse_pyproject_toml(content: &str, result: &mut SetupToolsParsedResult) -> Result<()> {
    let pyproject: Pyproject = toml::from_str(content)?;
    if let Some(project) = pyproject.project {
        result.project_name = result.project_name.take().or(project.name);
        result.project_version = result.project_version.take().or(project.version);
        result.add_requirements(project.dependencies.iter().map(String::as_str));
    }
    Ok(())
}

/// `[metadata] name/version` and `[options] install_requires`, including
/// indented continuation lines.
fn parse_setup_cfg(content: &str, result: &mut SetupToolsParsedResult) {
    let mut section = String::new();
    let mut in_requires = false;
    let mut requires: Vec<String> = Vec::new();

    for raw in content.lines() {
        let line = raw.trim();
        if line.starts_with('[') && line.ends_with(']') {
            section = line[1..line.len() - 1].trim().to_string();
            in_requires = false;
            continue;
        }
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        let continuation = raw.starts_with(' ') || raw.starts_with('\t');
        if continuation && in_requires {
            requires.push(line.to_string());
            continue;
        }
        in_requires = false;

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let (key, value) = (key.trim(), value.trim());
        match (section.as_str(), key) {
            ("metadata", "name") if result.project_name.is_none() => {
                result.project_name = Some(value.to_string());
            }
            ("metadata", "version") if result.project_version.is_none() => {
                result.project_version = Some(value.to_string());
            }
            ("options", "install_requires") => {
                in_requires = true;
                if !value.is_empty() {
                    requires.push(value.to_string());
                }
            }
            _ => {}
        }
    }

    result.add_requirements(requires.iter().map(String::as_str));
}

fn parse_setup_py(content: &str, result: &mut SetupToolsParsedResult) -> Result<()> {
    let install_requires = Regex::new(r"(?s)install_requires\s*=\s*\[(.*?)\]")?;
    let quoted = Regex::new(r#"["']([^"']+)["']"#)?;
    let keyword = Regex::new(r#"\b(name|version)\s*=\s*["']([^"']+)["']"#)?;

    for caps in keyword.captures_iter(content) {
        let value = caps[2].to_string();
        match &caps[1] {
            "name" if result.project_name.is_none() => result.project_name = Some(value),
            "version" if result.project_version.is_none() => result.project_version = Some(value),
            _ => {}
        }
    }

    if let Some(block) = install_requires.captures(content) {
        let specs: Vec<String> = quoted
            .captures_iter(&block[1])
            .map(|c| c[1].to_string())
            .collect();
        result.add_requirements(specs.iter().map(String::as_str));
    }
    Ok(())
}

/// Name portion of a PEP 508 requirement, e.g. `requests` from
/// `requests[socks]>=2.0; python_version > "3.7"`.
pub fn requirement_name(spec: &str) -> Option<String> {
    let spec = spec.trim();
    if !spec.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return None;
    }
    let name: String = spec
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    Some(name)
}

/// PEP 503 normalization: case-insensitive, `_` `.` `-` runs are equal.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_dash {
                out.push('-');
            }
            last_dash = true;
        } else {
            out.extend(c.to_lowercase());
            last_dash = false;
        }
    }
    out
}
