//! Maven projects parsed straight from `pom.xml`, without running `mvn`.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::detectable::{
    CodeLocation, Detectable, DetectableEnvironment, DetectableInfo, DetectableResult, Extraction,
    ExtractionEnvironment,
};
use crate::graph::{Dependency, DependencyGraph, ExternalId, ExternalIdFactory, Forge};

pub const POM_XML: &str = "pom.xml";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Coordinates {
    group_id: String,
    artifact_id: String,
    version: String,
    scope: String,
}

pub struct PomResult {
    pub project: Option<ExternalId>,
    pub graph: DependencyGraph,
}

/// Parse `pom.xml` with the quick-xml event API. Only the project's own
/// `<dependencies>` count: `dependencyManagement`, plugin dependencies and
/// profiles are ignored, as are `test` scoped entries. `${...}` references
/// are substituted from `<properties>` and the project coordinates.
pub fn parse_pom_xml(content: &str, ids: ExternalIdFactory) -> Result<PomResult> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut pom = PomState::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                path.push(String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned());
                pom.start(&path);
            }
            Event::End(_) => {
                pom.end(&path);
                path.pop();
            }
            Event::Text(e) => {
                let text = e.unescape()?.into_owned();
                pom.text(&path, text);
            }
            // `<version/>` and friends: an element with no text
            Event::Empty(e) => {
                path.push(String::from_utf8_lossy(e.name().local_name().as_ref()).into_owned());
                pom.start(&path);
                pom.text(&path, String::new());
                pom.end(&path);
                path.pop();
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let PomState {
        mut project,
        parent,
        mut properties,
        dependencies,
        ..
    } = pom;

    if project.group_id.is_empty() {
        project.group_id = parent.group_id.clone();
    }
    if project.version.is_empty() {
        project.version = parent.version.clone();
    }
    project.group_id = interpolate(&project.group_id, &properties);
    project.version = interpolate(&project.version, &properties);
    properties.insert("project.groupId".to_string(), project.group_id.clone());
    properties.insert("project.artifactId".to_string(), project.artifact_id.clone());
    properties.insert("project.version".to_string(), project.version.clone());

    let mut graph = DependencyGraph::new();
    for dependency in dependencies {
        if dependency.scope == "test" {
            continue;
        }
        let version = interpolate(&dependency.version, &properties);
        let id = ids.maven(
            &interpolate(&dependency.group_id, &properties),
            &interpolate(&dependency.artifact_id, &properties),
            Some(&version),
        );
        graph.add_child_to_root(Dependency::new(id));
    }

    let project = (!project.artifact_id.is_empty())
        .then(|| ids.maven(&project.group_id, &project.artifact_id, Some(&project.version)));
    Ok(PomResult { project, graph })
}

/// What has been read so far while walking the pom's elements.
#[derive(Default)]
struct PomState {
    project: Coordinates,
    parent: Coordinates,
    properties: HashMap<String, String>,
    dependencies: Vec<Coordinates>,
    current: Coordinates,
}

impl PomState {
    fn start(&mut self, path: &[String]) {
        if is_direct_dependency(path) {
            self.current = Coordinates::default();
        }
    }

    fn end(&mut self, path: &[String]) {
        if is_direct_dependency(path) && !self.current.artifact_id.is_empty() {
            self.dependencies.push(std::mem::take(&mut self.current));
        }
    }

    fn text(&mut self, path: &[String], text: String) {
        let segments: Vec<&str> = path.iter().map(String::as_str).collect();
        match segments.as_slice() {
            ["project", "dependencies", "dependency", field] => set_field(&mut self.current, field, text),
            ["project", "parent", field] => set_field(&mut self.parent, field, text),
            ["project", "properties", key] => {
                self.properties.insert(key.to_string(), text);
            }
            ["project", field] => set_field(&mut self.project, field, text),
            _ => {}
        }
    }
}

fn is_direct_dependency(path: &[String]) -> bool {
    path.len() == 3 && path[0] == "project" && path[1] == "dependencies" && path[2] == "dependency"
}

fn set_field(target: &mut Coordinates, field: &str, value: String) {
    match field {
        "groupId" => target.group_id = value,
        "artifactId" => target.artifact_id = value,
        "version" => target.version = value,
        "scope" => target.scope = value,
        _ => {}
    }
}

/// Replace `${name}` with known properties; unknown references stay as is.
fn interpolate(value: &str, properties: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match properties.get(key) {
                    Some(resolved) => out.push_str(resolved),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Default)]
pub struct MavenPomDetectable;

impl MavenPomDetectable {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Detectable for MavenPomDetectable {
    type Applicable = PathBuf;
    type Extractable = (PathBuf, PathBuf);

    fn info(&self) -> DetectableInfo {
        DetectableInfo {
            name: "Maven Pom Parse",
            language: "Java",
            forge: Forge::Maven,
            requirements: "File: pom.xml",
        }
    }

    fn applicable(&self, env: &DetectableEnvironment) -> DetectableResult<PathBuf> {
        env.file(POM_XML)
    }

    fn extractable(&self, env: &DetectableEnvironment, pom: PathBuf) -> DetectableResult<(PathBuf, PathBuf)> {
        Ok((env.directory.clone(), pom))
    }

    async fn extract(&self, env: &ExtractionEnvironment, ready: (PathBuf, PathBuf)) -> Extraction {
        let (directory, pom) = ready;
        let parsed = std::fs::read_to_string(&pom)
            .with_context(|| format!("reading {}", pom.display()))
            .and_then(|content| {
                parse_pom_xml(&content, env.id_factory).with_context(|| format!("parsing {}", pom.display()))
            });
        match parsed {
            Ok(PomResult { project, graph }) => {
                let mut location = CodeLocation::new(graph, directory);
                if let Some(id) = project {
                    location = location.with_external_id(id);
                }
                Extraction::success(location)
            }
            Err(e) => Extraction::exception("Unable to parse pom.xml", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_pom_xml() {
        let xml = r#"<?xml version="1.0"?>
<project>
  <parent>
    <groupId>com.example</groupId>
    <artifactId>parent</artifactId>
    <version>2.0.0</version>
  </parent>
  <artifactId>app</artifactId>
  <properties>
    <commons.version>3.12.0</commons.version>
  </properties>
  <dependencyManagement>
    <dependencies>
      <dependency>
        <groupId>org.managed</groupId>
        <artifactId>managed</artifactId>
        <version>1.0</version>
      </dependency>
    </dependencies>
  </dependencyManagement>
  <dependencies>
    <dependency>
      <groupId>org.apache.commons</groupId>
      <artifactId>commons-lang3</artifactId>
      <version>${commons.version}</version>
    </dependency>
    <dependency>
      <groupId>com.example</groupId>
      <artifactId>sibling</artifactId>
      <version>${project.version}</version>
    </dependency>
    <dependency>
      <groupId>junit</groupId>
      <artifactId>junit</artifactId>
      <version>4.13.2</version>
      <scope>test</scope>
    </dependency>
  </dependencies>
  <build>
    <plugins>
      <plugin>
        <dependencies>
          <dependency>
            <groupId>org.plugin</groupId>
            <artifactId>plugin-dep</artifactId>
          </dependency>
        </dependencies>
      </plugin>
    </plugins>
  </build>
</project>"#;

        let parsed = parse_pom_xml(xml, ExternalIdFactory::new()).unwrap();
        let roots: Vec<String> = parsed
            .graph
            .root_dependencies()
            .iter()
            .map(|d| d.external_id.to_string())
            .collect();
        assert_eq!(
            roots,
            vec![
                "maven:com.example:sibling:2.0.0",
                "maven:org.apache.commons:commons-lang3:3.12.0",
            ]
        );
        assert_eq!(
            parsed.project.map(|p| p.to_string()).as_deref(),
            Some("maven:com.example:app:2.0.0")
        );
    }

    #[test]
    fn test_interpolate() {
        let properties = HashMap::from([("a".to_string(), "1".to_string())]);
        assert_eq!(interpolate("${a}.${b}", &properties), "1.${b}");
        assert_eq!(interpolate("x${", &properties), "x${");
    }

    #[test]
    fn test_project_version_property_and_empty_elements() {
        let xml = r#"<project>
  <groupId>org.demo</groupId>
  <artifactId>app</artifactId>
  <version>${revision}</version>
  <properties>
    <revision>1.4.0</revision>
    <classifier/>
  </properties>
  <dependencies>
    <dependency/>
    <dependency>
      <groupId>org.demo</groupId>
      <artifactId>core</artifactId>
      <version>${project.version}</version>
    </dependency>
    <dependency>
      <groupId>org.demo</groupId>
      <artifactId>tools${classifier}</artifactId>
      <version/>
    </dependency>
  </dependencies>
</project>"#;

        let parsed = parse_pom_xml(xml, ExternalIdFactory::new()).unwrap();
        let roots: Vec<String> = parsed
            .graph
            .root_dependencies()
            .iter()
            .map(|d| d.external_id.to_string())
            .collect();
        assert_eq!(roots, vec!["maven:org.demo:core:1.4.0", "maven:org.demo:tools"]);
        assert_eq!(
            parsed.project.map(|p| p.to_string()).as_deref(),
            Some("maven:org.demo:app:1.4.0")
        );
    }

    #[test]
    fn test_malformed_xml_is_an_error() {
        assert!(parse_pom_xml("<project><dependencies></project>", ExternalIdFactory::new()).is_err());
    }
}
