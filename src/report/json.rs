use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;

use crate::codelocation::NamedCodeLocation;
use crate::detector::{DetectorEvaluation, PipelineResult};
use crate::graph::Forge;

#[derive(Debug, Serialize)]
pub struct JsonReport<'a> {
    pub root: &'a Path,
    pub directories: usize,
    pub cancelled: bool,
    pub evaluations: Vec<JsonEvaluation<'a>>,
    pub code_locations: Vec<JsonCodeLocation<'a>>,
}

#[derive(Debug, Serialize)]
pub struct JsonEvaluation<'a> {
    #[serde(flatten)]
    pub evaluation: &'a DetectorEvaluation,
    pub language: &'static str,
    pub forge: Forge,
    pub requirements: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JsonCodeLocation<'a> {
    pub name: &'a str,
    pub source_path: &'a Path,
    pub forge: Forge,
    pub dependencies: usize,
    pub file: &'a Path,
}

impl<'a> JsonReport<'a> {
    pub fn new(result: &'a PipelineResult, root: &'a Path, written: &'a [(NamedCodeLocation, PathBuf)]) -> Self {
        Self {
            root,
            directories: result.directories,
            cancelled: result.cancelled,
            evaluations: result
                .evaluations
                .iter()
                .map(|evaluation| JsonEvaluation {
                    evaluation,
                    language: evaluation.info.language,
                    forge: evaluation.info.forge,
                    requirements: evaluation.info.requirements,
                    detail: evaluation
                        .cause
                        .as_ref()
                        .map(|cause| format!("{cause:#}")),
                })
                .collect(),
            code_locations: written
                .iter()
                .map(|(location, file)| JsonCodeLocation {
                    name: &location.name,
                    source_path: &location.source_path,
                    forge: location.forge,
                    dependencies: location.graph.len(),
                    file,
                })
                .collect(),
        }
    }
}

/// Print the report to stdout.
pub fn render(result: &PipelineResult, root: &Path, written: &[(NamedCodeLocation, PathBuf)]) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&JsonReport::new(result, root, written))?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectable::DetectableInfo;
    use crate::detector::{DetectorKind, PhaseOutcome};
    use crate::graph::DependencyGraph;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_report_includes_cause_and_written_files() {
        let info = DetectableInfo {
            name: "Cargo Lock",
            language: "Rust",
            forge: Forge::Crates,
            requirements: "Cargo.lock",
        };
        let result = PipelineResult {
            evaluations: vec![DetectorEvaluation::from_outcome(
                PathBuf::from("/p"),
                0,
                DetectorKind::CargoLock,
                info,
                PhaseOutcome::Failed {
                    reason: "Unable to parse Cargo.lock".to_string(),
                    cause: Some(anyhow::anyhow!("expected `=`")),
                },
            )],
            directories: 1,
            cancelled: false,
        };
        let written = vec![(
            NamedCodeLocation {
                name: "p/crates".to_string(),
                source_path: PathBuf::from("/p"),
                forge: Forge::Crates,
                external_id: None,
                graph: DependencyGraph::new(),
            },
            PathBuf::from("/out/p_crates.json"),
        )];

        let json = serde_json::to_value(JsonReport::new(&result, Path::new("/p"), &written)).unwrap();
        let evaluation = &json["evaluations"][0];
        assert_eq!(evaluation["kind"], "cargo-lock");
        assert_eq!(evaluation["status"], "EXCEPTION");
        assert_eq!(evaluation["language"], "Rust");
        assert_eq!(evaluation["requirements"], "Cargo.lock");
        assert_eq!(evaluation["detail"], "expected `=`");
        assert_eq!(json["code_locations"][0]["file"], "/out/p_crates.json");
        assert_eq!(json["code_locations"][0]["dependencies"], 0);
    }
}
