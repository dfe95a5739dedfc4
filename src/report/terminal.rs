use std::path::{Path, PathBuf};

use anyhow::Result;
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use crate::codelocation::NamedCodeLocation;
use crate::detectable::StatusCode;
use crate::detector::{DetectorEvaluation, EvaluationPhase, PipelineResult};

/// Evaluation counts shown in the summary box.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub directories: usize,
    pub applicable: usize,
    pub extracted: usize,
    pub not_extractable: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Summary {
    pub fn of(result: &PipelineResult) -> Self {
        let mut summary = Summary {
            directories: result.directories,
            ..Default::default()
        };
        for evaluation in &result.evaluations {
            if evaluation.applicable() {
                summary.applicable += 1;
            }
            if evaluation.extracted() {
                summary.extracted += 1;
            } else if evaluation.failed() {
                summary.failed += 1;
            } else if evaluation.phase == EvaluationPhase::Extractable {
                summary.not_extractable += 1;
            } else if evaluation.phase == EvaluationPhase::Skipped {
                summary.skipped += 1;
            }
        }
        summary
    }
}

/// Render a colored terminal report.
pub fn render(
    result: &PipelineResult,
    root: &Path,
    written: &[(NamedCodeLocation, PathBuf)],
    verbose: bool,
    quiet: bool,
) -> Result<()> {
    let summary = Summary::of(result);

    if quiet {
        println!(
            "Directories: {}  Extracted: {}  Not extractable: {}  Failed: {}",
            summary.directories,
            summary.extracted.to_string().green(),
            summary.not_extractable.to_string().yellow(),
            summary.failed.to_string().red(),
        );
        return Ok(());
    }

    println!("\n {} v{}", "detectr".bold(), env!("CARGO_PKG_VERSION"));
    println!(" Scanned: {}\n", root.display());

    println!(" ┌────────────────────────────────────────────────────┐");
    println!(" │  {:<48} │", "SUMMARY".bold());
    println!(" │  {:<48} │", format!("Directories searched : {}", summary.directories));
    println!(" │  {:<48} │", format!("Applicable detectors : {}", summary.applicable));
    println!(
        " │  {:<48} │",
        format!("{}  Extracted         : {:>4}", "✓".green(), summary.extracted)
    );
    println!(
        " │  {:<48} │",
        format!("{}  Not extractable   : {:>4}", "⚠".yellow(), summary.not_extractable)
    );
    println!(
        " │  {:<48} │",
        format!("{}  Failed            : {:>4}", "✗".red(), summary.failed)
    );
    println!(" └────────────────────────────────────────────────────┘\n");

    if result.cancelled {
        println!(" {} The scan was cancelled; results are partial.\n", "[CANCELLED]".yellow().bold());
    }

    let shown: Vec<&DetectorEvaluation> = result
        .evaluations
        .iter()
        .filter(|e| verbose || e.applicable())
        .collect();
    if shown.is_empty() {
        println!(" No applicable detectors found in {}\n", root.display());
    } else {
        println!(" {} Detector results:\n", "[DETECTORS]".cyan().bold());
        println!("{}\n", evaluation_table(&shown, root));
    }

    if !written.is_empty() {
        println!(" {} Code locations written:\n", "[OUTPUT]".green().bold());
        for (location, path) in written {
            println!(
                "  {} {} ({} dependencies) → {}",
                "→".cyan(),
                location.name,
                location.graph.len(),
                path.display()
            );
        }
        println!();
    }

    Ok(())
}

fn evaluation_table(evaluations: &[&DetectorEvaluation], root: &Path) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Directory").add_attribute(Attribute::Bold),
            Cell::new("Detector").add_attribute(Attribute::Bold),
            Cell::new("Language").add_attribute(Attribute::Bold),
            Cell::new("Status").add_attribute(Attribute::Bold),
            Cell::new("Reason").add_attribute(Attribute::Bold),
        ]);

    for evaluation in evaluations {
        let directory = match evaluation.directory.strip_prefix(root) {
            Ok(relative) if relative.as_os_str().is_empty() => ".".to_string(),
            Ok(relative) => relative.display().to_string(),
            Err(_) => evaluation.directory.display().to_string(),
        };
        let (status, color) = status_cell(evaluation);

        table.add_row(vec![
            Cell::new(directory),
            Cell::new(evaluation.detector),
            Cell::new(evaluation.info.language),
            Cell::new(status).fg(color).set_alignment(CellAlignment::Center),
            Cell::new(evaluation.describe_failure().unwrap_or_default()),
        ]);
    }
    table
}

fn status_cell(evaluation: &DetectorEvaluation) -> (String, Color) {
    if evaluation.extracted() {
        let count = evaluation.code_locations.len();
        return (format!("✓ {count} location(s)"), Color::Green);
    }
    if evaluation.failed() {
        return (format!("✗ {}", evaluation.status), Color::Red);
    }
    let color = match (evaluation.phase, evaluation.status) {
        (EvaluationPhase::Extractable, _) => Color::Yellow,
        (_, StatusCode::Yielded | StatusCode::NotNestable) => Color::Cyan,
        _ => Color::DarkGrey,
    };
    (evaluation.status.to_string(), color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectable::{DetectableFailure, DetectableInfo};
    use crate::detector::{DetectorKind, PhaseOutcome};
    use crate::graph::Forge;
    use pretty_assertions::assert_eq;

    fn info() -> DetectableInfo {
        DetectableInfo {
            name: "Test",
            language: "Test",
            forge: Forge::Npmjs,
            requirements: "",
        }
    }

    fn evaluation(outcome: PhaseOutcome) -> DetectorEvaluation {
        DetectorEvaluation::from_outcome(PathBuf::from("/p"), 0, DetectorKind::NpmPackageLock, info(), outcome)
    }

    #[test]
    fn test_summary_counts_each_outcome_once() {
        let result = PipelineResult {
            evaluations: vec![
                evaluation(PhaseOutcome::Extracted(Vec::new())),
                evaluation(PhaseOutcome::NotApplicable(DetectableFailure::file_not_found("package.json"))),
                evaluation(PhaseOutcome::NotExtractable(DetectableFailure::executable_not_found("npm"))),
                evaluation(PhaseOutcome::Failed {
                    reason: "bad".to_string(),
                    cause: None,
                }),
                DetectorEvaluation::skipped(
                    PathBuf::from("/p"),
                    0,
                    DetectorKind::NpmPackageJson,
                    info(),
                    DetectableFailure::new(StatusCode::Yielded, "Yielded"),
                ),
            ],
            directories: 1,
            cancelled: false,
        };

        assert_eq!(
            Summary::of(&result),
            Summary {
                directories: 1,
                applicable: 3,
                extracted: 1,
                not_extractable: 1,
                failed: 1,
                skipped: 1,
            }
        );
    }

    #[test]
    fn test_table_shows_relative_directory_and_reason() {
        let failed = evaluation(PhaseOutcome::Failed {
            reason: "Unable to parse".to_string(),
            cause: Some(anyhow::anyhow!("unexpected token")),
        });
        let rendered = evaluation_table(&[&failed], Path::new("/p")).to_string();

        assert!(rendered.contains("Unable to parse: unexpected token"));
        assert!(rendered.contains("exception"));
        assert!(rendered.contains(" . "));
    }
}
