use std::path::PathBuf;

use serde::Serialize;

use crate::detectable::{CodeLocation, DetectableFailure, DetectableInfo, StatusCode};

use super::registry::DetectorKind;

/// What running the phases of one detector in one directory produced.
#[derive(Debug)]
pub enum PhaseOutcome {
    NotApplicable(DetectableFailure),
    NotExtractable(DetectableFailure),
    Extracted(Vec<CodeLocation>),
    Failed {
        reason: String,
        cause: Option<anyhow::Error>,
    },
}

/// The furthest phase a detector reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationPhase {
    /// Never run: excluded, yielded, not nestable or cancelled.
    Skipped,
    Applicable,
    Extractable,
    Extraction,
}

/// Terminal record for one (directory, detector) pair.
#[derive(Debug, Serialize)]
pub struct DetectorEvaluation {
    pub directory: PathBuf,
    pub depth: usize,
    pub kind: DetectorKind,
    pub detector: &'static str,
    #[serde(skip)]
    pub info: DetectableInfo,
    pub phase: EvaluationPhase,
    pub status: StatusCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip)]
    pub code_locations: Vec<CodeLocation>,
    #[serde(skip)]
    pub cause: Option<anyhow::Error>,
}

impl DetectorEvaluation {
    fn new(directory: PathBuf, depth: usize, kind: DetectorKind, info: DetectableInfo) -> Self {
        Self {
            directory,
            depth,
            kind,
            detector: info.name,
            info,
            phase: EvaluationPhase::Skipped,
            status: StatusCode::Passed,
            reason: None,
            code_locations: Vec::new(),
            cause: None,
        }
    }

    pub fn skipped(
        directory: PathBuf,
        depth: usize,
        kind: DetectorKind,
        info: DetectableInfo,
        failure: DetectableFailure,
    ) -> Self {
        Self {
            status: failure.code,
            reason: Some(failure.reason),
            ..Self::new(directory, depth, kind, info)
        }
    }

    pub fn from_outcome(
        directory: PathBuf,
        depth: usize,
        kind: DetectorKind,
        info: DetectableInfo,
        outcome: PhaseOutcome,
    ) -> Self {
        let evaluation = Self::new(directory, depth, kind, info);
        match outcome {
            PhaseOutcome::NotApplicable(failure) => Self {
                phase: EvaluationPhase::Applicable,
                status: failure.code,
                reason: Some(failure.reason),
                ..evaluation
            },
            PhaseOutcome::NotExtractable(failure) => Self {
                phase: EvaluationPhase::Extractable,
                status: failure.code,
                reason: Some(failure.reason),
                ..evaluation
            },
            PhaseOutcome::Extracted(code_locations) => Self {
                phase: EvaluationPhase::Extraction,
                code_locations,
                ..evaluation
            },
            PhaseOutcome::Failed { reason, cause } => Self {
                phase: EvaluationPhase::Extraction,
                // an attached error means extraction was aborted, not just unproductive
                status: if cause.is_some() {
                    StatusCode::Exception
                } else {
                    StatusCode::ExtractionFailed
                },
                reason: Some(reason),
                cause,
                ..evaluation
            },
        }
    }

    pub fn applicable(&self) -> bool {
        matches!(
            self.phase,
            EvaluationPhase::Extractable | EvaluationPhase::Extraction
        )
    }

    pub fn extracted(&self) -> bool {
        self.phase == EvaluationPhase::Extraction && self.status == StatusCode::Passed
    }

    pub fn failed(&self) -> bool {
        self.phase == EvaluationPhase::Extraction && self.status != StatusCode::Passed
    }

    /// Reason plus the underlying error chain, for logs and reports.
    pub fn describe_failure(&self) -> Option<String> {
        let reason = self.reason.as_deref()?;
        Some(match &self.cause {
            Some(cause) => format!("{reason}: {cause:#}"),
            None => reason.to_string(),
        })
    }
}
