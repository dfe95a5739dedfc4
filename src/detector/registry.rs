//! Every detector the scan knows about, and the rules that order them.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detectable::{
    Detectable, DetectableEnvironment, DetectableInfo, Extraction, ExtractionEnvironment,
};
use crate::detectables::cargo::{CargoLockDetectable, CargoTomlDetectable};
use crate::detectables::clang::ClangDetectable;
use crate::detectables::maven::MavenPomDetectable;
use crate::detectables::npm::{NpmPackageJsonDetectable, NpmPackageLockDetectable};
use crate::detectables::pip::{PipRequirementsDetectable, PipfileLockDetectable};
use crate::detectables::setuptools::SetupToolsDetectable;
use crate::detectables::swift::SwiftPackageResolvedDetectable;
use crate::detectables::xcode::XcodeProjectDetectable;

use super::evaluation::PhaseOutcome;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    Clang,
    Xcode,
    SwiftPackageResolved,
    NpmPackageLock,
    NpmPackageJson,
    CargoLock,
    CargoToml,
    MavenPom,
    Setuptools,
    PipfileLock,
    PipRequirements,
}

/// Kinds that read the same ecosystem. Nesting is decided per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorGroup {
    Clang,
    Swift,
    Npm,
    Cargo,
    Maven,
    Python,
}

/// Evaluation order within a directory. A kind always comes after every
/// kind that supersedes it.
pub const PRECEDENCE: &[DetectorKind] = &[
    DetectorKind::Clang,
    DetectorKind::Xcode,
    DetectorKind::SwiftPackageResolved,
    DetectorKind::NpmPackageLock,
    DetectorKind::NpmPackageJson,
    DetectorKind::CargoLock,
    DetectorKind::CargoToml,
    DetectorKind::MavenPom,
    DetectorKind::Setuptools,
    DetectorKind::PipfileLock,
    DetectorKind::PipRequirements,
];

impl DetectorKind {
    pub fn name(&self) -> &'static str {
        match self {
            DetectorKind::Clang => "clang",
            DetectorKind::Xcode => "xcode",
            DetectorKind::SwiftPackageResolved => "swift-package-resolved",
            DetectorKind::NpmPackageLock => "npm-package-lock",
            DetectorKind::NpmPackageJson => "npm-package-json",
            DetectorKind::CargoLock => "cargo-lock",
            DetectorKind::CargoToml => "cargo-toml",
            DetectorKind::MavenPom => "maven-pom",
            DetectorKind::Setuptools => "setuptools",
            DetectorKind::PipfileLock => "pipfile-lock",
            DetectorKind::PipRequirements => "pip-requirements",
        }
    }

    pub fn group(&self) -> DetectorGroup {
        match self {
            DetectorKind::Clang => DetectorGroup::Clang,
            DetectorKind::Xcode | DetectorKind::SwiftPackageResolved => DetectorGroup::Swift,
            DetectorKind::NpmPackageLock | DetectorKind::NpmPackageJson => DetectorGroup::Npm,
            DetectorKind::CargoLock | DetectorKind::CargoToml => DetectorGroup::Cargo,
            DetectorKind::MavenPom => DetectorGroup::Maven,
            DetectorKind::Setuptools | DetectorKind::PipfileLock | DetectorKind::PipRequirements => {
                DetectorGroup::Python
            }
        }
    }

    /// Whether the kind may still run beneath a directory where its group
    /// already extracted. Build-system inputs that describe a whole tree
    /// are not.
    pub fn nestable(&self) -> bool {
        !matches!(
            self,
            DetectorKind::Clang | DetectorKind::Setuptools | DetectorKind::CargoToml
        )
    }

    /// Kinds skipped in the same directory once this kind extracts.
    pub fn supersedes(&self) -> &'static [DetectorKind] {
        match self {
            DetectorKind::NpmPackageLock => &[DetectorKind::NpmPackageJson],
            DetectorKind::CargoLock => &[DetectorKind::CargoToml],
            DetectorKind::PipfileLock => &[DetectorKind::PipRequirements],
            _ => &[],
        }
    }

    pub fn precedence(&self) -> usize {
        PRECEDENCE
            .iter()
            .position(|kind| kind == self)
            .unwrap_or(PRECEDENCE.len())
    }

    fn detector(&self) -> Arc<dyn DetectorRunner> {
        match self {
            DetectorKind::Clang => Arc::new(ClangDetectable::new()),
            DetectorKind::Xcode => Arc::new(XcodeProjectDetectable::new()),
            DetectorKind::SwiftPackageResolved => Arc::new(SwiftPackageResolvedDetectable::new()),
            DetectorKind::NpmPackageLock => Arc::new(NpmPackageLockDetectable::new()),
            DetectorKind::NpmPackageJson => Arc::new(NpmPackageJsonDetectable::new()),
            DetectorKind::CargoLock => Arc::new(CargoLockDetectable::new()),
            DetectorKind::CargoToml => Arc::new(CargoTomlDetectable::new()),
            DetectorKind::MavenPom => Arc::new(MavenPomDetectable::new()),
            DetectorKind::Setuptools => Arc::new(SetupToolsDetectable::new()),
            DetectorKind::PipfileLock => Arc::new(PipfileLockDetectable::new()),
            DetectorKind::PipRequirements => Arc::new(PipRequirementsDetectable::new()),
        }
    }
}

impl fmt::Display for DetectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Object-safe view of a [`Detectable`]: the three phases run back to back,
/// stopping at the first one that does not pass.
#[async_trait]
pub trait DetectorRunner: Send + Sync {
    fn detectable_info(&self) -> DetectableInfo;

    async fn run(&self, env: &DetectableEnvironment, extraction: &ExtractionEnvironment) -> PhaseOutcome;
}

#[async_trait]
impl<D: Detectable> DetectorRunner for D {
    fn detectable_info(&self) -> DetectableInfo {
        self.info()
    }

    async fn run(&self, env: &DetectableEnvironment, extraction: &ExtractionEnvironment) -> PhaseOutcome {
        let found = match self.applicable(env) {
            Ok(found) => found,
            Err(failure) => return PhaseOutcome::NotApplicable(failure),
        };
        let ready = match self.extractable(env, found) {
            Ok(ready) => ready,
            Err(failure) => return PhaseOutcome::NotExtractable(failure),
        };
        debug!(
            dir = %env.directory.display(),
            depth = env.depth,
            nested = env.nested,
            detector = self.info().name,
            "Extracting"
        );
        match self.extract(extraction, ready).await {
            Extraction::Success { code_locations } => PhaseOutcome::Extracted(code_locations),
            Extraction::Failure { reason, cause } => PhaseOutcome::Failed { reason, cause },
        }
    }
}

/// A detector bound to the kind the pipeline's rules refer to.
#[derive(Clone)]
pub struct RegisteredDetector {
    pub kind: DetectorKind,
    pub runner: Arc<dyn DetectorRunner>,
}

impl RegisteredDetector {
    pub fn new(kind: DetectorKind, runner: Arc<dyn DetectorRunner>) -> Self {
        Self { kind, runner }
    }
}

/// All built-in detectors in [`PRECEDENCE`] order.
pub fn default_detectors() -> Vec<RegisteredDetector> {
    PRECEDENCE
        .iter()
        .map(|kind| RegisteredDetector::new(*kind, kind.detector()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::ValueEnum;

    #[test]
    fn test_every_kind_has_a_precedence() {
        for kind in DetectorKind::value_variants() {
            assert!(kind.precedence() < PRECEDENCE.len(), "{kind} missing from PRECEDENCE");
        }
        assert_eq!(PRECEDENCE.len(), DetectorKind::value_variants().len());
    }

    #[test]
    fn test_superseding_kinds_run_first() {
        for kind in PRECEDENCE {
            for superseded in kind.supersedes() {
                assert!(kind.precedence() < superseded.precedence());
                assert_eq!(kind.group(), superseded.group());
            }
        }
    }

    #[test]
    fn test_names_match_cli_values() {
        for kind in DetectorKind::value_variants() {
            let value = kind.to_possible_value().unwrap();
            assert_eq!(value.get_name(), kind.name());
            assert_eq!(DetectorKind::from_str(kind.name(), false).unwrap(), *kind);
        }
    }

    #[test]
    fn test_default_detectors_follow_precedence() {
        let kinds: Vec<DetectorKind> = default_detectors().iter().map(|d| d.kind).collect();
        assert_eq!(kinds, PRECEDENCE);
        assert_eq!(
            default_detectors()[0].runner.detectable_info().name,
            "Clang CLI"
        );
    }
}
