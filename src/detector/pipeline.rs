//! Directory discovery and detector evaluation.
//!
//! Directories are visited level by level so that, when a directory is
//! evaluated, every ancestor's results are final. Directories on the same
//! level run concurrently; detectors within one directory run one after
//! another in [`PRECEDENCE`](super::registry::PRECEDENCE) order, which is
//! what lets a lock file detector make its manifest fallback yield.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use globset::{Glob, GlobSet, GlobSetBuilder};
use indicatif::ProgressBar;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::detectable::{
    CodeLocation, DetectableEnvironment, DetectableFailure, ExtractionEnvironment, StatusCode,
};
use crate::executable::{ExecutableResolver, ExecutableRunner};

use super::evaluation::DetectorEvaluation;
use super::registry::{DetectorGroup, DetectorKind, RegisteredDetector};

/// Directory names never searched unless configured otherwise.
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
    "node_modules",
    ".git",
    "target",
    "build",
    "__pycache__",
    ".venv",
];

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// `0` scans only the root directory.
    pub search_depth: usize,
    /// Globs matched against directory names.
    pub exclusions: Vec<String>,
    /// When non-empty, only these kinds run.
    pub include: Vec<DetectorKind>,
    pub exclude: Vec<DetectorKind>,
    pub workers: usize,
    /// Parent of every extraction output directory.
    pub run_directory: PathBuf,
}

impl PipelineOptions {
    pub fn new(run_directory: impl Into<PathBuf>) -> Self {
        Self {
            search_depth: 0,
            exclusions: DEFAULT_EXCLUSIONS.iter().map(|s| s.to_string()).collect(),
            include: Vec::new(),
            exclude: Vec::new(),
            workers: default_workers(),
            run_directory: run_directory.into(),
        }
    }

    fn is_enabled(&self, kind: DetectorKind) -> bool {
        (self.include.is_empty() || self.include.contains(&kind)) && !self.exclude.contains(&kind)
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Everything one scan produced.
#[derive(Debug, Default)]
pub struct PipelineResult {
    pub evaluations: Vec<DetectorEvaluation>,
    pub directories: usize,
    pub cancelled: bool,
}

impl PipelineResult {
    pub fn has_failures(&self) -> bool {
        self.evaluations.iter().any(DetectorEvaluation::failed)
    }

    /// `1` when any extraction failed or the scan was cut short.
    pub fn exit_code(&self) -> i32 {
        if self.cancelled || self.has_failures() {
            1
        } else {
            0
        }
    }

    pub fn code_locations(&self) -> impl Iterator<Item = (&DetectorEvaluation, &CodeLocation)> {
        self.evaluations
            .iter()
            .flat_map(|e| e.code_locations.iter().map(move |location| (e, location)))
    }
}

pub struct DetectorPipeline {
    detectors: Vec<RegisteredDetector>,
    options: PipelineOptions,
    resolver: Arc<ExecutableResolver>,
    runner: Arc<dyn ExecutableRunner>,
    cancel: CancellationToken,
    progress: Option<ProgressBar>,
    extraction_counter: AtomicUsize,
}

impl DetectorPipeline {
    pub fn new(
        mut detectors: Vec<RegisteredDetector>,
        options: PipelineOptions,
        resolver: Arc<ExecutableResolver>,
        runner: Arc<dyn ExecutableRunner>,
        cancel: CancellationToken,
    ) -> Self {
        detectors.sort_by_key(|d| d.kind.precedence());
        Self {
            detectors,
            options,
            resolver,
            runner,
            cancel,
            progress: None,
            extraction_counter: AtomicUsize::new(0),
        }
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    pub async fn run(&self, root: &Path) -> PipelineResult {
        let levels = discover_directories(root, self.options.search_depth, &self.options.exclusions);
        let mut result = PipelineResult {
            directories: levels.iter().map(Vec::len).sum(),
            ..Default::default()
        };
        if let Some(progress) = &self.progress {
            progress.set_length(result.directories as u64);
        }
        info!(root = %root.display(), directories = result.directories, "Evaluating directories");

        let workers = self.options.workers.max(1);
        let mut extracted_groups: HashMap<PathBuf, BTreeSet<DetectorGroup>> = HashMap::new();

        for (depth, directories) in levels.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }

            let jobs = directories.into_iter().map(|directory| {
                let ancestors = ancestor_groups(root, &directory, &extracted_groups);
                async move {
                    let evaluations = self.evaluate_directory(root, directory, depth, ancestors).await;
                    if let Some(progress) = &self.progress {
                        progress.inc(1);
                    }
                    evaluations
                }
            });
            let level: Vec<Vec<DetectorEvaluation>> =
                stream::iter(jobs).buffer_unordered(workers).collect().await;

            for evaluation in level.into_iter().flatten() {
                if evaluation.extracted() {
                    extracted_groups
                        .entry(evaluation.directory.clone())
                        .or_default()
                        .insert(evaluation.kind.group());
                }
                result.evaluations.push(evaluation);
            }
        }

        result.cancelled |= self.cancel.is_cancelled();
        result
            .evaluations
            .sort_by(|a, b| (&a.directory, a.kind.precedence()).cmp(&(&b.directory, b.kind.precedence())));
        result
    }

    async fn evaluate_directory(
        &self,
        root: &Path,
        directory: PathBuf,
        depth: usize,
        ancestor_groups: BTreeSet<DetectorGroup>,
    ) -> Vec<DetectorEvaluation> {
        let env = DetectableEnvironment::new(&directory, root, self.resolver.clone())
            .at_depth(depth, !ancestor_groups.is_empty());
        let mut extracted: HashSet<DetectorKind> = HashSet::new();
        let mut evaluations = Vec::with_capacity(self.detectors.len());

        for detector in &self.detectors {
            let kind = detector.kind;
            let info = detector.runner.detectable_info();

            if let Some(failure) = self.skip_reason(kind, &extracted, &ancestor_groups) {
                debug!(dir = %directory.display(), detector = %kind, status = %failure.code, "Skipping detector");
                evaluations.push(DetectorEvaluation::skipped(directory.clone(), depth, kind, info, failure));
                continue;
            }

            let extraction = ExtractionEnvironment::new(self.extraction_directory(kind), self.runner.clone());
            let outcome = detector.runner.run(&env, &extraction).await;
            let evaluation = DetectorEvaluation::from_outcome(directory.clone(), depth, kind, info, outcome);

            if evaluation.extracted() {
                info!(
                    dir = %directory.display(),
                    detector = %kind,
                    code_locations = evaluation.code_locations.len(),
                    "Extraction succeeded"
                );
                extracted.insert(kind);
            } else if evaluation.failed() {
                warn!(
                    dir = %directory.display(),
                    detector = %kind,
                    reason = %evaluation.describe_failure().unwrap_or_default(),
                    "Extraction failed"
                );
            } else {
                debug!(
                    dir = %directory.display(),
                    detector = %kind,
                    status = %evaluation.status,
                    reason = evaluation.reason.as_deref().unwrap_or_default(),
                    "Detector did not apply"
                );
            }
            evaluations.push(evaluation);
        }
        evaluations
    }

    /// Rules checked before a detector runs, in order: cancellation,
    /// configuration, precedence within the directory, then nesting.
    fn skip_reason(
        &self,
        kind: DetectorKind,
        extracted: &HashSet<DetectorKind>,
        ancestor_groups: &BTreeSet<DetectorGroup>,
    ) -> Option<DetectableFailure> {
        if self.cancel.is_cancelled() {
            return Some(DetectableFailure::new(StatusCode::Cancelled, "The scan was cancelled"));
        }
        if !self.options.is_enabled(kind) {
            return Some(DetectableFailure::new(
                StatusCode::Excluded,
                format!("The {kind} detector is excluded by configuration"),
            ));
        }
        if let Some(winner) = extracted.iter().find(|winner| winner.supersedes().contains(&kind)) {
            return Some(DetectableFailure::new(
                StatusCode::Yielded,
                format!("Yielded to {winner}, which extracted successfully"),
            ));
        }
        if !kind.nestable() && ancestor_groups.contains(&kind.group()) {
            return Some(DetectableFailure::new(
                StatusCode::NotNestable,
                format!("The {kind} detector does not run beneath another {kind} project"),
            ));
        }
        None
    }

    fn extraction_directory(&self, kind: DetectorKind) -> PathBuf {
        let index = self.extraction_counter.fetch_add(1, Ordering::Relaxed);
        self.options
            .run_directory
            .join("extractions")
            .join(format!("{index:04}-{kind}"))
    }
}

/// Groups that extracted in any ancestor of `directory` inside `root`.
fn ancestor_groups(
    root: &Path,
    directory: &Path,
    extracted: &HashMap<PathBuf, BTreeSet<DetectorGroup>>,
) -> BTreeSet<DetectorGroup> {
    directory
        .ancestors()
        .skip(1)
        .take_while(|ancestor| ancestor.starts_with(root))
        .filter_map(|ancestor| extracted.get(ancestor))
        .flatten()
        .copied()
        .collect()
}

fn build_exclusions(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => warn!(pattern = %pattern, error = %e, "Ignoring invalid exclusion pattern"),
        }
    }
    builder.build().unwrap_or_else(|e| {
        warn!(error = %e, "Unable to compile exclusion patterns");
        GlobSet::empty()
    })
}

/// Root plus sub-directories up to `max_depth`, grouped by depth. Excluded
/// directories are pruned along with everything beneath them.
pub fn discover_directories(root: &Path, max_depth: usize, exclusions: &[String]) -> Vec<Vec<PathBuf>> {
    let exclusions = build_exclusions(exclusions);
    let mut levels: Vec<Vec<PathBuf>> = vec![Vec::new()];

    let walker = WalkDir::new(root)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || (entry.file_type().is_dir() && !exclusions.is_match(entry.file_name()))
        });

    for entry in walker {
        match entry {
            Ok(entry) if entry.file_type().is_dir() => {
                while levels.len() <= entry.depth() {
                    levels.push(Vec::new());
                }
                levels[entry.depth()].push(entry.into_path());
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Unable to read directory"),
        }
    }

    while levels.last().is_some_and(Vec::is_empty) {
        levels.pop();
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectable::{
        Detectable, DetectableInfo, DetectableResult, Extraction,
    };
    use crate::detector::registry::DetectorRunner;
    use crate::executable::testing::ScriptedRunner;
    use crate::graph::{DependencyGraph, Forge};
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;

    /// Applies when `marker` exists; extraction succeeds unless the marker
    /// file contains `fail`. Counts extract calls.
    struct MarkerDetectable {
        marker: &'static str,
        extracts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Detectable for MarkerDetectable {
        type Applicable = PathBuf;
        type Extractable = PathBuf;

        fn info(&self) -> DetectableInfo {
            DetectableInfo {
                name: self.marker,
                language: "Test",
                forge: Forge::Pypi,
                requirements: "",
            }
        }

        fn applicable(&self, env: &DetectableEnvironment) -> DetectableResult<PathBuf> {
            env.file(self.marker)
        }

        fn extractable(&self, _env: &DetectableEnvironment, found: PathBuf) -> DetectableResult<PathBuf> {
            Ok(found)
        }

        async fn extract(&self, _env: &ExtractionEnvironment, marker: PathBuf) -> Extraction {
            self.extracts.fetch_add(1, Ordering::SeqCst);
            if fs::read_to_string(&marker).unwrap_or_default().contains("fail") {
                return Extraction::failure("marker asked to fail");
            }
            let directory = marker.parent().map(Path::to_path_buf).unwrap_or_default();
            Extraction::success(CodeLocation::new(DependencyGraph::new(), directory))
        }
    }

    fn marker(kind: DetectorKind, marker: &'static str) -> (RegisteredDetector, Arc<AtomicUsize>) {
        let extracts = Arc::new(AtomicUsize::new(0));
        let runner: Arc<dyn DetectorRunner> = Arc::new(MarkerDetectable {
            marker,
            extracts: extracts.clone(),
        });
        (RegisteredDetector::new(kind, runner), extracts)
    }

    fn pipeline(detectors: Vec<RegisteredDetector>, options: PipelineOptions) -> DetectorPipeline {
        DetectorPipeline::new(
            detectors,
            options,
            Arc::new(ExecutableResolver::default().with_search_path(vec![])),
            Arc::new(ScriptedRunner::new()),
            CancellationToken::new(),
        )
    }

    fn status_of(result: &PipelineResult, directory: &Path, kind: DetectorKind) -> StatusCode {
        result
            .evaluations
            .iter()
            .find(|e| e.directory == directory && e.kind == kind)
            .map(|e| e.status)
            .unwrap()
    }

    #[tokio::test]
    async fn test_extract_never_called_when_not_applicable() {
        let project = TempDir::new().unwrap();
        let run = TempDir::new().unwrap();
        let (detector, extracts) = marker(DetectorKind::Setuptools, "setup.py");

        let result = pipeline(vec![detector], PipelineOptions::new(run.path()))
            .run(project.path())
            .await;

        assert_eq!(extracts.load(Ordering::SeqCst), 0);
        assert_eq!(status_of(&result, project.path(), DetectorKind::Setuptools), StatusCode::FileNotFound);
        assert_eq!(result.code_locations().count(), 0);
        assert!(!result.has_failures());
    }

    #[tokio::test]
    async fn test_superseded_detector_yields_after_success() {
        let project = TempDir::new().unwrap();
        let run = TempDir::new().unwrap();
        fs::write(project.path().join("Cargo.lock"), "").unwrap();
        fs::write(project.path().join("Cargo.toml"), "").unwrap();
        let (toml, toml_extracts) = marker(DetectorKind::CargoToml, "Cargo.toml");
        let (lock, lock_extracts) = marker(DetectorKind::CargoLock, "Cargo.lock");

        // registration order does not matter, precedence does
        let result = pipeline(vec![toml, lock], PipelineOptions::new(run.path()))
            .run(project.path())
            .await;

        assert_eq!(lock_extracts.load(Ordering::SeqCst), 1);
        assert_eq!(toml_extracts.load(Ordering::SeqCst), 0);
        assert_eq!(status_of(&result, project.path(), DetectorKind::CargoLock), StatusCode::Passed);
        assert_eq!(status_of(&result, project.path(), DetectorKind::CargoToml), StatusCode::Yielded);
    }

    #[tokio::test]
    async fn test_superseded_detector_runs_as_fallback_after_failure() {
        let project = TempDir::new().unwrap();
        let run = TempDir::new().unwrap();
        fs::write(project.path().join("Cargo.lock"), "fail").unwrap();
        fs::write(project.path().join("Cargo.toml"), "").unwrap();
        let (lock, _) = marker(DetectorKind::CargoLock, "Cargo.lock");
        let (toml, toml_extracts) = marker(DetectorKind::CargoToml, "Cargo.toml");

        let result = pipeline(vec![lock, toml], PipelineOptions::new(run.path()))
            .run(project.path())
            .await;

        assert_eq!(toml_extracts.load(Ordering::SeqCst), 1);
        assert_eq!(
            status_of(&result, project.path(), DetectorKind::CargoLock),
            StatusCode::ExtractionFailed
        );
        assert_eq!(status_of(&result, project.path(), DetectorKind::CargoToml), StatusCode::Passed);
        assert!(result.has_failures());
        assert_eq!(result.code_locations().count(), 1);
    }

    #[tokio::test]
    async fn test_non_nestable_detector_skipped_below_extraction() {
        let project = TempDir::new().unwrap();
        let run = TempDir::new().unwrap();
        let nested = project.path().join("vendor");
        fs::create_dir(&nested).unwrap();
        fs::write(project.path().join("setup.py"), "").unwrap();
        fs::write(nested.join("setup.py"), "").unwrap();
        fs::write(nested.join("requirements.txt"), "").unwrap();
        let (setuptools, setuptools_extracts) = marker(DetectorKind::Setuptools, "setup.py");
        let (requirements, requirements_extracts) = marker(DetectorKind::PipRequirements, "requirements.txt");

        let mut options = PipelineOptions::new(run.path());
        options.search_depth = 1;
        let result = pipeline(vec![setuptools, requirements], options)
            .run(project.path())
            .await;

        assert_eq!(result.directories, 2);
        assert_eq!(setuptools_extracts.load(Ordering::SeqCst), 1);
        assert_eq!(status_of(&result, &nested, DetectorKind::Setuptools), StatusCode::NotNestable);
        // nestable kinds of the same group still run
        assert_eq!(requirements_extracts.load(Ordering::SeqCst), 1);
        assert_eq!(status_of(&result, &nested, DetectorKind::PipRequirements), StatusCode::Passed);
    }

    #[tokio::test]
    async fn test_excluded_detectors_are_reported() {
        let project = TempDir::new().unwrap();
        let run = TempDir::new().unwrap();
        fs::write(project.path().join("pom.xml"), "").unwrap();
        let (maven, extracts) = marker(DetectorKind::MavenPom, "pom.xml");

        let mut options = PipelineOptions::new(run.path());
        options.exclude = vec![DetectorKind::MavenPom];
        let result = pipeline(vec![maven], options).run(project.path()).await;

        assert_eq!(extracts.load(Ordering::SeqCst), 0);
        assert_eq!(status_of(&result, project.path(), DetectorKind::MavenPom), StatusCode::Excluded);
    }

    #[tokio::test]
    async fn test_cancelled_scan_runs_nothing() {
        let project = TempDir::new().unwrap();
        let run = TempDir::new().unwrap();
        fs::write(project.path().join("pom.xml"), "").unwrap();
        let (maven, extracts) = marker(DetectorKind::MavenPom, "pom.xml");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = DetectorPipeline::new(
            vec![maven],
            PipelineOptions::new(run.path()),
            Arc::new(ExecutableResolver::default().with_search_path(vec![])),
            Arc::new(ScriptedRunner::new()),
            cancel,
        )
        .run(project.path())
        .await;

        assert!(result.cancelled);
        assert_eq!(extracts.load(Ordering::SeqCst), 0);
        assert!(result.evaluations.is_empty());
        assert!(!result.has_failures());
        assert_eq!(result.exit_code(), 1);
    }

    #[test]
    fn test_discover_directories_by_level() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("a/deep/deeper")).unwrap();
        fs::create_dir_all(root.path().join("b")).unwrap();
        fs::create_dir_all(root.path().join("node_modules/pkg")).unwrap();
        fs::write(root.path().join("file.txt"), "").unwrap();

        let exclusions: Vec<String> = DEFAULT_EXCLUSIONS.iter().map(|s| s.to_string()).collect();
        let levels = discover_directories(root.path(), 2, &exclusions);

        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0], vec![root.path().to_path_buf()]);
        assert_eq!(levels[1], vec![root.path().join("a"), root.path().join("b")]);
        assert_eq!(levels[2], vec![root.path().join("a/deep")]);

        assert_eq!(discover_directories(root.path(), 0, &exclusions).len(), 1);
    }

    #[test]
    fn test_discover_directories_unbounded_depth() {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("a/deep")).unwrap();

        let levels = discover_directories(root.path(), usize::MAX, &[]);

        assert_eq!(levels.len(), 3);
        assert_eq!(levels[2], vec![root.path().join("a/deep")]);
    }

    #[tokio::test]
    async fn test_empty_project_has_no_code_locations() {
        let project = TempDir::new().unwrap();
        let run = TempDir::new().unwrap();

        let result = DetectorPipeline::new(
            crate::detector::registry::default_detectors(),
            PipelineOptions::new(run.path()),
            Arc::new(ExecutableResolver::default().with_search_path(vec![])),
            Arc::new(ScriptedRunner::new()),
            CancellationToken::new(),
        )
        .run(project.path())
        .await;

        assert_eq!(result.code_locations().count(), 0);
        assert!(!result.has_failures());
        assert!(result.evaluations.iter().all(|e| !e.applicable()));
        assert_eq!(result.exit_code(), 0);
    }
}
