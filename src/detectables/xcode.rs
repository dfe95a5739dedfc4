//! Xcode projects, optionally pinned through Swift Package Manager.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::detectable::{
    CodeLocation, Detectable, DetectableEnvironment, DetectableInfo, DetectableResult, Extraction,
    ExtractionEnvironment,
};
use crate::graph::{DependencyGraph, Forge};

use super::swift::{PackageResolvedExtractor, PACKAGE_RESOLVED_FILENAME};

/// Location of the SwiftPM lock file inside an `.xcodeproj` bundle.
pub const PACKAGE_RESOLVED_RELATIVE_PATH: &str = "project.xcworkspace/xcshareddata/swiftpm";

pub struct XcodeExtractable {
    project: PathBuf,
    package_resolved: Option<PathBuf>,
}

#[derive(Default)]
pub struct XcodeProjectDetectable;

impl XcodeProjectDetectable {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Detectable for XcodeProjectDetectable {
    type Applicable = PathBuf;
    type Extractable = XcodeExtractable;

    fn info(&self) -> DetectableInfo {
        DetectableInfo {
            name: "Xcode Project Lock",
            language: "Swift",
            forge: Forge::Github,
            requirements: "Directory: *.xcodeproj, Optionally file: Package.resolved",
        }
    }

    fn applicable(&self, env: &DetectableEnvironment) -> DetectableResult<PathBuf> {
        env.directory("*.xcodeproj")
    }

    fn extractable(
        &self,
        env: &DetectableEnvironment,
        project: PathBuf,
    ) -> DetectableResult<XcodeExtractable> {
        let swiftpm = project.join(PACKAGE_RESOLVED_RELATIVE_PATH);
        let package_resolved = env.optional_file(&swiftpm, PACKAGE_RESOLVED_FILENAME);
        Ok(XcodeExtractable {
            project,
            package_resolved,
        })
    }

    async fn extract(&self, env: &ExtractionEnvironment, ready: XcodeExtractable) -> Extraction {
        let Some(package_resolved) = ready.package_resolved else {
            return Extraction::success(CodeLocation::new(DependencyGraph::new(), ready.project));
        };

        match PackageResolvedExtractor::new(env.id_factory).extract(&package_resolved) {
            Ok(graph) => Extraction::success(CodeLocation::new(graph, ready.project)),
            Err(e) => Extraction::exception("Unable to parse the project's Package.resolved", e),
        }
    }
}
