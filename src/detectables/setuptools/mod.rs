//! Python projects built with setuptools.
//!
//! Direct requirements come from `pyproject.toml`, `setup.cfg` or `setup.py`.
//! When `pip` is available the installed environment is walked with
//! `pip show` to recover versions and transitive requirements; otherwise the
//! graph holds the declared requirements only.

pub mod parse;
pub mod transform;

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::detectable::{
    CodeLocation, Detectable, DetectableEnvironment, DetectableInfo, DetectableResult, Extraction,
    ExtractionEnvironment,
};
use crate::graph::Forge;

use parse::parse_manifests;
use transform::{PipResolution, SetupToolsGraphTransformer};

pub const PYPROJECT_TOML: &str = "pyproject.toml";
pub const SETUP_CFG: &str = "setup.cfg";
pub const SETUP_PY: &str = "setup.py";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetupToolsManifests {
    pub pyproject: Option<PathBuf>,
    pub setup_cfg: Option<PathBuf>,
    pub setup_py: Option<PathBuf>,
}

pub struct SetupToolsExtractable {
    directory: PathBuf,
    manifests: SetupToolsManifests,
    resolution: PipResolution,
}

#[derive(Default)]
pub struct SetupToolsDetectable;

impl SetupToolsDetectable {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Detectable for SetupToolsDetectable {
    type Applicable = SetupToolsManifests;
    type Extractable = SetupToolsExtractable;

    fn info(&self) -> DetectableInfo {
        DetectableInfo {
            name: "Setuptools",
            language: "Python",
            forge: Forge::Pypi,
            requirements: "Files: pyproject.toml, setup.cfg or setup.py. Optionally executable: pip",
        }
    }

    fn applicable(&self, env: &DetectableEnvironment) -> DetectableResult<SetupToolsManifests> {
        env.any_file(&[PYPROJECT_TOML, SETUP_CFG, SETUP_PY])?;
        Ok(SetupToolsManifests {
            pyproject: env.optional_file(&env.directory, PYPROJECT_TOML),
            setup_cfg: env.optional_file(&env.directory, SETUP_CFG),
            setup_py: env.optional_file(&env.directory, SETUP_PY),
        })
    }

    fn extractable(
        &self,
        env: &DetectableEnvironment,
        manifests: SetupToolsManifests,
    ) -> DetectableResult<SetupToolsExtractable> {
        let resolution = match env.optional_executable("pip")? {
            Some(pip) => PipResolution::WithTool(pip),
            None => {
                debug!(dir = %env.directory.display(), "No pip executable, using manifests only");
                PipResolution::ManifestOnly
            }
        };
        Ok(SetupToolsExtractable {
            directory: env.directory.clone(),
            manifests,
            resolution,
        })
    }

    async fn extract(&self, env: &ExtractionEnvironment, ready: SetupToolsExtractable) -> Extraction {
        let parsed = match parse_manifests(
            ready.manifests.pyproject.as_deref(),
            ready.manifests.setup_cfg.as_deref(),
            ready.manifests.setup_py.as_deref(),
        ) {
            Ok(parsed) => parsed,
            Err(e) => return Extraction::exception("Unable to parse setuptools manifests", e),
        };

        let graph = match SetupToolsGraphTransformer::new(&ready.directory)
            .transform(env, &ready.resolution, &parsed)
            .await
        {
            Ok(graph) => graph,
            Err(e) => return Extraction::exception("Unable to resolve installed packages with pip", e),
        };

        let mut location = CodeLocation::new(graph, ready.directory);
        if let Some(name) = &parsed.project_name {
            let id = env
                .id_factory
                .name_version(Forge::Pypi, name, parsed.project_version.as_deref());
            location = location.with_external_id(id);
        }
        Extraction::success(location)
    }
}
