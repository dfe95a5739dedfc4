use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::detectable::ExtractionEnvironment;
use crate::executable::{Executable, ExecutableRunnerError};
use crate::graph::{Dependency, Forge};

/// A Debian package that owns one or more dependency files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwningPackage {
    pub name: String,
    pub architecture: Option<String>,
}

/// Maps header/source files to the `dpkg` packages that installed them.
pub struct DpkgResolver {
    dpkg: PathBuf,
    forge: Forge,
}

impl DpkgResolver {
    pub fn new(dpkg: PathBuf, forge: Forge) -> Self {
        Self { dpkg, forge }
    }

    /// Resolve every file to its owning package and return one dependency
    /// per package. Files no package claims are skipped.
    pub async fn resolve(
        &self,
        env: &ExtractionEnvironment,
        working_directory: &Path,
        files: &[PathBuf],
    ) -> Result<Vec<Dependency>, ExecutableRunnerError> {
        let mut packages: BTreeMap<String, OwningPackage> = BTreeMap::new();
        let mut unmanaged = 0usize;

        for file in files {
            let exe = Executable::new(
                working_directory,
                &self.dpkg,
                ["-S".to_string(), file.to_string_lossy().into_owned()],
            )
            .with_env("LC_ALL", "C");
            let output = env.runner.execute(&exe).await?;
            if !output.success() {
                unmanaged += 1;
                trace!(file = %file.display(), "File is not owned by any package");
                continue;
            }
            for owner in parse_search_output(&output.stdout) {
                packages.entry(owner.name.clone()).or_insert(owner);
            }
        }
        debug!(packages = packages.len(), unmanaged, "Resolved dependency files to packages");

        let mut dependencies = Vec::new();
        for package in packages.into_values() {
            let version = self.package_version(env, working_directory, &package).await?;
            let id = env.id_factory.architecture(
                self.forge,
                &package.name,
                version.as_deref(),
                package.architecture.as_deref(),
            );
            dependencies.push(Dependency::new(id));
        }
        Ok(dependencies)
    }

    async fn package_version(
        &self,
        env: &ExtractionEnvironment,
        working_directory: &Path,
        package: &OwningPackage,
    ) -> Result<Option<String>, ExecutableRunnerError> {
        let query = match &package.architecture {
            Some(arch) => format!("{}:{}", package.name, arch),
            None => package.name.clone(),
        };
        // field names like `Version:` are translated under other locales
        let exe = Executable::new(working_directory, &self.dpkg, ["-s".to_string(), query])
            .with_env("LC_ALL", "C");
        let output = env.runner.execute(&exe).await?;
        if !output.success() {
            return Ok(None);
        }
        Ok(parse_status_version(&output.stdout))
    }
}

/// Parse `dpkg -S` output: `libc6-dev:amd64, libfoo: /usr/include/stdio.h`.
pub fn parse_search_output(output: &str) -> Vec<OwningPackage> {
    let mut owners = Vec::new();
    for line in output.lines() {
        let Some((packages, _file)) = line.split_once(": ") else {
            continue;
        };
        if packages.starts_with("diversion by") {
            continue;
        }
        for entry in packages.split(", ") {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let (name, architecture) = match entry.split_once(':') {
                Some((name, arch)) => (name, Some(arch.to_string())),
                None => (entry, None),
            };
            owners.push(OwningPackage {
                name: name.to_string(),
                architecture,
            });
        }
    }
    owners
}

pub fn parse_status_version(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("Version:"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Pick the package forge from `/etc/os-release` content.
pub fn forge_from_os_release(content: &str) -> Forge {
    let id = content
        .lines()
        .find_map(|line| line.strip_prefix("ID="))
        .map(|v| v.trim().trim_matches('"').to_lowercase());
    match id.as_deref() {
        Some("ubuntu") => Forge::Ubuntu,
        _ => Forge::Debian,
    }
}

pub fn detect_forge() -> Forge {
    std::fs::read_to_string("/etc/os-release")
        .map(|content| forge_from_os_release(&content))
        .unwrap_or(Forge::Debian)
}
