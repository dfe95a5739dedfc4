//! C/C++ projects described by a `compile_commands.json` database.
//!
//! Each compile is replayed with `-M -MF` to produce a dependency file,
//! the files it lists are resolved to their owning system packages with
//! `dpkg`, and every package becomes a root dependency. Files inside the
//! scanned tree belong to the project itself and are ignored.

pub mod compile_commands;
pub mod dependency_file;
pub mod package_manager;

use std::collections::BTreeSet;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::detectable::{
    CodeLocation, Detectable, DetectableEnvironment, DetectableInfo, DetectableResult, Extraction,
    ExtractionEnvironment,
};
use crate::executable::Executable;
use crate::graph::{DependencyGraph, Forge};

use compile_commands::parse_compile_commands;
use dependency_file::DependencyFileParser;
use package_manager::{detect_forge, DpkgResolver};

pub const COMPILE_COMMANDS_FILENAME: &str = "compile_commands.json";

pub struct ClangDetectable {
    parser: DependencyFileParser,
}

impl ClangDetectable {
    pub fn new() -> Self {
        Self {
            parser: DependencyFileParser::new(),
        }
    }
}

pub struct ClangExtractable {
    directory: PathBuf,
    compile_commands: PathBuf,
    dpkg: PathBuf,
}

#[async_trait]
impl Detectable for ClangDetectable {
    type Applicable = PathBuf;
    type Extractable = ClangExtractable;

    fn info(&self) -> DetectableInfo {
        DetectableInfo {
            name: "Clang CLI",
            language: "C or C++",
            forge: Forge::Debian,
            requirements: "File: compile_commands.json, Executable: dpkg",
        }
    }

    fn applicable(&self, env: &DetectableEnvironment) -> DetectableResult<PathBuf> {
        env.file(COMPILE_COMMANDS_FILENAME)
    }

    fn extractable(
        &self,
        env: &DetectableEnvironment,
        compile_commands: PathBuf,
    ) -> DetectableResult<ClangExtractable> {
        let dpkg = env.executable("dpkg")?;
        Ok(ClangExtractable {
            directory: env.directory.clone(),
            compile_commands,
            dpkg,
        })
    }

    async fn extract(&self, env: &ExtractionEnvironment, ready: ClangExtractable) -> Extraction {
        let commands = match parse_compile_commands(&ready.compile_commands) {
            Ok(commands) => commands,
            Err(e) => return Extraction::exception("Unable to read the compilation database", e),
        };
        let output_directory = match env.output_directory() {
            Ok(dir) => dir.to_path_buf(),
            Err(e) => return Extraction::exception("Unable to create the output directory", e),
        };

        let mut files: BTreeSet<PathBuf> = BTreeSet::new();
        for (index, command) in commands.iter().enumerate() {
            let source = command.absolute_file();
            let deps_file = output_directory.join(format!("deps_{index}.mk"));
            let argv = command.dependency_file_argv(&deps_file);
            let Some((compiler, args)) = argv.split_first() else {
                warn!(file = %source.display(), "Compile command has no compiler");
                continue;
            };

            let exe = Executable::new(&command.directory, compiler, args.iter().cloned());
            match env.runner.execute(&exe).await {
                Ok(output) if output.success() => {}
                Ok(output) => {
                    warn!(
                        file = %source.display(),
                        exit_code = ?output.exit_code,
                        "Dependency file generation failed"
                    );
                    continue;
                }
                Err(e) => return Extraction::exception("Unable to run the compiler", e),
            }

            for dep in self.parser.parse_file(&deps_file) {
                let path = PathBuf::from(dep);
                let path = if path.is_absolute() {
                    path
                } else {
                    command.directory.join(path)
                };
                if !path.starts_with(&ready.directory) {
                    files.insert(path);
                }
            }
        }
        debug!(count = files.len(), "Dependency files outside the source tree");

        let files: Vec<PathBuf> = files.into_iter().collect();
        let resolver = DpkgResolver::new(ready.dpkg, detect_forge());
        let dependencies = match resolver.resolve(env, &ready.directory, &files).await {
            Ok(deps) => deps,
            Err(e) => return Extraction::exception("Unable to resolve dependency file packages", e),
        };

        let mut graph = DependencyGraph::new();
        graph.add_children_to_root(dependencies);
        Extraction::success(CodeLocation::new(graph, ready.directory))
    }
}
