use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileCommandsError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse '{path}': {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// One entry of a `compile_commands.json` compilation database.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CompileCommand {
    pub directory: PathBuf,
    pub file: PathBuf,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub arguments: Option<Vec<String>>,
}

impl CompileCommand {
    /// Compiler followed by its arguments, from `arguments` or a split `command`.
    pub fn argv(&self) -> Vec<String> {
        match (&self.arguments, &self.command) {
            (Some(args), _) if !args.is_empty() => args.clone(),
            (_, Some(command)) => split_command(command),
            _ => Vec::new(),
        }
    }

    /// The same compile, rewritten to only emit a dependency file at
    /// `output`. Output-producing flags are dropped.
    pub fn dependency_file_argv(&self, output: &Path) -> Vec<String> {
        let mut argv = Vec::new();
        let mut skip_next = false;
        for arg in self.argv() {
            if skip_next {
                skip_next = false;
                continue;
            }
            match arg.as_str() {
                "-o" | "-MF" | "-MT" | "-MQ" => skip_next = true,
                "-c" | "-M" | "-MM" | "-MD" | "-MMD" | "-MP" => {}
                a if a.starts_with("-o") && a.len() > 2 => {}
                _ => argv.push(arg),
            }
        }
        argv.push("-M".to_string());
        argv.push("-MF".to_string());
        argv.push(output.to_string_lossy().into_owned());
        argv
    }

    pub fn absolute_file(&self) -> PathBuf {
        if self.file.is_absolute() {
            self.file.clone()
        } else {
            self.directory.join(&self.file)
        }
    }
}

pub fn parse_compile_commands(path: &Path) -> Result<Vec<CompileCommand>, CompileCommandsError> {
    let content = std::fs::read_to_string(path).map_err(|source| CompileCommandsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| CompileCommandsError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Shell-like split honouring single quotes, double quotes and backslash
/// escapes.
fn split_command(command: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('"'), '\\') | (None, '\\') => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
                in_token = true;
            }
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(c);
                in_token = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        args.push(current);
    }
    args
}
