use std::path::{Component, Path, PathBuf};

use tracing::{trace, warn};

/// Parser for Makefile-style dependency files produced by `cc -M`:
///
/// ```text
/// main.o: src/main.c include/util.h \
///   /usr/include/stdio.h
/// ```
///
/// Malformed input never errors; it logs and yields an empty list.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyFileParser;

impl DependencyFileParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_file(&self, path: &Path) -> Vec<String> {
        match std::fs::read_to_string(path) {
            Ok(text) => self.parse(&text),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Error getting dependency file paths");
                Vec::new()
            }
        }
    }

    pub fn parse(&self, text: &str) -> Vec<String> {
        let mut parts: Vec<&str> = text.split(": ").collect();
        while parts.len() > 1 && parts.last().is_some_and(|part| part.is_empty()) {
            parts.pop();
        }
        if parts.len() != 2 {
            warn!(text = %parts.join(" "), "Unable to split dependency file text into target and dependencies");
            return Vec::new();
        }

        let dependencies = parts[1]
            .replace("\\\r\n", " ")
            .replace("\\\n", " ")
            .replace(['\r', '\n'], " ");
        trace!(dependencies = %dependencies, "Dependencies with continuations removed");

        dependencies
            .split_whitespace()
            .filter(|token| *token != "\\")
            .map(normalize)
            .filter(|path| !path.is_empty())
            .collect()
    }
}

/// Lexically resolve `.` and `..` segments without touching the filesystem.
fn normalize(raw: &str) -> String {
    let mut parts: Vec<Component> = Vec::new();
    for component in Path::new(raw).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }
    let normalized: PathBuf = parts.iter().collect();
    trace!(raw, normalized = %normalized.display(), "Normalized dependency path");
    normalized.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_with_continuation() {
        let deps = DependencyFileParser::new().parse("out.o: a.h b.h \\\nc.h");
        assert_eq!(deps, vec!["a.h", "b.h", "c.h"]);
    }

    #[test]
    fn test_parse_realistic_output() {
        let text = "main.o: src/main.c ./include/util.h \\\n  /usr/include/stdio.h \\\n  /usr/lib/gcc/../include/stddef.h\n";
        let deps = DependencyFileParser::new().parse(text);
        let expected: Vec<String> = [
            "src/main.c",
            "include/util.h",
            "/usr/include/stdio.h",
            "/usr/lib/include/stddef.h",
        ]
        .iter()
        .map(|p| PathBuf::from(p).to_string_lossy().into_owned())
        .collect();
        assert_eq!(deps, expected);
    }

    #[test]
    fn test_malformed_is_empty() {
        let parser = DependencyFileParser::new();
        assert!(parser.parse("no separator here").is_empty());
        assert!(parser.parse("a.o: b.h: c.h").is_empty());
        assert!(parser.parse("").is_empty());
    }

    #[test]
    fn test_trailing_separator_is_dropped() {
        let parser = DependencyFileParser::new();
        assert_eq!(parser.parse("obj.o: a.h: "), vec!["a.h"]);
        assert!(parser.parse("obj.o: ").is_empty());
    }

    #[test]
    fn test_parse_is_idempotent() {
        let parser = DependencyFileParser::new();
        let first = parser.parse("x.o: ./a/../b.h c//d.h \\\n  e.h");
        let again = parser.parse(&format!("x.o: {}", first.join(" ")));
        assert_eq!(first, again);
    }

    #[test]
    fn test_leading_parent_kept() {
        assert_eq!(normalize("../inc/a.h"), PathBuf::from("../inc/a.h").to_string_lossy());
        assert_eq!(normalize("/../a.h"), PathBuf::from("/a.h").to_string_lossy());
    }

    #[test]
    fn test_unreadable_file_is_empty() {
        let deps = DependencyFileParser::new().parse_file(Path::new("/definitely/missing.d"));
        assert!(deps.is_empty());
    }
}
