use std::fmt;

use serde::{Deserialize, Serialize};

/// Namespace identifying which ecosystem a dependency comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Forge {
    Pypi,
    Npmjs,
    Github,
    Maven,
    Crates,
    Debian,
    Ubuntu,
}

impl Forge {
    /// Separator placed between the parts of an external id in this forge.
    pub fn separator(&self) -> &'static str {
        match self {
            Forge::Maven => ":",
            _ => "/",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Forge::Pypi => "pypi",
            Forge::Npmjs => "npmjs",
            Forge::Github => "github",
            Forge::Maven => "maven",
            Forge::Crates => "crates",
            Forge::Debian => "debian",
            Forge::Ubuntu => "ubuntu",
        }
    }
}

impl fmt::Display for Forge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Canonical key of a dependency node.
///
/// Equality covers every field, so two dependencies that render the same id
/// in the same forge are the same graph node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExternalId {
    pub forge: Forge,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
}

impl ExternalId {
    /// Render the forge-relative id, e.g. `requests/2.31.0` or
    /// `org.slf4j:slf4j-api:2.0.9`. Missing parts are omitted.
    pub fn id(&self) -> String {
        let parts = [
            self.group.as_deref(),
            Some(self.name.as_str()),
            self.version.as_deref(),
            self.architecture.as_deref(),
        ];
        parts
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(self.forge.separator())
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.forge, self.id())
    }
}

/// Builds [`ExternalId`]s from raw ecosystem strings.
///
/// All text is trimmed and blank optional parts collapse to `None`, so
/// `"1.0 "` and `"1.0"` produce the same node and `""` means "no version".
#[derive(Debug, Clone, Copy, Default)]
pub struct ExternalIdFactory;

impl ExternalIdFactory {
    pub fn new() -> Self {
        Self
    }

    pub fn name_version(&self, forge: Forge, name: &str, version: Option<&str>) -> ExternalId {
        ExternalId {
            forge,
            group: None,
            name: name.trim().to_string(),
            version: clean(version),
            architecture: None,
        }
    }

    pub fn maven(&self, group: &str, artifact: &str, version: Option<&str>) -> ExternalId {
        ExternalId {
            forge: Forge::Maven,
            group: clean(Some(group)),
            name: artifact.trim().to_string(),
            version: clean(version),
            architecture: None,
        }
    }

    pub fn architecture(
        &self,
        forge: Forge,
        name: &str,
        version: Option<&str>,
        architecture: Option<&str>,
    ) -> ExternalId {
        ExternalId {
            forge,
            group: None,
            name: name.trim().to_string(),
            version: clean(version),
            architecture: clean(architecture),
        }
    }
}

fn clean(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_version_id() {
        let id = ExternalIdFactory::new().name_version(Forge::Pypi, " requests ", Some("2.31.0"));
        assert_eq!(id.name, "requests");
        assert_eq!(id.id(), "requests/2.31.0");
        assert_eq!(id.to_string(), "pypi:requests/2.31.0");
    }

    #[test]
    fn test_blank_version_is_none() {
        let factory = ExternalIdFactory::new();
        let a = factory.name_version(Forge::Npmjs, "lodash", Some("  "));
        let b = factory.name_version(Forge::Npmjs, "lodash", None);
        assert_eq!(a, b);
        assert_eq!(a.id(), "lodash");
    }

    #[test]
    fn test_maven_uses_colon_separator() {
        let id = ExternalIdFactory::new().maven("org.slf4j", "slf4j-api", Some("2.0.9"));
        assert_eq!(id.id(), "org.slf4j:slf4j-api:2.0.9");
    }

    #[test]
    fn test_architecture_id() {
        let id = ExternalIdFactory::new().architecture(
            Forge::Debian,
            "libssl-dev",
            Some("3.0.2"),
            Some("amd64"),
        );
        assert_eq!(id.to_string(), "debian:libssl-dev/3.0.2/amd64");
    }
}
