//! Mergeable dependency graph keyed by [`ExternalId`].
//!
//! Nodes are stored once and referenced by identifier, so a dependency
//! reachable from several parents is never duplicated and merging two graphs
//! unions their node and edge sets. Ordered collections keep iteration (and
//! therefore serialized output) deterministic.

pub mod external_id;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

pub use external_id::{ExternalId, ExternalIdFactory, Forge};

/// A single graph node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    pub version: Option<String>,
    pub external_id: ExternalId,
}

impl Dependency {
    pub fn new(external_id: ExternalId) -> Self {
        Self {
            name: external_id.name.clone(),
            version: external_id.version.clone(),
            external_id,
        }
    }
}

impl From<ExternalId> for Dependency {
    fn from(external_id: ExternalId) -> Self {
        Self::new(external_id)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{}@{} ({})", self.name, version, self.external_id.forge),
            None => write!(f, "{} ({})", self.name, self.external_id.forge),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    dependencies: BTreeMap<ExternalId, Dependency>,
    root: BTreeSet<ExternalId>,
    children: BTreeMap<ExternalId, BTreeSet<ExternalId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, dependency: Dependency) -> ExternalId {
        let id = dependency.external_id.clone();
        self.dependencies.entry(id.clone()).or_insert(dependency);
        id
    }

    pub fn add_child_to_root(&mut self, dependency: Dependency) {
        let id = self.insert(dependency);
        self.root.insert(id);
    }

    pub fn add_children_to_root(&mut self, dependencies: impl IntoIterator<Item = Dependency>) {
        for dependency in dependencies {
            self.add_child_to_root(dependency);
        }
    }

    /// Attach `child` beneath `parent`. A parent not yet in the graph is
    /// added as a plain (non-root) node.
    pub fn add_child_with_parent(&mut self, child: Dependency, parent: &Dependency) {
        let parent_id = self.insert(parent.clone());
        let child_id = self.insert(child);
        self.children.entry(parent_id).or_default().insert(child_id);
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Union `other` into this graph. Nodes are matched by identifier, so the
    /// resulting node set does not depend on merge order.
    pub fn merge(&mut self, other: &DependencyGraph) {
        for dependency in other.dependencies.values() {
            self.insert(dependency.clone());
        }
        self.root.extend(other.root.iter().cloned());
        for (parent, children) in &other.children {
            self.children
                .entry(parent.clone())
                .or_default()
                .extend(children.iter().cloned());
        }
    }

    /// Flatten into a serializable node list with child and parent references.
    pub fn to_node_list(&self) -> GraphDocument {
        let mut parents: BTreeMap<&ExternalId, Vec<String>> = BTreeMap::new();
        for (parent, children) in &self.children {
            for child in children {
                parents.entry(child).or_default().push(parent.to_string());
            }
        }

        let nodes = self
            .dependencies
            .values()
            .map(|dependency| {
                let id = &dependency.external_id;
                GraphNode {
                    id: id.to_string(),
                    external_id: id.clone(),
                    children: self
                        .children
                        .get(id)
                        .into_iter()
                        .flatten()
                        .map(ToString::to_string)
                        .collect(),
                    parents: parents.remove(id).unwrap_or_default(),
                }
            })
            .collect();

        GraphDocument {
            roots: self.root.iter().map(ToString::to_string).collect(),
            nodes,
        }
    }
}

/// Lookups used to assert on extracted graphs.
#[cfg(test)]
impl DependencyGraph {
    pub fn has_dependency(&self, id: &ExternalId) -> bool {
        self.dependencies.contains_key(id)
    }

    /// Find a node by name alone, ignoring version and forge.
    pub fn find_by_name(&self, name: &str) -> Option<&Dependency> {
        self.dependencies.values().find(|d| d.name == name)
    }

    pub fn root_dependencies(&self) -> Vec<&Dependency> {
        self.root
            .iter()
            .filter_map(|id| self.dependencies.get(id))
            .collect()
    }

    pub fn is_root(&self, id: &ExternalId) -> bool {
        self.root.contains(id)
    }

    pub fn children_of(&self, parent: &ExternalId) -> Vec<&Dependency> {
        self.children
            .get(parent)
            .into_iter()
            .flatten()
            .filter_map(|id| self.dependencies.get(id))
            .collect()
    }

    pub fn parents_of(&self, child: &ExternalId) -> Vec<&Dependency> {
        self.children
            .iter()
            .filter(|(_, children)| children.contains(child))
            .filter_map(|(parent, _)| self.dependencies.get(parent))
            .collect()
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.values()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

/// Node/edge list form of a [`DependencyGraph`], handed to output sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub roots: Vec<String>,
    pub nodes: Vec<GraphNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub external_id: ExternalId,
    pub children: Vec<String>,
    pub parents: Vec<String>,
}
