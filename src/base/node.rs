use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use smol_str::SmolStr;

use super::constants::RULE_TYPE_ATTR;
use super::target::BuildTarget;

/// Memoization key of the parse pipelines: the owning cell root plus a
/// build file or target identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParseKey<K> {
    pub cell: PathBuf,
    pub key: K,
}

impl<K> ParseKey<K> {
    pub fn new(cell: impl Into<PathBuf>, key: K) -> Self {
        Self {
            cell: cell.into(),
            key,
        }
    }
}

/// All raw nodes of one build file, in declaration order.
pub type RawNodeSet = Arc<[Arc<RawNode>]>;

/// One declaration of a build file exactly as the parser returned it.
///
/// No attribute is validated beyond the presence of a string `name`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawNode {
    cell_root: PathBuf,
    build_file: PathBuf,
    base_path: PathBuf,
    name: SmolStr,
    attributes: IndexMap<String, Value>,
}

impl RawNode {
    pub fn new(
        cell_root: impl Into<PathBuf>,
        build_file: impl Into<PathBuf>,
        base_path: impl Into<PathBuf>,
        name: impl Into<SmolStr>,
        attributes: IndexMap<String, Value>,
    ) -> Self {
        Self {
            cell_root: cell_root.into(),
            build_file: build_file.into(),
            base_path: base_path.into(),
            name: name.into(),
            attributes,
        }
    }

    pub fn cell_root(&self) -> &Path {
        &self.cell_root
    }

    pub fn build_file(&self) -> &Path {
        &self.build_file
    }

    /// Package path relative to the cell root.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value of `buck.type`, if the interpreter set one.
    pub fn rule_type(&self) -> Option<&str> {
        self.attributes.get(RULE_TYPE_ATTR).and_then(Value::as_str)
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> &IndexMap<String, Value> {
        &self.attributes
    }

    /// The unflavored target this declaration defines.
    pub fn target(&self) -> BuildTarget {
        BuildTarget::new(&self.cell_root, &self.base_path, self.name.clone())
    }
}

/// A validated node: rule type, resolved dependencies and input paths.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetNode {
    pub target: BuildTarget,
    pub rule_type: SmolStr,
    pub build_file: PathBuf,
    /// Dependencies listed in `deps`.
    pub declared_deps: BTreeSet<BuildTarget>,
    /// Dependencies inferred at parse time (e.g. from `deps_query`).
    pub extra_deps: BTreeSet<BuildTarget>,
    pub tests: BTreeSet<BuildTarget>,
    /// Absolute input paths.
    pub inputs: BTreeSet<PathBuf>,
    pub attributes: IndexMap<String, Value>,
}

impl TargetNode {
    pub fn target(&self) -> &BuildTarget {
        &self.target
    }

    pub fn build_file(&self) -> &Path {
        &self.build_file
    }

    /// Declared and inferred dependencies together.
    pub fn deps(&self) -> BTreeSet<BuildTarget> {
        self.declared_deps
            .iter()
            .chain(self.extra_deps.iter())
            .cloned()
            .collect()
    }
}
