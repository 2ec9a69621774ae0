//! Cell alias resolution and target parsing.

use std::path::{Component, Path, PathBuf};

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::base::constants::FLAVOR_SEPARATOR;
use crate::base::{BuildTarget, Flavor};
use crate::error::{ParseError, Result};

/// Maps the cell aliases visible from one cell to their roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellPathResolver {
    root: PathBuf,
    name: Option<SmolStr>,
    cells: IndexMap<SmolStr, PathBuf>,
}

impl CellPathResolver {
    /// Resolver for the cell at `root`, knowing only itself.
    pub fn new(root: impl Into<PathBuf>, name: Option<SmolStr>) -> Self {
        Self {
            root: root.into(),
            name,
            cells: IndexMap::new(),
        }
    }

    /// Make `name` resolve to `root`. Later registrations win.
    pub fn add(&mut self, name: impl Into<SmolStr>, root: impl Into<PathBuf>) {
        self.cells.insert(name.into(), root.into());
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every known root, own root included, in reverse natural order so that
    /// nested roots come before the roots containing them.
    pub fn known_roots(&self) -> Vec<PathBuf> {
        let mut roots: Vec<PathBuf> = self.cells.values().cloned().collect();
        roots.push(self.root.clone());
        roots.sort_by(|a, b| b.cmp(a));
        roots.dedup();
        roots
    }

    /// Root of the named cell; `None` names this cell.
    pub fn cell_path(&self, name: Option<&str>) -> Option<PathBuf> {
        match name {
            None | Some("") => Some(self.root.clone()),
            Some(name) if self.name.as_deref() == Some(name) => Some(self.root.clone()),
            Some(name) => self.cells.get(name).cloned(),
        }
    }

    pub fn cell_path_or_err(&self, name: Option<&str>) -> Result<PathBuf> {
        self.cell_path(name).ok_or_else(|| ParseError::UnknownCell {
            name: name.unwrap_or_default().to_string(),
            known: self.cells.keys().map(|k| k.to_string()).collect(),
        })
    }

    /// Absolute path of `path` inside the named cell.
    pub fn resolve_cell_relative_path(&self, name: Option<&str>, path: &Path) -> Result<PathBuf> {
        Ok(self.cell_path_or_err(name)?.join(path))
    }

    /// The alias under which `root` is known here.
    pub fn canonical_name(&self, root: &Path) -> Option<SmolStr> {
        if root == self.root {
            return self.name.clone();
        }
        self.cells
            .iter()
            .find(|(_, r)| r.as_path() == root)
            .map(|(name, _)| name.clone())
    }

    /// Parse `[cell]//path:name[#flavors]`, or `:name` relative to the
    /// package `relative_to`.
    ///
    /// `//path/to/pkg` without a name is shorthand for `//path/to/pkg:pkg`.
    pub fn parse_target(&self, text: &str, relative_to: Option<&Path>) -> Result<BuildTarget> {
        let (body, flavors) = match text.split_once(FLAVOR_SEPARATOR) {
            Some((body, list)) => (body, Flavor::parse_list(list)?),
            None => (text, Default::default()),
        };

        let (cell_root, base_path, short_name) = if let Some(name) = body.strip_prefix(':') {
            let base = relative_to.ok_or_else(|| {
                ParseError::invalid_target(text, "relative target used outside a package")
            })?;
            (self.root.clone(), base.to_path_buf(), name)
        } else {
            let (alias, rest) = body
                .split_once("//")
                .ok_or_else(|| ParseError::invalid_target(text, "missing `//`"))?;
            let alias = if alias.is_empty() { None } else { Some(alias) };
            let root = self.cell_path_or_err(alias)?;
            let (path, name) = match rest.rsplit_once(':') {
                Some((path, name)) => (path, name),
                None => (rest, rest.rsplit('/').next().unwrap_or(rest)),
            };
            (root, validate_base_path(text, path)?, name)
        };

        if short_name.is_empty() {
            return Err(ParseError::invalid_target(text, "target name is empty"));
        }
        if short_name.contains(|c: char| c == '/' || c == ':') {
            return Err(ParseError::invalid_target(
                text,
                "target name must not contain `/` or `:`",
            ));
        }

        let cell_name = self.canonical_name(&cell_root);
        Ok(BuildTarget::new(cell_root, base_path, short_name)
            .with_cell_name(cell_name)
            .with_flavors(flavors))
    }
}

fn validate_base_path(input: &str, path: &str) -> Result<PathBuf> {
    let base = PathBuf::from(path);
    for component in base.components() {
        if !matches!(component, Component::Normal(_)) {
            return Err(ParseError::invalid_target(
                input,
                "package path must be relative and normalized",
            ));
        }
    }
    Ok(base)
}
