//! Cells: independently rooted source trees taking part in one build.
//!
//! A [`Cell`] knows its root, its parser configuration, the aliases it can
//! resolve ([`CellPathResolver`]) and the sub-cells it is able to recognize.
//! The per-build [`CellRegistry`] discovers cells lazily through those
//! sub-cells.

mod registry;
mod resolver;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use smol_str::SmolStr;

use crate::base::BuildTarget;
use crate::config::ParserConfig;
use crate::error::{ParseError, Result};

pub use registry::{CellRegistrationListener, CellRegistry};
pub use resolver::CellPathResolver;

#[derive(Debug)]
pub struct Cell {
    root: PathBuf,
    name: Option<SmolStr>,
    config: ParserConfig,
    resolver: CellPathResolver,
    known_cells: Vec<Arc<Cell>>,
}

impl Cell {
    pub fn builder(root: impl Into<PathBuf>) -> CellBuilder {
        CellBuilder::new(root)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn resolver(&self) -> &CellPathResolver {
        &self.resolver
    }

    pub fn known_cells(&self) -> &[Arc<Cell>] {
        &self.known_cells
    }

    /// Whether `path` lies inside this cell's tree.
    pub fn owns(&self, path: &Path) -> bool {
        path.starts_with(&self.root)
    }

    /// Build file declaring `target`.
    pub fn build_file_for(&self, target: &BuildTarget) -> PathBuf {
        self.root
            .join(target.base_path())
            .join(&self.config.build_file_name)
    }

    /// Package path (relative to the root) of a build file in this cell.
    pub fn base_path_of(&self, build_file: &Path) -> Result<PathBuf> {
        let relative = build_file
            .strip_prefix(&self.root)
            .map_err(|_| ParseError::BuildFileOutsideCell {
                build_file: build_file.to_path_buf(),
                cell_root: self.root.clone(),
            })?;
        Ok(relative
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default())
    }

    /// A sub-cell, at any depth, rooted where `target` says its cell is.
    pub fn cell_if_known(&self, target: &BuildTarget) -> Option<Arc<Cell>> {
        for cell in &self.known_cells {
            if cell.root == target.cell_path() {
                return Some(Arc::clone(cell));
            }
            if let Some(found) = cell.cell_if_known(target) {
                return Some(found);
            }
        }
        None
    }

    /// Parse a target string as written in a build file of package `base_path`.
    pub fn parse_target(&self, text: &str, base_path: Option<&Path>) -> Result<BuildTarget> {
        self.resolver.parse_target(text, base_path)
    }
}

pub struct CellBuilder {
    root: PathBuf,
    name: Option<SmolStr>,
    config: ParserConfig,
    children: Vec<Arc<Cell>>,
    aliases: Vec<(SmolStr, PathBuf)>,
}

impl CellBuilder {
    fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            name: None,
            config: ParserConfig::default(),
            children: Vec::new(),
            aliases: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<SmolStr>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn config(mut self, config: ParserConfig) -> Self {
        self.config = config;
        self
    }

    /// A sub-cell this cell can recognize; its name becomes an alias.
    pub fn child(mut self, cell: Arc<Cell>) -> Self {
        self.children.push(cell);
        self
    }

    /// An alias resolving to a cell this cell cannot itself construct.
    pub fn alias(mut self, name: impl Into<SmolStr>, root: impl Into<PathBuf>) -> Self {
        self.aliases.push((name.into(), root.into()));
        self
    }

    pub fn build(self) -> Arc<Cell> {
        let mut resolver = CellPathResolver::new(&self.root, self.name.clone());
        for child in &self.children {
            if let Some(name) = &child.name {
                resolver.add(name.clone(), &child.root);
            }
        }
        for (name, root) in self.aliases {
            resolver.add(name, root);
        }
        Arc::new(Cell {
            root: self.root,
            name: self.name,
            config: self.config,
            resolver,
            known_cells: self.children,
        })
    }
}
