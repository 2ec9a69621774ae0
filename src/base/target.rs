use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use smol_str::SmolStr;

use super::constants::FLAVOR_SEPARATOR;
use crate::error::{ParseError, Result};

/// A tag appended to a target selecting an alternate variant of the same
/// declaration, e.g. `//app:lib#release`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Flavor(SmolStr);

impl Flavor {
    /// Create a flavor, rejecting characters that have meaning in target syntax.
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(ParseError::invalid_target(name, "flavor must not be empty"));
        }
        if let Some(c) = name
            .chars()
            .find(|c| matches!(c, '#' | ',' | '/' | ':') || c.is_whitespace())
        {
            return Err(ParseError::invalid_target(
                name,
                format!("flavor contains invalid character `{}`", c),
            ));
        }
        Ok(Self(SmolStr::new(name)))
    }

    /// Parse a comma separated flavor list (the part after `#`).
    pub fn parse_list(list: &str) -> Result<BTreeSet<Flavor>> {
        list.split(',').map(Flavor::new).collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully-qualified build target: cell root, package path, short name and
/// flavor set.
///
/// The cell alias is carried for display only; two targets naming the same
/// cell root through different aliases are equal.
#[derive(Debug, Clone)]
pub struct BuildTarget {
    cell_path: PathBuf,
    cell_name: Option<SmolStr>,
    base_path: PathBuf,
    short_name: SmolStr,
    flavors: BTreeSet<Flavor>,
}

impl BuildTarget {
    /// Create an unflavored target in the cell rooted at `cell_path`.
    ///
    /// `base_path` is the package directory relative to the cell root.
    pub fn new(
        cell_path: impl Into<PathBuf>,
        base_path: impl Into<PathBuf>,
        short_name: impl Into<SmolStr>,
    ) -> Self {
        Self {
            cell_path: cell_path.into(),
            cell_name: None,
            base_path: base_path.into(),
            short_name: short_name.into(),
            flavors: BTreeSet::new(),
        }
    }

    pub fn with_cell_name(mut self, name: Option<SmolStr>) -> Self {
        self.cell_name = name;
        self
    }

    /// Same declaration with exactly `flavors`.
    pub fn with_flavors(&self, flavors: impl IntoIterator<Item = Flavor>) -> Self {
        Self {
            flavors: flavors.into_iter().collect(),
            ..self.clone()
        }
    }

    /// Same declaration with `flavors` added to the existing ones.
    pub fn with_appended_flavors(&self, flavors: impl IntoIterator<Item = Flavor>) -> Self {
        let mut target = self.clone();
        target.flavors.extend(flavors);
        target
    }

    /// The declaration this target is a variant of.
    pub fn unflavored(&self) -> Self {
        self.with_flavors(std::iter::empty())
    }

    pub fn cell_path(&self) -> &Path {
        &self.cell_path
    }

    pub fn cell_name(&self) -> Option<&str> {
        self.cell_name.as_deref()
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn flavors(&self) -> &BTreeSet<Flavor> {
        &self.flavors
    }

    pub fn is_flavored(&self) -> bool {
        !self.flavors.is_empty()
    }

    /// Absolute package directory.
    pub fn package_dir(&self) -> PathBuf {
        self.cell_path.join(&self.base_path)
    }

    /// `cell//base/path:name` without flavors.
    pub fn unflavored_name(&self) -> String {
        format!(
            "{}//{}:{}",
            self.cell_name.as_deref().unwrap_or(""),
            slash_path(&self.base_path),
            self.short_name
        )
    }

    /// Fully-qualified textual form, flavors included.
    pub fn fully_qualified_name(&self) -> String {
        self.to_string()
    }

    fn identity(&self) -> (&Path, &Path, &str, &BTreeSet<Flavor>) {
        (
            &self.cell_path,
            &self.base_path,
            &self.short_name,
            &self.flavors,
        )
    }
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

impl PartialEq for BuildTarget {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for BuildTarget {}

impl Hash for BuildTarget {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl PartialOrd for BuildTarget {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BuildTarget {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity().cmp(&other.identity())
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unflavored_name())?;
        if !self.flavors.is_empty() {
            let flavors: Vec<&str> = self.flavors.iter().map(Flavor::as_str).collect();
            write!(f, "{}{}", FLAVOR_SEPARATOR, flavors.join(","))?;
        }
        Ok(())
    }
}
