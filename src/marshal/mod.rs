//! Conversion of raw declarations into typed target nodes.
//!
//! The typed pipeline depends only on the [`Marshaller`] trait;
//! [`DefaultMarshaller`] covers the attributes every rule shares:
//!
//! ```text
//! buck.type   → rule type, checked against RuleTypes
//! #flavors    → checked against the rule type's FlavorDomains
//! deps, tests → targets resolved relative to the declaring package
//! srcs        → absolute input paths
//! deps_query  → parse-time target literals as extra deps
//! ```

mod query;
mod rules;

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use serde_json::Value;
use smol_str::SmolStr;

use crate::base::constants::{DEPS_ATTR, DEPS_QUERY_ATTR, RULE_TYPE_ATTR, SRCS_ATTR, TESTS_ATTR};
use crate::base::{BuildTarget, RawNode, TargetNode};
use crate::cell::Cell;
use crate::error::TargetDefinitionError;

pub use query::parse_time_targets;
pub use rules::{FlavorDomain, RuleType, RuleTypes};

type MarshalResult<T> = Result<T, TargetDefinitionError>;

/// Turns a raw node into a target node for a (possibly flavored) target.
pub trait Marshaller: Send + Sync {
    fn marshal(&self, cell: &Cell, target: &BuildTarget, raw: &RawNode) -> MarshalResult<TargetNode>;
}

#[derive(Debug, Clone, Default)]
pub struct DefaultMarshaller {
    rules: RuleTypes,
}

impl DefaultMarshaller {
    pub fn new(rules: RuleTypes) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleTypes {
        &self.rules
    }

    fn rule_type(&self, target: &BuildTarget, raw: &RawNode) -> MarshalResult<SmolStr> {
        let rule_type = match raw.attribute(RULE_TYPE_ATTR) {
            Some(Value::String(rule_type)) => rule_type.as_str(),
            Some(_) => return Err(TargetDefinitionError::new(RULE_TYPE_ATTR, "must be a string")),
            None => return Err(TargetDefinitionError::new(RULE_TYPE_ATTR, "missing rule type")),
        };
        if self.rules.is_empty() {
            return Ok(rule_type.into());
        }
        let rule = self.rules.get(rule_type).ok_or_else(|| {
            TargetDefinitionError::new(RULE_TYPE_ATTR, format!("unknown rule type `{}`", rule_type))
        })?;
        rule.validate_flavors(target.flavors())
            .map_err(|message| TargetDefinitionError::new("flavors", message))?;
        Ok(rule_type.into())
    }
}

impl Marshaller for DefaultMarshaller {
    fn marshal(&self, cell: &Cell, target: &BuildTarget, raw: &RawNode) -> MarshalResult<TargetNode> {
        let rule_type = self.rule_type(target, raw)?;
        let base_path = raw.base_path();

        let declared_deps = target_list(cell, raw, DEPS_ATTR)?;
        let tests = target_list(cell, raw, TESTS_ATTR)?;
        let extra_deps = match raw.attribute(DEPS_QUERY_ATTR) {
            None | Some(Value::Null) => BTreeSet::new(),
            Some(Value::String(query)) => parse_time_targets(query)
                .map_err(|message| TargetDefinitionError::new(DEPS_QUERY_ATTR, message))?
                .into_iter()
                .map(|literal| resolve(cell, base_path, DEPS_QUERY_ATTR, literal))
                .collect::<MarshalResult<_>>()?,
            Some(_) => {
                return Err(TargetDefinitionError::new(DEPS_QUERY_ATTR, "must be a string"));
            }
        };
        let inputs = source_paths(&cell.root().join(base_path), raw)?;

        tracing::trace!(build_target = %target, rule_type = %rule_type, "marshalled target node");
        Ok(TargetNode {
            target: target.clone(),
            rule_type,
            build_file: raw.build_file().to_path_buf(),
            declared_deps,
            extra_deps,
            tests,
            inputs,
            attributes: raw.attributes().clone(),
        })
    }
}

fn resolve(cell: &Cell, base_path: &Path, attribute: &str, text: &str) -> MarshalResult<BuildTarget> {
    cell.parse_target(text, Some(base_path))
        .map_err(|err| TargetDefinitionError::new(attribute, err.to_string()))
}

fn target_list(cell: &Cell, raw: &RawNode, attribute: &str) -> MarshalResult<BTreeSet<BuildTarget>> {
    let items = match raw.attribute(attribute) {
        None | Some(Value::Null) => return Ok(BTreeSet::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(TargetDefinitionError::new(attribute, "must be a list of targets")),
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(text) => resolve(cell, raw.base_path(), attribute, text),
            other => Err(TargetDefinitionError::new(
                attribute,
                format!("expected a target string, got {}", other),
            )),
        })
        .collect()
}

/// `srcs` entries are either `"path"` or `["path", "name"]`.
fn source_paths(package_dir: &Path, raw: &RawNode) -> MarshalResult<BTreeSet<PathBuf>> {
    let items = match raw.attribute(SRCS_ATTR) {
        None | Some(Value::Null) => return Ok(BTreeSet::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(TargetDefinitionError::new(SRCS_ATTR, "must be a list")),
    };
    let mut inputs = BTreeSet::new();
    for item in items {
        let path = match item {
            Value::String(path) => path.as_str(),
            Value::Array(pair) => match pair.as_slice() {
                [Value::String(path), Value::String(_name)] => path.as_str(),
                _ => {
                    return Err(TargetDefinitionError::new(
                        SRCS_ATTR,
                        "a named source must be a [path, name] pair of strings",
                    ));
                }
            },
            other => {
                return Err(TargetDefinitionError::new(
                    SRCS_ATTR,
                    format!("expected a path, got {}", other),
                ));
            }
        };
        inputs.insert(package_dir.join(package_relative(path)?));
    }
    Ok(inputs)
}

fn package_relative(path: &str) -> MarshalResult<&Path> {
    let relative = Path::new(path);
    let escapes = path.is_empty()
        || relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(TargetDefinitionError::new(
            SRCS_ATTR,
            format!("`{}` must be a relative path inside the package", path),
        ));
    }
    Ok(relative)
}
