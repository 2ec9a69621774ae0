//! Rule types and the flavor domains they accept.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::base::Flavor;
use crate::error::Result;

/// A named set of mutually exclusive flavors, e.g. the target platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlavorDomain {
    name: SmolStr,
    flavors: BTreeSet<Flavor>,
}

impl FlavorDomain {
    pub fn new<'a>(
        name: impl Into<SmolStr>,
        flavors: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            flavors: flavors.into_iter().map(Flavor::new).collect::<Result<_>>()?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains(&self, flavor: &Flavor) -> bool {
        self.flavors.contains(flavor)
    }

    pub fn flavors(&self) -> &BTreeSet<Flavor> {
        &self.flavors
    }
}

/// A rule type and the flavor domains targets of that type may use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleType {
    name: SmolStr,
    domains: Vec<FlavorDomain>,
}

impl RuleType {
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self {
            name: name.into(),
            domains: Vec::new(),
        }
    }

    pub fn with_domain(mut self, domain: FlavorDomain) -> Self {
        self.domains.push(domain);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domains(&self) -> &[FlavorDomain] {
        &self.domains
    }

    /// Check that every flavor belongs to a domain and that no domain
    /// contributes more than one.
    pub fn validate_flavors(&self, flavors: &BTreeSet<Flavor>) -> std::result::Result<(), String> {
        let mut used: FxHashMap<&str, &Flavor> = FxHashMap::default();
        for flavor in flavors {
            let domain = self
                .domains
                .iter()
                .find(|domain| domain.contains(flavor))
                .ok_or_else(|| format!("`{}` does not support flavor `{}`", self.name, flavor))?;
            if let Some(previous) = used.insert(domain.name(), flavor) {
                return Err(format!(
                    "flavors `{}` and `{}` both belong to domain `{}`",
                    previous,
                    flavor,
                    domain.name()
                ));
            }
        }
        Ok(())
    }
}

/// Registry of known rule types.
///
/// An empty registry accepts any rule type and leaves flavors unchecked.
#[derive(Debug, Clone, Default)]
pub struct RuleTypes {
    types: FxHashMap<SmolStr, RuleType>,
}

impl RuleTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, rule_type: RuleType) -> Self {
        self.register(rule_type);
        self
    }

    pub fn register(&mut self, rule_type: RuleType) {
        self.types.insert(rule_type.name.clone(), rule_type);
    }

    pub fn get(&self, name: &str) -> Option<&RuleType> {
        self.types.get(name)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// JavaScript rules with their platform, optimization and transform
    /// profile domains.
    pub fn javascript() -> Result<Self> {
        let platform = FlavorDomain::new("platform", ["android", "ios"])?;
        let optimization = FlavorDomain::new("optimization", ["release"])?;
        let transform_profile = FlavorDomain::new(
            "transform-profile",
            ["transform-profile-default", "hermes-stable", "hermes-canary"],
        )?;
        let library = RuleType::new("js_library")
            .with_domain(platform.clone())
            .with_domain(optimization.clone())
            .with_domain(transform_profile);
        let bundle = RuleType::new("js_bundle")
            .with_domain(platform)
            .with_domain(optimization);
        Ok(Self::new()
            .with(library)
            .with(bundle)
            .with(RuleType::new("js_test")))
    }
}
