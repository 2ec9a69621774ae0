//! Attribute names and defaults shared by parsers and marshallers.

/// Build file name used when a cell does not configure one.
pub const DEFAULT_BUILD_FILE_NAME: &str = "BUCK";

/// Declared name of a target.
pub const NAME_ATTR: &str = "name";

/// Rule type of a declaration, filled in by the build file interpreter.
pub const RULE_TYPE_ATTR: &str = "buck.type";

pub const DEPS_ATTR: &str = "deps";
pub const DEPS_QUERY_ATTR: &str = "deps_query";
pub const SRCS_ATTR: &str = "srcs";
pub const TESTS_ATTR: &str = "tests";

/// Separator between a target's short name and its flavors.
pub const FLAVOR_SEPARATOR: char = '#';
