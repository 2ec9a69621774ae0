//! Parser configuration.
//!
//! Mirrors the `[parser]` section of a cell's build configuration. Every
//! field has a default, so a partial JSON document is enough:
//!
//! ```ignore
//! let config = ParserConfig::from_json(r#"{ "num_parsing_threads": 4 }"#)?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::base::constants::DEFAULT_BUILD_FILE_NAME;
use crate::error::{ParseError, Result};

/// Whether sibling declarations are parsed ahead of being requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeculativeParsing {
    Enabled,
    #[default]
    Disabled,
}

/// What to do when a target's inputs are reached through a symbolic link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymlinkPolicy {
    /// Record silently.
    Allow,
    /// Record and emit a warning.
    #[default]
    Warn,
    /// Fail the target.
    Forbid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// File name that declares targets in a package.
    pub build_file_name: String,
    /// Maximum parsers per cell, also the size of the default executor.
    pub num_parsing_threads: usize,
    pub enable_parallel_parsing: bool,
    pub speculative_parsing: SpeculativeParsing,
    pub build_file_symlinks: SymlinkPolicy,
    /// How long to wait for a free parser; `None` waits indefinitely.
    pub parser_borrow_timeout_ms: Option<u64>,
    /// Upper bound on how long `close()` waits for in-flight work.
    pub close_timeout_ms: u64,
    pub enable_profiling: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            build_file_name: DEFAULT_BUILD_FILE_NAME.to_string(),
            num_parsing_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            enable_parallel_parsing: true,
            speculative_parsing: SpeculativeParsing::Disabled,
            build_file_symlinks: SymlinkPolicy::Warn,
            parser_borrow_timeout_ms: None,
            close_timeout_ms: 10_000,
            enable_profiling: false,
        }
    }
}

impl ParserConfig {
    /// Load and validate a configuration from JSON.
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| ParseError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_parsing_threads == 0 {
            return Err(ParseError::Config(
                "num_parsing_threads must be at least 1".into(),
            ));
        }
        if self.build_file_name.is_empty() || self.build_file_name.contains('/') {
            return Err(ParseError::Config(format!(
                "build_file_name `{}` must be a plain file name",
                self.build_file_name
            )));
        }
        Ok(())
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.num_parsing_threads = threads;
        self
    }

    pub fn with_parallel_parsing(mut self, enabled: bool) -> Self {
        self.enable_parallel_parsing = enabled;
        self
    }

    pub fn with_speculative_parsing(mut self, speculative: SpeculativeParsing) -> Self {
        self.speculative_parsing = speculative;
        self
    }

    pub fn with_symlink_policy(mut self, policy: SymlinkPolicy) -> Self {
        self.build_file_symlinks = policy;
        self
    }

    pub fn with_borrow_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.parser_borrow_timeout_ms = timeout.map(millis);
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout_ms = millis(timeout);
        self
    }

    pub fn borrow_timeout(&self) -> Option<Duration> {
        self.parser_borrow_timeout_ms.map(Duration::from_millis)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Speculation only makes sense when marshalling runs on the executor.
    pub fn speculation_enabled(&self) -> bool {
        self.enable_parallel_parsing && self.speculative_parsing == SpeculativeParsing::Enabled
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
