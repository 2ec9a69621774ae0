//! Error types for parse sessions.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = ParseError> = std::result::Result<T, E>;

/// Errors produced while resolving cells, parsing build files and building
/// target nodes.
///
/// Every variant is `Clone`: a single failed computation is delivered to all
/// callers that were waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ParseError {
    /// A target references a cell root that no registered cell recognizes.
    #[error("From {target}, unable to find cell rooted at: {}", cell_path.display())]
    CellNotFound { target: String, cell_path: PathBuf },

    /// A cell alias is not known to the resolver.
    #[error("Unknown cell `{name}` (known cells: {})", known.join(", "))]
    UnknownCell { name: String, known: Vec<String> },

    /// Textual target could not be parsed.
    #[error("Invalid build target `{input}`: {reason}")]
    InvalidTarget { input: String, reason: String },

    /// The external parser rejected a build file.
    #[error("Parse failure in {}{}: {message}", path.display(), line_suffix(*line))]
    ParseFailure {
        path: PathBuf,
        line: Option<usize>,
        message: String,
    },

    /// File system I/O failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The parser process died or stopped answering while handling a file.
    #[error("Build file parser failed while processing {}: {source}", path.display())]
    WorkerFailure {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The target is not declared in its build file.
    #[error("No such target: {target} is not declared in {}", build_file.display())]
    NoSuchTarget { target: String, build_file: PathBuf },

    /// Marshalling a raw node into a target node failed.
    #[error("{target} (declared in {}): {source}", build_file.display())]
    TargetDefinition {
        target: String,
        build_file: PathBuf,
        #[source]
        source: TargetDefinitionError,
    },

    /// An input was reached through a symbolic link and the cell forbids it.
    #[error(
        "{target}: input {} is under a symlink (resolves to {}); symlinks are forbidden in this cell",
        path.display(),
        real_path.display()
    )]
    InputUnderSymlink {
        target: String,
        path: PathBuf,
        real_path: PathBuf,
    },

    /// No parser could be borrowed within the configured timeout.
    #[error("No build file parser available for cell {} after {waited:?}", cell_root.display())]
    WorkerUnavailable { cell_root: PathBuf, waited: Duration },

    /// A build file path does not live inside the cell it was requested from.
    #[error("Build file {} is not inside cell {}", build_file.display(), cell_root.display())]
    BuildFileOutsideCell {
        build_file: PathBuf,
        cell_root: PathBuf,
    },

    /// The parse session has been closed.
    #[error("Parse session is closed")]
    SessionClosed,

    /// A computation panicked or was dropped before publishing a result.
    #[error("{what} was abandoned before it completed")]
    Abandoned { what: String },

    /// A pipeline was closed while computations were still running.
    #[error("{pipeline} pipeline closed with {pending} computation(s) still in flight")]
    InFlightAtClose {
        pipeline: &'static str,
        pending: usize,
    },

    /// Invalid parser configuration.
    #[error("Invalid parser configuration: {0}")]
    Config(String),

    /// The shared executor could not be started.
    #[error("Failed to start parse executor: {0}")]
    Executor(String),

    /// Aggregate of every failure observed while closing owned resources.
    #[error("{} failure(s) while closing: {}", errors.len(), join_errors(errors))]
    Close { errors: Vec<ParseError> },
}

/// A raw node could not be converted into a typed target node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid attribute `{attribute}`: {message}")]
pub struct TargetDefinitionError {
    pub attribute: String,
    pub message: String,
}

impl TargetDefinitionError {
    pub fn new(attribute: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            message: message.into(),
        }
    }
}

impl ParseError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Wrap an I/O error from the parser process itself.
    pub fn worker_failure(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WorkerFailure {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Create a parse failure for a build file.
    pub fn parse_failure(
        path: impl Into<PathBuf>,
        line: Option<usize>,
        message: impl Into<String>,
    ) -> Self {
        Self::ParseFailure {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    /// Create an invalid target error.
    pub fn invalid_target(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// The file path this error is about, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::CellNotFound { cell_path, .. } => Some(cell_path),
            Self::ParseFailure { path, .. }
            | Self::Io { path, .. }
            | Self::WorkerFailure { path, .. } => Some(path),
            Self::NoSuchTarget { build_file, .. }
            | Self::TargetDefinition { build_file, .. }
            | Self::BuildFileOutsideCell { build_file, .. } => Some(build_file),
            Self::InputUnderSymlink { path, .. } => Some(path),
            Self::WorkerUnavailable { cell_root, .. } => Some(cell_root),
            _ => None,
        }
    }

    /// Whether this error came from an I/O failure rather than bad content.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::WorkerFailure { .. })
    }

    /// Whether the parser that produced this error can no longer be trusted.
    pub fn is_worker_failure(&self) -> bool {
        matches!(self, Self::WorkerFailure { .. })
    }

    /// Build an aggregate close error, or `Ok` when nothing failed.
    pub fn from_close_errors(errors: Vec<ParseError>) -> Result<()> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self::Close { errors })
        }
    }
}

fn line_suffix(line: Option<usize>) -> String {
    line.map(|l| format!(":{}", l)).unwrap_or_default()
}

fn join_errors(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
