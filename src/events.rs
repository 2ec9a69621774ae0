//! Lifecycle events posted by parse sessions.
//!
//! Sinks are purely observational; nothing in the pipelines depends on what
//! a sink does with an event.

use std::path::PathBuf;

use uuid::Uuid;

use crate::base::BuildTarget;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    /// A per-build session was created.
    ParseStarted { build_id: Uuid },
    /// A per-build session was closed.
    ParseFinished { build_id: Uuid, processed_bytes: u64 },
    /// A parser worker was created for a cell.
    ParserCreated { cell_root: PathBuf },
    /// A parser worker was shut down.
    ParserClosed { cell_root: PathBuf },
    /// The external parser started on a build file.
    BuildFileParseStarted { build_file: PathBuf },
    /// The external parser returned all declarations of a build file.
    BuildFileParseFinished {
        build_file: PathBuf,
        processed_bytes: u64,
        nodes: usize,
    },
    /// A target node was marshalled (not served from a cache).
    TargetNodeCreated { target: BuildTarget },
    /// A target's input was reached through a symlink.
    InputUnderSymlink {
        build_file: PathBuf,
        path: PathBuf,
        real_path: PathBuf,
    },
}

/// Receiver of [`ParseEvent`]s.
pub trait EventSink: Send + Sync {
    fn post(&self, event: &ParseEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn post(&self, event: &ParseEvent) {
        match event {
            ParseEvent::ParseStarted { build_id } => {
                tracing::debug!(%build_id, "parse session started");
            }
            ParseEvent::ParseFinished {
                build_id,
                processed_bytes,
            } => {
                tracing::debug!(%build_id, processed_bytes, "parse session finished");
            }
            ParseEvent::BuildFileParseFinished {
                build_file,
                processed_bytes,
                nodes,
            } => {
                tracing::debug!(
                    build_file = %build_file.display(),
                    processed_bytes,
                    nodes,
                    "parsed build file"
                );
            }
            ParseEvent::InputUnderSymlink {
                build_file,
                path,
                real_path,
            } => {
                tracing::debug!(
                    build_file = %build_file.display(),
                    path = %path.display(),
                    real_path = %real_path.display(),
                    "input under symlink"
                );
            }
            other => tracing::trace!(event = ?other, "parse event"),
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn post(&self, _event: &ParseEvent) {}
}
