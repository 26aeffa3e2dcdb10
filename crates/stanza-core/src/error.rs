//! Engine error types.
//!
//! `UnmetDependency` is deliberately absent here: it is a routine outcome
//! consumed by the scheduler, not an error. Everything below is a genuine
//! failure, split by blast radius: store I/O, one rep's compilation, or
//! the whole run.

use std::path::PathBuf;

use thiserror::Error;

use stanza_model::{RepId, SnapshotNameTaken};

/// Failure while loading or persisting run state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to {operation} store file: {path}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize run state")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },

    #[error("store file {path} uses schema version {found} (maximum supported: {max_supported})")]
    UnsupportedVersion {
        found: u32,
        max_supported: u32,
        path: PathBuf,
    },
}

/// Failure of a single rep's compilation. Isolated: other reps continue.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("filter {name} is not registered")]
    UnknownFilter { name: String },

    #[error("filter {name} failed for {rep}: {message}")]
    FilterFailed {
        rep: RepId,
        name: String,
        message: String,
    },

    #[error(transparent)]
    SnapshotNameTaken(#[from] SnapshotNameTaken),

    #[error("{rep} is blocked on {on}, which failed")]
    BlockedOnFailed { rep: RepId, on: RepId },

    #[error("{rep} waits for snapshot {snapshot} of {on}, which finished without producing it")]
    MissingSnapshot {
        rep: RepId,
        on: RepId,
        snapshot: String,
    },

    #[error("failed to write output file {path}")]
    OutputIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Run-level failure: aborts the whole run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(
        "compilation deadlocked; stuck reps: {}{}",
        format_reps(.stuck),
        .cycle
            .as_ref()
            .map(|c| format!(" (dependency cycle: {})", format_reps(c)))
            .unwrap_or_default()
    )]
    Deadlock {
        stuck: Vec<RepId>,
        cycle: Option<Vec<RepId>>,
    },

    #[error("pruning failed under {root}")]
    Prune {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn format_reps(reps: &[RepId]) -> String {
    reps.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
