//! Snapshots: named captures of a representation's compiled content.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A named point-in-time capture of a rep's compiled content.
///
/// A snapshot with an output path is `final`: it is flushed to the output
/// root when its rep completes, and its path joins the run write-set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    pub content: String,
    pub output_path: Option<PathBuf>,
}

impl Snapshot {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            output_path: None,
        }
    }

    pub fn written_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = Some(path.into());
        self
    }

    /// Whether this snapshot is flushed to the output filesystem.
    pub fn is_final(&self) -> bool {
        self.output_path.is_some()
    }
}
