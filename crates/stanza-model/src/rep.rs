//! Item representations: named compilation targets derived from items.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::item::ItemId;
use crate::reason::OutdatednessReason;
use crate::snapshot::Snapshot;

/// Identifier of one representation: item id plus rep name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepId {
    pub item: ItemId,
    pub name: String,
}

impl RepId {
    pub fn new(item: impl Into<ItemId>, name: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            name: name.into(),
        }
    }

    /// Stable string key, used for checksum and store table lookups.
    pub fn key(&self) -> String {
        format!("{}#{}", self.item, self.name)
    }
}

impl fmt::Display for RepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.item, self.name)
    }
}

/// Per-run outdatedness state of a rep.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum OutdatednessState {
    #[default]
    Unknown,
    Outdated(OutdatednessReason),
    Fresh,
}

impl OutdatednessState {
    pub fn is_known(&self) -> bool {
        !matches!(self, OutdatednessState::Unknown)
    }

    pub fn is_outdated(&self) -> bool {
        matches!(self, OutdatednessState::Outdated(_))
    }

    pub fn reason(&self) -> Option<&OutdatednessReason> {
        match self {
            OutdatednessState::Outdated(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Raised when a routine tries to record two snapshots under one name.
#[derive(Debug, thiserror::Error)]
#[error("snapshot name already taken for {rep}: {name}")]
pub struct SnapshotNameTaken {
    pub rep: RepId,
    pub name: String,
}

/// Control signal: a compilation routine needs a snapshot of another rep
/// that does not exist yet. Consumed by the scheduler, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmetDependency {
    pub rep: RepId,
    pub snapshot: String,
}

impl fmt::Display for UnmetDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "needs snapshot {} of {}", self.snapshot, self.rep)
    }
}

/// One named compilation target of an item, accumulating snapshots as its
/// routine runs.
#[derive(Debug, Clone)]
pub struct ItemRep {
    pub id: RepId,
    snapshots: Vec<Snapshot>,
    pub state: OutdatednessState,
}

impl ItemRep {
    pub fn new(id: RepId) -> Self {
        Self {
            id,
            snapshots: Vec::new(),
            state: OutdatednessState::Unknown,
        }
    }

    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub fn snapshot(&self, name: &str) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.name == name)
    }

    /// Record a snapshot. Snapshot names are append-only within a run.
    pub fn add_snapshot(&mut self, snapshot: Snapshot) -> Result<(), SnapshotNameTaken> {
        if self.snapshot(&snapshot.name).is_some() {
            return Err(SnapshotNameTaken {
                rep: self.id.clone(),
                name: snapshot.name,
            });
        }
        self.snapshots.push(snapshot);
        Ok(())
    }

    /// Output paths of all final snapshots recorded so far.
    pub fn final_paths(&self) -> Vec<PathBuf> {
        self.snapshots
            .iter()
            .filter_map(|s| s.output_path.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_names_are_append_only() {
        let mut rep = ItemRep::new(RepId::new("/donkey.md", "default"));
        rep.add_snapshot(Snapshot::new("last", "Donkey!")).unwrap();
        let err = rep
            .add_snapshot(Snapshot::new("last", "Mule!"))
            .unwrap_err();
        assert_eq!(err.name, "last");
        assert_eq!(rep.snapshot("last").unwrap().content, "Donkey!");
    }

    #[test]
    fn final_paths_skip_unwritten_snapshots() {
        let mut rep = ItemRep::new(RepId::new("/donkey.md", "default"));
        rep.add_snapshot(Snapshot::new("raw", "Donkey!")).unwrap();
        rep.add_snapshot(Snapshot::new("last", "Donkey!").written_to("/donkey.html"))
            .unwrap();
        assert_eq!(rep.final_paths(), vec![PathBuf::from("/donkey.html")]);
    }
}
