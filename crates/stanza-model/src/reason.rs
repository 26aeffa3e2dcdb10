//! Reasons a representation is due for recompilation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dependency::DependencyProps;
use crate::item::ItemId;
use crate::rep::RepId;

/// Why a rep (or the item collection) is outdated.
///
/// Produced once per rep per run by the outdatedness checker and read-only
/// afterwards. Each reason declares which dependency aspects it affects,
/// which is what makes outdatedness transitive: a dependent rep is only
/// dragged along when the recorded edge overlaps the reason's aspects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutdatednessReason {
    /// Items exist now that were absent from the last completed run.
    NewItems { items: Vec<ItemId> },
    /// The item's raw content checksum no longer matches.
    ContentModified,
    /// The item's attribute checksum no longer matches.
    AttributesModified,
    /// The compile rule for this rep changed since the last run.
    RulesModified,
    /// Recompilation was requested explicitly.
    Forced,
    /// The persisted state of the previous run is missing or unreadable.
    PreviousRunCorrupt,
    /// The rep's recorded snapshots are unusable: never recorded, or a
    /// written output file no longer exists on disk.
    SnapshotsBroken,
    /// A rep this rep depends on is itself outdated.
    DependenciesOutdated { on: RepId },
}

impl OutdatednessReason {
    /// Dependency aspects invalidated by this reason.
    pub fn props(&self) -> DependencyProps {
        match self {
            OutdatednessReason::NewItems { .. } => DependencyProps::raw_content_only(),
            OutdatednessReason::ContentModified => DependencyProps {
                raw_content: true,
                attributes: false,
                compiled_content: true,
            },
            OutdatednessReason::AttributesModified => DependencyProps {
                raw_content: false,
                attributes: true,
                compiled_content: true,
            },
            OutdatednessReason::RulesModified
            | OutdatednessReason::DependenciesOutdated { .. } => DependencyProps {
                raw_content: false,
                attributes: false,
                compiled_content: true,
            },
            OutdatednessReason::Forced
            | OutdatednessReason::PreviousRunCorrupt
            | OutdatednessReason::SnapshotsBroken => DependencyProps::all(),
        }
    }
}

impl fmt::Display for OutdatednessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutdatednessReason::NewItems { items } => {
                write!(f, "new items since last run ({})", items.len())
            }
            OutdatednessReason::ContentModified => write!(f, "content modified"),
            OutdatednessReason::AttributesModified => write!(f, "attributes modified"),
            OutdatednessReason::RulesModified => write!(f, "compile rules changed"),
            OutdatednessReason::Forced => write!(f, "recompilation forced"),
            OutdatednessReason::PreviousRunCorrupt => {
                write!(f, "previous run state missing or unreadable")
            }
            OutdatednessReason::SnapshotsBroken => {
                write!(f, "recorded snapshots or output files missing")
            }
            OutdatednessReason::DependenciesOutdated { on } => {
                write!(f, "depends on outdated rep {on}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forced_affects_every_aspect() {
        let props = OutdatednessReason::Forced.props();
        assert!(props.raw_content && props.attributes && props.compiled_content);
    }

    #[test]
    fn new_items_affects_raw_content_only() {
        let props = OutdatednessReason::NewItems { items: vec![] }.props();
        assert!(props.raw_content);
        assert!(!props.attributes);
        assert!(!props.compiled_content);
    }
}
