//! Dependency records: typed edges between reps, items, and the collection.

use serde::{Deserialize, Serialize};

use crate::item::ItemId;
use crate::rep::RepId;

/// Which aspects of the target were read during compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DependencyProps {
    pub raw_content: bool,
    pub attributes: bool,
    pub compiled_content: bool,
}

impl DependencyProps {
    pub fn all() -> Self {
        Self {
            raw_content: true,
            attributes: true,
            compiled_content: true,
        }
    }

    pub fn raw_content_only() -> Self {
        Self {
            raw_content: true,
            ..Self::default()
        }
    }

    pub fn attributes_only() -> Self {
        Self {
            attributes: true,
            ..Self::default()
        }
    }

    pub fn compiled_content_only() -> Self {
        Self {
            compiled_content: true,
            ..Self::default()
        }
    }

    /// True when any aspect is set in both flag sets.
    pub fn intersects(&self, other: &DependencyProps) -> bool {
        (self.raw_content && other.raw_content)
            || (self.attributes && other.attributes)
            || (self.compiled_content && other.compiled_content)
    }
}

/// What a dependency edge points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum DependencyTarget {
    /// Another rep's compiled content.
    Rep { rep: RepId },
    /// An item's raw content or attributes.
    Item { item: ItemId },
    /// The item collection as a whole (listing pages and the like).
    Collection,
}

/// One recorded edge: `from` read the given aspects of `to`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyRecord {
    pub from: RepId,
    pub to: DependencyTarget,
    pub props: DependencyProps,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disjoint_props_do_not_intersect() {
        let read = DependencyProps::attributes_only();
        let changed = DependencyProps::raw_content_only();
        assert!(!read.intersects(&changed));
        assert!(read.intersects(&DependencyProps::all()));
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = DependencyRecord {
            from: RepId::new(ItemId::new("/a.md"), "default"),
            to: DependencyTarget::Collection,
            props: DependencyProps::raw_content_only(),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: DependencyRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
