//! The filter boundary: content transforms supplied by collaborators.
//!
//! Filters are black boxes from the engine's point of view. Everything they
//! read beyond their input content goes through [`FilterContext`], which
//! records dependency edges as a side effect and surfaces not-yet-available
//! snapshots as [`FilterError::NeedsSnapshot`].

use std::collections::BTreeMap;

use crate::dependency::{DependencyProps, DependencyRecord, DependencyTarget};
use crate::item::{AttributeValue, Item, ItemId};
use crate::rep::{ItemRep, RepId, UnmetDependency};

/// Outcome of asking the engine for another rep's snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotQuery {
    /// The snapshot exists; here is its content.
    Available(String),
    /// The rep exists but has not produced that snapshot yet.
    NotYet,
    /// No such rep is scheduled this run.
    UnknownRep,
}

/// Read access to the rest of the run, implemented by the engine.
pub trait SnapshotView {
    fn query_snapshot(&self, rep: &RepId, name: &str) -> SnapshotQuery;

    /// Identifiers of every item in the current collection, in order.
    fn item_ids(&self) -> Vec<ItemId>;
}

/// Errors a filter can surface.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// Not a true error: the requested snapshot does not exist yet.
    /// The routine suspends and retries once the target rep is done.
    #[error("{0}")]
    NeedsSnapshot(UnmetDependency),

    /// The filter genuinely failed; the rep is marked failed.
    #[error("{0}")]
    Failed(String),
}

/// Per-invocation handle given to filters.
///
/// Every read is recorded as a dependency edge so the next run's
/// outdatedness checks can follow it.
pub struct FilterContext<'a> {
    rep: &'a RepId,
    item: &'a Item,
    current: &'a ItemRep,
    view: &'a dyn SnapshotView,
    recorded: &'a mut Vec<DependencyRecord>,
}

impl<'a> FilterContext<'a> {
    pub fn new(
        rep: &'a RepId,
        item: &'a Item,
        current: &'a ItemRep,
        view: &'a dyn SnapshotView,
        recorded: &'a mut Vec<DependencyRecord>,
    ) -> Self {
        Self {
            rep,
            item,
            current,
            view,
            recorded,
        }
    }

    pub fn rep(&self) -> &RepId {
        self.rep
    }

    pub fn item(&self) -> &Item {
        self.item
    }

    /// Read one of the owning item's attributes.
    pub fn attribute(&mut self, key: &str) -> Option<AttributeValue> {
        self.record(
            DependencyTarget::Item {
                item: self.item.id.clone(),
            },
            DependencyProps::attributes_only(),
        );
        self.item.attributes.get(key).cloned()
    }

    /// Read the compiled snapshot of another rep (or an earlier snapshot of
    /// this one). Suspends via `NeedsSnapshot` when it does not exist yet.
    pub fn compiled_snapshot(&mut self, rep: &RepId, name: &str) -> Result<String, FilterError> {
        self.record(
            DependencyTarget::Rep { rep: rep.clone() },
            DependencyProps::compiled_content_only(),
        );
        if rep == self.rep {
            return match self.current.snapshot(name) {
                Some(snapshot) => Ok(snapshot.content.clone()),
                None => Err(FilterError::Failed(format!(
                    "rep {rep} has no snapshot {name} of itself yet"
                ))),
            };
        }
        match self.view.query_snapshot(rep, name) {
            SnapshotQuery::Available(content) => Ok(content),
            SnapshotQuery::NotYet => Err(FilterError::NeedsSnapshot(UnmetDependency {
                rep: rep.clone(),
                snapshot: name.to_string(),
            })),
            SnapshotQuery::UnknownRep => Err(FilterError::Failed(format!(
                "rep {rep} is not part of this run"
            ))),
        }
    }

    /// Enumerate the item collection, recording a collection dependency.
    pub fn collection(&mut self) -> Vec<ItemId> {
        self.record(
            DependencyTarget::Collection,
            DependencyProps::raw_content_only(),
        );
        self.view.item_ids()
    }

    fn record(&mut self, to: DependencyTarget, props: DependencyProps) {
        self.recorded.push(DependencyRecord {
            from: self.rep.clone(),
            to,
            props,
        });
    }
}

/// A content filter: `content × params -> content`.
pub trait Filter: Send + Sync {
    fn apply(
        &self,
        content: &str,
        params: &BTreeMap<String, AttributeValue>,
        ctx: &mut FilterContext<'_>,
    ) -> Result<String, FilterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyView;

    impl SnapshotView for EmptyView {
        fn query_snapshot(&self, _rep: &RepId, _name: &str) -> SnapshotQuery {
            SnapshotQuery::NotYet
        }

        fn item_ids(&self) -> Vec<ItemId> {
            vec![ItemId::new("/a.md")]
        }
    }

    #[test]
    fn attribute_read_records_an_edge() {
        let item = Item::new("/a.md", "hello").with_attribute("title", "A".into());
        let rep_id = RepId::new(item.id.clone(), "default");
        let rep = ItemRep::new(rep_id.clone());
        let mut recorded = Vec::new();
        let mut ctx = FilterContext::new(&rep_id, &item, &rep, &EmptyView, &mut recorded);

        let title = ctx.attribute("title");
        assert_eq!(title, Some(AttributeValue::String("A".into())));
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].props.attributes);
    }

    #[test]
    fn missing_snapshot_surfaces_unmet_dependency() {
        let item = Item::new("/a.md", "hello");
        let rep_id = RepId::new(item.id.clone(), "default");
        let rep = ItemRep::new(rep_id.clone());
        let other = RepId::new("/b.md", "default");
        let mut recorded = Vec::new();
        let mut ctx = FilterContext::new(&rep_id, &item, &rep, &EmptyView, &mut recorded);

        match ctx.compiled_snapshot(&other, "last") {
            Err(FilterError::NeedsSnapshot(unmet)) => {
                assert_eq!(unmet.rep, other);
                assert_eq!(unmet.snapshot, "last");
            }
            other => panic!("expected NeedsSnapshot, got {other:?}"),
        }
    }
}
