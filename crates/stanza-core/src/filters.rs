//! Filter registry and the built-in content filters.
//!
//! The engine treats filters as black boxes behind the [`Filter`] trait;
//! this module owns the name -> implementation table and a small set of
//! built-ins that cover the common cases: passthrough, case mapping,
//! attribute-driven headers, snapshot embedding, and collection listings.

use std::collections::BTreeMap;

use stanza_model::{AttributeValue, Filter, FilterContext, FilterError, RepId};

/// Name -> filter table. Populated with the built-ins by default; callers
/// register their own transforms on top.
pub struct FilterRegistry {
    filters: BTreeMap<String, Box<dyn Filter>>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        let mut registry = Self {
            filters: BTreeMap::new(),
        };
        registry.register("identity", Identity);
        registry.register("upcase", Upcase);
        registry.register("title_header", TitleHeader);
        registry.register("embed", Embed);
        registry.register("item_list", ItemList);
        registry
    }
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty registry, without the built-ins.
    pub fn bare() -> Self {
        Self {
            filters: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, name: impl Into<String>, filter: impl Filter + 'static) {
        self.filters.insert(name.into(), Box::new(filter));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Filter> {
        self.filters.get(name).map(Box::as_ref)
    }

    pub fn names(&self) -> Vec<&str> {
        self.filters.keys().map(String::as_str).collect()
    }
}

fn str_param<'a>(
    params: &'a BTreeMap<String, AttributeValue>,
    key: &str,
) -> Option<&'a str> {
    match params.get(key) {
        Some(AttributeValue::String(s)) => Some(s.as_str()),
        _ => None,
    }
}

/// Passes content through unchanged.
struct Identity;

impl Filter for Identity {
    fn apply(
        &self,
        content: &str,
        _params: &BTreeMap<String, AttributeValue>,
        _ctx: &mut FilterContext<'_>,
    ) -> Result<String, FilterError> {
        Ok(content.to_string())
    }
}

/// Uppercases the content.
struct Upcase;

impl Filter for Upcase {
    fn apply(
        &self,
        content: &str,
        _params: &BTreeMap<String, AttributeValue>,
        _ctx: &mut FilterContext<'_>,
    ) -> Result<String, FilterError> {
        Ok(content.to_uppercase())
    }
}

/// Prepends a Markdown header built from the item's `title` attribute.
/// Content is returned unchanged when the item has no title.
struct TitleHeader;

impl Filter for TitleHeader {
    fn apply(
        &self,
        content: &str,
        _params: &BTreeMap<String, AttributeValue>,
        ctx: &mut FilterContext<'_>,
    ) -> Result<String, FilterError> {
        match ctx.attribute("title") {
            Some(AttributeValue::String(title)) => Ok(format!("# {title}\n\n{content}")),
            Some(other) => Err(FilterError::Failed(format!(
                "title attribute must be a string, got {other:?}"
            ))),
            None => Ok(content.to_string()),
        }
    }
}

/// Embeds the compiled snapshot of another rep.
///
/// Params: `item` (required), `rep` (default `default`), `snapshot`
/// (default `last`), `marker` (optional). With a marker every occurrence
/// in the content is replaced; without one the snapshot is appended.
/// Suspends the routine when the snapshot does not exist yet.
struct Embed;

impl Filter for Embed {
    fn apply(
        &self,
        content: &str,
        params: &BTreeMap<String, AttributeValue>,
        ctx: &mut FilterContext<'_>,
    ) -> Result<String, FilterError> {
        let item = str_param(params, "item")
            .ok_or_else(|| FilterError::Failed("embed: missing item param".to_string()))?;
        let rep = RepId::new(item, str_param(params, "rep").unwrap_or("default"));
        let snapshot = str_param(params, "snapshot").unwrap_or("last");

        let embedded = ctx.compiled_snapshot(&rep, snapshot)?;
        Ok(match str_param(params, "marker") {
            Some(marker) => content.replace(marker, &embedded),
            None if content.is_empty() => embedded,
            None => format!("{content}\n{embedded}"),
        })
    }
}

/// Appends a listing of every item in the collection, one id per line.
/// Records a collection dependency, so new items re-trigger this rep.
struct ItemList;

impl Filter for ItemList {
    fn apply(
        &self,
        content: &str,
        params: &BTreeMap<String, AttributeValue>,
        ctx: &mut FilterContext<'_>,
    ) -> Result<String, FilterError> {
        let prefix = str_param(params, "prefix").unwrap_or("- ");
        let listing = ctx
            .collection()
            .iter()
            .map(|id| format!("{prefix}{id}"))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(if content.is_empty() {
            listing
        } else {
            format!("{content}\n{listing}")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stanza_model::{Item, ItemId, ItemRep, SnapshotQuery, SnapshotView};

    struct FixedView;

    impl SnapshotView for FixedView {
        fn query_snapshot(&self, rep: &RepId, name: &str) -> SnapshotQuery {
            if rep.item.as_str() == "/other.md" && name == "last" {
                SnapshotQuery::Available("embedded!".to_string())
            } else {
                SnapshotQuery::NotYet
            }
        }

        fn item_ids(&self) -> Vec<ItemId> {
            vec![ItemId::new("/a.md"), ItemId::new("/b.md")]
        }
    }

    fn apply(
        name: &str,
        content: &str,
        params: BTreeMap<String, AttributeValue>,
        item: &Item,
    ) -> Result<String, FilterError> {
        let registry = FilterRegistry::new();
        let rep_id = RepId::new(item.id.clone(), "default");
        let rep = ItemRep::new(rep_id.clone());
        let mut recorded = Vec::new();
        let mut ctx = FilterContext::new(&rep_id, item, &rep, &FixedView, &mut recorded);
        registry
            .get(name)
            .expect("built-in filter registered")
            .apply(content, &params, &mut ctx)
    }

    #[test]
    fn upcase_uppercases() {
        let item = Item::new("/a.md", "donkey");
        assert_eq!(apply("upcase", "donkey", BTreeMap::new(), &item).unwrap(), "DONKEY");
    }

    #[test]
    fn title_header_uses_the_title_attribute() {
        let item = Item::new("/a.md", "body").with_attribute("title", "Hello".into());
        assert_eq!(
            apply("title_header", "body", BTreeMap::new(), &item).unwrap(),
            "# Hello\n\nbody"
        );
    }

    #[test]
    fn embed_replaces_markers() {
        let item = Item::new("/a.md", "");
        let mut params = BTreeMap::new();
        params.insert("item".to_string(), AttributeValue::String("/other.md".into()));
        params.insert("marker".to_string(), AttributeValue::String("%HERE%".into()));
        assert_eq!(
            apply("embed", "before %HERE% after", params, &item).unwrap(),
            "before embedded! after"
        );
    }

    #[test]
    fn embed_suspends_on_missing_snapshot() {
        let item = Item::new("/a.md", "");
        let mut params = BTreeMap::new();
        params.insert("item".to_string(), AttributeValue::String("/pending.md".into()));
        let err = apply("embed", "", params, &item).unwrap_err();
        assert!(matches!(err, FilterError::NeedsSnapshot(_)));
    }

    #[test]
    fn item_list_enumerates_the_collection() {
        let item = Item::new("/index.md", "");
        assert_eq!(
            apply("item_list", "", BTreeMap::new(), &item).unwrap(),
            "- /a.md\n- /b.md"
        );
    }
}
