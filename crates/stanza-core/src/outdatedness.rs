//! Outdatedness checking: why a rep needs recompiling, if at all.
//!
//! A statically ordered list of rules behind a common trait, evaluated
//! cheapest-first; the first matching rule wins. Rules are pure functions
//! of the checked rep and the store, which is what makes re-evaluation
//! after a dependency resolves safe. A rule that cannot evaluate reports
//! outdated (fail-safe, never fail-silent-as-fresh).
//!
//! On top of the basic rules sits the transitive pass: a rep whose recorded
//! dependencies point at an outdated target is itself outdated, provided
//! the recorded aspects overlap the aspects the target's reason affects.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use stanza_model::{
    DependencyTarget, Item, ItemId, OutdatednessReason, RepId, RuleSet,
};

use crate::checksum;
use crate::pruner::resolve_output_path;
use crate::store::{self, DependencyStore};

/// Everything a rule may consult. Read-only.
pub struct CheckerInput<'a> {
    pub store: &'a DependencyStore,
    pub items: &'a BTreeMap<ItemId, Item>,
    pub rules: &'a RuleSet,
    pub output_root: &'a Path,
    pub forced: bool,
}

/// A rule failed to produce an answer; the checker treats the rep as
/// outdated and logs the cause.
#[derive(Debug, thiserror::Error)]
#[error("outdatedness rule {rule} could not evaluate {rep}: {message}")]
pub struct CheckFailure {
    pub rule: &'static str,
    pub rep: RepId,
    pub message: String,
}

/// One aspect test. Implementations must be pure: no side effects, no
/// mutation of the store.
pub trait OutdatednessRule {
    fn rule_name(&self) -> &'static str;

    fn check(
        &self,
        rep: &RepId,
        cx: &CheckerInput<'_>,
    ) -> Result<Option<OutdatednessReason>, CheckFailure>;

    /// Reason reported when this rule cannot evaluate (fail-safe).
    fn fail_safe_reason(&self) -> OutdatednessReason;
}

/// Recompilation was requested explicitly (`--force`).
struct ForcedRule;

impl OutdatednessRule for ForcedRule {
    fn rule_name(&self) -> &'static str {
        "forced"
    }

    fn check(
        &self,
        _rep: &RepId,
        cx: &CheckerInput<'_>,
    ) -> Result<Option<OutdatednessReason>, CheckFailure> {
        Ok(cx.forced.then_some(OutdatednessReason::Forced))
    }

    fn fail_safe_reason(&self) -> OutdatednessReason {
        OutdatednessReason::Forced
    }
}

/// The previous run's persisted state was missing or unreadable.
struct PreviousRunCorruptRule;

impl OutdatednessRule for PreviousRunCorruptRule {
    fn rule_name(&self) -> &'static str {
        "previous_run_corrupt"
    }

    fn check(
        &self,
        _rep: &RepId,
        cx: &CheckerInput<'_>,
    ) -> Result<Option<OutdatednessReason>, CheckFailure> {
        Ok(cx
            .store
            .previous_corrupt()
            .then_some(OutdatednessReason::PreviousRunCorrupt))
    }

    fn fail_safe_reason(&self) -> OutdatednessReason {
        OutdatednessReason::PreviousRunCorrupt
    }
}

/// The compile instruction list for this rep changed since the last run.
/// Also fires for reps the store has never recorded a rule checksum for —
/// brand-new reps and reps whose previous compilation failed.
struct RulesModifiedRule;

impl OutdatednessRule for RulesModifiedRule {
    fn rule_name(&self) -> &'static str {
        "rules_modified"
    }

    fn check(
        &self,
        rep: &RepId,
        cx: &CheckerInput<'_>,
    ) -> Result<Option<OutdatednessReason>, CheckFailure> {
        let item = cx.items.get(&rep.item).ok_or_else(|| CheckFailure {
            rule: self.rule_name(),
            rep: rep.clone(),
            message: format!("item {} is not loaded", rep.item),
        })?;
        let rule = cx.rules.rule_for(item).ok_or_else(|| CheckFailure {
            rule: self.rule_name(),
            rep: rep.clone(),
            message: "no compile rule matches".to_string(),
        })?;
        let digest = checksum::digest_instructions(&rule.instructions);
        Ok(match cx.store.previous_checksum(&store::rules_key(rep)) {
            Some(previous) if *previous == digest => None,
            _ => Some(OutdatednessReason::RulesModified),
        })
    }

    fn fail_safe_reason(&self) -> OutdatednessReason {
        OutdatednessReason::RulesModified
    }
}

/// The item's raw content checksum no longer matches the recorded one.
struct ContentModifiedRule;

impl OutdatednessRule for ContentModifiedRule {
    fn rule_name(&self) -> &'static str {
        "content_modified"
    }

    fn check(
        &self,
        rep: &RepId,
        cx: &CheckerInput<'_>,
    ) -> Result<Option<OutdatednessReason>, CheckFailure> {
        let item = cx.items.get(&rep.item).ok_or_else(|| CheckFailure {
            rule: self.rule_name(),
            rep: rep.clone(),
            message: format!("item {} is not loaded", rep.item),
        })?;
        let digest = checksum::digest_content(&item.content);
        Ok(
            match cx.store.previous_checksum(&store::content_key(&rep.item)) {
                Some(previous) if *previous == digest => None,
                _ => Some(OutdatednessReason::ContentModified),
            },
        )
    }

    fn fail_safe_reason(&self) -> OutdatednessReason {
        OutdatednessReason::ContentModified
    }
}

/// The item's attribute checksum no longer matches the recorded one.
struct AttributesModifiedRule;

impl OutdatednessRule for AttributesModifiedRule {
    fn rule_name(&self) -> &'static str {
        "attributes_modified"
    }

    fn check(
        &self,
        rep: &RepId,
        cx: &CheckerInput<'_>,
    ) -> Result<Option<OutdatednessReason>, CheckFailure> {
        let item = cx.items.get(&rep.item).ok_or_else(|| CheckFailure {
            rule: self.rule_name(),
            rep: rep.clone(),
            message: format!("item {} is not loaded", rep.item),
        })?;
        let digest = checksum::digest_attributes(&item.attributes);
        Ok(
            match cx
                .store
                .previous_checksum(&store::attributes_key(&rep.item))
            {
                Some(previous) if *previous == digest => None,
                _ => Some(OutdatednessReason::AttributesModified),
            },
        )
    }

    fn fail_safe_reason(&self) -> OutdatednessReason {
        OutdatednessReason::AttributesModified
    }
}

/// The rep's previous snapshots are unusable: never recorded, or a final
/// output file has gone missing from the output root.
struct SnapshotBrokenRule;

impl OutdatednessRule for SnapshotBrokenRule {
    fn rule_name(&self) -> &'static str {
        "snapshot_broken"
    }

    fn check(
        &self,
        rep: &RepId,
        cx: &CheckerInput<'_>,
    ) -> Result<Option<OutdatednessReason>, CheckFailure> {
        let Some(snapshots) = cx.store.previous_snapshots(rep) else {
            return Ok(Some(OutdatednessReason::SnapshotsBroken));
        };
        for snapshot in snapshots {
            if let Some(declared) = &snapshot.output_path {
                let on_disk = resolve_output_path(cx.output_root, declared);
                if !on_disk.is_file() {
                    return Ok(Some(OutdatednessReason::SnapshotsBroken));
                }
            }
        }
        Ok(None)
    }

    fn fail_safe_reason(&self) -> OutdatednessReason {
        OutdatednessReason::SnapshotsBroken
    }
}

/// The ordered rule list plus the transitive dependency pass.
pub struct OutdatednessChecker<'a> {
    input: CheckerInput<'a>,
    rules: Vec<Box<dyn OutdatednessRule>>,
    basic_cache: RefCell<BTreeMap<RepId, Option<OutdatednessReason>>>,
    new_items_cache: RefCell<Option<Vec<ItemId>>>,
}

impl<'a> OutdatednessChecker<'a> {
    pub fn new(
        store: &'a DependencyStore,
        items: &'a BTreeMap<ItemId, Item>,
        rules: &'a RuleSet,
        output_root: &'a Path,
        forced: bool,
    ) -> Self {
        Self {
            input: CheckerInput {
                store,
                items,
                rules,
                output_root,
                forced,
            },
            rules: vec![
                Box::new(ForcedRule),
                Box::new(PreviousRunCorruptRule),
                Box::new(RulesModifiedRule),
                Box::new(ContentModifiedRule),
                Box::new(AttributesModifiedRule),
                Box::new(SnapshotBrokenRule),
            ],
            basic_cache: RefCell::new(BTreeMap::new()),
            new_items_cache: RefCell::new(None),
        }
    }

    /// Reason from the rule list alone, without following dependencies.
    /// Memoized for the run; rules are pure, so this is sound.
    pub fn basic_reason(&self, rep: &RepId) -> Option<OutdatednessReason> {
        if let Some(cached) = self.basic_cache.borrow().get(rep) {
            return cached.clone();
        }
        let mut reason = None;
        for rule in &self.rules {
            match rule.check(rep, &self.input) {
                Ok(Some(matched)) => {
                    tracing::debug!(rep = %rep, rule = rule.rule_name(), reason = %matched, "rep outdated");
                    reason = Some(matched);
                    break;
                }
                Ok(None) => {}
                Err(failure) => {
                    tracing::warn!(rep = %rep, error = %failure, "rule could not evaluate; treating rep as outdated");
                    reason = Some(rule.fail_safe_reason());
                    break;
                }
            }
        }
        self.basic_cache
            .borrow_mut()
            .insert(rep.clone(), reason.clone());
        reason
    }

    /// Whether new items extended the collection since the last run.
    pub fn collection_reason(&self) -> Option<OutdatednessReason> {
        let new_items = self.new_items();
        if new_items.is_empty() {
            None
        } else {
            Some(OutdatednessReason::NewItems { items: new_items })
        }
    }

    /// Full answer for a rep: basic rules first, then recorded
    /// dependencies, transitively.
    pub fn reason_for(&self, rep: &RepId) -> Option<OutdatednessReason> {
        self.reason_with_visited(rep, &mut BTreeSet::new())
    }

    pub fn is_outdated(&self, rep: &RepId) -> bool {
        self.reason_for(rep).is_some()
    }

    fn reason_with_visited(
        &self,
        rep: &RepId,
        visited: &mut BTreeSet<RepId>,
    ) -> Option<OutdatednessReason> {
        if !visited.insert(rep.clone()) {
            // Dependency cycle in the recorded graph; the rep currently
            // being checked further up the stack answers for it.
            return None;
        }
        if let Some(reason) = self.basic_reason(rep) {
            return Some(reason);
        }

        for edge in self.input.store.dependencies_of(rep) {
            match &edge.to {
                DependencyTarget::Rep { rep: target } => {
                    if let Some(target_reason) = self.reason_with_visited(target, visited)
                        && edge.props.intersects(&target_reason.props())
                    {
                        return Some(OutdatednessReason::DependenciesOutdated {
                            on: target.clone(),
                        });
                    }
                }
                DependencyTarget::Item { item } => {
                    if let Some(reason) = self.item_target_reason(item, &edge.props) {
                        return Some(reason);
                    }
                }
                DependencyTarget::Collection => {
                    if edge.props.raw_content
                        && let Some(reason) = self.collection_reason()
                    {
                        return Some(reason);
                    }
                }
            }
        }
        None
    }

    /// Direct checksum comparison for a recorded item-target edge.
    fn item_target_reason(
        &self,
        item: &ItemId,
        props: &stanza_model::DependencyProps,
    ) -> Option<OutdatednessReason> {
        let Some(current) = self.input.items.get(item) else {
            // The depended-on item vanished; the read can no longer be
            // reproduced, so the depender must recompile.
            return Some(OutdatednessReason::ContentModified);
        };
        if props.attributes {
            let digest = checksum::digest_attributes(&current.attributes);
            match self
                .input
                .store
                .previous_checksum(&store::attributes_key(item))
            {
                Some(previous) if *previous == digest => {}
                _ => return Some(OutdatednessReason::AttributesModified),
            }
        }
        if props.raw_content {
            let digest = checksum::digest_content(&current.content);
            match self.input.store.previous_checksum(&store::content_key(item)) {
                Some(previous) if *previous == digest => {}
                _ => return Some(OutdatednessReason::ContentModified),
            }
        }
        None
    }

    fn new_items(&self) -> Vec<ItemId> {
        if let Some(cached) = self.new_items_cache.borrow().as_ref() {
            return cached.clone();
        }
        let computed = self.input.store.new_items();
        *self.new_items_cache.borrow_mut() = Some(computed.clone());
        computed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stanza_model::{
        CompileInstruction, CompileRule, DependencyProps, DependencyRecord, Snapshot,
    };
    use tempfile::tempdir;

    fn rules_for_everything() -> RuleSet {
        RuleSet::new(vec![CompileRule {
            pattern: "/*".to_string(),
            rep: "default".to_string(),
            instructions: vec![CompileInstruction::Write {
                path: "/out.html".into(),
            }],
        }])
    }

    fn item_map(entries: &[(&str, &str)]) -> BTreeMap<ItemId, Item> {
        entries
            .iter()
            .map(|(id, content)| {
                let item = Item::new(*id, *content);
                (item.id.clone(), item)
            })
            .collect()
    }

    fn complete_run(
        store: &DependencyStore,
        items: &BTreeMap<ItemId, Item>,
        rules: &RuleSet,
        output_root: &Path,
    ) {
        store.begin_run(items);
        for item in items.values() {
            let rule = rules.rule_for(item).unwrap();
            let rep = RepId::new(item.id.clone(), rule.rep.clone());
            store.record_checksum(
                store::rules_key(&rep),
                checksum::digest_instructions(&rule.instructions),
            );
            let declared = std::path::PathBuf::from("/out.html");
            std::fs::create_dir_all(output_root).unwrap();
            std::fs::write(resolve_output_path(output_root, &declared), "x").unwrap();
            store.record_snapshots(&rep, &[Snapshot::new("last", "x").written_to(declared)]);
        }
    }

    #[test]
    fn first_run_reps_are_outdated() {
        let out = tempdir().unwrap();
        let store = DependencyStore::empty();
        let items = item_map(&[("/a.md", "hello")]);
        store.begin_run(&items);
        let rules = rules_for_everything();
        let checker = OutdatednessChecker::new(&store, &items, &rules, out.path(), false);

        assert!(checker.is_outdated(&RepId::new("/a.md", "default")));
    }

    #[test]
    fn unchanged_rep_is_fresh_after_a_completed_run() {
        let dir = tempdir().unwrap();
        let out = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let items = item_map(&[("/a.md", "hello")]);
        let rules = rules_for_everything();

        let store = DependencyStore::empty();
        complete_run(&store, &items, &rules, out.path());
        store.persist(&path).unwrap();

        let (store, _) = DependencyStore::open(&path).unwrap();
        store.begin_run(&items);
        let checker = OutdatednessChecker::new(&store, &items, &rules, out.path(), false);
        assert_eq!(checker.reason_for(&RepId::new("/a.md", "default")), None);
    }

    #[test]
    fn changed_content_is_detected() {
        let dir = tempdir().unwrap();
        let out = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let rules = rules_for_everything();

        let store = DependencyStore::empty();
        complete_run(&store, &item_map(&[("/a.md", "hello")]), &rules, out.path());
        store.persist(&path).unwrap();

        let items = item_map(&[("/a.md", "changed")]);
        let (store, _) = DependencyStore::open(&path).unwrap();
        store.begin_run(&items);
        let checker = OutdatednessChecker::new(&store, &items, &rules, out.path(), false);
        assert_eq!(
            checker.reason_for(&RepId::new("/a.md", "default")),
            Some(OutdatednessReason::ContentModified)
        );
    }

    #[test]
    fn force_wins_over_everything() {
        let dir = tempdir().unwrap();
        let out = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let items = item_map(&[("/a.md", "hello")]);
        let rules = rules_for_everything();

        let store = DependencyStore::empty();
        complete_run(&store, &items, &rules, out.path());
        store.persist(&path).unwrap();

        let (store, _) = DependencyStore::open(&path).unwrap();
        store.begin_run(&items);
        let checker = OutdatednessChecker::new(&store, &items, &rules, out.path(), true);
        assert_eq!(
            checker.reason_for(&RepId::new("/a.md", "default")),
            Some(OutdatednessReason::Forced)
        );
    }

    #[test]
    fn missing_output_file_marks_snapshots_broken() {
        let dir = tempdir().unwrap();
        let out = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let items = item_map(&[("/a.md", "hello")]);
        let rules = rules_for_everything();

        let store = DependencyStore::empty();
        complete_run(&store, &items, &rules, out.path());
        store.persist(&path).unwrap();
        std::fs::remove_file(out.path().join("out.html")).unwrap();

        let (store, _) = DependencyStore::open(&path).unwrap();
        store.begin_run(&items);
        let checker = OutdatednessChecker::new(&store, &items, &rules, out.path(), false);
        assert_eq!(
            checker.reason_for(&RepId::new("/a.md", "default")),
            Some(OutdatednessReason::SnapshotsBroken)
        );
    }

    #[test]
    fn dependency_on_changed_item_propagates_when_props_overlap() {
        let dir = tempdir().unwrap();
        let out = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let rules = rules_for_everything();
        let a = RepId::new("/a.md", "default");
        let b = RepId::new("/b.md", "default");

        let store = DependencyStore::empty();
        complete_run(
            &store,
            &item_map(&[("/a.md", "embeds b"), ("/b.md", "b v1")]),
            &rules,
            out.path(),
        );
        store.record_dependency(DependencyRecord {
            from: a.clone(),
            to: DependencyTarget::Rep { rep: b.clone() },
            props: DependencyProps::compiled_content_only(),
        });
        store.persist(&path).unwrap();

        // /b.md changes; /a.md must follow through its recorded edge.
        let items = item_map(&[("/a.md", "embeds b"), ("/b.md", "b v2")]);
        let (store, _) = DependencyStore::open(&path).unwrap();
        store.begin_run(&items);
        let checker = OutdatednessChecker::new(&store, &items, &rules, out.path(), false);
        assert_eq!(
            checker.reason_for(&b),
            Some(OutdatednessReason::ContentModified)
        );
        assert_eq!(
            checker.reason_for(&a),
            Some(OutdatednessReason::DependenciesOutdated { on: b })
        );
    }

    #[test]
    fn collection_dependency_fires_on_new_items() {
        let dir = tempdir().unwrap();
        let out = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let rules = rules_for_everything();
        let index = RepId::new("/index.md", "default");

        let store = DependencyStore::empty();
        complete_run(&store, &item_map(&[("/index.md", "list")]), &rules, out.path());
        store.record_dependency(DependencyRecord {
            from: index.clone(),
            to: DependencyTarget::Collection,
            props: DependencyProps::raw_content_only(),
        });
        store.persist(&path).unwrap();

        let items = item_map(&[("/index.md", "list"), ("/new.md", "fresh")]);
        let (store, _) = DependencyStore::open(&path).unwrap();
        store.begin_run(&items);
        let checker = OutdatednessChecker::new(&store, &items, &rules, out.path(), false);
        assert!(matches!(
            checker.reason_for(&index),
            Some(OutdatednessReason::NewItems { .. })
        ));
    }

    #[test]
    fn recorded_cycles_do_not_recurse_forever() {
        let dir = tempdir().unwrap();
        let out = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let rules = rules_for_everything();
        let a = RepId::new("/a.md", "default");
        let b = RepId::new("/b.md", "default");

        let store = DependencyStore::empty();
        complete_run(
            &store,
            &item_map(&[("/a.md", "a"), ("/b.md", "b")]),
            &rules,
            out.path(),
        );
        for (from, to) in [(a.clone(), b.clone()), (b.clone(), a.clone())] {
            store.record_dependency(DependencyRecord {
                from,
                to: DependencyTarget::Rep { rep: to },
                props: DependencyProps::compiled_content_only(),
            });
        }
        store.persist(&path).unwrap();

        let items = item_map(&[("/a.md", "a"), ("/b.md", "b")]);
        let (store, _) = DependencyStore::open(&path).unwrap();
        store.begin_run(&items);
        let checker = OutdatednessChecker::new(&store, &items, &rules, out.path(), false);
        assert_eq!(checker.reason_for(&a), None);
    }
}
