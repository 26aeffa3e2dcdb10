//! Resumable compilation routines.
//!
//! A routine is the explicit state machine behind one rep's instruction
//! list: a program counter plus the working content. When a filter asks
//! for a snapshot that does not exist yet, the routine returns
//! [`RoutineOutcome::Suspended`] without advancing, so the next
//! [`resume`](CompilationRoutine::resume) retries the same instruction.
//! One routine is created per rep per run and never restarted; snapshots
//! recorded before a suspension stay recorded.

use stanza_model::{
    CompileInstruction, DependencyRecord, FilterError, Item, ItemRep, Snapshot, SnapshotView,
    UnmetDependency,
};

use crate::error::CompileError;
use crate::filters::FilterRegistry;

/// What a resume attempt ended with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutineOutcome {
    /// Every instruction ran; the rep's snapshots are complete.
    Completed,
    /// The current instruction needs a snapshot that is not available
    /// yet. The routine is parked until the blocking rep produces it.
    Suspended(UnmetDependency),
}

pub struct CompilationRoutine {
    instructions: Vec<CompileInstruction>,
    pc: usize,
    content: String,
    attempts: usize,
}

impl CompilationRoutine {
    pub fn new(instructions: Vec<CompileInstruction>, item: &Item) -> Self {
        Self {
            instructions,
            pc: 0,
            content: item.content.clone(),
            attempts: 0,
        }
    }

    /// How many times this routine has been (re)entered.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn is_finished(&self) -> bool {
        self.pc >= self.instructions.len()
    }

    /// Run instructions from the current program counter until the routine
    /// completes, suspends, or fails.
    ///
    /// `recorded` collects the dependency edges of every read the filters
    /// perform, including reads on attempts that end in suspension.
    pub fn resume(
        &mut self,
        rep: &mut ItemRep,
        item: &Item,
        filters: &FilterRegistry,
        view: &dyn SnapshotView,
        recorded: &mut Vec<DependencyRecord>,
    ) -> Result<RoutineOutcome, CompileError> {
        self.attempts += 1;

        while self.pc < self.instructions.len() {
            // Clone keeps `self` borrowable inside the filter call.
            let instruction = self.instructions[self.pc].clone();
            match instruction {
                CompileInstruction::Filter { name, params } => {
                    let filter = filters.get(&name).ok_or_else(|| {
                        CompileError::UnknownFilter { name: name.clone() }
                    })?;
                    // A blocked filter re-runs and re-records its reads,
                    // so reads from this attempt roll back on suspension.
                    let recorded_mark = recorded.len();
                    let mut ctx = stanza_model::FilterContext::new(
                        &rep.id, item, rep, view, recorded,
                    );
                    match filter.apply(&self.content, &params, &mut ctx) {
                        Ok(next) => self.content = next,
                        Err(FilterError::NeedsSnapshot(unmet)) => {
                            // pc stays put; the retry re-runs this filter.
                            recorded.truncate(recorded_mark);
                            return Ok(RoutineOutcome::Suspended(unmet));
                        }
                        Err(FilterError::Failed(message)) => {
                            return Err(CompileError::FilterFailed {
                                rep: rep.id.clone(),
                                name,
                                message,
                            });
                        }
                    }
                }
                CompileInstruction::Snapshot { name, path } => {
                    let mut snapshot = Snapshot::new(name, self.content.clone());
                    if let Some(path) = path {
                        snapshot = snapshot.written_to(path);
                    }
                    rep.add_snapshot(snapshot)?;
                }
                CompileInstruction::Write { path } => {
                    rep.add_snapshot(Snapshot::new("last", self.content.clone()).written_to(path))?;
                }
            }
            self.pc += 1;
        }

        // Routines without an explicit final step still expose their end
        // state to other reps under the conventional name.
        if rep.snapshot("last").is_none() {
            rep.add_snapshot(Snapshot::new("last", self.content.clone()))?;
        }
        Ok(RoutineOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stanza_model::{ItemId, RepId, SnapshotQuery};

    struct StubView {
        available: bool,
    }

    impl SnapshotView for StubView {
        fn query_snapshot(&self, _rep: &RepId, _name: &str) -> SnapshotQuery {
            if self.available {
                SnapshotQuery::Available("ready".to_string())
            } else {
                SnapshotQuery::NotYet
            }
        }

        fn item_ids(&self) -> Vec<ItemId> {
            Vec::new()
        }
    }

    fn instructions(raw: &str) -> Vec<CompileInstruction> {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn straight_line_routine_completes_in_one_attempt() {
        let item = Item::new("/donkey.md", "Donkey!");
        let mut rep = ItemRep::new(RepId::new("/donkey.md", "default"));
        let mut routine = CompilationRoutine::new(
            instructions(
                r#"[
                    {"op": "filter", "name": "identity"},
                    {"op": "snapshot", "name": "secret", "path": "/donkey-secret.html"},
                    {"op": "write", "path": "/donkey.html"}
                ]"#,
            ),
            &item,
        );
        let mut recorded = Vec::new();
        let outcome = routine
            .resume(
                &mut rep,
                &item,
                &FilterRegistry::new(),
                &StubView { available: true },
                &mut recorded,
            )
            .unwrap();

        assert_eq!(outcome, RoutineOutcome::Completed);
        assert_eq!(routine.attempts(), 1);
        assert_eq!(rep.snapshot("secret").unwrap().content, "Donkey!");
        assert_eq!(rep.snapshot("last").unwrap().content, "Donkey!");
        assert_eq!(rep.final_paths().len(), 2);
    }

    #[test]
    fn suspension_keeps_the_program_counter_and_earlier_snapshots() {
        let item = Item::new("/a.md", "before");
        let mut rep = ItemRep::new(RepId::new("/a.md", "default"));
        let mut routine = CompilationRoutine::new(
            instructions(
                r#"[
                    {"op": "snapshot", "name": "raw"},
                    {"op": "filter", "name": "embed", "params": {"item": "/b.md"}},
                    {"op": "write", "path": "/a.html"}
                ]"#,
            ),
            &item,
        );
        let filters = FilterRegistry::new();
        let mut recorded = Vec::new();

        let outcome = routine
            .resume(&mut rep, &item, &filters, &StubView { available: false }, &mut recorded)
            .unwrap();
        assert!(matches!(outcome, RoutineOutcome::Suspended(_)));
        assert!(rep.snapshot("raw").is_some(), "snapshot before suspension survives");

        let outcome = routine
            .resume(&mut rep, &item, &filters, &StubView { available: true }, &mut recorded)
            .unwrap();
        assert_eq!(outcome, RoutineOutcome::Completed);
        assert_eq!(routine.attempts(), 2);
        assert_eq!(rep.snapshot("last").unwrap().content, "before\nready");
    }

    #[test]
    fn routine_blocked_twice_completes_on_the_third_attempt() {
        use std::cell::Cell;

        // NotYet for the first two queries, available from the third on.
        struct CountingView {
            queries: Cell<u32>,
        }

        impl SnapshotView for CountingView {
            fn query_snapshot(&self, _rep: &RepId, _name: &str) -> SnapshotQuery {
                self.queries.set(self.queries.get() + 1);
                if self.queries.get() <= 2 {
                    SnapshotQuery::NotYet
                } else {
                    SnapshotQuery::Available("ready".to_string())
                }
            }

            fn item_ids(&self) -> Vec<ItemId> {
                Vec::new()
            }
        }

        let item = Item::new("/a.md", "start");
        let mut rep = ItemRep::new(RepId::new("/a.md", "default"));
        let mut routine = CompilationRoutine::new(
            instructions(
                r#"[
                    {"op": "filter", "name": "upcase"},
                    {"op": "filter", "name": "embed", "params": {"item": "/b.md"}},
                    {"op": "write", "path": "/a.html"}
                ]"#,
            ),
            &item,
        );
        let filters = FilterRegistry::new();
        let view = CountingView {
            queries: Cell::new(0),
        };
        let mut recorded = Vec::new();

        for _ in 0..2 {
            let outcome = routine
                .resume(&mut rep, &item, &filters, &view, &mut recorded)
                .unwrap();
            assert!(matches!(outcome, RoutineOutcome::Suspended(_)));
        }
        let outcome = routine
            .resume(&mut rep, &item, &filters, &view, &mut recorded)
            .unwrap();

        assert_eq!(outcome, RoutineOutcome::Completed);
        assert_eq!(routine.attempts(), 3);
        // The first filter ran exactly once; progress survived both pauses.
        assert_eq!(rep.snapshot("last").unwrap().content, "START\nready");
        // The blocked attempts rolled their reads back, so the edge to the
        // embedded rep appears once, not once per attempt.
        assert_eq!(recorded.len(), 1);
    }

    #[test]
    fn unknown_filter_is_an_error() {
        let item = Item::new("/a.md", "x");
        let mut rep = ItemRep::new(RepId::new("/a.md", "default"));
        let mut routine = CompilationRoutine::new(
            instructions(r#"[{"op": "filter", "name": "no_such_filter"}]"#),
            &item,
        );
        let mut recorded = Vec::new();
        let err = routine
            .resume(
                &mut rep,
                &item,
                &FilterRegistry::new(),
                &StubView { available: true },
                &mut recorded,
            )
            .unwrap_err();
        assert!(matches!(err, CompileError::UnknownFilter { .. }));
    }

    #[test]
    fn implicit_last_snapshot_is_added_on_completion() {
        let item = Item::new("/a.md", "plain");
        let mut rep = ItemRep::new(RepId::new("/a.md", "default"));
        let mut routine = CompilationRoutine::new(
            instructions(r#"[{"op": "filter", "name": "upcase"}]"#),
            &item,
        );
        let mut recorded = Vec::new();
        routine
            .resume(
                &mut rep,
                &item,
                &FilterRegistry::new(),
                &StubView { available: true },
                &mut recorded,
            )
            .unwrap();
        assert_eq!(rep.snapshot("last").unwrap().content, "PLAIN");
        assert!(rep.final_paths().is_empty());
    }
}
