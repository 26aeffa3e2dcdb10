//! The run scheduler: drives every rep to done, suspended, or failed.
//!
//! One queue, one attempt at a time. A suspended rep parks on a waiter
//! list keyed by the rep it is blocked on and is re-queued when that rep
//! finishes; its routine resumes where it left off, never restarts. A
//! failed rep fails every rep transitively blocked on it. When the queue
//! drains with suspended reps remaining, the run deadlocked; the error
//! names the stuck reps and, when one exists, the dependency cycle.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;

use stanza_model::{
    CompileInstruction, Item, ItemId, ItemRep, RepId, RuleSet, SnapshotQuery, SnapshotView,
};

use crate::error::{CompileError, RunError};
use crate::filters::FilterRegistry;
use crate::hub::{Event, NotificationHub};
use crate::outdatedness::OutdatednessChecker;
use crate::phases::{AttemptResult, AttemptState, PhaseContext, PhasePipeline};
use crate::pruner::WriteSet;
use crate::routine::CompilationRoutine;
use crate::store::DependencyStore;

/// Lifecycle of one rep within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepStatus {
    Pending,
    InProgress,
    /// Compiled to completion this run.
    Done,
    /// Fresh; previous outputs carried over.
    Skipped,
    /// Parked on an unmet dependency.
    Suspended,
    Failed,
}

impl RepStatus {
    /// Whether waiters on this rep can be re-queued.
    fn is_finished(self) -> bool {
        matches!(self, RepStatus::Done | RepStatus::Skipped)
    }
}

/// What the scheduler hands back after the queue drains.
pub struct SchedulerReport {
    pub reps: BTreeMap<RepId, ItemRep>,
    pub statuses: BTreeMap<RepId, RepStatus>,
    pub failures: BTreeMap<RepId, String>,
}

/// Snapshot access for filters: every rep except the one currently being
/// attempted (that one is served by its own filter context).
struct RunView<'a> {
    reps: &'a BTreeMap<RepId, ItemRep>,
    items: &'a BTreeMap<ItemId, Item>,
}

impl SnapshotView for RunView<'_> {
    fn query_snapshot(&self, rep: &RepId, name: &str) -> SnapshotQuery {
        match self.reps.get(rep) {
            None => SnapshotQuery::UnknownRep,
            Some(target) => match target.snapshot(name) {
                Some(snapshot) => SnapshotQuery::Available(snapshot.content.clone()),
                None => SnapshotQuery::NotYet,
            },
        }
    }

    fn item_ids(&self) -> Vec<ItemId> {
        self.items.keys().cloned().collect()
    }
}

pub struct Scheduler<'a> {
    pipeline: PhasePipeline,
    items: &'a BTreeMap<ItemId, Item>,
    rules: &'a RuleSet,
    filters: &'a FilterRegistry,
    store: &'a DependencyStore,
    hub: &'a NotificationHub,
    checker: &'a OutdatednessChecker<'a>,
    output_root: &'a Path,
    write_set: &'a WriteSet,
}

impl<'a> Scheduler<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        items: &'a BTreeMap<ItemId, Item>,
        rules: &'a RuleSet,
        filters: &'a FilterRegistry,
        store: &'a DependencyStore,
        hub: &'a NotificationHub,
        checker: &'a OutdatednessChecker<'a>,
        output_root: &'a Path,
        write_set: &'a WriteSet,
    ) -> Self {
        Self {
            pipeline: PhasePipeline::stock(),
            items,
            rules,
            filters,
            store,
            hub,
            checker,
            output_root,
            write_set,
        }
    }

    /// Drive every matched rep to a terminal status.
    pub fn run(&self) -> Result<SchedulerReport, RunError> {
        let mut reps: BTreeMap<RepId, ItemRep> = BTreeMap::new();
        let mut states: BTreeMap<RepId, AttemptState> = BTreeMap::new();
        let mut instructions: BTreeMap<RepId, Vec<CompileInstruction>> = BTreeMap::new();
        let mut statuses: BTreeMap<RepId, RepStatus> = BTreeMap::new();
        let mut queue: VecDeque<RepId> = VecDeque::new();

        for item in self.items.values() {
            let Some(rule) = self.rules.rule_for(item) else {
                tracing::debug!(item = %item.id, "no compile rule matches; item not scheduled");
                continue;
            };
            let rep_id = RepId::new(item.id.clone(), rule.rep.clone());
            reps.insert(rep_id.clone(), ItemRep::new(rep_id.clone()));
            states.insert(
                rep_id.clone(),
                AttemptState::new(CompilationRoutine::new(rule.instructions.clone(), item)),
            );
            instructions.insert(rep_id.clone(), rule.instructions.clone());
            statuses.insert(rep_id.clone(), RepStatus::Pending);
            queue.push_back(rep_id);
        }

        let mut waiters: BTreeMap<RepId, Vec<RepId>> = BTreeMap::new();
        let mut blocked_on: BTreeMap<RepId, RepId> = BTreeMap::new();
        let mut failures: BTreeMap<RepId, String> = BTreeMap::new();

        while let Some(rep_id) = queue.pop_front() {
            match statuses.get(&rep_id) {
                Some(RepStatus::Pending | RepStatus::Suspended) => {}
                _ => continue,
            }
            statuses.insert(rep_id.clone(), RepStatus::InProgress);
            blocked_on.remove(&rep_id);

            // The attempted rep leaves the map so the view can borrow the
            // rest; its own snapshots are served by the filter context.
            let (Some(mut rep), Some(mut state), Some(item), Some(rep_instructions)) = (
                reps.remove(&rep_id),
                states.remove(&rep_id),
                self.items.get(&rep_id.item),
                instructions.get(&rep_id),
            ) else {
                continue;
            };

            let outcome = {
                let view = RunView {
                    reps: &reps,
                    items: self.items,
                };
                let mut cx = PhaseContext {
                    item,
                    rep: &mut rep,
                    instructions: rep_instructions,
                    filters: self.filters,
                    view: &view,
                    hub: self.hub,
                    store: self.store,
                    checker: self.checker,
                    output_root: self.output_root,
                    write_set: self.write_set,
                };
                self.pipeline.attempt(&mut cx, &mut state)
            };
            reps.insert(rep_id.clone(), rep);
            states.insert(rep_id.clone(), state);

            match outcome {
                Ok(AttemptResult::Completed) => {
                    statuses.insert(rep_id.clone(), RepStatus::Done);
                    self.requeue_waiters(&rep_id, &mut waiters, &mut queue);
                }
                Ok(AttemptResult::Skipped) => {
                    statuses.insert(rep_id.clone(), RepStatus::Skipped);
                    self.requeue_waiters(&rep_id, &mut waiters, &mut queue);
                }
                Ok(AttemptResult::Suspended(unmet)) => {
                    let target_status =
                        statuses.get(&unmet.rep).copied().unwrap_or(RepStatus::Failed);
                    if target_status == RepStatus::Failed {
                        let error = CompileError::BlockedOnFailed {
                            rep: rep_id.clone(),
                            on: unmet.rep.clone(),
                        };
                        self.fail(
                            &rep_id, error, &mut statuses, &mut waiters, &mut queue,
                            &mut failures,
                        );
                    } else if target_status.is_finished() {
                        // The target will never produce the snapshot;
                        // retrying would spin forever.
                        let error = CompileError::MissingSnapshot {
                            rep: rep_id.clone(),
                            on: unmet.rep.clone(),
                            snapshot: unmet.snapshot.clone(),
                        };
                        self.fail(
                            &rep_id, error, &mut statuses, &mut waiters, &mut queue,
                            &mut failures,
                        );
                    } else {
                        tracing::debug!(rep = %rep_id, on = %unmet.rep, snapshot = %unmet.snapshot, "rep suspended");
                        statuses.insert(rep_id.clone(), RepStatus::Suspended);
                        blocked_on.insert(rep_id.clone(), unmet.rep.clone());
                        waiters.entry(unmet.rep).or_default().push(rep_id);
                    }
                }
                Err(error) => {
                    self.fail(
                        &rep_id, error, &mut statuses, &mut waiters, &mut queue, &mut failures,
                    );
                }
            }
            self.hub.drain();
        }

        let stuck: Vec<RepId> = statuses
            .iter()
            .filter(|(_, s)| **s == RepStatus::Suspended)
            .map(|(id, _)| id.clone())
            .collect();
        if !stuck.is_empty() {
            // Observers hear about every stuck rep before the error
            // reaches the caller.
            for rep in &stuck {
                let message = match blocked_on.get(rep) {
                    Some(on) => format!("deadlocked waiting for {on}"),
                    None => "deadlocked".to_string(),
                };
                self.hub.post(Event::CompilationFailed {
                    rep: rep.clone(),
                    message,
                });
            }
            self.hub.drain();
            return Err(RunError::Deadlock {
                cycle: find_cycle(&stuck, &blocked_on),
                stuck,
            });
        }

        Ok(SchedulerReport {
            reps,
            statuses,
            failures,
        })
    }

    fn requeue_waiters(
        &self,
        finished: &RepId,
        waiters: &mut BTreeMap<RepId, Vec<RepId>>,
        queue: &mut VecDeque<RepId>,
    ) {
        if let Some(parked) = waiters.remove(finished) {
            for waiter in parked {
                queue.push_back(waiter);
            }
        }
    }

    /// Mark a rep failed and cascade to everything blocked on it.
    fn fail(
        &self,
        rep: &RepId,
        error: CompileError,
        statuses: &mut BTreeMap<RepId, RepStatus>,
        waiters: &mut BTreeMap<RepId, Vec<RepId>>,
        queue: &mut VecDeque<RepId>,
        failures: &mut BTreeMap<RepId, String>,
    ) {
        tracing::error!(rep = %rep, error = %error, "compilation failed");
        statuses.insert(rep.clone(), RepStatus::Failed);
        failures.insert(rep.clone(), error.to_string());
        self.hub.post(Event::CompilationFailed {
            rep: rep.clone(),
            message: error.to_string(),
        });

        // Re-queue waiters rather than failing them outright: their next
        // attempt surfaces BlockedOnFailed through the normal path.
        self.requeue_waiters(rep, waiters, queue);
    }
}

/// Follow blocked-on links from each stuck rep; the first repeated rep
/// closes a cycle.
fn find_cycle(stuck: &[RepId], blocked_on: &BTreeMap<RepId, RepId>) -> Option<Vec<RepId>> {
    for start in stuck {
        let mut path: Vec<RepId> = Vec::new();
        let mut current = start;
        loop {
            if let Some(position) = path.iter().position(|r| r == current) {
                return Some(path[position..].to_vec());
            }
            path.push(current.clone());
            match blocked_on.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rep(id: &str) -> RepId {
        RepId::new(id, "default")
    }

    #[test]
    fn finds_a_two_rep_cycle() {
        let mut blocked_on = BTreeMap::new();
        blocked_on.insert(rep("/a.md"), rep("/b.md"));
        blocked_on.insert(rep("/b.md"), rep("/a.md"));
        let stuck = vec![rep("/a.md"), rep("/b.md")];

        let cycle = find_cycle(&stuck, &blocked_on).unwrap();
        assert_eq!(cycle.len(), 2);
        assert!(cycle.contains(&rep("/a.md")));
        assert!(cycle.contains(&rep("/b.md")));
    }

    #[test]
    fn chain_without_a_loop_has_no_cycle() {
        let mut blocked_on = BTreeMap::new();
        blocked_on.insert(rep("/a.md"), rep("/b.md"));
        let stuck = vec![rep("/a.md")];
        assert!(find_cycle(&stuck, &blocked_on).is_none());
    }
}
