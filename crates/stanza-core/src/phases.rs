//! Per-rep compilation as an ordered phase pipeline.
//!
//! Each attempt at a rep runs the same phase sequence: recalculate
//! outdatedness, announce the start, resume the routine, flush final
//! snapshots, cache run state, announce the end. Phases implement
//! [`CompilationPhase`] and are executed in order; a phase can stop the
//! pipeline early (fresh rep, suspension) without that being an error.
//!
//! # Stock Phase Order
//!
//! 1. **RecalculatePhase** - settle outdatedness; skip fresh reps
//! 2. **NotifyStartPhase** - `CompilationStarted`, once per rep
//! 3. **ResumePhase** - run the routine until done or suspended
//! 4. **WritePhase** - flush final snapshots to the output root
//! 5. **CachePhase** - record edges, snapshots, and rule checksums
//! 6. **NotifyEndPhase** - `CompilationEnded`

use std::fs;
use std::path::Path;

use stanza_model::{
    CompileInstruction, DependencyRecord, Item, ItemRep, OutdatednessState, SnapshotView,
    UnmetDependency,
};

use crate::checksum;
use crate::error::CompileError;
use crate::filters::FilterRegistry;
use crate::hub::{Event, NotificationHub};
use crate::outdatedness::OutdatednessChecker;
use crate::pruner::{WriteSet, resolve_output_path};
use crate::routine::{CompilationRoutine, RoutineOutcome};
use crate::store::{self, DependencyStore};

/// Everything a phase may touch during one attempt.
pub struct PhaseContext<'a> {
    pub item: &'a Item,
    pub rep: &'a mut ItemRep,
    pub instructions: &'a [CompileInstruction],
    pub filters: &'a FilterRegistry,
    pub view: &'a dyn SnapshotView,
    pub hub: &'a NotificationHub,
    pub store: &'a DependencyStore,
    pub checker: &'a OutdatednessChecker<'a>,
    pub output_root: &'a Path,
    pub write_set: &'a WriteSet,
}

/// State that survives across attempts at one rep.
pub struct AttemptState {
    pub routine: CompilationRoutine,
    pub started_notified: bool,
    pub recorded: Vec<DependencyRecord>,
}

impl AttemptState {
    pub fn new(routine: CompilationRoutine) -> Self {
        Self {
            routine,
            started_notified: false,
            recorded: Vec::new(),
        }
    }
}

/// How one phase left the pipeline.
#[derive(Debug)]
pub enum PhaseFlow {
    /// Proceed to the next phase.
    Continue,
    /// The rep is fresh; nothing further to do this run.
    Skip,
    /// The routine is parked on an unmet dependency; retry later.
    Suspend(UnmetDependency),
}

/// Result of running the whole pipeline once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    Completed,
    Skipped,
    Suspended(UnmetDependency),
}

/// A single phase of a rep's compilation attempt.
pub trait CompilationPhase {
    fn run(
        &self,
        cx: &mut PhaseContext<'_>,
        state: &mut AttemptState,
    ) -> Result<PhaseFlow, CompileError>;

    /// Human-readable name, for logging.
    fn phase_name(&self) -> &'static str;
}

/// An ordered pipeline of compilation phases.
pub struct PhasePipeline {
    phases: Vec<Box<dyn CompilationPhase>>,
}

impl Default for PhasePipeline {
    fn default() -> Self {
        Self::stock()
    }
}

impl PhasePipeline {
    pub fn empty() -> Self {
        Self { phases: Vec::new() }
    }

    pub fn add_phase(mut self, phase: Box<dyn CompilationPhase>) -> Self {
        self.phases.push(phase);
        self
    }

    /// The stock phase order.
    pub fn stock() -> Self {
        Self::empty()
            .add_phase(Box::new(RecalculatePhase))
            .add_phase(Box::new(NotifyStartPhase))
            .add_phase(Box::new(ResumePhase))
            .add_phase(Box::new(WritePhase))
            .add_phase(Box::new(CachePhase))
            .add_phase(Box::new(NotifyEndPhase))
    }

    pub fn phase_names(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.phase_name()).collect()
    }

    /// Run the phases in order for one attempt at `cx.rep`.
    pub fn attempt(
        &self,
        cx: &mut PhaseContext<'_>,
        state: &mut AttemptState,
    ) -> Result<AttemptResult, CompileError> {
        for phase in &self.phases {
            tracing::trace!(rep = %cx.rep.id, phase = phase.phase_name(), "running phase");
            match phase.run(cx, state)? {
                PhaseFlow::Continue => {}
                PhaseFlow::Skip => return Ok(AttemptResult::Skipped),
                PhaseFlow::Suspend(unmet) => return Ok(AttemptResult::Suspended(unmet)),
            }
        }
        Ok(AttemptResult::Completed)
    }
}

/// Phase 1: settle the rep's outdatedness state.
///
/// Fresh reps are not recompiled; their previous snapshots, dependency
/// edges, and rule checksums carry over into the current run's state so
/// the next run still knows them, and their output files join the write
/// set so pruning leaves them alone.
pub struct RecalculatePhase;

impl CompilationPhase for RecalculatePhase {
    fn run(
        &self,
        cx: &mut PhaseContext<'_>,
        _state: &mut AttemptState,
    ) -> Result<PhaseFlow, CompileError> {
        if !cx.rep.state.is_known() {
            cx.rep.state = match cx.checker.reason_for(&cx.rep.id) {
                Some(reason) => OutdatednessState::Outdated(reason),
                None => OutdatednessState::Fresh,
            };
        }
        if cx.rep.state.is_outdated() {
            return Ok(PhaseFlow::Continue);
        }

        for edge in cx.store.dependencies_of(&cx.rep.id) {
            cx.store.record_dependency(edge);
        }
        let rules_key = store::rules_key(&cx.rep.id);
        if let Some(digest) = cx.store.previous_checksum(&rules_key) {
            cx.store.record_checksum(rules_key, digest.clone());
        }
        if let Some(snapshots) = cx.store.previous_snapshots(&cx.rep.id) {
            let snapshots = snapshots.to_vec();
            for snapshot in &snapshots {
                // Restore failures would have tripped the snapshot rules.
                cx.rep.add_snapshot(snapshot.clone())?;
                if let Some(path) = &snapshot.output_path {
                    cx.write_set.insert(resolve_output_path(cx.output_root, path));
                }
            }
            cx.store.record_snapshots(&cx.rep.id, &snapshots);
        }
        tracing::debug!(rep = %cx.rep.id, "rep is fresh; skipping");
        Ok(PhaseFlow::Skip)
    }

    fn phase_name(&self) -> &'static str {
        "recalculate"
    }
}

/// Phase 2: `CompilationStarted`, exactly once per rep per run.
pub struct NotifyStartPhase;

impl CompilationPhase for NotifyStartPhase {
    fn run(
        &self,
        cx: &mut PhaseContext<'_>,
        state: &mut AttemptState,
    ) -> Result<PhaseFlow, CompileError> {
        if !state.started_notified {
            state.started_notified = true;
            cx.hub.post(Event::CompilationStarted {
                rep: cx.rep.id.clone(),
            });
        }
        Ok(PhaseFlow::Continue)
    }

    fn phase_name(&self) -> &'static str {
        "notify_start"
    }
}

/// Phase 3: resume the routine until it completes or suspends.
pub struct ResumePhase;

impl CompilationPhase for ResumePhase {
    fn run(
        &self,
        cx: &mut PhaseContext<'_>,
        state: &mut AttemptState,
    ) -> Result<PhaseFlow, CompileError> {
        let outcome = state.routine.resume(
            cx.rep,
            cx.item,
            cx.filters,
            cx.view,
            &mut state.recorded,
        )?;
        match outcome {
            RoutineOutcome::Completed => Ok(PhaseFlow::Continue),
            RoutineOutcome::Suspended(unmet) => {
                cx.hub.post(Event::CompilationSuspended {
                    rep: cx.rep.id.clone(),
                });
                Ok(PhaseFlow::Suspend(unmet))
            }
        }
    }

    fn phase_name(&self) -> &'static str {
        "resume"
    }
}

/// Phase 4: flush every final snapshot to the output root.
pub struct WritePhase;

impl CompilationPhase for WritePhase {
    fn run(
        &self,
        cx: &mut PhaseContext<'_>,
        _state: &mut AttemptState,
    ) -> Result<PhaseFlow, CompileError> {
        for snapshot in cx.rep.snapshots() {
            let Some(declared) = &snapshot.output_path else {
                continue;
            };
            let path = resolve_output_path(cx.output_root, declared);
            // Into the write set before the flush: a half-written file
            // must never look prunable.
            cx.write_set.insert(path.clone());
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| CompileError::OutputIo {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            fs::write(&path, &snapshot.content).map_err(|e| CompileError::OutputIo {
                path: path.clone(),
                source: e,
            })?;
            cx.hub.post(Event::FileWritten { path });
        }
        Ok(PhaseFlow::Continue)
    }

    fn phase_name(&self) -> &'static str {
        "write"
    }
}

/// Phase 5: record this rep's run state for the next run.
///
/// The rule checksum is written here, on success only, so a rep whose
/// compilation failed stays outdated next time.
pub struct CachePhase;

impl CompilationPhase for CachePhase {
    fn run(
        &self,
        cx: &mut PhaseContext<'_>,
        state: &mut AttemptState,
    ) -> Result<PhaseFlow, CompileError> {
        for edge in state.recorded.drain(..) {
            cx.store.record_dependency(edge);
        }
        cx.store.record_checksum(
            store::rules_key(&cx.rep.id),
            checksum::digest_instructions(cx.instructions),
        );
        cx.store.record_snapshots(&cx.rep.id, cx.rep.snapshots());
        Ok(PhaseFlow::Continue)
    }

    fn phase_name(&self) -> &'static str {
        "cache"
    }
}

/// Phase 6: `CompilationEnded`.
pub struct NotifyEndPhase;

impl CompilationPhase for NotifyEndPhase {
    fn run(
        &self,
        cx: &mut PhaseContext<'_>,
        _state: &mut AttemptState,
    ) -> Result<PhaseFlow, CompileError> {
        cx.hub.post(Event::CompilationEnded {
            rep: cx.rep.id.clone(),
        });
        Ok(PhaseFlow::Continue)
    }

    fn phase_name(&self) -> &'static str {
        "notify_end"
    }
}
