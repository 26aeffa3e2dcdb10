//! The compiler facade: one call per site operation.
//!
//! Ties the pieces together for a run: load the store, settle
//! outdatedness, schedule every rep, prune the output root, persist the
//! new run state. Callers hand in the loaded items and rules plus a
//! notification hub for observation; back comes a [`RunSummary`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use stanza_model::{Item, ItemId, OutdatednessReason, RepId, RuleSet};

use crate::error::RunError;
use crate::filters::FilterRegistry;
use crate::hub::{Event, NotificationHub};
use crate::outdatedness::OutdatednessChecker;
use crate::pruner::{Pruner, WriteSet, resolve_output_path};
use crate::scheduler::{RepStatus, Scheduler};
use crate::store::{DependencyStore, LoadOutcome};

/// Compile-time knobs for one site.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Where final snapshots land.
    pub output_root: PathBuf,
    /// Where run state is persisted between runs.
    pub store_path: PathBuf,
    /// Path components under the output root the pruner must not touch.
    pub prune_exclusions: Vec<String>,
    /// Recompile everything regardless of recorded state.
    pub force: bool,
    /// Sweep stale files from the output root after compiling.
    pub prune: bool,
}

impl CompilerConfig {
    pub fn new(output_root: impl Into<PathBuf>, store_path: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            store_path: store_path.into(),
            prune_exclusions: Vec::new(),
            force: false,
            prune: true,
        }
    }
}

/// Per-rep outcome of a run.
#[derive(Debug, Clone)]
pub struct RepReport {
    pub rep: RepId,
    pub status: RepStatus,
    pub reason: Option<OutdatednessReason>,
    pub outputs: Vec<PathBuf>,
    pub error: Option<String>,
}

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub load_outcome: LoadOutcome,
    pub reports: Vec<RepReport>,
    pub pruned: Vec<PathBuf>,
}

impl RunSummary {
    pub fn compiled(&self) -> usize {
        self.count(RepStatus::Done)
    }

    pub fn skipped(&self) -> usize {
        self.count(RepStatus::Skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(RepStatus::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    fn count(&self, status: RepStatus) -> usize {
        self.reports.iter().filter(|r| r.status == status).count()
    }
}

pub struct Compiler {
    config: CompilerConfig,
    filters: FilterRegistry,
}

impl Compiler {
    /// A compiler with the built-in filters.
    pub fn new(config: CompilerConfig) -> Self {
        Self {
            config,
            filters: FilterRegistry::new(),
        }
    }

    pub fn with_filters(config: CompilerConfig, filters: FilterRegistry) -> Self {
        Self { config, filters }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Run one compilation pass over the site.
    ///
    /// Individual rep failures are reported, not fatal; the run state is
    /// persisted either way, so failed reps stay outdated next time. A
    /// deadlock aborts the run without persisting.
    pub fn compile(
        &self,
        items: &BTreeMap<ItemId, Item>,
        rules: &RuleSet,
        hub: &NotificationHub,
    ) -> Result<RunSummary, RunError> {
        let (store, load_outcome) = DependencyStore::open(&self.config.store_path)
            .map_err(|e| announce_failure(hub, e.into()))?;
        store.begin_run(items);

        let checker = OutdatednessChecker::new(
            &store,
            items,
            rules,
            &self.config.output_root,
            self.config.force,
        );
        let write_set = WriteSet::new();
        let scheduler = Scheduler::new(
            items,
            rules,
            &self.filters,
            &store,
            hub,
            &checker,
            &self.config.output_root,
            &write_set,
        );
        let report = scheduler.run().map_err(|e| announce_failure(hub, e))?;

        let pruned = if self.config.prune {
            Pruner::new(
                &self.config.output_root,
                &write_set,
                &self.config.prune_exclusions,
            )
            .with_hub(hub)
            .prune()
            .map_err(|e| announce_failure(hub, e))?
        } else {
            Vec::new()
        };
        hub.drain();

        store
            .persist(&self.config.store_path)
            .map_err(|e| announce_failure(hub, e.into()))?;

        let mut reports = Vec::new();
        for (rep_id, status) in &report.statuses {
            let rep = report.reps.get(rep_id);
            reports.push(RepReport {
                rep: rep_id.clone(),
                status: *status,
                reason: rep.and_then(|r| r.state.reason().cloned()),
                outputs: rep
                    .map(|r| {
                        r.final_paths()
                            .iter()
                            .map(|p| resolve_output_path(&self.config.output_root, p))
                            .collect()
                    })
                    .unwrap_or_default(),
                error: report.failures.get(rep_id).cloned(),
            });
        }
        tracing::info!(
            compiled = reports.iter().filter(|r| r.status == RepStatus::Done).count(),
            skipped = reports.iter().filter(|r| r.status == RepStatus::Skipped).count(),
            failed = reports.iter().filter(|r| r.status == RepStatus::Failed).count(),
            pruned = pruned.len(),
            "run finished"
        );

        Ok(RunSummary {
            load_outcome,
            reports,
            pruned,
        })
    }

    /// Standalone prune: treat the previous run's recorded outputs as the
    /// write set and sweep everything else from the output root.
    pub fn prune_outputs(
        &self,
        hub: &NotificationHub,
        dry_run: bool,
    ) -> Result<Vec<PathBuf>, RunError> {
        let (store, _) = DependencyStore::open(&self.config.store_path)
            .map_err(|e| announce_failure(hub, e.into()))?;
        let write_set = WriteSet::new();
        for declared in store.previous_output_paths() {
            write_set.insert(resolve_output_path(&self.config.output_root, &declared));
        }

        let mut pruner = Pruner::new(
            &self.config.output_root,
            &write_set,
            &self.config.prune_exclusions,
        )
        .with_hub(hub);
        if dry_run {
            pruner = pruner.dry_run();
        }
        let pruned = pruner.prune().map_err(|e| announce_failure(hub, e))?;
        hub.drain();
        Ok(pruned)
    }

    /// Answer, without compiling anything, which reps are outdated and
    /// why. Reps without a matching rule are not listed.
    pub fn outdatedness(
        &self,
        items: &BTreeMap<ItemId, Item>,
        rules: &RuleSet,
    ) -> Result<Vec<(RepId, Option<OutdatednessReason>)>, RunError> {
        let (store, _) = DependencyStore::open(&self.config.store_path)?;
        store.begin_run(items);
        let checker = OutdatednessChecker::new(
            &store,
            items,
            rules,
            &self.config.output_root,
            self.config.force,
        );

        let mut report = Vec::new();
        for item in items.values() {
            if let Some(rep_id) = rules.rep_for(item) {
                let reason = checker.reason_for(&rep_id);
                report.push((rep_id, reason));
            }
        }
        Ok(report)
    }
}

/// Run-level errors reach subscribers before they reach the caller.
fn announce_failure(hub: &NotificationHub, error: RunError) -> RunError {
    hub.post(Event::RunFailed {
        message: error.to_string(),
    });
    hub.drain();
    error
}
