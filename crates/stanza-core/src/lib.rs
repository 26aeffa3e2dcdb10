//! Incremental content-compilation engine.
//!
//! One run: load the previous run's state, decide per rep whether it is
//! outdated (checksums, rules, recorded dependencies), compile outdated
//! reps through a resumable phase pipeline that suspends on snapshots
//! other reps have not produced yet, flush outputs, prune what nothing
//! wrote, persist state for the next run.
//!
//! [`compiler::Compiler`] is the front door; the modules underneath are
//! public for callers that want to compose the pieces differently.

pub mod checksum;
pub mod compiler;
pub mod error;
pub mod filters;
pub mod hub;
pub mod outdatedness;
pub mod phases;
pub mod pruner;
pub mod routine;
pub mod scheduler;
pub mod store;

pub use compiler::{Compiler, CompilerConfig, RepReport, RunSummary};
pub use error::{CompileError, RunError, StoreError};
pub use filters::FilterRegistry;
pub use hub::{Event, EventKind, NotificationHub, SubscriberId};
pub use outdatedness::OutdatednessChecker;
pub use phases::{AttemptResult, CompilationPhase, PhasePipeline};
pub use pruner::{Pruner, WriteSet, resolve_output_path};
pub use routine::{CompilationRoutine, RoutineOutcome};
pub use scheduler::{RepStatus, Scheduler, SchedulerReport};
pub use store::{DependencyStore, LoadOutcome, RunState};
