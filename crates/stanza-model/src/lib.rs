//! Data model for the stanza content-compilation engine.
//!
//! This crate defines the vocabulary shared by the engine and its
//! collaborators: source items, item representations, snapshots,
//! outdatedness reasons, dependency records, and the compile-instruction
//! and filter boundaries supplied by the rules loader.

pub mod dependency;
pub mod filter;
pub mod instruction;
pub mod item;
pub mod reason;
pub mod rep;
pub mod snapshot;

pub use dependency::{DependencyProps, DependencyRecord, DependencyTarget};
pub use filter::{Filter, FilterContext, FilterError, SnapshotQuery, SnapshotView};
pub use instruction::{CompileInstruction, CompileRule, RuleSet, RuleSetError};
pub use item::{AttributeValue, Item, ItemId};
pub use reason::OutdatednessReason;
pub use rep::{ItemRep, OutdatednessState, RepId, SnapshotNameTaken, UnmetDependency};
pub use snapshot::Snapshot;
