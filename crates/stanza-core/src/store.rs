//! The dependency store: everything one run records for the next.
//!
//! Two generations live side by side: the previous run's state, loaded
//! read-only at startup and consulted by the outdatedness rules, and the
//! current run's state, accumulated behind a read/write lock (single writer
//! per run; rule evaluation only ever reads). Persistence is a
//! schema-versioned JSON envelope written atomically (temp file + rename).
//!
//! A missing store file is a first run; a corrupt one loads as empty and is
//! flagged, which fail-safes every rep to outdated.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stanza_model::{DependencyRecord, Item, ItemId, RepId, Snapshot};

use crate::checksum;
use crate::error::StoreError;

pub const STORE_SCHEMA_VERSION: u32 = 1;

/// Checksum table key for an item's raw content.
pub fn content_key(item: &ItemId) -> String {
    format!("content:{item}")
}

/// Checksum table key for an item's attribute map.
pub fn attributes_key(item: &ItemId) -> String {
    format!("attributes:{item}")
}

/// Checksum table key for a rep's compile instruction list.
pub fn rules_key(rep: &RepId) -> String {
    format!("rules:{}", rep.key())
}

/// The facts one run records: known items, input checksums, dependency
/// edges, and per-rep snapshots with their final output paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub item_ids: BTreeSet<ItemId>,
    pub checksums: BTreeMap<String, String>,
    pub edges: Vec<DependencyRecord>,
    /// Rep key -> snapshots captured when the rep last compiled.
    pub snapshots: BTreeMap<String, Vec<Snapshot>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreEnvelope {
    schema_version: u32,
    saved_at: DateTime<Utc>,
    #[serde(flatten)]
    state: RunState,
}

/// How the previous run's state came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// No store file existed; everything is new.
    FirstRun,
    /// Previous state loaded cleanly.
    Loaded,
    /// A store file existed but could not be read; treated as empty.
    Corrupt,
}

#[derive(Debug)]
pub struct DependencyStore {
    previous: RunState,
    previous_corrupt: bool,
    current: RwLock<RunState>,
}

impl DependencyStore {
    /// A store with no previous run, as for a brand-new site.
    pub fn empty() -> Self {
        Self {
            previous: RunState::default(),
            previous_corrupt: false,
            current: RwLock::new(RunState::default()),
        }
    }

    /// Load the previous run's state from `path`.
    ///
    /// Missing file: first run. Unreadable file or unparsable JSON: empty
    /// state, flagged corrupt (fail-safe: every rep is outdated). A schema
    /// version newer than this engine supports is an explicit error.
    pub fn open(path: &Path) -> Result<(Self, LoadOutcome), StoreError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((Self::empty(), LoadOutcome::FirstRun));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "store file unreadable; treating all reps as outdated");
                let mut store = Self::empty();
                store.previous_corrupt = true;
                return Ok((store, LoadOutcome::Corrupt));
            }
        };

        let envelope: StoreEnvelope = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "store file corrupt; treating all reps as outdated");
                let mut store = Self::empty();
                store.previous_corrupt = true;
                return Ok((store, LoadOutcome::Corrupt));
            }
        };

        if envelope.schema_version > STORE_SCHEMA_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: envelope.schema_version,
                max_supported: STORE_SCHEMA_VERSION,
                path: path.to_path_buf(),
            });
        }

        tracing::debug!(
            path = %path.display(),
            items = envelope.state.item_ids.len(),
            edges = envelope.state.edges.len(),
            saved_at = %envelope.saved_at,
            "loaded previous run state"
        );
        Ok((
            Self {
                previous: envelope.state,
                previous_corrupt: false,
                current: RwLock::new(RunState::default()),
            },
            LoadOutcome::Loaded,
        ))
    }

    pub fn previous_corrupt(&self) -> bool {
        self.previous_corrupt
    }

    /// Record the current collection and input checksums at run start.
    ///
    /// Rule checksums are deliberately not recorded here: they are written
    /// per rep on successful completion, so a failed rep stays outdated on
    /// the next run.
    pub fn begin_run(&self, items: &BTreeMap<ItemId, Item>) {
        let mut current = self.write();
        for item in items.values() {
            current.item_ids.insert(item.id.clone());
            current
                .checksums
                .insert(content_key(&item.id), checksum::digest_content(&item.content));
            current.checksums.insert(
                attributes_key(&item.id),
                checksum::digest_attributes(&item.attributes),
            );
        }
    }

    /// Append one dependency edge. Single writer per run: the scheduler
    /// funnels all writes through this point.
    pub fn record_dependency(&self, record: DependencyRecord) {
        self.write().edges.push(record);
    }

    pub fn record_checksum(&self, key: String, digest: String) {
        self.write().checksums.insert(key, digest);
    }

    /// Record a rep's snapshots (with their final paths) for the next run.
    pub fn record_snapshots(&self, rep: &RepId, snapshots: &[Snapshot]) {
        self.write()
            .snapshots
            .insert(rep.key(), snapshots.to_vec());
    }

    /// The previous run's recorded dependencies of `rep`, in recording
    /// order. Empty for reps the store has never seen.
    pub fn dependencies_of(&self, rep: &RepId) -> Vec<DependencyRecord> {
        self.previous
            .edges
            .iter()
            .filter(|edge| &edge.from == rep)
            .cloned()
            .collect()
    }

    /// Items present in the current run but absent from the previous one.
    pub fn new_items(&self) -> Vec<ItemId> {
        self.read()
            .item_ids
            .iter()
            .filter(|id| !self.previous.item_ids.contains(*id))
            .cloned()
            .collect()
    }

    pub fn previous_checksum(&self, key: &str) -> Option<&String> {
        self.previous.checksums.get(key)
    }

    /// Snapshots the rep produced in the previous run, if it completed.
    pub fn previous_snapshots(&self, rep: &RepId) -> Option<&[Snapshot]> {
        self.previous
            .snapshots
            .get(&rep.key())
            .map(Vec::as_slice)
    }

    /// Declared output paths of every snapshot the previous run recorded.
    pub fn previous_output_paths(&self) -> Vec<PathBuf> {
        self.previous
            .snapshots
            .values()
            .flatten()
            .filter_map(|s| s.output_path.clone())
            .collect()
    }

    /// Persist the current run's state to `path`, atomically.
    pub fn persist(&self, path: &Path) -> Result<(), StoreError> {
        let envelope = StoreEnvelope {
            schema_version: STORE_SCHEMA_VERSION,
            saved_at: Utc::now(),
            state: self.read().clone(),
        };
        let bytes = serde_json::to_vec_pretty(&envelope)
            .map_err(|e| StoreError::Serialize { source: e })?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                operation: "create directory for",
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let temp_path = path.with_extension("json.tmp");
        let mut file = File::create(&temp_path).map_err(|e| StoreError::Io {
            operation: "create",
            path: temp_path.clone(),
            source: e,
        })?;
        file.write_all(&bytes).map_err(|e| StoreError::Io {
            operation: "write",
            path: temp_path.clone(),
            source: e,
        })?;
        file.sync_all().map_err(|e| StoreError::Io {
            operation: "sync",
            path: temp_path.clone(),
            source: e,
        })?;
        fs::rename(&temp_path, path).map_err(|e| StoreError::Io {
            operation: "rename",
            path: path.to_path_buf(),
            source: e,
        })?;

        tracing::debug!(path = %path.display(), "persisted run state");
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, RunState> {
        self.current.read().expect("dependency store lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, RunState> {
        self.current
            .write()
            .expect("dependency store lock poisoned")
    }
}
