//! Output-directory pruning.
//!
//! After a run, any file under the output root that no rep wrote (or
//! would have written, for fresh reps) is stale and gets removed. The
//! write set always wins: a path in it is never pruned, excluded or not.
//! Exclusions match single path components relative to the output root,
//! so `.git` protects `.git` anywhere under it. Directories left empty by
//! pruning are removed as well. The whole operation is idempotent.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::RunError;
use crate::hub::{Event, NotificationHub};

/// Map a snapshot's declared output path (site-absolute, like
/// `/donkey.html`) to its on-disk location under the output root.
pub fn resolve_output_path(root: &Path, declared: &Path) -> PathBuf {
    match declared.strip_prefix("/") {
        Ok(relative) => root.join(relative),
        Err(_) => root.join(declared),
    }
}

/// The set of output files this run produced or preserved. Shared across
/// the run through interior mutability; phases insert, the pruner reads.
#[derive(Debug, Default)]
pub struct WriteSet {
    paths: RefCell<BTreeSet<PathBuf>>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: PathBuf) {
        self.paths.borrow_mut().insert(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.borrow().contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.borrow().is_empty()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.borrow().iter().cloned().collect()
    }
}

/// Removes stale files from the output root.
pub struct Pruner<'a> {
    root: &'a Path,
    write_set: &'a WriteSet,
    exclusions: &'a [String],
    dry_run: bool,
    hub: Option<&'a NotificationHub>,
}

impl<'a> Pruner<'a> {
    pub fn new(root: &'a Path, write_set: &'a WriteSet, exclusions: &'a [String]) -> Self {
        Self {
            root,
            write_set,
            exclusions,
            dry_run: false,
            hub: None,
        }
    }

    /// Report what would be pruned without deleting anything.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_hub(mut self, hub: &'a NotificationHub) -> Self {
        self.hub = Some(hub);
        self
    }

    /// Sweep the output root. Returns the pruned (or, in dry-run mode,
    /// prunable) file paths in walk order. A missing root is a no-op.
    pub fn prune(&self) -> Result<Vec<PathBuf>, RunError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut pruned = Vec::new();
        let mut directories = Vec::new();
        for entry in WalkDir::new(self.root) {
            let entry = entry.map_err(|e| RunError::Prune {
                root: self.root.to_path_buf(),
                source: e.into(),
            })?;
            let path = entry.path();
            if path == self.root {
                continue;
            }
            if self.excluded(path) && !self.write_set.contains(path) {
                continue;
            }
            if entry.file_type().is_dir() {
                directories.push(path.to_path_buf());
                continue;
            }
            if self.write_set.contains(path) {
                continue;
            }

            tracing::debug!(path = %path.display(), dry_run = self.dry_run, "pruning stale file");
            if !self.dry_run {
                fs::remove_file(path).map_err(|e| RunError::Prune {
                    root: self.root.to_path_buf(),
                    source: e,
                })?;
                // Only actual removals are announced; a dry run deletes
                // nothing.
                if let Some(hub) = self.hub {
                    hub.post(Event::FilePruned {
                        path: path.to_path_buf(),
                    });
                }
            }
            pruned.push(path.to_path_buf());
        }

        if !self.dry_run {
            // Deepest first, so emptied parents are seen after their
            // children are gone.
            directories.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
            for directory in directories {
                if directory_is_empty(&directory) {
                    fs::remove_dir(&directory).map_err(|e| RunError::Prune {
                        root: self.root.to_path_buf(),
                        source: e,
                    })?;
                }
            }
        }
        Ok(pruned)
    }

    /// Whether any component of the path relative to the root matches an
    /// exclusion.
    fn excluded(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(self.root) else {
            return false;
        };
        relative.components().any(|component| {
            let component = component.as_os_str().to_string_lossy();
            self.exclusions.iter().any(|e| e.as_str() == component)
        })
    }
}

fn directory_is_empty(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "x").unwrap();
    }

    #[test]
    fn resolves_site_absolute_paths_under_the_root() {
        assert_eq!(
            resolve_output_path(Path::new("/out"), Path::new("/donkey.html")),
            PathBuf::from("/out/donkey.html")
        );
        assert_eq!(
            resolve_output_path(Path::new("/out"), Path::new("posts/a.html")),
            PathBuf::from("/out/posts/a.html")
        );
    }

    #[test]
    fn removes_files_outside_the_write_set() {
        use std::cell::Cell;
        use std::rc::Rc;

        use crate::hub::EventKind;

        let dir = tempdir().unwrap();
        let kept = dir.path().join("kept.html");
        let stale = dir.path().join("stale.html");
        touch(&kept);
        touch(&stale);

        let hub = NotificationHub::new();
        let pruned_events = Rc::new(Cell::new(0usize));
        let sink = Rc::clone(&pruned_events);
        hub.subscribe(EventKind::FilePruned, move |_| {
            sink.set(sink.get() + 1);
        });

        let write_set = WriteSet::new();
        write_set.insert(kept.clone());
        let pruned = Pruner::new(dir.path(), &write_set, &[])
            .with_hub(&hub)
            .prune()
            .unwrap();
        hub.drain();

        assert_eq!(pruned, vec![stale.clone()]);
        assert!(kept.is_file());
        assert!(!stale.exists());
        assert_eq!(pruned_events.get(), 1);
    }

    #[test]
    fn exclusions_match_path_components() {
        let dir = tempdir().unwrap();
        let protected = dir.path().join(".git/config");
        let stale = dir.path().join("stale.html");
        touch(&protected);
        touch(&stale);

        let write_set = WriteSet::new();
        let exclusions = vec![".git".to_string()];
        Pruner::new(dir.path(), &write_set, &exclusions)
            .prune()
            .unwrap();

        assert!(protected.is_file());
        assert!(!stale.exists());
    }

    #[test]
    fn write_set_beats_exclusions_and_empty_dirs_go() {
        let dir = tempdir().unwrap();
        let written = dir.path().join("a/deep/file.html");
        let stale = dir.path().join("b/old.html");
        touch(&written);
        touch(&stale);

        let write_set = WriteSet::new();
        write_set.insert(written.clone());
        Pruner::new(dir.path(), &write_set, &[]).prune().unwrap();

        assert!(written.is_file());
        assert!(!dir.path().join("b").exists(), "emptied directory removed");
    }

    #[test]
    fn dry_run_reports_without_deleting() {
        use std::cell::Cell;
        use std::rc::Rc;

        use crate::hub::EventKind;

        let dir = tempdir().unwrap();
        let stale = dir.path().join("stale.html");
        touch(&stale);

        let hub = NotificationHub::new();
        let pruned_events = Rc::new(Cell::new(0usize));
        let sink = Rc::clone(&pruned_events);
        hub.subscribe(EventKind::FilePruned, move |_| {
            sink.set(sink.get() + 1);
        });

        let write_set = WriteSet::new();
        let pruned = Pruner::new(dir.path(), &write_set, &[])
            .dry_run()
            .with_hub(&hub)
            .prune()
            .unwrap();
        hub.drain();

        assert_eq!(pruned, vec![stale.clone()]);
        assert!(stale.is_file());
        assert_eq!(pruned_events.get(), 0, "nothing deleted, nothing announced");
    }

    #[test]
    fn pruning_twice_is_idempotent() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("stale.html"));

        let write_set = WriteSet::new();
        let pruner = Pruner::new(dir.path(), &write_set, &[]);
        assert_eq!(pruner.prune().unwrap().len(), 1);
        assert!(pruner.prune().unwrap().is_empty());
    }

    #[test]
    fn missing_root_is_a_no_op() {
        let dir = tempdir().unwrap();
        let write_set = WriteSet::new();
        let pruned = Pruner::new(&dir.path().join("absent"), &write_set, &[])
            .prune()
            .unwrap();
        assert!(pruned.is_empty());
    }
}
