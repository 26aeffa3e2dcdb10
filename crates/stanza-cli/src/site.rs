//! Site layout and content loading.
//!
//! A site is a directory with a fixed shape:
//!
//! ```text
//! <site>/
//!   content/       source items, any nesting
//!   rules.json     ordered compile rules
//!   output/        compiled files (default output root)
//!   .stanza/       run state between runs
//! ```
//!
//! Item identifiers are the file paths relative to `content/`, with a
//! leading slash: `content/posts/a.md` becomes `/posts/a.md`. Files may
//! open with a front-matter block delimited by `---` lines; each line in
//! it is a `key: value` attribute (bare integers and booleans are typed,
//! everything else is a string).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use stanza_model::{AttributeValue, Item, ItemId};

#[derive(Debug, thiserror::Error)]
pub enum SiteError {
    #[error("content directory not found: {path}")]
    MissingContentDir { path: PathBuf },

    #[error("failed to read {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unterminated front matter in {path}")]
    UnterminatedFrontMatter { path: PathBuf },
}

/// Resolved paths of one site directory.
#[derive(Debug, Clone)]
pub struct SiteLayout {
    pub root: PathBuf,
    pub output_root: PathBuf,
}

impl SiteLayout {
    pub fn new(root: impl Into<PathBuf>, output_override: Option<PathBuf>) -> Self {
        let root = root.into();
        let output_root = output_override.unwrap_or_else(|| root.join("output"));
        Self { root, output_root }
    }

    pub fn content_dir(&self) -> PathBuf {
        self.root.join("content")
    }

    pub fn rules_path(&self) -> PathBuf {
        self.root.join("rules.json")
    }

    pub fn store_path(&self) -> PathBuf {
        self.root.join(".stanza/store.json")
    }
}

/// Load every file under the content directory as an item.
pub fn load_items(content_dir: &Path) -> Result<BTreeMap<ItemId, Item>, SiteError> {
    if !content_dir.is_dir() {
        return Err(SiteError::MissingContentDir {
            path: content_dir.to_path_buf(),
        });
    }

    let mut items = BTreeMap::new();
    for entry in WalkDir::new(content_dir) {
        let entry = entry.map_err(|e| SiteError::Io {
            path: content_dir.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let raw = fs::read_to_string(path).map_err(|e| SiteError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let id = item_id_for(content_dir, path);
        let (attributes, content) = split_front_matter(&raw, path)?;

        let mut item = Item::new(id, content);
        item.attributes = attributes;
        items.insert(item.id.clone(), item);
    }
    tracing::debug!(count = items.len(), dir = %content_dir.display(), "loaded content items");
    Ok(items)
}

fn item_id_for(content_dir: &Path, path: &Path) -> ItemId {
    let relative = path.strip_prefix(content_dir).unwrap_or(path);
    let mut id = String::from("/");
    id.push_str(&relative.to_string_lossy().replace('\\', "/"));
    ItemId::new(id)
}

/// Split an optional leading front-matter block from the content.
fn split_front_matter(
    raw: &str,
    path: &Path,
) -> Result<(BTreeMap<String, AttributeValue>, String), SiteError> {
    let Some(rest) = raw.strip_prefix("---\n") else {
        return Ok((BTreeMap::new(), raw.to_string()));
    };
    let Some((block, content)) = rest.split_once("\n---\n") else {
        // A lone "---" line with no closing delimiter is treated as an
        // error rather than silently swallowing the document.
        return Err(SiteError::UnterminatedFrontMatter {
            path: path.to_path_buf(),
        });
    };

    let mut attributes = BTreeMap::new();
    for line in block.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            attributes.insert(key.trim().to_string(), parse_value(value.trim()));
        }
    }
    Ok((attributes, content.to_string()))
}

fn parse_value(raw: &str) -> AttributeValue {
    if raw == "true" {
        return AttributeValue::Bool(true);
    }
    if raw == "false" {
        return AttributeValue::Bool(false);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return AttributeValue::Integer(n);
    }
    let unquoted = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(raw);
    AttributeValue::String(unquoted.to_string())
}
