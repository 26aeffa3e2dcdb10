//! Compile instructions and rules: the boundary to the rules loader.
//!
//! The rules DSL itself lives outside the engine; what arrives here is the
//! ordered instruction list per matched item, loaded from a JSON rules
//! file. Pattern syntax is deliberately small: literal characters plus `*`
//! matching any run of characters, e.g. `/donkey.*`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::item::{AttributeValue, Item, ItemId};
use crate::rep::RepId;

/// One step of a compilation routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CompileInstruction {
    /// Run a named content filter.
    Filter {
        name: String,
        #[serde(default)]
        params: BTreeMap<String, AttributeValue>,
    },
    /// Record the current content under `name`; with a path the snapshot
    /// is final and will be flushed to the output root.
    Snapshot {
        name: String,
        #[serde(default)]
        path: Option<PathBuf>,
    },
    /// Shorthand for a final `last` snapshot at `path`.
    Write { path: PathBuf },
}

/// A compile rule: an item-id pattern plus the routine for matching items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileRule {
    pub pattern: String,
    #[serde(default = "default_rep_name")]
    pub rep: String,
    pub instructions: Vec<CompileInstruction>,
}

fn default_rep_name() -> String {
    "default".to_string()
}

impl CompileRule {
    pub fn matches(&self, id: &ItemId) -> bool {
        pattern_matches(&self.pattern, id.as_str())
    }
}

/// Ordered rule list; the first matching rule wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSet {
    pub rules: Vec<CompileRule>,
}

#[derive(Debug, thiserror::Error)]
pub enum RuleSetError {
    #[error("failed to read rules file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse rules file {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl RuleSet {
    pub fn new(rules: Vec<CompileRule>) -> Self {
        Self { rules }
    }

    pub fn from_path(path: &Path) -> Result<Self, RuleSetError> {
        let raw = std::fs::read_to_string(path).map_err(|e| RuleSetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_str(&raw).map_err(|e| RuleSetError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// First rule whose pattern matches the item, if any.
    pub fn rule_for(&self, item: &Item) -> Option<&CompileRule> {
        self.rules.iter().find(|rule| rule.matches(&item.id))
    }

    /// The rep this item compiles to under the first matching rule.
    pub fn rep_for(&self, item: &Item) -> Option<RepId> {
        self.rule_for(item)
            .map(|rule| RepId::new(item.id.clone(), rule.rep.clone()))
    }
}

/// Literal match with `*` wildcards.
fn pattern_matches(pattern: &str, candidate: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = candidate.chars().collect();
    matches_at(&pat, &text)
}

fn matches_at(pat: &[char], text: &[char]) -> bool {
    match pat.first() {
        None => text.is_empty(),
        Some('*') => {
            // Greedy from the longest tail down; patterns are tiny.
            (0..=text.len()).any(|skip| matches_at(&pat[1..], &text[skip..]))
        }
        Some(c) => text.first() == Some(c) && matches_at(&pat[1..], &text[1..]),
    }
}
