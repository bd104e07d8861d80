//! Path-hiding state for one merge pass.
//!
//! Layers are replayed highest precedence first, so by the time a lower
//! layer's entry is considered, everything that should shadow it has
//! already been recorded here: paths already written (`seen`) and
//! subtrees blocked by deletions or by terminal entries (`rules`).

use std::collections::{HashMap, HashSet};
use std::fmt;

use indexmap::IndexSet;

/// Why a subtree is hidden from lower-precedence layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HideReason {
    /// A whiteout marker deleted the path.
    Removal,
    /// A non-directory already occupies the path, so nothing can live
    /// beneath it.
    Presence,
    /// An opaque-directory marker hides everything beneath the path, but
    /// not the path itself.
    Opaque,
}

impl fmt::Display for HideReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Removal => write!(f, "removal"),
            Self::Presence => write!(f, "presence"),
            Self::Opaque => write!(f, "opaque directory"),
        }
    }
}

/// A recorded path that blocks lower-precedence entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HidingRule {
    /// Normalized archive path the rule applies to.
    pub path: String,
    /// Why the path is blocked.
    pub reason: HideReason,
}

impl HidingRule {
    /// Whether this rule blocks `path`.
    ///
    /// A rule blocks its own path and every path beneath it; opaque rules
    /// block only what is beneath.
    #[must_use]
    pub fn hides(&self, path: &str) -> bool {
        match self.reason {
            HideReason::Opaque => is_strict_descendant(&self.path, path),
            HideReason::Removal | HideReason::Presence => {
                path == self.path || is_strict_descendant(&self.path, path)
            }
        }
    }
}

fn is_strict_descendant(ancestor: &str, path: &str) -> bool {
    if ancestor.is_empty() {
        return !path.is_empty();
    }
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Paths written and subtrees blocked so far in a merge pass.
///
/// Rules are indexed by path, so a lookup costs one map lookup per component
/// of the queried path regardless of how many rules exist.
#[derive(Debug, Default)]
pub struct PathHidingState {
    seen: HashSet<String>,
    rules: IndexSet<HidingRule>,
    by_path: HashMap<String, Vec<usize>>,
}

impl PathHidingState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `path` was already written by a higher-precedence entry.
    #[must_use]
    pub fn is_seen(&self, path: &str) -> bool {
        self.seen.contains(path)
    }

    /// Records that `path` was written.
    pub fn mark_seen(&mut self, path: &str) {
        let _ = self.seen.insert(path.to_string());
    }

    /// Records a hiding rule. Returns `false` if it was already present.
    pub fn record(&mut self, path: &str, reason: HideReason) -> bool {
        let (index, inserted) = self.rules.insert_full(HidingRule {
            path: path.to_string(),
            reason,
        });
        if inserted {
            self.by_path.entry(path.to_string()).or_default().push(index);
        }
        inserted
    }

    /// Returns the earliest recorded rule that hides `path`, if any.
    ///
    /// Only rules on `path` itself or on one of its ancestors (the archive
    /// root included) can match.
    #[must_use]
    pub fn hidden_by(&self, path: &str) -> Option<&HidingRule> {
        let root = (!path.is_empty()).then_some("");
        let ancestors = path.match_indices('/').map(|(at, _)| &path[..at]);
        root.into_iter()
            .chain(ancestors)
            .chain(std::iter::once(path))
            .filter_map(|candidate| self.by_path.get(candidate))
            .flatten()
            .copied()
            .filter(|&index| self.rules.get_index(index).is_some_and(|rule| rule.hides(path)))
            .min()
            .and_then(|index| self.rules.get_index(index))
    }

    /// Number of paths written so far.
    #[must_use]
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Recorded rules, in insertion order.
    pub fn rules(&self) -> impl Iterator<Item = &HidingRule> {
        self.rules.iter()
    }
}

/// Normalizes an archive entry name for comparison.
///
/// Leading `./`, repeated separators and trailing separators are dropped,
/// so `./etc/`, `etc` and `etc//` all compare equal. The archive root
/// normalizes to the empty string.
#[must_use]
pub fn normalize_entry_path(name: &str) -> String {
    name.split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}
