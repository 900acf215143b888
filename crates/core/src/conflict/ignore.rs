//! Decides which conflicting files are not worth reporting.

use std::collections::{BTreeSet, HashSet};

use crate::patterns::PatternSet;

/// Files excluded from a conflict report, split by reason.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoredFiles {
    /// Conflicting files matching an ignore pattern.
    pub by_pattern: BTreeSet<String>,
    /// Files both sides already changed relative to their common ancestor.
    pub inherited: BTreeSet<String>,
}

impl IgnoredFiles {
    pub fn contains(&self, file: &str) -> bool {
        self.by_pattern.contains(file) || self.inherited.contains(file)
    }

    /// `true` when every file in `files` is ignored for some reason.
    pub fn covers(&self, files: &[String]) -> bool {
        files.iter().all(|f| self.contains(f))
    }

    pub fn len(&self) -> usize {
        self.by_pattern.union(&self.inherited).count()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pattern.is_empty() && self.inherited.is_empty()
    }
}

/// Conflicting files matched by `patterns`.
pub fn matching_patterns(files: &[String], patterns: &PatternSet) -> BTreeSet<String> {
    files
        .iter()
        .filter(|f| patterns.matches(f))
        .cloned()
        .collect()
}

/// Intersection of the two sides' changes against their common ancestor.
pub fn inherited(target_diff: &[String], source_diff: &[String]) -> BTreeSet<String> {
    let source: HashSet<&str> = source_diff.iter().map(String::as_str).collect();
    target_diff
        .iter()
        .filter(|f| source.contains(f.as_str()))
        .cloned()
        .collect()
}
