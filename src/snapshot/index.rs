//! Ordered snapshot index
//!
//! Maps `(file, line)` entry points to the stack of snapshots whose entry
//! point lies there, innermost last. Populated once after a full
//! evaluation and read-only until the next one.

use super::Snapshot;
use crate::listfile::ListFileContext;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Default)]
pub struct SnapshotIndex {
    entries: BTreeMap<ListFileContext, Vec<Snapshot>>,
}

impl SnapshotIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the snapshot chain at an entry point. Empty chains carry no
    /// information and are ignored.
    pub fn insert(&mut self, context: ListFileContext, chain: Vec<Snapshot>) {
        if chain.is_empty() {
            return;
        }
        self.entries.insert(context, chain);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// First entry at or after `key` in (file, line) order.
    pub fn lower_bound(&self, key: &ListFileContext) -> Option<(&ListFileContext, &[Snapshot])> {
        self.entries
            .range(key.clone()..)
            .next()
            .map(|(k, v)| (k, v.as_slice()))
    }

    /// Last entry strictly before `key`.
    pub fn before(&self, key: &ListFileContext) -> Option<(&ListFileContext, &[Snapshot])> {
        self.entries
            .range(..key.clone())
            .next_back()
            .map(|(k, v)| (k, v.as_slice()))
    }

    /// Entry-point lines recorded for one file, in increasing order.
    pub fn lines_for_file(&self, file: &Path) -> Vec<i64> {
        self.entries
            .keys()
            .filter(|k| k.file_path == file)
            .map(|k| k.line)
            .collect()
    }
}
