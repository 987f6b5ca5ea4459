//! Differential file content
//!
//! An editor buffer represented as its lines plus a chunk diff against the
//! version the snapshot index was built from. The chunk list is contiguous
//! and totally covers both versions; all line anchors are 1-based.

use similar::{DiffOp, TextDiff};

/// One contiguous diff segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// First line of the segment in the original (indexed) version.
    pub orig_start: i64,
    /// First line of the segment in the edited buffer.
    pub new_start: i64,
    pub num_common: i64,
    pub num_added: i64,
    pub num_removed: i64,
}

impl Chunk {
    /// Whether this chunk carries any edit.
    pub fn is_common(&self) -> bool {
        self.num_added == 0 && self.num_removed == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct DifferentialFileContent {
    pub editor_lines: Vec<String>,
    pub chunks: Vec<Chunk>,
}

impl DifferentialFileContent {
    /// Diff an edited buffer against the original the index was built on.
    pub fn compute(original: &str, edited: &str) -> Self {
        let diff = TextDiff::from_lines(original, edited);

        let mut chunks = Vec::new();
        for op in diff.ops() {
            let chunk = match *op {
                DiffOp::Equal {
                    old_index,
                    new_index,
                    len,
                } => Chunk {
                    orig_start: old_index as i64 + 1,
                    new_start: new_index as i64 + 1,
                    num_common: len as i64,
                    num_added: 0,
                    num_removed: 0,
                },
                DiffOp::Delete {
                    old_index,
                    old_len,
                    new_index,
                } => Chunk {
                    orig_start: old_index as i64 + 1,
                    new_start: new_index as i64 + 1,
                    num_common: 0,
                    num_added: 0,
                    num_removed: old_len as i64,
                },
                DiffOp::Insert {
                    old_index,
                    new_index,
                    new_len,
                } => Chunk {
                    orig_start: old_index as i64 + 1,
                    new_start: new_index as i64 + 1,
                    num_common: 0,
                    num_added: new_len as i64,
                    num_removed: 0,
                },
                DiffOp::Replace {
                    old_index,
                    old_len,
                    new_index,
                    new_len,
                } => Chunk {
                    orig_start: old_index as i64 + 1,
                    new_start: new_index as i64 + 1,
                    num_common: 0,
                    num_added: new_len as i64,
                    num_removed: old_len as i64,
                },
            };
            chunks.push(chunk);
        }
        if chunks.is_empty() {
            chunks.push(Chunk {
                orig_start: 1,
                new_start: 1,
                num_common: 0,
                num_added: 0,
                num_removed: 0,
            });
        }

        Self {
            editor_lines: edited.lines().map(str::to_string).collect(),
            chunks,
        }
    }

    /// A buffer identical to the indexed version: one all-common chunk.
    pub fn identity(content: &str) -> Self {
        let editor_lines: Vec<String> = content.lines().map(str::to_string).collect();
        let chunks = vec![Chunk {
            orig_start: 1,
            new_start: 1,
            num_common: editor_lines.len() as i64,
            num_added: 0,
            num_removed: 0,
        }];
        Self {
            editor_lines,
            chunks,
        }
    }
}
