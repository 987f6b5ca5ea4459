//! Differential query resolution
//!
//! Locates the nearest reusable snapshot for a position in an edited
//! buffer and replays only the delta. Every structural mismatch between
//! the diff and the indexed history resolves to `None`, which callers
//! surface as the `unexecuted` / `no-completion` sentinels; editor input
//! never produces a protocol error from here.

use super::diff::{Chunk, DifferentialFileContent};
use super::index::SnapshotIndex;
use super::Snapshot;
use crate::eval::{Evaluator, EvaluatorState};
use crate::listfile::parser::Parser;
use crate::listfile::{CollectingMessenger, ListFileContext, ListFileFunction};
use std::path::Path;

/// Whether the full evaluation never reached `line` of `file`.
pub fn is_not_executed(state: &dyn EvaluatorState, file: &Path, line: i64) -> bool {
    state
        .not_executed(file)
        .iter()
        .any(|&(lo, hi)| line >= lo && line < hi)
}

/// Index of the chunk containing `line` in new-file coordinates, skipping
/// pure-removal chunks (they occupy no lines of the edited buffer).
fn chunk_containing_new(chunks: &[Chunk], line: i64) -> Option<usize> {
    let mut index = chunks.partition_point(|c| c.new_start < line);
    if index == chunks.len() || chunks[index].new_start != line {
        index = index.checked_sub(1)?;
    }
    while chunks[index].num_common + chunks[index].num_added == 0 {
        index += 1;
        if index == chunks.len() {
            return None;
        }
    }
    Some(index)
}

/// Index of the chunk containing `line` in original-file coordinates.
pub(crate) fn chunk_containing_orig(chunks: &[Chunk], line: i64) -> Option<usize> {
    let mut index = chunks.partition_point(|c| c.orig_start < line);
    if index == chunks.len() || chunks[index].orig_start != line {
        index = index.checked_sub(1)?;
    }
    Some(index)
}

/// Resolve the base snapshot and replay start line for a query position.
///
/// The returned line is in edited-buffer coordinates; `None` means the
/// position cannot be mapped onto the indexed history.
pub fn snapshot_and_start_line(
    index: &SnapshotIndex,
    state: &dyn EvaluatorState,
    file: &Path,
    file_line: i64,
    diff: &DifferentialFileContent,
) -> Option<(Snapshot, i64)> {
    debug_assert!(file_line > 0);
    let chunks = &diff.chunks;
    if chunks.is_empty() {
        return None;
    }

    let containing = chunk_containing_new(chunks, file_line)?;
    let chunk = &chunks[containing];

    // Map the query position to a search line in the original file: a
    // common chunk maps directly, an edited chunk falls back to the end of
    // the previous common run.
    let search_start = if chunk.is_common() {
        chunk.orig_start + (file_line - chunk.new_start)
    } else if containing > 0 {
        let previous = &chunks[containing - 1];
        previous.orig_start + previous.num_common
    } else {
        1
    };

    let (snapshot, snapshot_line) = snapshot_context(index, state, file, search_start)?;

    // The replay window starts at the snapshot's line; map it back into
    // the edited buffer. If it lands inside an edited chunk there is
    // nothing stable to replay from.
    let from = chunk_containing_orig(chunks, snapshot_line)?;
    let from_chunk = &chunks[from];
    if !from_chunk.is_common() {
        return None;
    }
    let start_from = from_chunk.new_start + (snapshot_line - from_chunk.orig_start);
    Some((snapshot, start_from))
}

/// Resolve the snapshot context at `(file, line)` in original-file
/// coordinates.
///
/// On an exact entry-point hit the snapshot is popped once so callers see
/// the state after that command's frame was entered; otherwise the
/// preceding entry's innermost snapshot is popped to the enclosing frame.
fn snapshot_context(
    index: &SnapshotIndex,
    state: &dyn EvaluatorState,
    file: &Path,
    line: i64,
) -> Option<(Snapshot, i64)> {
    let key = ListFileContext::new(file, line);

    if let Some((_, chain)) = index.lower_bound(&key) {
        let snapshot = *chain.last()?;
        if state.execution_file(snapshot) == file && state.starting_line(snapshot) == line {
            return Some((state.pop_arbitrary(snapshot)?, line));
        }
    }

    let (previous_key, chain) = index.before(&key)?;
    if previous_key.file_path != file {
        return None;
    }
    let snapshot = state.pop_arbitrary(*chain.last()?)?;
    Some((snapshot, previous_key.line))
}

/// Replay the editor lines from `start_line` up to `file_line` against the
/// base snapshot: parse them as a list file and execute the delta.
///
/// In completion mode the target line itself is included in the parse so
/// the function under the cursor is available even while incomplete.
pub fn desired_snapshot(
    evaluator: &mut dyn Evaluator,
    editor_lines: &[String],
    start_line: i64,
    base: Snapshot,
    file_line: i64,
    completion_mode: bool,
) -> Option<(Snapshot, Option<ListFileFunction>)> {
    if start_line < 1 || file_line < start_line {
        return None;
    }
    if (editor_lines.len() as i64) < file_line {
        return None;
    }

    let mut end = file_line as usize - 1;
    if completion_mode {
        end += 1;
    }
    let window = &editor_lines[start_line as usize - 1..end.min(editor_lines.len())];
    let content = window.join("\n");

    let execution_file = evaluator.state().execution_file(base);
    let mut messenger = CollectingMessenger::new();
    let list_file = Parser::new(&execution_file, &mut messenger)
        .parse_string(&content)
        .ok()?;

    let count = (file_line - start_line + 1) as usize;
    evaluator.read_commands(base, &list_file.functions, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::diff::Chunk;

    fn chunks(spec: &[(i64, i64, i64, i64, i64)]) -> Vec<Chunk> {
        spec.iter()
            .map(|&(orig_start, new_start, num_common, num_added, num_removed)| Chunk {
                orig_start,
                new_start,
                num_common,
                num_added,
                num_removed,
            })
            .collect()
    }

    #[test]
    fn test_chunk_containing_new_exact_and_interior() {
        // 3 common, 2 added, 3 common
        let chunks = chunks(&[(1, 1, 3, 0, 0), (4, 4, 0, 2, 0), (4, 6, 3, 0, 0)]);

        assert_eq!(chunk_containing_new(&chunks, 1), Some(0));
        assert_eq!(chunk_containing_new(&chunks, 3), Some(0));
        assert_eq!(chunk_containing_new(&chunks, 4), Some(1));
        assert_eq!(chunk_containing_new(&chunks, 5), Some(1));
        assert_eq!(chunk_containing_new(&chunks, 6), Some(2));
        assert_eq!(chunk_containing_new(&chunks, 8), Some(2));
    }

    #[test]
    fn test_chunk_containing_new_skips_pure_removal() {
        // 2 common, 2 removed, 2 common: lines 3.. of the buffer live in
        // the final chunk, which shares new_start with the removal chunk.
        let chunks = chunks(&[(1, 1, 2, 0, 0), (3, 3, 0, 0, 2), (5, 3, 2, 0, 0)]);

        assert_eq!(chunk_containing_new(&chunks, 3), Some(2));
        assert_eq!(chunk_containing_new(&chunks, 4), Some(2));
    }

    #[test]
    fn test_chunk_containing_orig() {
        let chunks = chunks(&[(1, 1, 2, 0, 0), (3, 3, 0, 0, 2), (5, 3, 2, 0, 0)]);

        assert_eq!(chunk_containing_orig(&chunks, 2), Some(0));
        assert_eq!(chunk_containing_orig(&chunks, 3), Some(1));
        assert_eq!(chunk_containing_orig(&chunks, 4), Some(1));
        assert_eq!(chunk_containing_orig(&chunks, 5), Some(2));
    }
}
