//! Mechanical chunker
//!
//! Splits each zero-context hunk into the finest set of atomic chunks. The
//! edit script inside a hunk is recovered with a line-level LCS; every
//! maximal run of matched lines starts a new chunk. Added and deleted files
//! split on blank-line boundaries instead, since they have no opposite side
//! to match against.

use std::sync::Arc;

use tracing::debug;

use super::chunk::{Chunk, ChunkId};
use super::delta::{FileChange, FileDelta, Hunk, Line};
use crate::config::ChunkingLevel;
use crate::diff::delta::DeltaKind;

/// Beyond this many lines per side, a hunk is kept whole; the quadratic LCS
/// table is not worth it for wholesale rewrites
const LCS_LINE_LIMIT: usize = 500;

/// Split all deltas into atomic chunks with canonical ids
pub fn chunk_deltas(deltas: &[FileDelta], level: ChunkingLevel) -> Vec<Chunk> {
    let mut chunks: Vec<Chunk> = Vec::new();

    for delta in deltas {
        let split_this = match level {
            ChunkingLevel::None => false,
            ChunkingLevel::FullFiles => {
                matches!(delta.change.kind, DeltaKind::Added | DeltaKind::Deleted)
            }
            ChunkingLevel::AllFiles => true,
        };

        if delta.hunks.is_empty() {
            // Empty-file add/delete, pure rename, mode change or binary
            // passthrough: one marker chunk keeps the partition exhaustive
            chunks.push(Chunk {
                id: ChunkId(0),
                change: Arc::clone(&delta.change),
                old_start: 0,
                new_start: 0,
                old_lines: Vec::new(),
                new_lines: Vec::new(),
            });
            continue;
        }

        for hunk in &delta.hunks {
            if !split_this {
                chunks.push(whole_hunk_chunk(&delta.change, hunk));
                continue;
            }
            match delta.change.kind {
                DeltaKind::Added => chunks.extend(split_added(&delta.change, hunk)),
                DeltaKind::Deleted => chunks.extend(split_deleted(&delta.change, hunk)),
                _ => chunks.extend(split_edit(&delta.change, hunk)),
            }
        }
    }

    // Canonical order, then stable ids
    chunks.sort_by(|a, b| {
        a.change
            .canonical_path()
            .cmp(b.change.canonical_path())
            .then(a.old_order_key().cmp(&b.old_order_key()))
    });
    for (i, chunk) in chunks.iter_mut().enumerate() {
        chunk.id = ChunkId(i as u32);
    }

    debug!(
        chunks = chunks.len(),
        files = deltas.len(),
        "mechanical chunking complete"
    );
    chunks
}

fn whole_hunk_chunk(change: &Arc<FileChange>, hunk: &Hunk) -> Chunk {
    Chunk {
        id: ChunkId(0),
        change: Arc::clone(change),
        old_start: hunk.old_start,
        new_start: hunk.new_start,
        old_lines: hunk.old_lines.clone(),
        new_lines: hunk.new_lines.clone(),
    }
}

fn is_blank(line: &Line) -> bool {
    line.iter().all(|b| b.is_ascii_whitespace())
}

/// Split a full-file addition at blank-line boundaries. Each chunk is a
/// maximal non-blank region plus its trailing blank separator, so the union
/// reproduces the file exactly.
fn split_added(change: &Arc<FileChange>, hunk: &Hunk) -> Vec<Chunk> {
    let regions = blank_separated_regions(&hunk.new_lines);
    regions
        .into_iter()
        .map(|(offset, lines)| Chunk {
            id: ChunkId(0),
            change: Arc::clone(change),
            old_start: 0,
            new_start: hunk.new_start + offset as u32,
            old_lines: Vec::new(),
            new_lines: lines,
        })
        .collect()
}

/// Symmetric policy for full-file deletions
fn split_deleted(change: &Arc<FileChange>, hunk: &Hunk) -> Vec<Chunk> {
    let regions = blank_separated_regions(&hunk.old_lines);
    regions
        .into_iter()
        .map(|(offset, lines)| Chunk {
            id: ChunkId(0),
            change: Arc::clone(change),
            old_start: hunk.old_start + offset as u32,
            new_start: 0,
            old_lines: lines,
            new_lines: Vec::new(),
        })
        .collect()
}

/// Break lines into regions split where a blank run ends and a non-blank
/// line begins; blank separators stay with the preceding region
fn blank_separated_regions(lines: &[Line]) -> Vec<(usize, Vec<Line>)> {
    let mut regions: Vec<(usize, Vec<Line>)> = Vec::new();
    let mut in_blank_run = false;

    for (i, line) in lines.iter().enumerate() {
        let blank = is_blank(line);
        let start_new = regions.is_empty() || (in_blank_run && !blank);
        if start_new {
            regions.push((i, Vec::new()));
        }
        regions.last_mut().expect("region exists").1.push(line.clone());
        in_blank_run = blank;
    }
    regions
}

#[derive(Clone, Copy, PartialEq)]
enum Op {
    Keep,
    Delete,
    Insert,
}

/// Split an edit hunk via its line-level edit script. Maximal runs of
/// non-keep operations fuse into one chunk; each keep run closes the
/// current chunk.
fn split_edit(change: &Arc<FileChange>, hunk: &Hunk) -> Vec<Chunk> {
    if hunk.old_lines.len() > LCS_LINE_LIMIT || hunk.new_lines.len() > LCS_LINE_LIMIT {
        return vec![whole_hunk_chunk(change, hunk)];
    }

    let ops = edit_script(&hunk.old_lines, &hunk.new_lines);

    let mut chunks = Vec::new();
    // 1-based counters for the next line on each side; a pure-insert hunk
    // has old_start as an anchor, so the first old line would be start+1
    let mut old_line = if hunk.old_lines.is_empty() {
        hunk.old_start + 1
    } else {
        hunk.old_start
    };
    let mut new_line = if hunk.new_lines.is_empty() {
        hunk.new_start + 1
    } else {
        hunk.new_start
    };

    let mut old_iter = hunk.old_lines.iter();
    let mut new_iter = hunk.new_lines.iter();
    let mut open: Option<Chunk> = None;

    for op in ops {
        match op {
            Op::Keep => {
                if let Some(chunk) = open.take() {
                    chunks.push(chunk);
                }
                old_iter.next();
                new_iter.next();
                old_line += 1;
                new_line += 1;
            }
            Op::Delete => {
                let chunk = open.get_or_insert_with(|| Chunk {
                    id: ChunkId(0),
                    change: Arc::clone(change),
                    old_start: old_line,
                    new_start: new_line.saturating_sub(1),
                    old_lines: Vec::new(),
                    new_lines: Vec::new(),
                });
                if chunk.old_lines.is_empty() {
                    chunk.old_start = old_line;
                }
                chunk
                    .old_lines
                    .push(old_iter.next().expect("edit script consumed old line").clone());
                old_line += 1;
            }
            Op::Insert => {
                let chunk = open.get_or_insert_with(|| Chunk {
                    id: ChunkId(0),
                    change: Arc::clone(change),
                    old_start: old_line.saturating_sub(1),
                    new_start: new_line,
                    old_lines: Vec::new(),
                    new_lines: Vec::new(),
                });
                if chunk.new_lines.is_empty() {
                    chunk.new_start = new_line;
                }
                chunk
                    .new_lines
                    .push(new_iter.next().expect("edit script consumed new line").clone());
                new_line += 1;
            }
        }
    }
    if let Some(chunk) = open.take() {
        chunks.push(chunk);
    }
    chunks
}

/// Line-level edit script via LCS backtracking. Deletions are emitted before
/// insertions inside each changed region.
fn edit_script(old: &[Line], new: &[Line]) -> Vec<Op> {
    let n = old.len();
    let m = new.len();
    // lcs[i][j] = length of LCS of old[i..] and new[j..]
    let mut lcs = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lcs[i][j] = if old[i] == new[j] {
                lcs[i + 1][j + 1] + 1
            } else {
                lcs[i + 1][j].max(lcs[i][j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(n + m);
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push(Op::Keep);
            i += 1;
            j += 1;
        } else if lcs[i + 1][j] >= lcs[i][j + 1] {
            ops.push(Op::Delete);
            i += 1;
        } else {
            ops.push(Op::Insert);
            j += 1;
        }
    }
    ops.extend(std::iter::repeat(Op::Delete).take(n - i));
    ops.extend(std::iter::repeat(Op::Insert).take(m - j));
    ops
}
