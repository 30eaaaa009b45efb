//! Atomic chunk model
//!
//! A chunk is the finest unit of change: a contiguous removed range in the
//! base file paired with a contiguous inserted range in the target file.
//! Chunks of one file are pairwise disjoint on both sides, so any subset can
//! be applied in any order with the same result.

use std::sync::Arc;

use super::delta::{FileChange, Line};

/// Stable chunk identifier, assigned once in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub u32);

impl std::fmt::Display for ChunkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// The atomic post-split unit of change
///
/// `old_start` is the 1-based first removed line, or for pure insertions the
/// line after which the insertion lands (0 = top of file). `new_start` is
/// symmetric on the target side.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: ChunkId,
    pub change: Arc<FileChange>,
    pub old_start: u32,
    pub new_start: u32,
    pub old_lines: Vec<Line>,
    pub new_lines: Vec<Line>,
}

impl Chunk {
    pub fn old_len(&self) -> u32 {
        self.old_lines.len() as u32
    }

    pub fn new_len(&self) -> u32 {
        self.new_lines.len() as u32
    }

    pub fn is_pure_insertion(&self) -> bool {
        self.old_lines.is_empty() && !self.new_lines.is_empty()
    }

    pub fn is_pure_deletion(&self) -> bool {
        self.new_lines.is_empty() && !self.old_lines.is_empty()
    }

    /// Marker chunk for deltas with no line content (empty-file add/delete,
    /// pure mode change, pure rename, binary passthrough)
    pub fn is_marker(&self) -> bool {
        self.old_lines.is_empty() && self.new_lines.is_empty()
    }

    /// 1-based inclusive touched range in the base file, if any
    pub fn old_line_range(&self) -> Option<(u32, u32)> {
        if self.old_lines.is_empty() {
            None
        } else {
            Some((self.old_start, self.old_start + self.old_len() - 1))
        }
    }

    /// 1-based inclusive touched range in the target file, if any
    pub fn new_line_range(&self) -> Option<(u32, u32)> {
        if self.new_lines.is_empty() {
            None
        } else {
            Some((self.new_start, self.new_start + self.new_len() - 1))
        }
    }

    /// Sort key giving a total old-side order: a deletion starting at line k
    /// sorts before an insertion anchored after line k
    pub fn old_order_key(&self) -> (u64, u32) {
        let primary = 2 * self.old_start as u64 + if self.old_lines.is_empty() { 1 } else { 0 };
        (primary, self.new_start)
    }

    /// True if all changed lines on both sides are whitespace-only
    pub fn is_whitespace_only(&self) -> bool {
        let blank = |line: &Line| line.iter().all(|b| b.is_ascii_whitespace());
        !self.is_marker() && self.old_lines.iter().all(blank) && self.new_lines.iter().all(blank)
    }

    /// Whether two chunks of the same file occupy disjoint regions on both
    /// the old and the new side
    pub fn is_disjoint_from(&self, other: &Chunk) -> bool {
        ranges_disjoint(
            self.old_start,
            self.old_len(),
            other.old_start,
            other.old_len(),
        ) && ranges_disjoint(
            self.new_start,
            self.new_len(),
            other.new_start,
            other.new_len(),
        )
    }
}

/// Disjointness of two ranges where a zero-length range at anchor k sits
/// between lines k and k+1
fn ranges_disjoint(a_start: u32, a_len: u32, b_start: u32, b_len: u32) -> bool {
    match (a_len, b_len) {
        // Two anchors may share a position; ordering is resolved on the
        // opposite side
        (0, 0) => true,
        // An anchor conflicts with a non-empty range only when the insertion
        // point falls strictly inside it
        (0, _) => !(b_start <= a_start && a_start + 1 < b_start + b_len),
        (_, 0) => ranges_disjoint(b_start, b_len, a_start, a_len),
        (_, _) => a_start + a_len <= b_start || b_start + b_len <= a_start,
    }
}
