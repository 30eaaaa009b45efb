//! Semantic group model

use std::collections::BTreeSet;

use crate::diff::{Chunk, ChunkId};

/// Chunks unified by shared scope, attached comments or identifier
/// definition/reference links
#[derive(Debug, Clone)]
pub struct SemanticGroup {
    /// Dense index assigned after canonical ordering
    pub id: u32,
    pub chunks: Vec<Chunk>,
    /// Paths touched by this group's chunks
    pub files: BTreeSet<String>,
    /// Display names of the scopes the group touches
    pub scopes: BTreeSet<String>,
    /// Identifier names whose definitions this group changes
    pub defined: BTreeSet<String>,
    /// Identifier names this group references
    pub referenced: BTreeSet<String>,
    /// True when the group was formed by a fallback strategy
    pub fallback: bool,
}

impl SemanticGroup {
    pub fn chunk_ids(&self) -> Vec<ChunkId> {
        self.chunks.iter().map(|c| c.id).collect()
    }

    pub fn min_chunk_id(&self) -> ChunkId {
        self.chunks
            .iter()
            .map(|c| c.id)
            .min()
            .expect("semantic group is never empty")
    }

    /// Union of all identifier names the group touches
    pub fn identifiers(&self) -> BTreeSet<String> {
        self.defined.union(&self.referenced).cloned().collect()
    }

    pub fn total_line_count(&self) -> usize {
        self.chunks
            .iter()
            .map(|c| c.old_lines.len() + c.new_lines.len())
            .sum()
    }
}
