//! Semantic grouper
//!
//! Partitions chunks into groups that are syntactically cohesive: chunks in
//! the same innermost scope merge, a comment block merges with the scope it
//! precedes, and a changed definition pulls in every chunk referencing it.
//! Groups are the connected components of those relations under union-find.

use std::collections::BTreeSet;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use super::group::SemanticGroup;
use super::union_find::UnionFind;
use crate::config::FallbackStrategy;
use crate::diff::{Chunk, DeltaKind};
use crate::errors::{CoreError, Result};
use crate::parse::{AnalysisIndex, FileAnalysis, IdentifierRole, Side};

/// Per-chunk facts extracted from the analysis index
#[derive(Default)]
struct ChunkFacts {
    analyzable: bool,
    scope_ids: FxHashSet<String>,
    scope_names: BTreeSet<String>,
    defined: BTreeSet<String>,
    referenced: BTreeSet<String>,
}

pub struct SemanticGrouper {
    fallback_strategy: FallbackStrategy,
}

impl SemanticGrouper {
    pub fn new(fallback_strategy: FallbackStrategy) -> Self {
        Self { fallback_strategy }
    }

    /// Partition chunks into semantic groups, ordered by minimum chunk id
    pub fn group(&self, chunks: &[Chunk], index: &AnalysisIndex) -> Result<Vec<SemanticGroup>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let facts: Vec<ChunkFacts> = chunks.iter().map(|c| self.facts_for(c, index)).collect();
        let mut uf = UnionFind::new(chunks.len());

        self.union_by_scope(&facts, &mut uf);
        self.union_renames(chunks, &mut uf);
        self.union_whitespace(chunks, &mut uf);
        self.union_cross_references(chunks, &facts, index, &mut uf);
        self.union_fallback(chunks, &facts, &mut uf);

        let groups = self.collect_groups(chunks, &facts, &mut uf)?;
        debug!(
            chunks = chunks.len(),
            groups = groups.len(),
            "semantic grouping complete"
        );
        Ok(groups)
    }

    fn facts_for(&self, chunk: &Chunk, index: &AnalysisIndex) -> ChunkFacts {
        let mut facts = ChunkFacts::default();
        if chunk.is_marker() {
            // Markers carry no lines; they join their file's other chunks via
            // the rename rule or the fallback strategy
            facts.analyzable = false;
            return facts;
        }

        let mut missing_context = false;
        for (side, range, path) in chunk_sides(chunk) {
            let Some((start, end)) = range else { continue };
            let Some(analysis) = index.get(path, side) else {
                missing_context = true;
                continue;
            };
            if analysis.is_fallback() {
                missing_context = true;
                continue;
            }
            self.collect_side_facts(&analysis, start, end, &mut facts);
        }
        facts.analyzable = !missing_context;
        facts
    }

    fn collect_side_facts(
        &self,
        analysis: &FileAnalysis,
        start: u32,
        end: u32,
        facts: &mut ChunkFacts,
    ) {
        if let Some(scope) = analysis.innermost_scope_for_range(start, end) {
            facts.scope_ids.insert(scope.id.clone());
            facts.scope_names.insert(
                scope
                    .name
                    .clone()
                    .unwrap_or_else(|| analysis.path.clone()),
            );
        }

        // A comment block immediately preceding a scope is attached to it
        if analysis.side == Side::New && analysis.range_is_comment(start, end) {
            if let Some(next) = analysis.next_nonblank_after(end) {
                if let Some(scope) = analysis.scope_starting_at(next) {
                    facts.scope_ids.insert(scope.id.clone());
                    if let Some(name) = &scope.name {
                        facts.scope_names.insert(name.clone());
                    }
                }
            }
        }

        for site in analysis.sites_in_range(start, end, IdentifierRole::Definition) {
            facts.defined.insert(site.name.clone());
        }
        for site in analysis.sites_in_range(start, end, IdentifierRole::Reference) {
            facts.referenced.insert(site.name.clone());
        }
    }

    /// Rule 1: chunks intersecting the same innermost scope share a group
    fn union_by_scope(&self, facts: &[ChunkFacts], uf: &mut UnionFind) {
        let mut scope_to_chunk: FxHashMap<&str, usize> = FxHashMap::default();
        for (i, fact) in facts.iter().enumerate() {
            for scope_id in &fact.scope_ids {
                match scope_to_chunk.entry(scope_id.as_str()) {
                    std::collections::hash_map::Entry::Occupied(e) => uf.union(*e.get(), i),
                    std::collections::hash_map::Entry::Vacant(e) => {
                        e.insert(i);
                    }
                }
            }
        }
    }

    /// A rename never straddles two commits: all chunks of a renamed file
    /// stay together
    fn union_renames(&self, chunks: &[Chunk], uf: &mut UnionFind) {
        let mut by_file: FxHashMap<&str, usize> = FxHashMap::default();
        for (i, chunk) in chunks.iter().enumerate() {
            if chunk.change.kind != DeltaKind::Renamed {
                continue;
            }
            let key = chunk.change.canonical_path();
            match by_file.entry(key) {
                std::collections::hash_map::Entry::Occupied(e) => uf.union(*e.get(), i),
                std::collections::hash_map::Entry::Vacant(e) => {
                    e.insert(i);
                }
            }
        }
    }

    /// Whitespace-only chunks join their nearest non-whitespace neighbor in
    /// the same file so no group consists of blank lines alone
    fn union_whitespace(&self, chunks: &[Chunk], uf: &mut UnionFind) {
        let mut by_file: FxHashMap<&str, Vec<usize>> = FxHashMap::default();
        for (i, chunk) in chunks.iter().enumerate() {
            by_file
                .entry(chunk.change.canonical_path())
                .or_default()
                .push(i);
        }
        for indices in by_file.values() {
            for (pos, &i) in indices.iter().enumerate() {
                if !chunks[i].is_whitespace_only() {
                    continue;
                }
                let neighbor = indices[..pos]
                    .iter()
                    .rev()
                    .chain(indices[pos + 1..].iter())
                    .find(|&&j| !chunks[j].is_whitespace_only());
                if let Some(&j) = neighbor {
                    uf.union(i, j);
                }
            }
        }
    }

    /// Rule 3: every chunk referencing an identifier whose definition
    /// changed merges into the defining chunk's group
    fn union_cross_references(
        &self,
        chunks: &[Chunk],
        facts: &[ChunkFacts],
        index: &AnalysisIndex,
        uf: &mut UnionFind,
    ) {
        // name -> (defining chunk, defining file, cross-file sharing)
        let mut definers: FxHashMap<&str, (usize, &str, bool)> = FxHashMap::default();
        for (i, fact) in facts.iter().enumerate() {
            let path = chunks[i].change.canonical_path();
            let share = chunk_share_tokens(&chunks[i], index);
            for name in &fact.defined {
                definers.entry(name.as_str()).or_insert((i, path, share));
            }
        }

        for (i, fact) in facts.iter().enumerate() {
            if !fact.analyzable {
                continue;
            }
            for name in &fact.referenced {
                if let Some(&(definer, def_path, share)) = definers.get(name.as_str()) {
                    if definer == i {
                        continue;
                    }
                    let same_file = chunks[i].change.canonical_path() == def_path;
                    if share || same_file {
                        uf.union(definer, i);
                    }
                }
            }
        }
    }

    /// Chunks without analysis context group per the configured strategy
    fn union_fallback(&self, chunks: &[Chunk], facts: &[ChunkFacts], uf: &mut UnionFind) {
        let fallback: Vec<usize> = facts
            .iter()
            .enumerate()
            .filter(|(_, f)| !f.analyzable)
            .map(|(i, _)| i)
            .collect();

        match self.fallback_strategy {
            FallbackStrategy::AllTogether => {
                for pair in fallback.windows(2) {
                    uf.union(pair[0], pair[1]);
                }
            }
            FallbackStrategy::ByFile => {
                let mut by_file: FxHashMap<&str, usize> = FxHashMap::default();
                for &i in &fallback {
                    let key = chunks[i].change.canonical_path();
                    match by_file.entry(key) {
                        std::collections::hash_map::Entry::Occupied(e) => uf.union(*e.get(), i),
                        std::collections::hash_map::Entry::Vacant(e) => {
                            e.insert(i);
                        }
                    }
                }
            }
            FallbackStrategy::ByExtension => {
                let mut by_ext: FxHashMap<String, usize> = FxHashMap::default();
                for &i in &fallback {
                    let key = chunks[i].change.extension().unwrap_or("").to_string();
                    match by_ext.entry(key) {
                        std::collections::hash_map::Entry::Occupied(e) => uf.union(*e.get(), i),
                        std::collections::hash_map::Entry::Vacant(e) => {
                            e.insert(i);
                        }
                    }
                }
            }
        }
    }

    fn collect_groups(
        &self,
        chunks: &[Chunk],
        facts: &[ChunkFacts],
        uf: &mut UnionFind,
    ) -> Result<Vec<SemanticGroup>> {
        let mut by_root: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
        for i in 0..chunks.len() {
            by_root.entry(uf.find(i)).or_default().push(i);
        }

        let mut groups: Vec<SemanticGroup> = by_root
            .into_values()
            .map(|members| {
                let mut group = SemanticGroup {
                    id: 0,
                    chunks: members.iter().map(|&i| chunks[i].clone()).collect(),
                    files: BTreeSet::new(),
                    scopes: BTreeSet::new(),
                    defined: BTreeSet::new(),
                    referenced: BTreeSet::new(),
                    fallback: members.iter().any(|&i| !facts[i].analyzable),
                };
                for &i in &members {
                    group
                        .files
                        .insert(chunks[i].change.canonical_path().to_string());
                    group.scopes.extend(facts[i].scope_names.iter().cloned());
                    group.defined.extend(facts[i].defined.iter().cloned());
                    group.referenced.extend(facts[i].referenced.iter().cloned());
                }
                group.chunks.sort_by_key(|c| c.id);
                group
            })
            .collect();

        groups.sort_by_key(|g| g.min_chunk_id());
        for (i, group) in groups.iter_mut().enumerate() {
            group.id = i as u32;
        }

        // Partition invariant: every chunk in exactly one group
        let total: usize = groups.iter().map(|g| g.chunks.len()).sum();
        let mut seen = FxHashSet::default();
        for group in &groups {
            for chunk in &group.chunks {
                if !seen.insert(chunk.id) {
                    return Err(CoreError::SemanticPartitionViolated(format!(
                        "chunk {} appears in more than one group",
                        chunk.id
                    )));
                }
            }
        }
        if total != chunks.len() {
            return Err(CoreError::SemanticPartitionViolated(format!(
                "{} chunks in, {} chunks out",
                chunks.len(),
                total
            )));
        }

        Ok(groups)
    }
}

/// Touched (side, range, path) pairs for a chunk
fn chunk_sides(chunk: &Chunk) -> Vec<(Side, Option<(u32, u32)>, &str)> {
    let mut sides = Vec::with_capacity(2);
    if let Some(path) = chunk.change.old_path.as_deref() {
        sides.push((Side::Old, chunk.old_line_range(), path));
    }
    if let Some(path) = chunk.change.new_path.as_deref() {
        sides.push((Side::New, chunk.new_line_range(), path));
    }
    sides
}

fn chunk_share_tokens(chunk: &Chunk, index: &AnalysisIndex) -> bool {
    chunk
        .change
        .new_path
        .as_deref()
        .or(chunk.change.old_path.as_deref())
        .and_then(|path| {
            index
                .get(path, Side::New)
                .or_else(|| index.get(path, Side::Old))
        })
        .map(|a| a.share_tokens_between_files)
        .unwrap_or(false)
}
