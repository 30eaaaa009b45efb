//! Commit synthesis by incremental accumulation
//!
//! Commit k's tree is always built by applying the union of groups 1..k to
//! the original base tree, never by patching the previous commit's tree.
//! Chunk composition is order-free, so every intermediate tree is exact and
//! the final tree equals the accepted target byte for byte.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::diff::{compose_file, verify_disjoint, Chunk, DeltaKind};
use crate::errors::{CoreError, Result};
use crate::gateway::{RepositoryGateway, Signature, TreeUpdate};
use crate::model::LogicalGroup;

/// One commit produced by a run
#[derive(Debug, Clone)]
pub struct CommitRecord {
    pub id: String,
    pub message: String,
    pub files: BTreeSet<String>,
    pub scopes: BTreeSet<String>,
}

/// Inputs for one synthesis run
pub struct SynthesisRequest<'a> {
    pub base_commit: &'a str,
    pub groups: &'a [LogicalGroup],
    /// Preserved author identity (fix/clean); None uses repository defaults
    pub author: Option<Signature>,
    pub committer: Option<Signature>,
    /// When set, the final tree must equal this tree exactly
    pub expected_tree: Option<String>,
}

pub struct Synthesizer<'a> {
    gateway: &'a dyn RepositoryGateway,
    cancel: &'a CancelToken,
}

impl<'a> Synthesizer<'a> {
    pub fn new(gateway: &'a dyn RepositoryGateway, cancel: &'a CancelToken) -> Self {
        Self { gateway, cancel }
    }

    /// Materialize the commit chain; returns the records and the new tip
    pub fn synthesize(&self, request: &SynthesisRequest<'_>) -> Result<(Vec<CommitRecord>, String)> {
        if request.groups.is_empty() {
            return Ok((Vec::new(), request.base_commit.to_string()));
        }

        let base_tree = self.gateway.tree_of(request.base_commit)?;
        let base_entries = self.gateway.read_tree(&base_tree)?;

        // Total chunks per path decide when a deletion is complete
        let mut total_per_path: FxHashMap<String, usize> = FxHashMap::default();
        for group in request.groups {
            for chunk in group.members.iter().flat_map(|m| m.chunks.iter()) {
                *total_per_path
                    .entry(chunk.change.canonical_path().to_string())
                    .or_default() += 1;
            }
        }

        // Base-side content cache for every touched path
        let mut base_contents: FxHashMap<String, Vec<u8>> = FxHashMap::default();

        let mut cumulative: FxHashMap<String, Vec<Chunk>> = FxHashMap::default();
        let mut updates: FxHashMap<String, Vec<TreeUpdate>> = FxHashMap::default();
        let mut records = Vec::with_capacity(request.groups.len());
        let mut parent = request.base_commit.to_string();

        for group in request.groups {
            self.cancel.check()?;

            let mut touched: BTreeSet<String> = BTreeSet::new();
            for chunk in group.members.iter().flat_map(|m| m.chunks.iter()) {
                let path = chunk.change.canonical_path().to_string();
                cumulative.entry(path.clone()).or_default().push(chunk.clone());
                touched.insert(path);
            }

            // Refresh tree updates only for the files this group touches
            for path in &touched {
                let chunks = &cumulative[path];
                let chunk_refs: Vec<&Chunk> = chunks.iter().collect();
                verify_disjoint(&chunk_refs)?;
                let file_updates = self.file_updates(
                    path,
                    &chunk_refs,
                    total_per_path[path],
                    &base_entries,
                    &mut base_contents,
                )?;
                updates.insert(path.clone(), file_updates);
            }

            let all_updates: Vec<TreeUpdate> =
                updates.values().flatten().cloned().collect();
            let tree = self.gateway.write_tree(&base_tree, &all_updates)?;
            let commit = self.gateway.write_commit(
                &tree,
                &[parent.clone()],
                &group.message,
                request.author.as_ref(),
                request.committer.as_ref(),
            )?;
            info!(
                commit = %commit,
                parent = %parent,
                files = touched.len(),
                message = %group.message,
                "commit synthesized"
            );

            records.push(CommitRecord {
                id: commit.clone(),
                message: group.message.clone(),
                files: group.files(),
                scopes: group.scopes(),
            });
            parent = commit;
        }

        if let Some(expected) = &request.expected_tree {
            let final_tree = self.gateway.tree_of(&parent)?;
            if &final_tree != expected {
                return Err(CoreError::ChunkingInvariantViolated(format!(
                    "final tree {final_tree} does not equal the target tree {expected}"
                )));
            }
            debug!(tree = %final_tree, "final tree matches the target");
        }

        Ok((records, parent))
    }

    /// Tree updates for one path given the chunks applied so far
    fn file_updates(
        &self,
        path: &str,
        chunks: &[&Chunk],
        total_chunks: usize,
        base_entries: &std::collections::BTreeMap<String, crate::gateway::TreeEntry>,
        base_contents: &mut FxHashMap<String, Vec<u8>>,
    ) -> Result<Vec<TreeUpdate>> {
        let change = &chunks[0].change;
        let complete = chunks.len() >= total_chunks;

        // Binary deltas pass through opaquely via their target blob id
        if change.is_binary {
            return match change.kind {
                DeltaKind::Deleted => Ok(vec![TreeUpdate::Remove {
                    path: path.to_string(),
                }]),
                _ => {
                    let oid = change.new_blob_id.clone().ok_or_else(|| {
                        CoreError::gateway(format!("binary delta for {path} has no blob id"))
                    })?;
                    let mode = self.target_mode(change, base_entries);
                    let mut updates = Vec::new();
                    if change.kind == DeltaKind::Renamed {
                        if let Some(old_path) = &change.old_path {
                            updates.push(TreeUpdate::Remove {
                                path: old_path.clone(),
                            });
                        }
                    }
                    updates.push(TreeUpdate::Put {
                        path: path.to_string(),
                        mode,
                        oid,
                    });
                    Ok(updates)
                }
            };
        }

        let base = match &change.old_path {
            Some(old_path) => {
                if !base_contents.contains_key(old_path) {
                    let content = match base_entries.get(old_path) {
                        Some(entry) => self.gateway.read_blob(&entry.oid)?,
                        None => Vec::new(),
                    };
                    base_contents.insert(old_path.clone(), content);
                }
                base_contents[old_path].clone()
            }
            None => Vec::new(),
        };

        match change.kind {
            DeltaKind::Deleted if complete => Ok(vec![TreeUpdate::Remove {
                path: path.to_string(),
            }]),
            DeltaKind::Renamed => {
                // the semantic grouper pins all chunks of a rename together
                let content = compose_file(&base, chunks)?;
                let oid = self.gateway.write_blob(&content)?;
                let mut updates = Vec::new();
                if let Some(old_path) = &change.old_path {
                    updates.push(TreeUpdate::Remove {
                        path: old_path.clone(),
                    });
                }
                updates.push(TreeUpdate::Put {
                    path: path.to_string(),
                    mode: self.target_mode(change, base_entries),
                    oid,
                });
                Ok(updates)
            }
            _ => {
                let content = compose_file(&base, chunks)?;
                let oid = self.gateway.write_blob(&content)?;
                Ok(vec![TreeUpdate::Put {
                    path: path.to_string(),
                    mode: self.target_mode(change, base_entries),
                    oid,
                }])
            }
        }
    }

    /// Mode for the produced entry: the target mode when known, else the
    /// base entry's mode, else a regular file
    fn target_mode(
        &self,
        change: &crate::diff::FileChange,
        base_entries: &std::collections::BTreeMap<String, crate::gateway::TreeEntry>,
    ) -> String {
        if let Some(mode) = &change.new_mode {
            return mode.clone();
        }
        if let Some(old_path) = &change.old_path {
            if let Some(entry) = base_entries.get(old_path) {
                return entry.mode.clone();
            }
        }
        "100644".to_string()
    }
}
