//! Repository gateway port
//!
//! The pipeline consumes the object database through this narrow contract:
//! read/write blobs, trees and commits, compute zero-context diffs, update
//! refs with compare-and-swap semantics, and scope intermediate objects to a
//! sandbox that is only promoted on success.

pub mod diff_parse;
pub mod git;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::diff::FileDelta;
use crate::errors::Result;
pub use git::{GitExecutor, GitGateway};

/// One entry of a flattened tree listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: String,
    pub oid: String,
}

/// A single mutation against a base tree listing
#[derive(Debug, Clone)]
pub enum TreeUpdate {
    Put {
        path: String,
        mode: String,
        oid: String,
    },
    Remove {
        path: String,
    },
}

/// Author or committer identity
#[derive(Debug, Clone)]
pub struct Signature {
    pub name: String,
    pub email: String,
    /// ISO-8601 date; None lets the store pick the current time
    pub date: Option<String>,
}

/// Metadata of one commit
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: String,
    pub tree: String,
    pub parents: Vec<String>,
    pub author: Signature,
    pub committer: Signature,
    pub message: String,
}

/// Temporary loose-object area owned by a single pipeline run
///
/// While a sandbox is active on the gateway, every object write lands in
/// its directory and the primary store stays readable through alternates.
/// `finalize` promotes the loose objects; dropping the sandbox without
/// finalizing discards them.
#[derive(Debug)]
pub struct Sandbox {
    temp: tempfile::TempDir,
    primary_objects: PathBuf,
}

impl Sandbox {
    pub fn new(temp: tempfile::TempDir, primary_objects: PathBuf) -> Self {
        Self {
            temp,
            primary_objects,
        }
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.temp.path().join("objects")
    }

    /// Environment redirecting object writes into the sandbox while keeping
    /// the primary store readable
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            (
                "GIT_OBJECT_DIRECTORY".to_string(),
                self.objects_dir().display().to_string(),
            ),
            (
                "GIT_ALTERNATE_OBJECT_DIRECTORIES".to_string(),
                self.primary_objects.display().to_string(),
            ),
        ]
    }

    /// Promote every loose object into the primary store
    pub fn finalize(&self) -> Result<()> {
        let objects = self.objects_dir();
        if !objects.is_dir() {
            return Ok(());
        }
        for fanout in std::fs::read_dir(&objects)? {
            let fanout = fanout?;
            if !fanout.file_type()?.is_dir() {
                continue;
            }
            let target_dir = self.primary_objects.join(fanout.file_name());
            std::fs::create_dir_all(&target_dir)?;
            for object in std::fs::read_dir(fanout.path())? {
                let object = object?;
                let target = target_dir.join(object.file_name());
                if !target.exists() {
                    std::fs::copy(object.path(), &target)?;
                }
            }
        }
        Ok(())
    }
}

/// Contract between the pipeline and the version-control object database
pub trait RepositoryGateway: Send + Sync {
    /// Resolve a ref or revision expression to a commit id
    fn resolve_ref(&self, name: &str) -> Result<String>;

    /// Short name of the currently checked-out branch
    fn current_branch(&self) -> Result<String>;

    /// Compare-and-swap ref update; fails if the ref moved away from `old`
    fn update_ref_cas(&self, name: &str, new: &str, old: &str) -> Result<()>;

    fn read_blob(&self, id: &str) -> Result<Vec<u8>>;

    fn write_blob(&self, content: &[u8]) -> Result<String>;

    /// Flattened recursive listing of a tree-ish
    fn read_tree(&self, tree_ish: &str) -> Result<BTreeMap<String, TreeEntry>>;

    /// Write a tree derived from `base_tree` with the given updates applied
    fn write_tree(&self, base_tree: &str, updates: &[TreeUpdate]) -> Result<String>;

    fn write_commit(
        &self,
        tree: &str,
        parents: &[String],
        message: &str,
        author: Option<&Signature>,
        committer: Option<&Signature>,
    ) -> Result<String>;

    /// Zero-context file deltas between two tree-ishes
    fn diff_trees(&self, base: &str, target: &str) -> Result<Vec<FileDelta>>;

    fn commit_info(&self, rev: &str) -> Result<CommitInfo>;

    /// Tree id of a revision
    fn tree_of(&self, rev: &str) -> Result<String>;

    /// Capture the working directory (restricted to pathspecs when given)
    /// as a transient tree without touching the user's index
    fn working_tree_snapshot(&self, pathspecs: &[String]) -> Result<String>;

    /// Open a temporary object area scoped to this run
    fn open_sandbox(&self) -> Result<Sandbox>;

    /// Route subsequent object writes into the sandbox (None restores the
    /// primary store)
    fn set_sandbox(&self, sandbox: Option<Arc<Sandbox>>);

    /// Reset the user's index to a commit after a successful finalize
    fn refresh_index(&self, commit: &str) -> Result<()>;

    /// Three-way merge of trees, for replaying descendants; errors on
    /// conflicts
    fn merge_trees(&self, base: &str, ours: &str, theirs: &str) -> Result<String>;

    /// First-parent commit ids in `range`, newest first
    fn rev_list_first_parent(&self, range: &str) -> Result<Vec<String>>;

    /// Most recent merge commit reachable from `tip`, if any
    fn first_merge_commit(&self, tip: &str) -> Result<Option<String>>;
}
