//! Subprocess git adapter
//!
//! Implements the repository gateway with git plumbing commands only:
//! rev-parse, cat-file, hash-object, ls-tree, read-tree, update-index,
//! write-tree, commit-tree, diff-tree, merge-tree, rev-list, update-ref.
//! The working directory and the user's index are never touched except for
//! the explicit post-finalize index refresh.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use tracing::{debug, trace};

use super::diff_parse::parse_patch;
use super::{CommitInfo, RepositoryGateway, Sandbox, Signature, TreeEntry, TreeUpdate};
use crate::diff::FileDelta;
use crate::errors::{CoreError, Result};

const NULL_OID: &str = "0000000000000000000000000000000000000000";

/// Runs git commands in one repository
pub struct GitExecutor {
    repo_path: PathBuf,
}

impl GitExecutor {
    pub fn new(repo_path: impl AsRef<Path>) -> Result<Self> {
        let executor = Self {
            repo_path: repo_path.as_ref().to_path_buf(),
        };
        // Validate up front so later failures are real errors
        executor.run(&["rev-parse", "--git-dir"], &[], None)?;
        Ok(executor)
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Run git with extra environment and optional stdin, returning stdout
    pub fn run(
        &self,
        args: &[&str],
        env: &[(String, String)],
        stdin: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        trace!(?args, "git");
        let mut command = Command::new("git");
        command
            .args(args)
            .current_dir(&self.repo_path)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in env {
            command.env(key, value);
        }

        let mut child = command
            .spawn()
            .map_err(|e| CoreError::gateway(format!("failed to spawn git: {e}")))?;

        if let Some(input) = stdin {
            let mut pipe = child.stdin.take().expect("stdin was piped");
            pipe.write_all(input)
                .map_err(|e| CoreError::gateway(format!("failed to write git stdin: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| CoreError::gateway(format!("git did not finish: {e}")))?;

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(CoreError::gateway(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Run git and return trimmed stdout as a string
    pub fn run_str(
        &self,
        args: &[&str],
        env: &[(String, String)],
        stdin: Option<&[u8]>,
    ) -> Result<String> {
        let output = self.run(args, env, stdin)?;
        Ok(String::from_utf8_lossy(&output).trim().to_string())
    }
}

/// Repository gateway over a subprocess executor
pub struct GitGateway {
    executor: GitExecutor,
    git_dir: PathBuf,
    active_sandbox: Mutex<Option<Arc<Sandbox>>>,
}

impl GitGateway {
    pub fn open(repo_path: impl AsRef<Path>) -> Result<Self> {
        let executor = GitExecutor::new(repo_path)?;
        let git_dir_raw = executor.run_str(&["rev-parse", "--git-dir"], &[], None)?;
        let git_dir = {
            let candidate = PathBuf::from(&git_dir_raw);
            if candidate.is_absolute() {
                candidate
            } else {
                executor.repo_path().join(candidate)
            }
        };
        Ok(Self {
            executor,
            git_dir,
            active_sandbox: Mutex::new(None),
        })
    }

    pub fn executor(&self) -> &GitExecutor {
        &self.executor
    }

    /// Environment of the active sandbox, if any
    fn sandbox_env(&self) -> Vec<(String, String)> {
        self.active_sandbox
            .lock()
            .expect("sandbox lock")
            .as_ref()
            .map(|s| s.env())
            .unwrap_or_default()
    }

    fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Vec<u8>> {
        self.executor.run(args, &self.sandbox_env(), stdin)
    }

    fn run_str(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<String> {
        self.executor.run_str(args, &self.sandbox_env(), stdin)
    }

    fn run_with_extra_env(
        &self,
        args: &[&str],
        extra: &[(String, String)],
        stdin: Option<&[u8]>,
    ) -> Result<Vec<u8>> {
        let mut env = self.sandbox_env();
        env.extend_from_slice(extra);
        self.executor.run(args, &env, stdin)
    }

    fn temp_index_env(&self) -> Result<(tempfile::TempPath, Vec<(String, String)>)> {
        let file = tempfile::Builder::new()
            .prefix("codestory-index-")
            .tempfile_in(&self.git_dir)
            .map_err(|e| CoreError::gateway(format!("cannot create temp index: {e}")))?;
        let path = file.into_temp_path();
        // read-tree refuses an existing empty index file
        let _ = std::fs::remove_file(&path);
        let env = vec![(
            "GIT_INDEX_FILE".to_string(),
            path.display().to_string(),
        )];
        Ok((path, env))
    }
}

impl RepositoryGateway for GitGateway {
    fn resolve_ref(&self, name: &str) -> Result<String> {
        self.run_str(&["rev-parse", "--verify", name], None)
    }

    fn current_branch(&self) -> Result<String> {
        self.run_str(&["symbolic-ref", "--short", "HEAD"], None)
            .map_err(|_| CoreError::gateway("HEAD is detached, checkout a branch first"))
    }

    fn update_ref_cas(&self, name: &str, new: &str, old: &str) -> Result<()> {
        match self.run(&["update-ref", name, new, old], None) {
            Ok(_) => Ok(()),
            Err(original) => {
                let found = self.resolve_ref(name).unwrap_or_default();
                if found != old {
                    Err(CoreError::RefCasFailed {
                        reference: name.to_string(),
                        expected: old.to_string(),
                        found,
                    })
                } else {
                    Err(original)
                }
            }
        }
    }

    fn read_blob(&self, id: &str) -> Result<Vec<u8>> {
        self.run(&["cat-file", "blob", id], None)
    }

    fn write_blob(&self, content: &[u8]) -> Result<String> {
        self.run_str(&["hash-object", "-w", "--stdin"], Some(content))
    }

    fn read_tree(&self, tree_ish: &str) -> Result<BTreeMap<String, TreeEntry>> {
        let output = self.run(&["ls-tree", "-r", "-z", tree_ish], None)?;
        let mut entries = BTreeMap::new();
        for record in output.split(|&b| b == 0).filter(|r| !r.is_empty()) {
            let text = String::from_utf8_lossy(record);
            // mode SP type SP oid TAB path
            let (meta, path) = text
                .split_once('\t')
                .ok_or_else(|| CoreError::gateway(format!("malformed ls-tree record: {text}")))?;
            let mut fields = meta.split_whitespace();
            let mode = fields.next().unwrap_or_default().to_string();
            let _object_type = fields.next();
            let oid = fields.next().unwrap_or_default().to_string();
            entries.insert(path.to_string(), TreeEntry { mode, oid });
        }
        Ok(entries)
    }

    fn write_tree(&self, base_tree: &str, updates: &[TreeUpdate]) -> Result<String> {
        let (_index, index_env) = self.temp_index_env()?;
        self.run_with_extra_env(&["read-tree", base_tree], &index_env, None)?;

        if !updates.is_empty() {
            let mut input = Vec::new();
            for update in updates {
                match update {
                    TreeUpdate::Put { path, mode, oid } => {
                        input.extend_from_slice(format!("{mode} {oid}\t{path}\n").as_bytes());
                    }
                    TreeUpdate::Remove { path } => {
                        input.extend_from_slice(format!("0 {NULL_OID}\t{path}\n").as_bytes());
                    }
                }
            }
            self.run_with_extra_env(&["update-index", "--index-info"], &index_env, Some(&input))?;
        }

        let tree = String::from_utf8_lossy(&self.run_with_extra_env(
            &["write-tree"],
            &index_env,
            None,
        )?)
        .trim()
        .to_string();
        debug!(tree, updates = updates.len(), "tree written");
        Ok(tree)
    }

    fn write_commit(
        &self,
        tree: &str,
        parents: &[String],
        message: &str,
        author: Option<&Signature>,
        committer: Option<&Signature>,
    ) -> Result<String> {
        let mut args = vec!["commit-tree".to_string(), tree.to_string()];
        for parent in parents {
            args.push("-p".to_string());
            args.push(parent.clone());
        }
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

        let mut env = Vec::new();
        if let Some(author) = author {
            env.push(("GIT_AUTHOR_NAME".to_string(), author.name.clone()));
            env.push(("GIT_AUTHOR_EMAIL".to_string(), author.email.clone()));
            if let Some(date) = &author.date {
                env.push(("GIT_AUTHOR_DATE".to_string(), date.clone()));
            }
        }
        if let Some(committer) = committer {
            env.push(("GIT_COMMITTER_NAME".to_string(), committer.name.clone()));
            env.push(("GIT_COMMITTER_EMAIL".to_string(), committer.email.clone()));
            if let Some(date) = &committer.date {
                env.push(("GIT_COMMITTER_DATE".to_string(), date.clone()));
            }
        }

        let output = self.run_with_extra_env(&arg_refs, &env, Some(message.as_bytes()))?;
        Ok(String::from_utf8_lossy(&output).trim().to_string())
    }

    fn diff_trees(&self, base: &str, target: &str) -> Result<Vec<FileDelta>> {
        let output = self.run(
            &[
                "diff-tree",
                "-r",
                "-p",
                "-U0",
                "--full-index",
                "--find-renames",
                base,
                target,
            ],
            None,
        )?;
        parse_patch(&output)
    }

    fn commit_info(&self, rev: &str) -> Result<CommitInfo> {
        let format = "%H%n%T%n%P%n%an%n%ae%n%aI%n%cn%n%ce%n%cI%n%B";
        let output = self.run_str(&["show", "-s", &format!("--format={format}"), rev], None)?;
        let mut lines = output.lines();
        let mut next = || {
            lines
                .next()
                .map(str::to_string)
                .ok_or_else(|| CoreError::gateway(format!("truncated commit metadata for {rev}")))
        };

        let id = next()?;
        let tree = next()?;
        let parents_line = next()?;
        let author_name = next()?;
        let author_email = next()?;
        let author_date = next()?;
        let committer_name = next()?;
        let committer_email = next()?;
        let committer_date = next()?;
        let message = lines.collect::<Vec<_>>().join("\n");

        Ok(CommitInfo {
            id,
            tree,
            parents: parents_line
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            author: Signature {
                name: author_name,
                email: author_email,
                date: Some(author_date),
            },
            committer: Signature {
                name: committer_name,
                email: committer_email,
                date: Some(committer_date),
            },
            message,
        })
    }

    fn tree_of(&self, rev: &str) -> Result<String> {
        self.run_str(&["rev-parse", &format!("{rev}^{{tree}}")], None)
    }

    fn working_tree_snapshot(&self, pathspecs: &[String]) -> Result<String> {
        let (_index, index_env) = self.temp_index_env()?;
        self.run_with_extra_env(&["read-tree", "HEAD"], &index_env, None)?;

        let mut args: Vec<&str> = vec!["add", "-A", "--"];
        if pathspecs.is_empty() {
            args.push(".");
        } else {
            args.extend(pathspecs.iter().map(|s| s.as_str()));
        }
        self.run_with_extra_env(&args, &index_env, None)?;

        let output = self.run_with_extra_env(&["write-tree"], &index_env, None)?;
        Ok(String::from_utf8_lossy(&output).trim().to_string())
    }

    fn open_sandbox(&self) -> Result<Sandbox> {
        let temp = tempfile::Builder::new()
            .prefix("codestory-run-")
            .tempdir_in(&self.git_dir)
            .map_err(|e| CoreError::gateway(format!("cannot create sandbox: {e}")))?;
        std::fs::create_dir_all(temp.path().join("objects"))?;
        let primary = self.git_dir.join("objects");
        Ok(Sandbox::new(temp, primary))
    }

    fn set_sandbox(&self, sandbox: Option<Arc<Sandbox>>) {
        *self.active_sandbox.lock().expect("sandbox lock") = sandbox;
    }

    fn refresh_index(&self, commit: &str) -> Result<()> {
        self.run(&["reset", "-q", "--mixed", commit], None)?;
        Ok(())
    }

    fn merge_trees(&self, base: &str, ours: &str, theirs: &str) -> Result<String> {
        let merge_base = format!("--merge-base={base}");
        self.run_str(
            &["merge-tree", "--write-tree", &merge_base, ours, theirs],
            None,
        )
        .map_err(|e| {
            CoreError::gateway(format!(
                "three-way merge of {theirs} onto {ours} conflicted: {e}"
            ))
        })
    }

    fn rev_list_first_parent(&self, range: &str) -> Result<Vec<String>> {
        let output = self.run_str(&["rev-list", "--first-parent", range], None)?;
        Ok(output
            .lines()
            .map(str::to_string)
            .filter(|l| !l.is_empty())
            .collect())
    }

    fn first_merge_commit(&self, tip: &str) -> Result<Option<String>> {
        let output = self.run_str(&["rev-list", "--merges", "-n", "1", tip], None)?;
        if output.is_empty() {
            Ok(None)
        } else {
            Ok(Some(output))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executor_rejects_non_repository() {
        let dir = tempfile::tempdir().unwrap();
        assert!(GitExecutor::new(dir.path()).is_err());
    }
}
