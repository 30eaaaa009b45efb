//! Pipeline orchestrator
//!
//! Drives the stages sequentially for the three modes. All intermediate
//! objects are scoped to a run sandbox; the destination branch only moves in
//! the atomic finalize step, and any failure discards the sandbox without
//! touching a ref.

pub mod report;

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::diff::{chunk_deltas, verify_disjoint, verify_exhaustive, Chunk, DeltaKind};
use crate::errors::{CoreError, Result};
use crate::filter::{run_filters, FilterContext, Rejection};
use crate::gateway::{CommitInfo, RepositoryGateway, Sandbox, Signature};
use crate::model::{
    EmbeddingProvider, HeuristicProvider, LogicalGroup, LogicalGrouper, ModelProvider,
};
use crate::parse::{AnalysisIndex, Analyzer, LanguageRegistry, Side};
use crate::semantic::SemanticGrouper;
use crate::synthesize::{CommitRecord, SynthesisRequest, Synthesizer};
pub use report::{ProposedCommit, RejectionSummary, RunReport};

/// Hooks the orchestrator uses to talk to the user; the CLI owns the
/// terminal, tests plug in scripted implementations
pub trait UserInteraction: Send + Sync {
    /// Present the dry-run preview; false aborts the run
    fn confirm_plan(&self, preview: &[ProposedCommit]) -> bool;

    /// Offer the user a chance to override a proposed commit message
    fn edit_message(&self, proposed: &str) -> Option<String> {
        let _ = proposed;
        None
    }
}

/// Accepts every plan without prompting
pub struct AutoAccept;

impl UserInteraction for AutoAccept {
    fn confirm_plan(&self, _preview: &[ProposedCommit]) -> bool {
        true
    }
}

/// Inputs for commit mode
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    pub intent: Option<String>,
    pub pathspecs: Vec<String>,
}

/// Inputs for clean mode
#[derive(Debug, Clone, Default)]
pub struct CleanOptions {
    pub start_from: Option<String>,
    pub min_size: Option<usize>,
}

/// The assembled pipeline
pub struct Pipeline {
    gateway: Arc<dyn RepositoryGateway>,
    registry: Arc<LanguageRegistry>,
    model: Option<Arc<dyn ModelProvider>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    config: PipelineConfig,
    cancel: CancelToken,
    interaction: Arc<dyn UserInteraction>,
}

/// Result of the planning stages, before any object is written
struct PlannedWork {
    groups: Vec<LogicalGroup>,
    rejections: Vec<Rejection>,
    warnings: Vec<String>,
}

enum CleanStep {
    /// Keep or replay the commit unchanged
    Replay(CommitInfo),
    /// Decompose into the planned groups
    Split {
        info: CommitInfo,
        groups: Vec<LogicalGroup>,
    },
}

impl Pipeline {
    pub fn new(
        gateway: Arc<dyn RepositoryGateway>,
        registry: Arc<LanguageRegistry>,
        model: Option<Arc<dyn ModelProvider>>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        config: PipelineConfig,
        cancel: CancelToken,
        interaction: Arc<dyn UserInteraction>,
    ) -> Self {
        Self {
            gateway,
            registry,
            model,
            embedder,
            config,
            cancel,
            interaction,
        }
    }

    /// Commit mode: decompose the working-tree delta against HEAD
    pub async fn run_commit(&self, options: CommitOptions) -> Result<RunReport> {
        self.config.validate()?;
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let branch = self.gateway.current_branch()?;
        let original_tip = self.gateway.resolve_ref("HEAD")?;
        info!(%run_id, branch, tip = %original_tip, "commit run started");

        let sandbox = Arc::new(self.gateway.open_sandbox()?);
        self.gateway.set_sandbox(Some(Arc::clone(&sandbox)));
        let result = self
            .run_commit_inner(&options, &branch, &original_tip, &sandbox)
            .await;
        self.gateway.set_sandbox(None);

        result.map(|(commits, rejections, warnings, new_tip)| RunReport {
            run_id,
            mode: "commit",
            branch,
            commits,
            rejections,
            warnings,
            new_tip,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn run_commit_inner(
        &self,
        options: &CommitOptions,
        branch: &str,
        original_tip: &str,
        sandbox: &Sandbox,
    ) -> Result<(Vec<CommitRecord>, Vec<RejectionSummary>, Vec<String>, Option<String>)> {
        self.cancel.check()?;
        let base_tree = self.gateway.tree_of(original_tip)?;
        let target_tree = self.gateway.working_tree_snapshot(&options.pathspecs)?;

        if base_tree == target_tree {
            info!("working tree matches HEAD, nothing to commit");
            return Ok((Vec::new(), Vec::new(), Vec::new(), None));
        }

        let plan = self
            .plan_groups(&base_tree, &target_tree, true, options.intent.as_deref())
            .await?;
        let rejections: Vec<RejectionSummary> =
            plan.rejections.iter().map(RejectionSummary::from).collect();

        if plan.groups.is_empty() {
            warn!("no groups left to commit after filtering");
            return Ok((Vec::new(), rejections, plan.warnings, None));
        }

        let groups = self.confirm(plan.groups)?;

        // With rejections the final tree is the working tree minus the
        // rejected chunks, so exact target equality only holds without them
        let expected_tree = plan.rejections.is_empty().then(|| target_tree.clone());
        let synthesizer = Synthesizer::new(self.gateway.as_ref(), &self.cancel);
        let (records, tip) = synthesizer.synthesize(&SynthesisRequest {
            base_commit: original_tip,
            groups: &groups,
            author: None,
            committer: None,
            expected_tree,
        })?;

        sandbox.finalize()?;
        self.gateway
            .update_ref_cas(&format!("refs/heads/{branch}"), &tip, original_tip)?;
        self.gateway.refresh_index(&tip)?;
        info!(tip = %tip, commits = records.len(), "branch updated");

        Ok((records, rejections, plan.warnings, Some(tip)))
    }

    /// Fix mode: rewrite one commit into an atomic chain with the same tree
    pub async fn run_fix(&self, rev: &str) -> Result<RunReport> {
        self.config.validate()?;
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let branch = self.gateway.current_branch()?;
        let original_tip = self.gateway.resolve_ref("HEAD")?;
        let info = self.gateway.commit_info(rev)?;
        info!(%run_id, branch, rev = %info.id, "fix run started");

        let sandbox = Arc::new(self.gateway.open_sandbox()?);
        self.gateway.set_sandbox(Some(Arc::clone(&sandbox)));
        let result = self
            .run_fix_inner(&info, &branch, &original_tip, &sandbox)
            .await;
        self.gateway.set_sandbox(None);

        result.map(|(commits, new_tip)| RunReport {
            run_id,
            mode: "fix",
            branch,
            commits,
            rejections: Vec::new(),
            warnings: Vec::new(),
            new_tip,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn run_fix_inner(
        &self,
        info: &CommitInfo,
        branch: &str,
        original_tip: &str,
        sandbox: &Sandbox,
    ) -> Result<(Vec<CommitRecord>, Option<String>)> {
        if info.parents.len() != 1 {
            return Err(CoreError::gateway(format!(
                "cannot fix {}: it has {} parents",
                info.id,
                info.parents.len()
            )));
        }
        let base_commit = info.parents[0].clone();
        let base_tree = self.gateway.tree_of(&base_commit)?;

        let mut plan = self.plan_groups(&base_tree, &info.tree, false, None).await?;
        if plan.groups.is_empty() {
            info!("commit is empty, nothing to rewrite");
            return Ok((Vec::new(), None));
        }
        if plan.groups.len() == 1 {
            // splitting into one commit is a no-op; keep the original
            // message so repeated runs converge
            plan.groups[0].message = info.message.clone();
        }

        let groups = self.confirm(plan.groups)?;

        let committer = Signature {
            name: info.committer.name.clone(),
            email: info.committer.email.clone(),
            date: None,
        };
        let synthesizer = Synthesizer::new(self.gateway.as_ref(), &self.cancel);
        let (mut records, mut tip) = synthesizer.synthesize(&SynthesisRequest {
            base_commit: &base_commit,
            groups: &groups,
            author: Some(info.author.clone()),
            committer: Some(committer),
            expected_tree: Some(info.tree.clone()),
        })?;

        // Replay every descendant of the rewritten commit onto the new chain
        let mut descendants = self
            .gateway
            .rev_list_first_parent(&format!("{}..{}", info.id, original_tip))?;
        descendants.reverse();
        for descendant in descendants {
            self.cancel.check()?;
            let (commit, record) = self.replay_commit(&descendant, &tip)?;
            records.push(record);
            tip = commit;
        }

        sandbox.finalize()?;
        self.gateway
            .update_ref_cas(&format!("refs/heads/{branch}"), &tip, original_tip)?;
        self.gateway.refresh_index(&tip)?;
        info!(tip = %tip, commits = records.len(), "branch rewritten");

        Ok((records, Some(tip)))
    }

    /// Clean mode: fix every linear commit from the tip down to the first
    /// merge commit
    pub async fn run_clean(&self, options: CleanOptions) -> Result<RunReport> {
        self.config.validate()?;
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        let branch = self.gateway.current_branch()?;
        let original_tip = self.gateway.resolve_ref("HEAD")?;
        info!(%run_id, branch, "clean run started");

        let sandbox = Arc::new(self.gateway.open_sandbox()?);
        self.gateway.set_sandbox(Some(Arc::clone(&sandbox)));
        let result = self
            .run_clean_inner(&options, &branch, &original_tip, &sandbox)
            .await;
        self.gateway.set_sandbox(None);

        result.map(|(commits, new_tip)| RunReport {
            run_id,
            mode: "clean",
            branch,
            commits,
            rejections: Vec::new(),
            warnings: Vec::new(),
            new_tip,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn run_clean_inner(
        &self,
        options: &CleanOptions,
        branch: &str,
        original_tip: &str,
        sandbox: &Sandbox,
    ) -> Result<(Vec<CommitRecord>, Option<String>)> {
        let start = match &options.start_from {
            Some(rev) => self.gateway.resolve_ref(rev)?,
            None => original_tip.to_string(),
        };

        // The walk never crosses a merge commit
        let range = match self.gateway.first_merge_commit(&start)? {
            Some(merge) => format!("{merge}..{start}"),
            None => start.clone(),
        };
        let mut commits = self.gateway.rev_list_first_parent(&range)?;
        commits.reverse(); // oldest first

        // A root commit has no base to rebuild from
        while let Some(first) = commits.first() {
            if self.gateway.commit_info(first)?.parents.len() == 1 {
                break;
            }
            commits.remove(0);
        }
        if commits.is_empty() {
            info!("no linear commits eligible for cleaning");
            return Ok((Vec::new(), None));
        }

        // Plan every commit before anything is written
        let mut steps = Vec::with_capacity(commits.len());
        let mut preview = Vec::new();
        for commit in &commits {
            self.cancel.check()?;
            let info = self.gateway.commit_info(commit)?;
            let parent_tree = self.gateway.tree_of(&info.parents[0])?;

            let changed_lines = self.changed_line_count(&parent_tree, &info.tree)?;
            let too_small = options
                .min_size
                .map(|min| changed_lines < min)
                .unwrap_or(false);
            if too_small || changed_lines == 0 {
                debug!(commit = %info.id, changed_lines, "commit kept as-is");
                steps.push(CleanStep::Replay(info));
                continue;
            }

            let plan = self
                .plan_groups(&parent_tree, &info.tree, false, None)
                .await?;
            if plan.groups.len() <= 1 {
                steps.push(CleanStep::Replay(info));
                continue;
            }
            preview.extend(plan.groups.iter().map(proposed_commit));
            steps.push(CleanStep::Split {
                info,
                groups: plan.groups,
            });
        }

        if !steps
            .iter()
            .any(|s| matches!(s, CleanStep::Split { .. }))
        {
            info!("no commit needed splitting");
            return Ok((Vec::new(), None));
        }
        if !self.config.auto_accept && !self.interaction.confirm_plan(&preview) {
            return Err(CoreError::UserAbort("plan declined".to_string()));
        }

        // Rebuild the chain oldest to newest
        let first_info = match &steps[0] {
            CleanStep::Replay(info) | CleanStep::Split { info, .. } => info,
        };
        let mut tip = first_info.parents[0].clone();
        let mut records = Vec::new();

        for step in &steps {
            self.cancel.check()?;
            match step {
                CleanStep::Replay(info) => {
                    if info.parents[0] == tip {
                        // untouched prefix keeps its original commits
                        tip = info.id.clone();
                    } else {
                        let (commit, record) = self.replay_commit(&info.id, &tip)?;
                        records.push(record);
                        tip = commit;
                    }
                }
                CleanStep::Split { info, groups } => {
                    let committer = Signature {
                        name: info.committer.name.clone(),
                        email: info.committer.email.clone(),
                        date: None,
                    };
                    let synthesizer = Synthesizer::new(self.gateway.as_ref(), &self.cancel);
                    let (step_records, step_tip) = synthesizer.synthesize(&SynthesisRequest {
                        base_commit: &tip,
                        groups,
                        author: Some(info.author.clone()),
                        committer: Some(committer),
                        expected_tree: Some(info.tree.clone()),
                    })?;
                    records.extend(step_records);
                    tip = step_tip;
                }
            }
        }

        // Rebase anything between the cleaned range and the branch tip
        if start != *original_tip {
            let mut downstream = self
                .gateway
                .rev_list_first_parent(&format!("{start}..{original_tip}"))?;
            downstream.reverse();
            for descendant in downstream {
                self.cancel.check()?;
                let (commit, record) = self.replay_commit(&descendant, &tip)?;
                records.push(record);
                tip = commit;
            }
        }

        if tip == *original_tip {
            info!("history already clean");
            return Ok((Vec::new(), None));
        }

        sandbox.finalize()?;
        self.gateway
            .update_ref_cas(&format!("refs/heads/{branch}"), &tip, original_tip)?;
        self.gateway.refresh_index(&tip)?;
        info!(tip = %tip, commits = records.len(), "history cleaned");

        Ok((records, Some(tip)))
    }

    /// All planning stages: diff, chunk, analyze, semantic group, filter,
    /// logical group
    async fn plan_groups(
        &self,
        base_tree: &str,
        target_tree: &str,
        apply_filters: bool,
        intent: Option<&str>,
    ) -> Result<PlannedWork> {
        self.cancel.check()?;
        let deltas = self.gateway.diff_trees(base_tree, target_tree)?;
        if deltas.is_empty() {
            return Ok(PlannedWork {
                groups: Vec::new(),
                rejections: Vec::new(),
                warnings: Vec::new(),
            });
        }

        let base_entries = self.gateway.read_tree(base_tree)?;
        let target_entries = self.gateway.read_tree(target_tree)?;

        // Content of every touched file version
        let mut old_contents: FxHashMap<String, Vec<u8>> = FxHashMap::default();
        let mut new_contents: FxHashMap<String, Vec<u8>> = FxHashMap::default();
        for delta in &deltas {
            if delta.change.is_binary {
                continue;
            }
            if let Some(old_path) = &delta.change.old_path {
                if let Some(entry) = base_entries.get(old_path) {
                    old_contents.insert(old_path.clone(), self.gateway.read_blob(&entry.oid)?);
                }
            }
            if let Some(new_path) = &delta.change.new_path {
                if let Some(entry) = target_entries.get(new_path) {
                    new_contents.insert(new_path.clone(), self.gateway.read_blob(&entry.oid)?);
                }
            }
        }

        // Mechanical chunking with per-file invariant proof
        let chunks = chunk_deltas(&deltas, self.config.chunking_level);
        self.verify_chunk_invariants(&chunks, &old_contents, &new_contents)?;
        self.cancel.check()?;

        // Parse and index both sides of every touched file
        let analyzer = Arc::new(Analyzer::new(
            Arc::clone(&self.registry),
            self.config.fail_on_syntax_errors,
        ));
        let mut sources = Vec::new();
        for (path, content) in &old_contents {
            sources.push((path.clone(), Side::Old, content.clone()));
        }
        for (path, content) in &new_contents {
            sources.push((path.clone(), Side::New, content.clone()));
        }
        let index = AnalysisIndex::build(&analyzer, sources)?;
        self.cancel.check()?;

        let semantic_groups =
            SemanticGrouper::new(self.config.fallback_grouping_strategy).group(&chunks, &index)?;
        info!(
            chunks = chunks.len(),
            groups = semantic_groups.len(),
            "semantic groups formed"
        );

        let (accepted, rejections, warnings) = if apply_filters {
            // The validation analyzer must stay lenient; strictness is
            // expressed as rejection, not as a fatal parse error
            let lenient = Analyzer::new(Arc::clone(&self.registry), false);
            let filter_base = filter_base_contents(&deltas, &old_contents);
            let ctx = FilterContext {
                config: &self.config,
                intent,
                embedder: self.embedder.clone(),
                analyzer: &lenient,
                base_contents: &filter_base,
            };
            let outcome = run_filters(semantic_groups, &ctx).await?;
            (outcome.accepted, outcome.rejections, outcome.warnings)
        } else {
            (semantic_groups, Vec::new(), Vec::new())
        };
        self.cancel.check()?;

        let provider = self
            .model
            .clone()
            .unwrap_or_else(|| Arc::new(HeuristicProvider));
        let grouper = LogicalGrouper::new(provider, self.config.clone(), self.cancel.clone());
        let groups = grouper
            .group(accepted, intent.map(str::to_string))
            .await?;
        info!(logical_groups = groups.len(), "logical groups formed");

        Ok(PlannedWork {
            groups: self.apply_message_overrides(groups),
            rejections,
            warnings,
        })
    }

    fn verify_chunk_invariants(
        &self,
        chunks: &[Chunk],
        old_contents: &FxHashMap<String, Vec<u8>>,
        new_contents: &FxHashMap<String, Vec<u8>>,
    ) -> Result<()> {
        let empty: Vec<u8> = Vec::new();
        let mut by_path: FxHashMap<&str, Vec<&Chunk>> = FxHashMap::default();
        for chunk in chunks {
            by_path
                .entry(chunk.change.canonical_path())
                .or_default()
                .push(chunk);
        }
        for (path, file_chunks) in by_path {
            let change = &file_chunks[0].change;
            if change.is_binary {
                continue;
            }
            verify_disjoint(&file_chunks)?;

            let base = change
                .old_path
                .as_ref()
                .and_then(|p| old_contents.get(p))
                .unwrap_or(&empty);
            let target = change
                .new_path
                .as_ref()
                .and_then(|p| new_contents.get(p))
                .unwrap_or(&empty);
            verify_exhaustive(base, target, &file_chunks).map_err(|e| {
                CoreError::ChunkingInvariantViolated(format!("{path}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Offer message overrides when configured
    fn apply_message_overrides(&self, mut groups: Vec<LogicalGroup>) -> Vec<LogicalGroup> {
        if !self.config.ask_for_commit_message {
            return groups;
        }
        for group in &mut groups {
            if let Some(message) = self.interaction.edit_message(&group.message) {
                if !message.trim().is_empty() {
                    group.message = message;
                }
            }
        }
        groups
    }

    /// Preview + confirmation gate
    fn confirm(&self, groups: Vec<LogicalGroup>) -> Result<Vec<LogicalGroup>> {
        let preview: Vec<ProposedCommit> = groups.iter().map(proposed_commit).collect();
        if !self.config.auto_accept && !self.interaction.confirm_plan(&preview) {
            return Err(CoreError::UserAbort("plan declined".to_string()));
        }
        Ok(groups)
    }

    /// Replay one original commit onto a new parent via three-way merge,
    /// preserving author identity and message
    fn replay_commit(&self, commit: &str, onto: &str) -> Result<(String, CommitRecord)> {
        let info = self.gateway.commit_info(commit)?;
        if info.parents.len() != 1 {
            return Err(CoreError::gateway(format!(
                "cannot replay merge commit {commit}"
            )));
        }
        let tree = self
            .gateway
            .merge_trees(&info.parents[0], onto, &info.id)?;
        let committer = Signature {
            name: info.committer.name.clone(),
            email: info.committer.email.clone(),
            date: None,
        };
        let new_commit = self.gateway.write_commit(
            &tree,
            &[onto.to_string()],
            &info.message,
            Some(&info.author),
            Some(&committer),
        )?;
        let record = CommitRecord {
            id: new_commit.clone(),
            message: info.message.lines().next().unwrap_or_default().to_string(),
            files: BTreeSet::new(),
            scopes: BTreeSet::new(),
        };
        Ok((new_commit, record))
    }

    fn changed_line_count(&self, base_tree: &str, target_tree: &str) -> Result<usize> {
        let deltas = self.gateway.diff_trees(base_tree, target_tree)?;
        Ok(deltas
            .iter()
            .flat_map(|d| d.hunks.iter())
            .map(|h| h.old_lines.len() + h.new_lines.len())
            .sum())
    }
}

fn proposed_commit(group: &LogicalGroup) -> ProposedCommit {
    ProposedCommit {
        message: group.message.clone(),
        files: group.files(),
        scopes: group.scopes(),
        rationale: group.rationale.clone(),
    }
}

/// Base-side contents keyed by canonical path, for tentative application
fn filter_base_contents(
    deltas: &[crate::diff::FileDelta],
    old_contents: &FxHashMap<String, Vec<u8>>,
) -> FxHashMap<String, Vec<u8>> {
    let mut map = FxHashMap::default();
    for delta in deltas {
        if delta.change.kind == DeltaKind::Added || delta.change.is_binary {
            continue;
        }
        if let Some(old_path) = &delta.change.old_path {
            if let Some(content) = old_contents.get(old_path) {
                map.insert(
                    delta.change.canonical_path().to_string(),
                    content.clone(),
                );
            }
        }
    }
    map
}
