//! Logical grouper
//!
//! Aggregates semantic groups into an ordered sequence of commit-sized
//! logical groups with messages. Requests are batched to fit the provider's
//! context, executed with bounded concurrency, and merged by request index
//! so results are deterministic. Provider failure degrades to heuristic
//! singleton groups rather than losing changes.

use std::collections::BTreeSet;
use std::sync::Arc;

use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::heuristic::heuristic_message;
use super::request::{estimate_tokens, render_group, AnalysisRequest, AnalysisResponse};
use super::ModelProvider;
use crate::cancel::CancelToken;
use crate::config::{BatchingStrategy, PipelineConfig};
use crate::errors::Result;
use crate::semantic::SemanticGroup;

/// One commit's worth of semantic groups
#[derive(Debug, Clone)]
pub struct LogicalGroup {
    pub id: u32,
    pub members: Vec<SemanticGroup>,
    pub message: String,
    pub rationale: Option<String>,
}

impl LogicalGroup {
    pub fn files(&self) -> BTreeSet<String> {
        self.members
            .iter()
            .flat_map(|m| m.files.iter().cloned())
            .collect()
    }

    pub fn scopes(&self) -> BTreeSet<String> {
        self.members
            .iter()
            .flat_map(|m| m.scopes.iter().cloned())
            .collect()
    }

    fn defined(&self) -> BTreeSet<String> {
        self.members
            .iter()
            .flat_map(|m| m.defined.iter().cloned())
            .collect()
    }

    fn referenced(&self) -> BTreeSet<String> {
        self.members
            .iter()
            .flat_map(|m| m.referenced.iter().cloned())
            .collect()
    }
}

pub struct LogicalGrouper {
    provider: Arc<dyn ModelProvider>,
    config: PipelineConfig,
    cancel: CancelToken,
}

impl LogicalGrouper {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        config: PipelineConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            provider,
            config,
            cancel,
        }
    }

    /// Aggregate semantic groups into ordered logical groups with messages
    pub async fn group(
        &self,
        groups: Vec<SemanticGroup>,
        intent: Option<String>,
    ) -> Result<Vec<LogicalGroup>> {
        if groups.is_empty() {
            return Ok(Vec::new());
        }
        self.cancel.check()?;

        let renderings: Vec<_> = groups.iter().map(render_group).collect();
        let (batches, effective) = self.plan_batches(&renderings);
        debug!(
            groups = groups.len(),
            batches = batches.len(),
            strategy = ?effective,
            "logical grouping batches planned"
        );

        let responses = self.run_batches(&batches, &renderings, intent).await?;

        let mut logical = self.assemble(groups, &batches, responses);
        if effective == BatchingStrategy::Requests {
            logical = merge_by_message(logical);
        }

        let ordered = order_groups(logical);
        Ok(ordered)
    }

    /// Split renderings into request batches per the configured strategy
    fn plan_batches(
        &self,
        renderings: &[super::request::GroupRendering],
    ) -> (Vec<Vec<usize>>, BatchingStrategy) {
        let budget = (self.config.max_tokens as usize).saturating_mul(3) / 4;
        let total: usize = renderings.iter().map(estimate_tokens).sum();

        let strategy = match self.config.batching_strategy {
            BatchingStrategy::Auto => {
                if total <= budget {
                    BatchingStrategy::Prompt
                } else {
                    BatchingStrategy::Requests
                }
            }
            other => other,
        };

        let batches = match strategy {
            BatchingStrategy::Requests => (0..renderings.len()).map(|i| vec![i]).collect(),
            _ => {
                let mut batches: Vec<Vec<usize>> = Vec::new();
                let mut current: Vec<usize> = Vec::new();
                let mut current_tokens = 0usize;
                for (i, rendering) in renderings.iter().enumerate() {
                    let cost = estimate_tokens(rendering);
                    if !current.is_empty() && current_tokens + cost > budget {
                        batches.push(std::mem::take(&mut current));
                        current_tokens = 0;
                    }
                    current.push(i);
                    current_tokens += cost;
                }
                if !current.is_empty() {
                    batches.push(current);
                }
                batches
            }
        };
        (batches, strategy)
    }

    /// Execute all batches with bounded parallelism; results keyed by batch
    /// index, a failed batch yields None
    async fn run_batches(
        &self,
        batches: &[Vec<usize>],
        renderings: &[super::request::GroupRendering],
        intent: Option<String>,
    ) -> Result<Vec<Option<AnalysisResponse>>> {
        let semaphore = Arc::new(Semaphore::new(self.config.request_parallelism));
        let mut join_set = JoinSet::new();

        for (batch_index, batch) in batches.iter().enumerate() {
            let request = AnalysisRequest {
                groups: batch.iter().map(|&i| renderings[i].clone()).collect(),
                intent: intent.clone(),
                cluster_strictness: self.config.cluster_strictness,
                max_tokens: self.config.max_tokens,
                batching_strategy: self.config.batching_strategy,
            };
            let provider = Arc::clone(&self.provider);
            let semaphore = Arc::clone(&semaphore);
            let cancel = self.cancel.clone();
            let retries = self.config.num_retries;
            let timeout = std::time::Duration::from_secs(self.config.request_timeout_secs);

            join_set.spawn(async move {
                let _permit = semaphore.acquire().await;
                let mut last_error = None;
                for attempt in 0..=retries {
                    if cancel.is_cancelled() {
                        return (batch_index, None);
                    }
                    let outcome = tokio::time::timeout(timeout, provider.analyze(&request)).await;
                    match outcome {
                        Ok(Ok(response)) => return (batch_index, Some(response)),
                        Ok(Err(e)) => {
                            warn!(batch_index, attempt, error = %e, "model request failed");
                            last_error = Some(e);
                        }
                        Err(_) => {
                            warn!(batch_index, attempt, "model request timed out");
                            last_error =
                                Some(crate::errors::CoreError::model("request timed out"));
                        }
                    }
                }
                if let Some(e) = last_error {
                    warn!(batch_index, error = %e, "model request exhausted retries");
                }
                (batch_index, None)
            });
        }

        let mut responses: Vec<Option<AnalysisResponse>> = (0..batches.len()).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            let (batch_index, response) = joined
                .map_err(|e| crate::errors::CoreError::model(format!("model task panicked: {e}")))?;
            responses[batch_index] = response;
        }
        self.cancel.check()?;
        Ok(responses)
    }

    /// Turn responses into logical groups with the original's mitigations:
    /// unknown member ids are skipped, duplicates keep their first group,
    /// semantic groups the provider never assigned collect into a trailing
    /// fallback group
    fn assemble(
        &self,
        groups: Vec<SemanticGroup>,
        batches: &[Vec<usize>],
        responses: Vec<Option<AnalysisResponse>>,
    ) -> Vec<LogicalGroup> {
        let ids_in_order: Vec<u32> = groups.iter().map(|g| g.id).collect();
        let mut by_id: FxHashMap<u32, SemanticGroup> =
            groups.into_iter().map(|g| (g.id, g)).collect();
        let mut assigned: FxHashSet<u32> = FxHashSet::default();
        let mut logical: Vec<LogicalGroup> = Vec::new();

        for (batch, response) in batches.iter().zip(responses) {
            let Some(response) = response else {
                // this batch fell back: one singleton group per member
                for &i in batch {
                    let id = ids_in_order[i];
                    if let Some(group) = by_id.get(&id) {
                        if assigned.insert(id) {
                            let message =
                                heuristic_message(&group.files.iter().cloned().collect::<Vec<_>>());
                            let member = by_id.remove(&id).expect("present");
                            logical.push(LogicalGroup {
                                id: 0,
                                members: vec![member],
                                message,
                                rationale: None,
                            });
                        }
                    }
                }
                continue;
            };

            // honor the provider's explicit ordering within the batch
            let mut proposed_groups = response.logical_groups;
            if !response.order.is_empty() {
                let position = |id: u32| {
                    response
                        .order
                        .iter()
                        .position(|&o| o == id)
                        .unwrap_or(usize::MAX)
                };
                proposed_groups.sort_by_key(|g| position(g.id));
            }

            for proposed in proposed_groups {
                let mut members = Vec::new();
                for member_id in proposed.member_ids {
                    if !by_id.contains_key(&member_id) && !assigned.contains(&member_id) {
                        warn!(member_id, "provider proposed an unknown group id");
                        continue;
                    }
                    if !assigned.insert(member_id) {
                        warn!(member_id, "provider assigned a group twice, keeping first");
                        continue;
                    }
                    if let Some(group) = by_id.remove(&member_id) {
                        members.push(group);
                    }
                }
                if members.is_empty() {
                    continue;
                }
                let message = if proposed.message.trim().is_empty() {
                    let files: Vec<String> = members
                        .iter()
                        .flat_map(|m| m.files.iter().cloned())
                        .collect();
                    heuristic_message(&files)
                } else {
                    proposed.message
                };
                logical.push(LogicalGroup {
                    id: 0,
                    members,
                    message,
                    rationale: proposed.rationale,
                });
            }
        }

        if !by_id.is_empty() {
            let mut members: Vec<SemanticGroup> = by_id.into_values().collect();
            members.sort_by_key(|g| g.id);
            warn!(
                unassigned = members.len(),
                "provider left groups unassigned, creating fallback group"
            );
            let files: Vec<String> = members
                .iter()
                .flat_map(|m| m.files.iter().cloned())
                .collect();
            logical.push(LogicalGroup {
                id: 0,
                members,
                message: heuristic_message(&files),
                rationale: Some("changes not assigned by the provider".to_string()),
            });
        }

        logical
    }
}

/// Union logical groups carrying an identical normalized message (the
/// post-merge step of per-request batching)
fn merge_by_message(groups: Vec<LogicalGroup>) -> Vec<LogicalGroup> {
    let mut merged: Vec<LogicalGroup> = Vec::new();
    let mut index_by_message: FxHashMap<String, usize> = FxHashMap::default();

    for group in groups {
        let key = group.message.trim().to_lowercase();
        match index_by_message.entry(key) {
            std::collections::hash_map::Entry::Occupied(e) => {
                let target = &mut merged[*e.get()];
                target.members.extend(group.members);
            }
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(merged.len());
                merged.push(group);
            }
        }
    }
    merged
}

/// Dependency-ordering heuristic: a group that only references identifiers
/// defined in another group comes after the defining group. Cycles break on
/// message-alphabetic order, keeping the result deterministic.
fn order_groups(groups: Vec<LogicalGroup>) -> Vec<LogicalGroup> {
    let n = groups.len();
    if n <= 1 {
        return finalize_ids(groups);
    }

    let defined: Vec<BTreeSet<String>> = groups.iter().map(|g| g.defined()).collect();
    let referenced: Vec<BTreeSet<String>> = groups.iter().map(|g| g.referenced()).collect();

    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..n).map(|i| graph.add_node(i)).collect();
    let mut indegree = vec![0usize; n];

    for definer in 0..n {
        for user in 0..n {
            if definer == user {
                continue;
            }
            let depends = referenced[user]
                .iter()
                .any(|name| defined[definer].contains(name) && !defined[user].contains(name));
            if depends {
                graph.add_edge(nodes[definer], nodes[user], ());
                indegree[user] += 1;
            }
        }
    }

    // Kahn's algorithm; ready groups keep the provider's sequence, only a
    // cycle falls back to message-alphabetic release
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut emitted = vec![false; n];
    let mut order: Vec<usize> = Vec::with_capacity(n);

    while order.len() < n {
        let next = match ready.iter().next().copied() {
            Some(index) => {
                ready.remove(&index);
                index
            }
            None => {
                (0..n)
                    .filter(|&i| !emitted[i])
                    .map(|i| (groups[i].message.clone(), i))
                    .min()
                    .expect("remaining group exists")
                    .1
            }
        };
        if emitted[next] {
            continue;
        }
        emitted[next] = true;
        order.push(next);

        for neighbor in graph.neighbors(nodes[next]) {
            let j = graph[neighbor];
            if emitted[j] {
                continue;
            }
            indegree[j] = indegree[j].saturating_sub(1);
            if indegree[j] == 0 {
                ready.insert(j);
            }
        }
    }

    let mut by_index: Vec<Option<LogicalGroup>> = groups.into_iter().map(Some).collect();
    finalize_ids(
        order
            .into_iter()
            .map(|i| by_index[i].take().expect("each group emitted once"))
            .collect(),
    )
}

fn finalize_ids(mut groups: Vec<LogicalGroup>) -> Vec<LogicalGroup> {
    for (i, group) in groups.iter_mut().enumerate() {
        group.id = i as u32;
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::request::ProposedGroup;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn semantic_group(id: u32, file: &str, defined: &[&str], referenced: &[&str]) -> SemanticGroup {
        SemanticGroup {
            id,
            chunks: vec![],
            files: BTreeSet::from([file.to_string()]),
            scopes: BTreeSet::new(),
            defined: defined.iter().map(|s| s.to_string()).collect(),
            referenced: referenced.iter().map(|s| s.to_string()).collect(),
            fallback: false,
        }
    }

    struct ScriptedProvider {
        response: AnalysisResponse,
    }

    #[async_trait]
    impl ModelProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisResponse> {
            Ok(self.response.clone())
        }
    }

    struct FailingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }
        async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(crate::errors::CoreError::model("transport down"))
        }
    }

    fn grouper(provider: Arc<dyn ModelProvider>) -> LogicalGrouper {
        let mut config = PipelineConfig::default();
        config.num_retries = 1;
        LogicalGrouper::new(provider, config, CancelToken::new())
    }

    #[tokio::test]
    async fn test_scripted_grouping() {
        let provider = ScriptedProvider {
            response: AnalysisResponse {
                logical_groups: vec![
                    ProposedGroup {
                        id: 0,
                        member_ids: vec![0, 1],
                        message: "feat: add feature".into(),
                        rationale: None,
                    },
                    ProposedGroup {
                        id: 1,
                        member_ids: vec![2],
                        message: "docs: update readme".into(),
                        rationale: None,
                    },
                ],
                order: vec![0, 1],
            },
        };
        let groups = vec![
            semantic_group(0, "a.py", &[], &[]),
            semantic_group(1, "b.py", &[], &[]),
            semantic_group(2, "README.md", &[], &[]),
        ];
        let result = grouper(Arc::new(provider)).group(groups, None).await.unwrap();
        assert_eq!(result.len(), 2);
        let total: usize = result.iter().map(|g| g.members.len()).sum();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_singletons() {
        let provider = Arc::new(FailingProvider {
            calls: AtomicUsize::new(0),
        });
        let groups = vec![
            semantic_group(0, "a.py", &[], &[]),
            semantic_group(1, "b.py", &[], &[]),
        ];
        let result = grouper(provider.clone()).group(groups, None).await.unwrap();
        assert_eq!(result.len(), 2);
        assert!(result[0].message.starts_with("files touched:"));
        // one batch, initial try + one retry
        assert!(provider.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_unassigned_groups_collect_into_fallback() {
        let provider = ScriptedProvider {
            response: AnalysisResponse {
                logical_groups: vec![ProposedGroup {
                    id: 0,
                    member_ids: vec![0],
                    message: "feat: one".into(),
                    rationale: None,
                }],
                order: vec![0],
            },
        };
        let groups = vec![
            semantic_group(0, "a.py", &[], &[]),
            semantic_group(1, "b.py", &[], &[]),
        ];
        let result = grouper(Arc::new(provider)).group(groups, None).await.unwrap();
        assert_eq!(result.len(), 2);
        let fallback = result
            .iter()
            .find(|g| g.message.starts_with("files touched:"))
            .unwrap();
        assert_eq!(fallback.members[0].id, 1);
    }

    #[tokio::test]
    async fn test_dependency_ordering() {
        // group "use it" only references `helper`, defined by "define it":
        // the definer must come first even though the provider ordered the
        // user first
        let provider = ScriptedProvider {
            response: AnalysisResponse {
                logical_groups: vec![
                    ProposedGroup {
                        id: 0,
                        member_ids: vec![0],
                        message: "a: use it".into(),
                        rationale: None,
                    },
                    ProposedGroup {
                        id: 1,
                        member_ids: vec![1],
                        message: "b: define it".into(),
                        rationale: None,
                    },
                ],
                order: vec![0, 1],
            },
        };
        let groups = vec![
            semantic_group(0, "main.py", &[], &["helper"]),
            semantic_group(1, "util.py", &["helper"], &[]),
        ];
        let result = grouper(Arc::new(provider)).group(groups, None).await.unwrap();
        assert_eq!(result[0].message, "b: define it");
        assert_eq!(result[1].message, "a: use it");
    }

    #[tokio::test]
    async fn test_every_group_has_nonempty_message() {
        let provider = ScriptedProvider {
            response: AnalysisResponse {
                logical_groups: vec![ProposedGroup {
                    id: 0,
                    member_ids: vec![0],
                    message: "   ".into(),
                    rationale: None,
                }],
                order: vec![],
            },
        };
        let groups = vec![semantic_group(0, "a.py", &[], &[])];
        let result = grouper(Arc::new(provider)).group(groups, None).await.unwrap();
        assert!(!result[0].message.trim().is_empty());
    }
}
