//! Filter chain
//!
//! Runs in commit mode only, in fixed order: secret scanner, relevance
//! filter, syntax validator. A rejection always drops the whole semantic
//! group; sub-chunk drops would break syntactic cohesion.

pub mod relevance;
pub mod secrets;
pub mod syntax;

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::errors::Result;
use crate::model::EmbeddingProvider;
use crate::parse::Analyzer;
use crate::semantic::SemanticGroup;
pub use relevance::RelevanceFilter;
pub use secrets::scan_group;
pub use syntax::{validate_group, SyntaxVerdict};

/// Why a group was dropped
#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    SecretDetected { rule: String },
    BelowRelevanceThreshold { score: f32, threshold: f32 },
    SyntaxError { files: Vec<String> },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::SecretDetected { rule } => write!(f, "secret_detected ({rule})"),
            RejectReason::BelowRelevanceThreshold { score, threshold } => {
                write!(f, "below_relevance_threshold ({score:.2} < {threshold:.2})")
            }
            RejectReason::SyntaxError { files } => {
                write!(f, "syntax_error ({})", files.join(", "))
            }
        }
    }
}

/// A dropped group with its reason, surfaced in the run report
#[derive(Debug, Clone)]
pub struct Rejection {
    pub group: SemanticGroup,
    pub reason: RejectReason,
}

/// Result of the whole chain
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub accepted: Vec<SemanticGroup>,
    pub rejections: Vec<Rejection>,
    pub warnings: Vec<String>,
}

/// Everything the chain needs besides the groups themselves
pub struct FilterContext<'a> {
    pub config: &'a PipelineConfig,
    pub intent: Option<&'a str>,
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub analyzer: &'a Analyzer,
    /// Base-side content for every touched path (empty for additions)
    pub base_contents: &'a FxHashMap<String, Vec<u8>>,
}

/// Apply the filters in their fixed order
pub async fn run_filters(
    groups: Vec<SemanticGroup>,
    ctx: &FilterContext<'_>,
) -> Result<FilterOutcome> {
    let mut outcome = FilterOutcome::default();
    let mut survivors = Vec::with_capacity(groups.len());

    // 1. Secret scanner
    let aggression = ctx.config.secret_scanner_aggression;
    for group in groups {
        match scan_group(&group, aggression) {
            Some(rule) => {
                info!(group = group.id, rule, "group rejected by secret scanner");
                outcome.rejections.push(Rejection {
                    group,
                    reason: RejectReason::SecretDetected {
                        rule: rule.to_string(),
                    },
                });
            }
            None => survivors.push(group),
        }
    }

    // 2. Relevance filter, only with an intent and an embedder
    if ctx.config.relevance_filtering {
        match (ctx.intent, ctx.embedder.as_ref()) {
            (Some(intent), Some(embedder)) if !survivors.is_empty() => {
                let threshold = ctx.config.relevance_filter_similarity_threshold;
                let filter = RelevanceFilter::new(Arc::clone(embedder), threshold);
                let scores = filter.scores(intent, &survivors).await?;
                let mut kept = Vec::with_capacity(survivors.len());
                for (group, score) in survivors.into_iter().zip(scores) {
                    if score < threshold {
                        info!(group = group.id, score, "group below relevance threshold");
                        outcome.rejections.push(Rejection {
                            group,
                            reason: RejectReason::BelowRelevanceThreshold { score, threshold },
                        });
                    } else {
                        kept.push(group);
                    }
                }
                survivors = kept;
            }
            (None, _) => {
                warn!("relevance filtering enabled but no intent was provided, skipping");
            }
            (_, None) => {
                warn!("relevance filtering enabled but no embedding provider is available");
            }
            _ => {}
        }
    }

    // 3. Syntax validator: reject when strict, warn otherwise
    let mut kept = Vec::with_capacity(survivors.len());
    for group in survivors {
        match validate_group(&group, ctx.base_contents, ctx.analyzer)? {
            SyntaxVerdict::Clean => kept.push(group),
            SyntaxVerdict::Broken(files) => {
                if ctx.config.fail_on_syntax_errors {
                    outcome.rejections.push(Rejection {
                        group,
                        reason: RejectReason::SyntaxError { files },
                    });
                } else {
                    outcome.warnings.push(format!(
                        "group {} leaves unparseable files in isolation: {}",
                        group.id,
                        files.join(", ")
                    ));
                    kept.push(group);
                }
            }
        }
    }
    outcome.accepted = kept;

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::chunk::{Chunk, ChunkId};
    use crate::diff::delta::{DeltaKind, FileChange};
    use crate::model::HashEmbedder;
    use crate::parse::LanguageRegistry;
    use std::collections::BTreeSet;

    fn group(id: u32, path: &str, line: &str) -> SemanticGroup {
        let change = Arc::new(FileChange {
            kind: DeltaKind::Added,
            old_path: None,
            new_path: Some(path.to_string()),
            old_mode: None,
            new_mode: Some("100644".into()),
            is_binary: false,
            new_blob_id: None,
        });
        SemanticGroup {
            id,
            chunks: vec![Chunk {
                id: ChunkId(id),
                change,
                old_start: 0,
                new_start: 1,
                old_lines: vec![],
                new_lines: vec![line.as_bytes().to_vec()],
            }],
            files: BTreeSet::from([path.to_string()]),
            scopes: BTreeSet::new(),
            defined: BTreeSet::new(),
            referenced: BTreeSet::new(),
            fallback: false,
        }
    }

    fn analyzer() -> Analyzer {
        Analyzer::new(Arc::new(LanguageRegistry::builtin().unwrap()), false)
    }

    #[tokio::test]
    async fn test_secret_rejection_keeps_other_groups() {
        let mut config = PipelineConfig::default();
        config.secret_scanner_aggression = crate::config::ScannerAggression::Standard;

        let analyzer = analyzer();
        let base = FxHashMap::default();
        let ctx = FilterContext {
            config: &config,
            intent: None,
            embedder: None,
            analyzer: &analyzer,
            base_contents: &base,
        };

        let groups = vec![
            group(0, "config.py", "API_KEY = \"sk-ABC123DEF456GHI789\"\n"),
            group(1, "logic.py", "value = compute()\n"),
        ];
        let outcome = run_filters(groups, &ctx).await.unwrap();
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.accepted[0].id, 1);
        assert_eq!(outcome.rejections.len(), 1);
        assert!(matches!(
            outcome.rejections[0].reason,
            RejectReason::SecretDetected { .. }
        ));
    }

    #[tokio::test]
    async fn test_relevance_rejection() {
        let mut config = PipelineConfig::default();
        config.relevance_filtering = true;
        config.relevance_filter_similarity_threshold = 0.6;

        let analyzer = analyzer();
        let base = FxHashMap::default();
        let ctx = FilterContext {
            config: &config,
            intent: Some("improve the login flow"),
            embedder: Some(Arc::new(HashEmbedder)),
            analyzer: &analyzer,
            base_contents: &base,
        };

        let groups = vec![
            group(0, "login.py", "def login flow improvements\n"),
            group(1, "chart.js", "const palette = colors()\n"),
        ];
        let outcome = run_filters(groups, &ctx).await.unwrap();
        assert!(outcome
            .rejections
            .iter()
            .all(|r| matches!(r.reason, RejectReason::BelowRelevanceThreshold { .. })));
        assert_eq!(outcome.accepted.len() + outcome.rejections.len(), 2);
    }

    #[tokio::test]
    async fn test_syntax_warning_by_default() {
        let config = PipelineConfig::default();
        let analyzer = analyzer();
        let base = FxHashMap::default();
        let ctx = FilterContext {
            config: &config,
            intent: None,
            embedder: None,
            analyzer: &analyzer,
            base_contents: &base,
        };

        let groups = vec![group(0, "broken.py", "def broken(:\n")];
        let outcome = run_filters(groups, &ctx).await.unwrap();
        assert_eq!(outcome.accepted.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_syntax_rejection_when_strict() {
        let mut config = PipelineConfig::default();
        config.fail_on_syntax_errors = true;

        let analyzer = analyzer();
        let base = FxHashMap::default();
        let ctx = FilterContext {
            config: &config,
            intent: None,
            embedder: None,
            analyzer: &analyzer,
            base_contents: &base,
        };

        let groups = vec![group(0, "broken.py", "def broken(:\n")];
        let outcome = run_filters(groups, &ctx).await.unwrap();
        assert!(outcome.accepted.is_empty());
        assert!(matches!(
            outcome.rejections[0].reason,
            RejectReason::SyntaxError { .. }
        ));
    }
}
