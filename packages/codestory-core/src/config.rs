//! Resolved pipeline options
//!
//! The CLI resolves its configuration hierarchy into this record; the core
//! never reads files or environment variables itself.

use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, Result};

/// How aggressively hunks are split into atomic chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingLevel {
    /// One chunk per input hunk
    None,
    /// Split only full-file additions/deletions
    FullFiles,
    /// Split every hunk maximally
    #[default]
    AllFiles,
}

/// Secret scanner pattern breadth
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScannerAggression {
    None,
    #[default]
    Safe,
    Standard,
    Strict,
}

/// Grouping strategy for files without analysis context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackStrategy {
    #[default]
    AllTogether,
    ByFile,
    ByExtension,
}

/// How semantic groups are packed into model requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BatchingStrategy {
    #[default]
    Auto,
    Requests,
    Prompt,
}

/// Resolved options consumed by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub chunking_level: ChunkingLevel,
    pub secret_scanner_aggression: ScannerAggression,
    pub fallback_grouping_strategy: FallbackStrategy,
    pub batching_strategy: BatchingStrategy,
    /// 0.0 = every semantic group becomes its own commit, 1.0 = merge freely
    pub cluster_strictness: f32,
    pub relevance_filtering: bool,
    pub relevance_filter_similarity_threshold: f32,
    pub fail_on_syntax_errors: bool,
    pub num_retries: u32,
    pub max_tokens: u32,
    pub temperature: f32,
    pub request_parallelism: usize,
    /// Per-request model timeout in seconds
    pub request_timeout_secs: u64,
    pub auto_accept: bool,
    pub ask_for_commit_message: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunking_level: ChunkingLevel::default(),
            secret_scanner_aggression: ScannerAggression::default(),
            fallback_grouping_strategy: FallbackStrategy::default(),
            batching_strategy: BatchingStrategy::default(),
            cluster_strictness: 0.5,
            relevance_filtering: false,
            relevance_filter_similarity_threshold: 0.4,
            fail_on_syntax_errors: false,
            num_retries: 2,
            max_tokens: 8192,
            temperature: 0.7,
            request_parallelism: 4,
            request_timeout_secs: 120,
            auto_accept: false,
            ask_for_commit_message: false,
        }
    }
}

impl PipelineConfig {
    /// Reject out-of-range numeric settings before the pipeline starts
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.cluster_strictness) {
            return Err(CoreError::config("cluster_strictness must be within 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.relevance_filter_similarity_threshold) {
            return Err(CoreError::config(
                "relevance_filter_similarity_threshold must be within 0..=1",
            ));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(CoreError::config("temperature must be within 0..=1"));
        }
        if self.num_retries > 10 {
            return Err(CoreError::config("num_retries must be within 0..=10"));
        }
        if self.request_parallelism == 0 {
            return Err(CoreError::config("request_parallelism must be positive"));
        }
        Ok(())
    }
}
