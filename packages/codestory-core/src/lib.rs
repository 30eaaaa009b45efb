/*
 * codestory-core
 *
 * Change-decomposition and history-reconstruction pipeline: turns an
 * unstructured working-tree delta or an existing commit into a linear chain
 * of atomic, logically grouped commits reproducing the same final tree.
 *
 * Stages:
 * - Mechanical chunker (finest disjoint units of change)
 * - Parser & scope index (tree-sitter)
 * - Semantic grouper (scope + identifier closure)
 * - Filter chain (secrets, relevance, syntax)
 * - Logical grouper (model capability with heuristic fallback)
 * - Commit synthesis (incremental accumulation, sandboxed, CAS finalize)
 */

pub mod cancel;
pub mod config;
pub mod diff;
pub mod errors;
pub mod filter;
pub mod gateway;
pub mod model;
pub mod parse;
pub mod pipeline;
pub mod semantic;
pub mod synthesize;

// Re-exports
pub use cancel::CancelToken;
pub use config::{
    BatchingStrategy, ChunkingLevel, FallbackStrategy, PipelineConfig, ScannerAggression,
};
pub use diff::{Chunk, ChunkId, DeltaKind, FileChange, FileDelta, Hunk};
pub use errors::{CoreError, Result};
pub use filter::{RejectReason, Rejection};
pub use gateway::{
    CommitInfo, GitGateway, RepositoryGateway, Sandbox, Signature, TreeEntry, TreeUpdate,
};
pub use model::{
    AnalysisRequest, AnalysisResponse, EmbeddingProvider, GroupRendering, HashEmbedder,
    HeuristicProvider, LogicalGroup, ModelProvider, ProposedGroup, ProviderRegistry,
};
pub use parse::{AnalysisIndex, Analyzer, FileAnalysis, LanguageRegistry, ScopeNode, Side};
pub use pipeline::{
    AutoAccept, CleanOptions, CommitOptions, Pipeline, ProposedCommit, RunReport, UserInteraction,
};
pub use semantic::{SemanticGroup, SemanticGrouper};
pub use synthesize::CommitRecord;
