//! Semantic grouping of chunks via scopes and identifier links

pub mod group;
pub mod grouper;
pub mod union_find;

pub use group::SemanticGroup;
pub use grouper::SemanticGrouper;
pub use union_find::UnionFind;
