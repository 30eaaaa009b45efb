//! Parsing and scope/identifier indexing

pub mod analyzer;
pub mod language;

pub use analyzer::{
    AnalysisIndex, Analyzer, FileAnalysis, IdentifierRole, IdentifierSite, ScopeKind, ScopeNode,
    Side,
};
pub use language::{LanguageConfig, LanguageRegistry, SharedTokenQueries};
