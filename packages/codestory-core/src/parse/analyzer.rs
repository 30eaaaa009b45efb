//! Syntax analysis per file version
//!
//! Parses each touched file version with tree-sitter and evaluates the
//! language's scope / token / comment queries into a flat `FileAnalysis`.
//! Files with an unknown language or a failed parse enter fallback mode:
//! the whole file acts as one opaque scope and no identifiers are indexed.

use std::sync::Arc;

use dashmap::DashMap;
use rayon::prelude::*;
use tracing::{debug, warn};
use tree_sitter::{Parser, Query, QueryCursor};

use super::language::LanguageRegistry;
use crate::diff::split_lines;
use crate::errors::{CoreError, Result};

/// Which version of a file an analysis covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Old,
    New,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Old => write!(f, "old"),
            Side::New => write!(f, "new"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Named,
    Anonymous,
    Comment,
}

/// A syntactic region of one file version
#[derive(Debug, Clone)]
pub struct ScopeNode {
    pub id: String,
    pub kind: ScopeKind,
    pub name: Option<String>,
    /// 1-based inclusive line range
    pub start_line: u32,
    pub end_line: u32,
}

impl ScopeNode {
    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }

    pub fn span(&self) -> u32 {
        self.end_line - self.start_line
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierRole {
    Definition,
    Reference,
}

/// One occurrence of an identifier
#[derive(Debug, Clone)]
pub struct IdentifierSite {
    pub name: String,
    pub line: u32,
    pub role: IdentifierRole,
}

/// Flat analysis of one file version
#[derive(Debug, Clone)]
pub struct FileAnalysis {
    pub path: String,
    pub side: Side,
    pub language: Option<String>,
    pub parse_failed: bool,
    pub scopes: Vec<ScopeNode>,
    pub identifiers: Vec<IdentifierSite>,
    pub comments: Vec<ScopeNode>,
    pub share_tokens_between_files: bool,
    blank_lines: Vec<bool>,
}

impl FileAnalysis {
    fn fallback(path: &str, side: Side, content: &[u8], parse_failed: bool) -> Self {
        Self {
            path: path.to_string(),
            side,
            language: None,
            parse_failed,
            scopes: Vec::new(),
            identifiers: Vec::new(),
            comments: Vec::new(),
            share_tokens_between_files: false,
            blank_lines: blank_line_map(content),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.language.is_none() || self.parse_failed
    }

    /// Innermost scope intersecting the 1-based inclusive line range
    pub fn innermost_scope_for_range(&self, start: u32, end: u32) -> Option<&ScopeNode> {
        self.scopes
            .iter()
            .filter(|s| s.start_line <= end && start <= s.end_line)
            .min_by_key(|s| s.span())
    }

    /// Named scope whose body starts at exactly this line, if any
    pub fn scope_starting_at(&self, line: u32) -> Option<&ScopeNode> {
        self.scopes
            .iter()
            .filter(|s| s.start_line == line)
            .min_by_key(|s| s.span())
    }

    /// True if every line of the range lies inside comment nodes
    pub fn range_is_comment(&self, start: u32, end: u32) -> bool {
        (start..=end).all(|line| {
            self.blank_line(line) || self.comments.iter().any(|c| c.contains_line(line))
        }) && self.comments.iter().any(|c| c.start_line <= end && start <= c.end_line)
    }

    /// First non-blank line strictly after `line`
    pub fn next_nonblank_after(&self, line: u32) -> Option<u32> {
        let mut cursor = line + 1;
        while (cursor as usize) <= self.blank_lines.len() {
            if !self.blank_line(cursor) {
                return Some(cursor);
            }
            cursor += 1;
        }
        None
    }

    fn blank_line(&self, line: u32) -> bool {
        self.blank_lines
            .get((line as usize).saturating_sub(1))
            .copied()
            .unwrap_or(true)
    }

    /// Identifier sites of a role overlapping the line range
    pub fn sites_in_range(
        &self,
        start: u32,
        end: u32,
        role: IdentifierRole,
    ) -> impl Iterator<Item = &IdentifierSite> {
        self.identifiers
            .iter()
            .filter(move |s| s.role == role && start <= s.line && s.line <= end)
    }
}

fn blank_line_map(content: &[u8]) -> Vec<bool> {
    split_lines(content)
        .iter()
        .map(|l| l.iter().all(|b| b.is_ascii_whitespace()))
        .collect()
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum QueryKind {
    Scope,
    Definition,
    General,
    Comment,
}

/// Parses file versions and evaluates language queries
pub struct Analyzer {
    registry: Arc<LanguageRegistry>,
    fail_on_syntax_errors: bool,
    query_cache: DashMap<(String, QueryKind), Arc<Query>>,
}

impl Analyzer {
    pub fn new(registry: Arc<LanguageRegistry>, fail_on_syntax_errors: bool) -> Self {
        Self {
            registry,
            fail_on_syntax_errors,
            query_cache: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    /// Analyze one file version; fallback instead of error unless
    /// fail_on_syntax_errors is set
    pub fn analyze(&self, path: &str, side: Side, content: &[u8]) -> Result<FileAnalysis> {
        let Some(language) = self.registry.language_for_path(path).map(str::to_string) else {
            return Ok(FileAnalysis::fallback(path, side, content, false));
        };
        let Some(grammar) = LanguageRegistry::grammar(&language) else {
            return Ok(FileAnalysis::fallback(path, side, content, false));
        };

        let mut parser = Parser::new();
        parser
            .set_language(&grammar)
            .map_err(|e| CoreError::config(format!("grammar mismatch for {language}: {e}")))?;

        let tree = match parser.parse(content, None) {
            Some(tree) if !tree.root_node().has_error() => tree,
            _ => {
                if self.fail_on_syntax_errors {
                    return Err(CoreError::Parse {
                        file: path.to_string(),
                        message: "syntax errors present".to_string(),
                    });
                }
                warn!(path, %side, "parse failed, entering fallback mode");
                return Ok(FileAnalysis::fallback(path, side, content, true));
            }
        };

        let config = self
            .registry
            .config(&language)
            .ok_or_else(|| CoreError::config(format!("no config for {language}")))?;

        let root = tree.root_node();
        let mut analysis = FileAnalysis {
            path: path.to_string(),
            side,
            language: Some(language.clone()),
            parse_failed: false,
            scopes: Vec::new(),
            identifiers: Vec::new(),
            comments: Vec::new(),
            share_tokens_between_files: config.share_tokens_between_files,
            blank_lines: blank_line_map(content),
        };

        // Scopes: @scope marks the region, @scope.name the identifier
        if let Some(query) = self.query(&language, QueryKind::Scope, &config.scope_query_source(), &grammar)? {
            let mut cursor = QueryCursor::new();
            for m in cursor.matches(&query, root, content) {
                let mut node = None;
                let mut name = None;
                for cap in m.captures {
                    match query.capture_names()[cap.index as usize] {
                        "scope" => node = Some(cap.node),
                        "scope.name" => {
                            name = cap.node.utf8_text(content).ok().map(str::to_string)
                        }
                        _ => {}
                    }
                }
                if let Some(node) = node {
                    analysis.scopes.push(ScopeNode {
                        id: format!("{path}@{side}:{}-{}", node.start_byte(), node.end_byte()),
                        kind: if name.is_some() {
                            ScopeKind::Named
                        } else {
                            ScopeKind::Anonymous
                        },
                        name,
                        start_line: node.start_position().row as u32 + 1,
                        end_line: node.end_position().row as u32 + 1,
                    });
                }
            }
        }

        // Definition sites: the @def.name capture is the site
        if let Some(query) = self.query(
            &language,
            QueryKind::Definition,
            &config.definition_query_source(),
            &grammar,
        )? {
            let mut cursor = QueryCursor::new();
            for m in cursor.matches(&query, root, content) {
                for cap in m.captures {
                    if query.capture_names()[cap.index as usize] == "def.name" {
                        if let Ok(text) = cap.node.utf8_text(content) {
                            analysis.identifiers.push(IdentifierSite {
                                name: text.to_string(),
                                line: cap.node.start_position().row as u32 + 1,
                                role: IdentifierRole::Definition,
                            });
                        }
                    }
                }
            }
        }

        // General references
        if let Some(query) = self.query(
            &language,
            QueryKind::General,
            &config.general_query_source(),
            &grammar,
        )? {
            let mut cursor = QueryCursor::new();
            for m in cursor.matches(&query, root, content) {
                for cap in m.captures {
                    if query.capture_names()[cap.index as usize] == "ref" {
                        if let Ok(text) = cap.node.utf8_text(content) {
                            analysis.identifiers.push(IdentifierSite {
                                name: text.to_string(),
                                line: cap.node.start_position().row as u32 + 1,
                                role: IdentifierRole::Reference,
                            });
                        }
                    }
                }
            }
        }

        // Comments and docstrings
        if let Some(query) = self.query(
            &language,
            QueryKind::Comment,
            &config.comment_query_source(),
            &grammar,
        )? {
            let mut cursor = QueryCursor::new();
            for m in cursor.matches(&query, root, content) {
                for cap in m.captures {
                    if query.capture_names()[cap.index as usize] == "comment" {
                        let node = cap.node;
                        analysis.comments.push(ScopeNode {
                            id: format!(
                                "{path}@{side}:comment:{}-{}",
                                node.start_byte(),
                                node.end_byte()
                            ),
                            kind: ScopeKind::Comment,
                            name: None,
                            start_line: node.start_position().row as u32 + 1,
                            end_line: node.end_position().row as u32 + 1,
                        });
                    }
                }
            }
        }

        debug!(
            path,
            %side,
            scopes = analysis.scopes.len(),
            identifiers = analysis.identifiers.len(),
            "file analyzed"
        );
        Ok(analysis)
    }

    fn query(
        &self,
        language: &str,
        kind: QueryKind,
        source: &str,
        grammar: &tree_sitter::Language,
    ) -> Result<Option<Arc<Query>>> {
        if source.trim().is_empty() {
            return Ok(None);
        }
        let key = (language.to_string(), kind);
        if let Some(query) = self.query_cache.get(&key) {
            return Ok(Some(Arc::clone(&query)));
        }
        let query = Arc::new(Query::new(grammar, source).map_err(|e| {
            CoreError::config(format!("invalid query for {language}: {e}"))
        })?);
        self.query_cache.insert(key, Arc::clone(&query));
        Ok(Some(query))
    }
}

/// Analyses for every touched (path, side), built in parallel
pub struct AnalysisIndex {
    entries: DashMap<(String, Side), Arc<FileAnalysis>>,
}

impl AnalysisIndex {
    /// Parse and index all requested file versions
    pub fn build(analyzer: &Analyzer, sources: Vec<(String, Side, Vec<u8>)>) -> Result<Self> {
        let index = Self {
            entries: DashMap::new(),
        };
        let results: Vec<Result<FileAnalysis>> = sources
            .par_iter()
            .map(|(path, side, content)| analyzer.analyze(path, *side, content))
            .collect();
        for analysis in results {
            let analysis = analysis?;
            index.entries.insert(
                (analysis.path.clone(), analysis.side),
                Arc::new(analysis),
            );
        }
        Ok(index)
    }

    pub fn get(&self, path: &str, side: Side) -> Option<Arc<FileAnalysis>> {
        self.entries
            .get(&(path.to_string(), side))
            .map(|e| Arc::clone(&e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All analyses, for cross-file symbol sharing
    pub fn all(&self) -> Vec<Arc<FileAnalysis>> {
        self.entries.iter().map(|e| Arc::clone(&e)).collect()
    }
}
