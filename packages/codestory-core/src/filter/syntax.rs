//! Syntax validation filter
//!
//! Tentatively applies a group to the base content of each file it touches
//! and re-parses the result. A failed parse is a warning, or a rejection
//! when fail_on_syntax_errors is set.

use rustc_hash::FxHashMap;

use crate::diff::compose_file;
use crate::errors::Result;
use crate::parse::{Analyzer, Side};
use crate::semantic::SemanticGroup;

/// Outcome of validating one group
pub enum SyntaxVerdict {
    Clean,
    /// Files that failed to parse after tentative application
    Broken(Vec<String>),
}

/// Re-parse every file the group touches with only this group applied to
/// the base content
pub fn validate_group(
    group: &SemanticGroup,
    base_contents: &FxHashMap<String, Vec<u8>>,
    analyzer: &Analyzer,
) -> Result<SyntaxVerdict> {
    let mut broken = Vec::new();

    for path in &group.files {
        if analyzer.registry().language_for_path(path).is_none() {
            continue;
        }
        let chunks: Vec<_> = group
            .chunks
            .iter()
            .filter(|c| c.change.canonical_path() == path)
            .collect();
        if chunks.iter().all(|c| c.is_marker()) {
            continue;
        }

        let empty = Vec::new();
        let base = base_contents.get(path).unwrap_or(&empty);
        let applied = compose_file(base, &chunks)?;

        let analysis = analyzer.analyze(path, Side::New, &applied)?;
        if analysis.parse_failed {
            broken.push(path.clone());
        }
    }

    if broken.is_empty() {
        Ok(SyntaxVerdict::Clean)
    } else {
        Ok(SyntaxVerdict::Broken(broken))
    }
}
