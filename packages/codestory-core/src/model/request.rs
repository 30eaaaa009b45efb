//! Structured payloads exchanged with the model capability

use serde::{Deserialize, Serialize};

use crate::semantic::SemanticGroup;

/// Compact rendering of one semantic group for analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRendering {
    pub id: u32,
    pub files: Vec<String>,
    pub identifiers: Vec<String>,
    /// Old/new line ranges with line content, one fragment per chunk
    pub diff_fragments: Vec<String>,
    /// Content hash included for reproducibility logging
    pub fingerprint: u64,
}

/// One grouping request submitted to a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub groups: Vec<GroupRendering>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    pub cluster_strictness: f32,
    pub max_tokens: u32,
    pub batching_strategy: crate::config::BatchingStrategy,
}

/// A proposed logical group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedGroup {
    pub id: u32,
    pub member_ids: Vec<u32>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// Provider response: proposed groups plus a total order over them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResponse {
    pub logical_groups: Vec<ProposedGroup>,
    #[serde(default)]
    pub order: Vec<u32>,
}

const MAX_FRAGMENT_LINES: usize = 40;

/// Render a semantic group into the compact request shape
pub fn render_group(group: &SemanticGroup) -> GroupRendering {
    let mut fragments = Vec::with_capacity(group.chunks.len());
    for chunk in &group.chunks {
        let mut text = format!(
            "{} -{},{} +{},{}\n",
            chunk.change.canonical_path(),
            chunk.old_start,
            chunk.old_len(),
            chunk.new_start,
            chunk.new_len(),
        );
        for line in chunk.old_lines.iter().take(MAX_FRAGMENT_LINES) {
            text.push('-');
            text.push_str(String::from_utf8_lossy(line).trim_end_matches('\n'));
            text.push('\n');
        }
        for line in chunk.new_lines.iter().take(MAX_FRAGMENT_LINES) {
            text.push('+');
            text.push_str(String::from_utf8_lossy(line).trim_end_matches('\n'));
            text.push('\n');
        }
        fragments.push(text);
    }

    GroupRendering {
        id: group.id,
        files: group.files.iter().cloned().collect(),
        identifiers: group.identifiers().into_iter().collect(),
        diff_fragments: fragments,
        fingerprint: fingerprint(group),
    }
}

/// Stable content hash of a group (FNV-1a over paths, ranges and lines)
pub fn fingerprint(group: &SemanticGroup) -> u64 {
    const OFFSET: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET;
    let mut feed = |bytes: &[u8]| {
        for &b in bytes {
            hash ^= b as u64;
            hash = hash.wrapping_mul(PRIME);
        }
    };
    for chunk in &group.chunks {
        feed(chunk.change.canonical_path().as_bytes());
        feed(&chunk.old_start.to_le_bytes());
        feed(&chunk.new_start.to_le_bytes());
        for line in chunk.old_lines.iter().chain(chunk.new_lines.iter()) {
            feed(line);
        }
    }
    hash
}

/// Rough token estimate for budgeting batches
pub fn estimate_tokens(rendering: &GroupRendering) -> usize {
    let chars: usize = rendering.diff_fragments.iter().map(|f| f.len()).sum::<usize>()
        + rendering.files.iter().map(|f| f.len()).sum::<usize>()
        + rendering.identifiers.iter().map(|i| i.len()).sum::<usize>();
    chars / 4 + 16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::chunk::{Chunk, ChunkId};
    use crate::diff::delta::{DeltaKind, FileChange};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn sample_group() -> SemanticGroup {
        let change = Arc::new(FileChange {
            kind: DeltaKind::Modified,
            old_path: Some("a.py".into()),
            new_path: Some("a.py".into()),
            old_mode: Some("100644".into()),
            new_mode: Some("100644".into()),
            is_binary: false,
            new_blob_id: None,
        });
        SemanticGroup {
            id: 7,
            chunks: vec![Chunk {
                id: ChunkId(0),
                change,
                old_start: 2,
                new_start: 2,
                old_lines: vec![b"    return 1\n".to_vec()],
                new_lines: vec![b"    return 2\n".to_vec()],
            }],
            files: BTreeSet::from(["a.py".to_string()]),
            scopes: BTreeSet::new(),
            defined: BTreeSet::new(),
            referenced: BTreeSet::new(),
            fallback: false,
        }
    }

    #[test]
    fn test_render_group() {
        let rendering = render_group(&sample_group());
        assert_eq!(rendering.id, 7);
        assert_eq!(rendering.files, vec!["a.py"]);
        assert!(rendering.diff_fragments[0].contains("-    return 1"));
        assert!(rendering.diff_fragments[0].contains("+    return 2"));
    }

    #[test]
    fn test_fingerprint_is_stable_and_content_sensitive() {
        let a = sample_group();
        let b = sample_group();
        assert_eq!(fingerprint(&a), fingerprint(&b));

        let mut c = sample_group();
        c.chunks[0].new_lines = vec![b"    return 3\n".to_vec()];
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn test_response_roundtrip() {
        let response = AnalysisResponse {
            logical_groups: vec![ProposedGroup {
                id: 0,
                member_ids: vec![1, 2],
                message: "feat: add helper".to_string(),
                rationale: None,
            }],
            order: vec![0],
        };
        let json = serde_json::to_string(&response).unwrap();
        let back: AnalysisResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.logical_groups[0].member_ids, vec![1, 2]);
    }
}
