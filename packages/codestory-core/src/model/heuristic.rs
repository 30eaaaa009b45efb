//! Built-in offline providers
//!
//! `HeuristicProvider` is both the default provider and the safety net when
//! a real provider keeps failing: every semantic group becomes its own
//! commit with a message derived from the touched files. `HashEmbedder` is a
//! deterministic feature-hashing embedder for relevance scoring.

use async_trait::async_trait;

use super::request::{AnalysisRequest, AnalysisResponse, ProposedGroup};
use super::{EmbeddingProvider, ModelProvider};
use crate::errors::Result;

/// Heuristic message for a group given its file list
pub fn heuristic_message(files: &[String]) -> String {
    if files.is_empty() {
        "chore: update files".to_string()
    } else {
        format!("files touched: {}", files.join(", "))
    }
}

#[derive(Debug, Default)]
pub struct HeuristicProvider;

#[async_trait]
impl ModelProvider for HeuristicProvider {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse> {
        let logical_groups: Vec<ProposedGroup> = request
            .groups
            .iter()
            .enumerate()
            .map(|(i, group)| ProposedGroup {
                id: i as u32,
                member_ids: vec![group.id],
                message: heuristic_message(&group.files),
                rationale: None,
            })
            .collect();
        let order = (0..logical_groups.len() as u32).collect();
        Ok(AnalysisResponse {
            logical_groups,
            order,
        })
    }
}

const EMBEDDING_DIM: usize = 256;

/// Feature-hashing embedder: tokens hashed into a fixed-size count vector,
/// L2 normalized
#[derive(Debug, Default)]
pub struct HashEmbedder;

fn token_bucket(token: &str) -> usize {
    // FNV-1a
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in token.bytes() {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % EMBEDDING_DIM as u64) as usize
}

fn embed_one(text: &str) -> Vec<f32> {
    let mut vector = vec![0f32; EMBEDDING_DIM];
    for token in text
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
    {
        vector[token_bucket(&token.to_lowercase())] += 1.0;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn name(&self) -> &str {
        "feature-hash"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_heuristic_singleton_groups() {
        use super::super::request::GroupRendering;

        let request = AnalysisRequest {
            groups: vec![
                GroupRendering {
                    id: 3,
                    files: vec!["a.py".into()],
                    identifiers: vec![],
                    diff_fragments: vec![],
                    fingerprint: 0,
                },
                GroupRendering {
                    id: 5,
                    files: vec!["b.py".into()],
                    identifiers: vec![],
                    diff_fragments: vec![],
                    fingerprint: 0,
                },
            ],
            intent: None,
            cluster_strictness: 0.5,
            max_tokens: 4096,
            batching_strategy: crate::config::BatchingStrategy::Auto,
        };
        let response = HeuristicProvider.analyze(&request).await.unwrap();
        assert_eq!(response.logical_groups.len(), 2);
        assert_eq!(response.logical_groups[0].member_ids, vec![3]);
        assert_eq!(response.logical_groups[1].member_ids, vec![5]);
        assert!(response.logical_groups[0].message.contains("a.py"));
    }

    #[tokio::test]
    async fn test_embedder_similarity() {
        let embedder = HashEmbedder;
        let vectors = embedder
            .embed(&[
                "fix the login handler".to_string(),
                "fix login handler bug".to_string(),
                "unrelated database migration".to_string(),
            ])
            .await
            .unwrap();

        let cos = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        let close = cos(&vectors[0], &vectors[1]);
        let far = cos(&vectors[0], &vectors[2]);
        assert!(close > far);
    }

    #[test]
    fn test_embedding_is_normalized() {
        let v = embed_one("some sample text");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
