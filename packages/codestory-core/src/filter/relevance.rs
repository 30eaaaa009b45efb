//! Relevance filter
//!
//! Scores each semantic group against the user's intent with a text
//! embedding similarity in [0, 1]; groups under the threshold are rejected.

use std::sync::Arc;

use crate::errors::Result;
use crate::model::{render_group, EmbeddingProvider};
use crate::semantic::SemanticGroup;

pub struct RelevanceFilter {
    embedder: Arc<dyn EmbeddingProvider>,
    threshold: f32,
}

impl RelevanceFilter {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, threshold: f32) -> Self {
        Self {
            embedder,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Similarity score per group against the intent, each in [0, 1]
    pub async fn scores(&self, intent: &str, groups: &[SemanticGroup]) -> Result<Vec<f32>> {
        let mut texts = Vec::with_capacity(groups.len() + 1);
        texts.push(intent.to_string());
        for group in groups {
            texts.push(group_text(group));
        }

        let embeddings = self.embedder.embed(&texts).await?;
        let intent_vector = &embeddings[0];
        Ok(embeddings[1..]
            .iter()
            .map(|v| similarity(intent_vector, v))
            .collect())
    }
}

fn group_text(group: &SemanticGroup) -> String {
    let rendering = render_group(group);
    let mut text = rendering.files.join(" ");
    text.push(' ');
    text.push_str(&rendering.identifiers.join(" "));
    for fragment in &rendering.diff_fragments {
        text.push('\n');
        text.push_str(fragment);
    }
    text
}

/// Cosine similarity mapped into [0, 1]
fn similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cos = (dot / (norm_a * norm_b)).clamp(-1.0, 1.0);
    (1.0 + cos) / 2.0
}
