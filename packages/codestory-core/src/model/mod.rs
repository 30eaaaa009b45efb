//! Model and embedding capabilities
//!
//! Both capabilities are narrow traits behind a name registry; concrete
//! transports live outside the core. The built-in providers are
//! deterministic and network-free so every pipeline path runs offline.

pub mod grouper;
pub mod heuristic;
pub mod request;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::{CoreError, Result};
pub use grouper::{LogicalGroup, LogicalGrouper};
pub use heuristic::{HashEmbedder, HeuristicProvider};
pub use request::{
    estimate_tokens, fingerprint, render_group, AnalysisRequest, AnalysisResponse, GroupRendering,
    ProposedGroup,
};

/// Submits structured analysis requests and returns grouping decisions
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse>;
}

/// Produces text embeddings for relevance scoring
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Providers registered by name; the configuration resolver picks one at
/// startup
pub struct ProviderRegistry {
    models: BTreeMap<String, Arc<dyn ModelProvider>>,
    embedders: BTreeMap<String, Arc<dyn EmbeddingProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            models: BTreeMap::new(),
            embedders: BTreeMap::new(),
        }
    }

    /// Registry preloaded with the built-in offline providers
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_model(Arc::new(HeuristicProvider::default()));
        registry.register_embedder(Arc::new(HashEmbedder::default()));
        registry
    }

    pub fn register_model(&mut self, provider: Arc<dyn ModelProvider>) {
        self.models.insert(provider.name().to_string(), provider);
    }

    pub fn register_embedder(&mut self, provider: Arc<dyn EmbeddingProvider>) {
        self.embedders.insert(provider.name().to_string(), provider);
    }

    pub fn model(&self, name: &str) -> Result<Arc<dyn ModelProvider>> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::model(format!("unknown model provider: {name}")))
    }

    pub fn embedder(&self, name: &str) -> Result<Arc<dyn EmbeddingProvider>> {
        self.embedders
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::model(format!("unknown embedding provider: {name}")))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_builtins() {
        let registry = ProviderRegistry::with_builtins();
        assert!(registry.model("heuristic").is_ok());
        assert!(registry.embedder("feature-hash").is_ok());
        assert!(registry.model("gpt-42").is_err());
    }
}
