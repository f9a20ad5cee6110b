//! Text-to-vector embedding pipeline.
//!
//! Provides the [`EmbeddingProvider`] trait, a local ONNX implementation
//! (all-MiniLM-L6-v2, 384 dimensions) and a deterministic feature-hashing
//! implementation that needs no model files. Providers are never created
//! directly by the search path: the [`crate::search::model::ModelManager`]
//! loads them on demand through a [`ConfiguredModelLoader`].

pub mod hash;
pub mod local;

use std::sync::Arc;

use anyhow::Result;

use crate::config::EmbeddingConfig;
use crate::search::model::ModelLoader;

/// Number of dimensions produced by all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

/// Trait for embedding text into vectors.
///
/// Implementations produce L2-normalized vectors of exactly [`Self::dimensions`]
/// values. All methods are synchronous — callers in async contexts should use
/// `tokio::task::spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Return the number of dimensions this provider produces.
    fn dimensions(&self) -> usize;
}

/// Create an embedding provider from config.
///
/// `"local"` requires the ONNX model files — run `tome model download` first.
/// `"hash"` always succeeds.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "local" => {
            let provider = local::LocalEmbeddingProvider::new(config)?;
            Ok(Box::new(provider))
        }
        "hash" => Ok(Box::new(hash::HashEmbeddingProvider::new(config.dimension))),
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: local, hash"),
    }
}

/// [`ModelLoader`] that builds the provider named in the embedding config.
pub struct ConfiguredModelLoader {
    config: EmbeddingConfig,
}

impl ConfiguredModelLoader {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self { config }
    }
}

impl ModelLoader for ConfiguredModelLoader {
    fn load(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        let provider = create_provider(&self.config)?;
        anyhow::ensure!(
            provider.dimensions() == self.config.dimension,
            "provider '{}' produces {} dimensions but {} are configured",
            self.config.provider,
            provider.dimensions(),
            self.config.dimension
        );
        Ok(Arc::from(provider))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.config.provider, self.config.model)
    }
}
