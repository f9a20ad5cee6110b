//! Feature-hashing embedder.
//!
//! Deterministic and dependency-free: every lowercase alphanumeric token is
//! hashed with FNV-1a into one of `dimension` signed buckets. Useful offline,
//! in tests, and as a degraded stand-in when the ONNX model is not installed.
//! Similarity only reflects shared vocabulary, not meaning.

use anyhow::Result;

use super::EmbeddingProvider;
use crate::search::math::l2_normalize;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

pub struct HashEmbeddingProvider {
    dimension: usize,
}

impl HashEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

impl EmbeddingProvider for HashEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let h = fnv1a(token.as_bytes());
            let bucket = (h % self.dimension as u64) as usize;
            // top bit picks the sign so collisions tend to cancel
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        Ok(l2_normalize(&v))
    }

    fn dimensions(&self) -> usize {
        self.dimension
    }
}
