//! Deterministic feature-hashing embedder
//!
//! Maps text into a fixed-dimension unit vector by hashing word unigrams and
//! bigrams into buckets (FNV-1a, sign split on one hash bit). Not a neural
//! model, but it satisfies the embedder contract: deterministic, unit-norm,
//! and texts sharing vocabulary land near each other under cosine. The whole
//! core test suite runs on it with no model download.

use super::{normalize, Embedder, EmbeddingError, EMBEDDING_DIMENSIONS};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Deterministic feature-hashing embedder
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            dimensions: EMBEDDING_DIMENSIONS,
        }
    }

    /// A smaller dimension for tests that want fast pairwise scans
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn accumulate(&self, vector: &mut [f32], token: &str, weight: f32) {
        let hash = fnv1a(token.as_bytes());
        let bucket = (hash % self.dimensions as u64) as usize;
        let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Embedder for HashEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn version(&self) -> &str {
        "feature-hash-v1"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "text cannot be empty".to_string(),
            ));
        }

        let words: Vec<String> = text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_string)
            .collect();

        if words.is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "text contains no indexable tokens".to_string(),
            ));
        }

        let mut vector = vec![0.0_f32; self.dimensions];
        for word in &words {
            self.accumulate(&mut vector, word, 1.0);
        }
        // Bigrams carry phrase-level signal at half weight
        for pair in words.windows(2) {
            self.accumulate(&mut vector, &format!("{} {}", pair[0], pair[1]), 0.5);
        }

        normalize(&mut vector);
        Ok(vector)
    }
}

// ============================================================================
// TESTS
// ============================================================================
