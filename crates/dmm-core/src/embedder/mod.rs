//! Embeddings Module
//!
//! Every memory carries two unit-norm vectors:
//! - a *directory* embedding over `path + tags + title` (coarse topic signal)
//! - a *composite* embedding over `title + body` (fine content signal)
//!
//! The embedder is a contract, not an implementation: any [`Embedder`] that
//! produces unit-norm vectors of a fixed dimension and records its version
//! works. The crate always ships the deterministic [`HashEmbedder`]; the
//! `embeddings` feature adds a fastembed-backed neural model behind the same
//! trait.

mod hash;

#[cfg(feature = "embeddings")]
#[cfg_attr(docsrs, doc(cfg(feature = "embeddings")))]
mod local;

pub use hash::HashEmbedder;

#[cfg(feature = "embeddings")]
pub use local::LocalEmbedder;

use crate::memory::MemoryFile;

/// Fixed embedding dimension
pub const EMBEDDING_DIMENSIONS: usize = 384;

/// Maximum text length passed to an embedding model (bytes)
pub const MAX_TEXT_LENGTH: usize = 8192;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Embedding error types
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// Failed to initialize the embedding model
    #[error("model initialization failed: {0}")]
    ModelInit(String),
    /// Failed to generate an embedding
    #[error("embedding generation failed: {0}")]
    EmbeddingFailed(String),
    /// Invalid input (empty, wrong dimension, etc.)
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

// ============================================================================
// CONTRACT
// ============================================================================

/// The two vectors stored for each memory
#[derive(Debug, Clone)]
pub struct MemoryVectors {
    pub directory: Vec<f32>,
    pub composite: Vec<f32>,
}

/// Embedding contract
///
/// Implementations must return unit-norm vectors of [`Embedder::dimensions`]
/// length and be deterministic for a fixed [`Embedder::version`]. Cosine
/// similarity between outputs must be a meaningful proximity measure.
pub trait Embedder: Send + Sync {
    /// Vector dimension produced by this embedder
    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    /// Version string recorded in the store; a change forces a reindex
    fn version(&self) -> &str;

    /// Embed a single text into a unit-norm vector
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a query string (same space as stored composites)
    fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed(query)
    }

    /// Produce the directory and composite vectors for a memory
    fn embed_memory(&self, memory: &MemoryFile) -> Result<MemoryVectors, EmbeddingError> {
        let directory_text = format!(
            "{} {} {}",
            memory.path,
            memory.tags.join(" "),
            memory.title
        );
        let composite_text = format!("{}\n{}", memory.title, memory.body);
        Ok(MemoryVectors {
            directory: self.embed(&directory_text)?,
            composite: self.embed(&composite_text)?,
        })
    }
}

// ============================================================================
// SIMILARITY FUNCTIONS
// ============================================================================

/// Compute cosine similarity between two vectors
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot_product = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot_product += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 {
        dot_product / denominator
    } else {
        0.0
    }
}

/// L2-normalize a vector in place; zero vectors are left untouched
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Serialize a vector to little-endian bytes for blob storage
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize a vector from little-endian bytes
pub fn vector_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&a, &a);
        assert!((sim - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_dimension_mismatch() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_normalize() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 0.0001);
        assert!((v[1] - 0.8).abs() < 0.0001);
    }

    #[test]
    fn test_vector_bytes_roundtrip() {
        let original = vec![1.5_f32, -2.5, 0.0, 4.25];
        let bytes = vector_to_bytes(&original);
        let restored = vector_from_bytes(&bytes).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn test_vector_from_bytes_bad_length() {
        assert!(vector_from_bytes(&[0, 1, 2]).is_none());
    }
}
