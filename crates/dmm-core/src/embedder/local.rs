//! Local neural embeddings
//!
//! fastembed-backed implementation of the embedder contract using
//! nomic-embed-text-v1.5 (ONNX, local inference). The 768-dim model output is
//! Matryoshka-truncated to the crate's 384-dim contract and re-normalized;
//! the first N dims of a Matryoshka-trained model ARE the N-dim embedding.

use std::sync::{Mutex, OnceLock};

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use super::{normalize, Embedder, EmbeddingError, EMBEDDING_DIMENSIONS, MAX_TEXT_LENGTH};

static MODEL: OnceLock<Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

/// Model cache directory: `DMM_MODEL_CACHE` env var, platform cache dir, or a
/// local fallback
fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("DMM_MODEL_CACHE") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "dmm", "core") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".dmm_model_cache")
}

fn model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>, EmbeddingError> {
    let result = MODEL.get_or_init(|| {
        let cache_dir = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            tracing::warn!("failed to create model cache directory {cache_dir:?}: {e}");
        }

        let options = InitOptions::new(EmbeddingModel::NomicEmbedTextV15)
            .with_show_download_progress(false)
            .with_cache_dir(cache_dir);

        TextEmbedding::try_new(options).map(Mutex::new).map_err(|e| {
            format!(
                "failed to initialize nomic-embed-text-v1.5: {e}. \
                 Ensure ONNX runtime is available and model files can be downloaded."
            )
        })
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| EmbeddingError::ModelInit(format!("model lock poisoned: {e}"))),
        Err(e) => Err(EmbeddingError::ModelInit(e.clone())),
    }
}

/// Truncate to the contract dimension and re-normalize
fn matryoshka_truncate(mut vector: Vec<f32>) -> Vec<f32> {
    if vector.len() > EMBEDDING_DIMENSIONS {
        vector.truncate(EMBEDDING_DIMENSIONS);
    }
    normalize(&mut vector);
    vector
}

/// Local fastembed embedder (feature `embeddings`)
#[derive(Debug, Clone, Default)]
pub struct LocalEmbedder {
    _priv: (),
}

impl LocalEmbedder {
    pub fn new() -> Self {
        Self { _priv: () }
    }

    /// Check whether the model is loadable without failing the caller
    pub fn is_ready(&self) -> bool {
        match model() {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("embedding model not ready: {e}");
                false
            }
        }
    }
}

impl Embedder for LocalEmbedder {
    fn version(&self) -> &str {
        "nomic-embed-text-v1.5/384"
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput(
                "text cannot be empty".to_string(),
            ));
        }

        let mut model = model()?;

        let text = if text.len() > MAX_TEXT_LENGTH {
            let mut end = MAX_TEXT_LENGTH;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        };

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .map(matryoshka_truncate)
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("no embedding generated".to_string()))
    }
}
