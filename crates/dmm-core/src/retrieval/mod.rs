//! Retriever + Pack Assembler
//!
//! Two-stage hierarchical search with token-budgeted selection:
//!
//! 1. Baseline reservation: active baseline memories admitted greedily in
//!    declared order until the baseline budget is spent.
//! 2. One query embedding (LRU-cached), shared by both search stages.
//! 3. Directory ranking: coarse cosine over directory embeddings.
//! 4. Content ranking within the top directories.
//! 5. Final score `cosine_weight * cosine + priority_weight * priority`,
//!    ties broken by `created` descending then `id` ascending.
//! 6. Greedy budget fill with a fixed per-entry fence overhead; candidates
//!    that do not fit land in `excluded_paths`.

mod pack;

pub use pack::{MemoryPack, PackEntry, PackStats};

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use lru::LruCache;

use crate::config::RetrievalConfig;
use crate::embedder::{Embedder, EmbeddingError};
use crate::memory::{MemoryFile, SearchFilters};
use crate::store::{Storage, StoreError};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Retrieval error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
}

// ============================================================================
// REQUEST
// ============================================================================

/// A pack-assembly request
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub query_text: String,
    /// Total token budget for the pack
    pub budget: usize,
    /// Baseline reservation; `None` uses the configured default
    pub baseline_budget: Option<usize>,
    pub filters: SearchFilters,
    /// Reserve baseline tokens ahead of retrieval (default true)
    pub baseline_reserved: bool,
    /// Caller-supplied deadline; exceeded mid-fill returns a truncated pack
    pub deadline: Option<Instant>,
    /// Timestamp stamped into the rendered pack; `None` uses now. Callers
    /// that need byte-identical renders pass a fixed value.
    pub generated_at: Option<DateTime<Utc>>,
}

impl QueryRequest {
    pub fn new(query_text: impl Into<String>, budget: usize) -> Self {
        Self {
            query_text: query_text.into(),
            budget,
            baseline_budget: None,
            filters: SearchFilters::default(),
            baseline_reserved: true,
            deadline: None,
            generated_at: None,
        }
    }
}

// ============================================================================
// RETRIEVER
// ============================================================================

/// Assembles memory packs from the indexed store
pub struct Retriever {
    storage: Arc<Storage>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
    /// Cache of query embeddings keyed by query text
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl Retriever {
    pub fn new(storage: Arc<Storage>, embedder: Arc<dyn Embedder>, config: RetrievalConfig) -> Self {
        let capacity = NonZeroUsize::new(config.query_cache_size.max(1))
            .unwrap_or(NonZeroUsize::new(1).unwrap());
        Self {
            storage,
            embedder,
            config,
            query_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Assemble a pack for the request
    pub fn assemble(&self, request: &QueryRequest) -> Result<MemoryPack, RetrievalError> {
        let start = Instant::now();
        let baseline_budget = request
            .baseline_budget
            .unwrap_or(self.config.default_baseline_budget)
            .min(request.budget);

        // Step 1: baseline reservation in declared order
        let mut baseline_entries: Vec<PackEntry> = Vec::new();
        let mut baseline_tokens = 0usize;
        let mut included_ids: HashSet<String> = HashSet::new();
        for memory in self.storage.get_baseline_memories()? {
            if baseline_tokens + memory.token_count > baseline_budget {
                break;
            }
            baseline_tokens += memory.token_count;
            included_ids.insert(memory.id.clone());
            baseline_entries.push(baseline_entry(&memory));
        }

        // Step 2: one query vector for both stages
        let query_embedding = self.query_embedding(&request.query_text)?;

        // Steps 3-4: coarse directory ranking, then content ranking inside
        let directories: Vec<String> = self
            .storage
            .search_by_directory(&query_embedding, self.config.top_directories)?
            .into_iter()
            .map(|(directory, _)| directory)
            .collect();
        let candidates = self.storage.search_by_content(
            &query_embedding,
            Some(&directories),
            &request.filters,
            self.config.content_candidates,
        )?;

        // Step 5: final scoring and deterministic ordering
        let mut scored: Vec<(MemoryFile, f64)> = candidates
            .into_iter()
            .filter(|(memory, _)| !included_ids.contains(&memory.id))
            .map(|(memory, cosine)| {
                let score = self.config.cosine_weight * f64::from(cosine)
                    + self.config.priority_weight * memory.priority;
                (memory, score)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.created.cmp(&a.0.created))
                .then_with(|| a.0.id.cmp(&b.0.id))
        });

        // Step 6: greedy budget fill
        let mut remaining = request.budget.saturating_sub(baseline_tokens);
        let mut retrieved_entries: Vec<PackEntry> = Vec::new();
        let mut retrieved_tokens = 0usize;
        let mut excluded_paths: Vec<String> = Vec::new();
        let mut truncated = false;
        for (memory, score) in scored {
            if let Some(deadline) = request.deadline {
                if Instant::now() >= deadline {
                    truncated = true;
                    break;
                }
            }
            let cost = memory.token_count + self.config.fence_overhead;
            if cost <= remaining {
                remaining -= cost;
                retrieved_tokens += cost;
                retrieved_entries.push(retrieved_entry(&memory, score));
            } else {
                excluded_paths.push(memory.path.clone());
            }
        }

        let stats = PackStats {
            baseline_tokens,
            retrieved_tokens,
            total_tokens: baseline_tokens + retrieved_tokens,
            budget: request.budget,
            included: baseline_entries.len() + retrieved_entries.len(),
            excluded: excluded_paths.len(),
        };

        let pack = MemoryPack {
            query: request.query_text.clone(),
            generated_at: request.generated_at.unwrap_or_else(Utc::now),
            baseline: baseline_entries,
            retrieved: retrieved_entries,
            excluded_paths,
            stats,
            baseline_reserved: request.baseline_reserved,
            truncated,
        };

        // Telemetry is best-effort; a failed insert never fails the query
        if let Err(e) = self.storage.log_query(
            &pack.query,
            pack.stats.budget,
            pack.stats.included,
            pack.stats.excluded,
            pack.truncated,
            start.elapsed().as_millis() as u64,
        ) {
            tracing::warn!("query log insert failed: {e}");
        }

        Ok(pack)
    }

    fn query_embedding(&self, query: &str) -> Result<Vec<f32>, RetrievalError> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(vector) = cache.get(query) {
                return Ok(vector.clone());
            }
        }
        let vector = self.embedder.embed_query(query)?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(query.to_string(), vector.clone());
        }
        Ok(vector)
    }
}

fn baseline_entry(memory: &MemoryFile) -> PackEntry {
    PackEntry {
        memory_id: memory.id.clone(),
        path: memory.path.clone(),
        title: memory.title.clone(),
        body: memory.body.clone(),
        token_count: memory.token_count,
        score: None,
    }
}

fn retrieved_entry(memory: &MemoryFile, score: f64) -> PackEntry {
    PackEntry {
        memory_id: memory.id.clone(),
        path: memory.path.clone(),
        title: memory.title.clone(),
        body: memory.body.clone(),
        token_count: memory.token_count,
        score: Some(score),
    }
}

// ============================================================================
// TESTS
// ============================================================================
