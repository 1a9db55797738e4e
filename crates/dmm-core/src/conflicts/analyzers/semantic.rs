//! Semantic-similarity analyzer
//!
//! Flags pairs that talk about the same thing (high composite-embedding
//! similarity) but pull in different directions (divergent language, scope
//! mismatch, priority gap). High similarity with high divergence is the
//! classic contradictory-memories signature.
//!
//! Same-scope pairs above the high-similarity threshold are near-duplicates
//! and left to the duplicate path, not reported as conflicts here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;

use crate::config::SemanticConfig;
use crate::conflicts::types::{ConflictCandidate, DetectionMethod, Result};
use crate::embedder::cosine_similarity;
use crate::memory::MemoryFile;
use crate::store::Storage;

/// Lexical markers whose asymmetric presence signals divergent guidance
pub const DIVERGENCE_KEYWORDS: [&str; 14] = [
    "always",
    "never",
    "must not",
    "must",
    "enable",
    "disable",
    "prefer",
    "avoid",
    "don't",
    "do not",
    "required",
    "forbidden",
    "deprecated",
    "current",
];

/// Detects conflicts via embedding similarity and divergence
pub struct SemanticAnalyzer {
    storage: Arc<Storage>,
    config: SemanticConfig,
}

impl SemanticAnalyzer {
    pub fn new(storage: Arc<Storage>, config: SemanticConfig) -> Self {
        Self { storage, config }
    }

    /// Analyze the given memories (all active memories when `None`)
    pub fn analyze(
        &self,
        memory_ids: Option<&[String]>,
        cancel: &AtomicBool,
    ) -> Result<Vec<ConflictCandidate>> {
        let memories = self.get_memories(memory_ids)?;
        if memories.len() < 2 {
            return Ok(vec![]);
        }
        let embeddings = self.embeddings_for(&memories)?;

        let mut candidates = Vec::new();
        let mut pairs_checked = 0usize;
        'outer: for i in 0..memories.len() {
            for j in (i + 1)..memories.len() {
                if pairs_checked >= self.config.max_pairs_to_check
                    || cancel.load(Ordering::Relaxed)
                {
                    break 'outer;
                }
                pairs_checked += 1;

                let (m1, m2) = (&memories[i], &memories[j]);
                let (Some(e1), Some(e2)) = (embeddings.get(&m1.id), embeddings.get(&m2.id))
                else {
                    continue;
                };
                if let Some(candidate) = self.examine_pair(m1, m2, e1, e2) {
                    candidates.push(candidate);
                }
            }
        }

        sort_and_cap(&mut candidates, self.config.max_candidates);
        Ok(candidates)
    }

    /// Analyze a single memory against the rest of the corpus
    pub fn analyze_single(&self, memory_id: &str) -> Result<Vec<ConflictCandidate>> {
        let Some(target) = self.storage.get_memory(memory_id)? else {
            return Ok(vec![]);
        };
        let Some(target_vectors) = self.storage.get_embedding(memory_id)? else {
            return Ok(vec![]);
        };

        let memories = self.get_memories(None)?;
        let embeddings = self.embeddings_for(&memories)?;

        let mut candidates = Vec::new();
        for other in memories.iter().filter(|m| m.id != memory_id) {
            let Some(other_embedding) = embeddings.get(&other.id) else {
                continue;
            };
            if let Some(candidate) =
                self.examine_pair(&target, other, &target_vectors.composite, other_embedding)
            {
                candidates.push(candidate);
            }
        }

        sort_and_cap(&mut candidates, self.config.max_candidates);
        Ok(candidates)
    }

    fn examine_pair(
        &self,
        m1: &MemoryFile,
        m2: &MemoryFile,
        e1: &[f32],
        e2: &[f32],
    ) -> Option<ConflictCandidate> {
        let similarity = f64::from(cosine_similarity(e1, e2));
        if similarity < self.config.similarity_threshold {
            return None;
        }
        if similarity > self.config.high_similarity_threshold && m1.scope == m2.scope {
            return None;
        }

        let divergence = self.divergence(m1, m2);
        if divergence < self.config.divergence_threshold {
            return None;
        }

        Some(ConflictCandidate {
            memory_ids: (m1.id.clone(), m2.id.clone()),
            detection_method: DetectionMethod::SemanticSimilarity,
            raw_score: similarity * divergence,
            evidence: json!({
                "similarity": round4(similarity),
                "divergence": round4(divergence),
                "divergence_signals": self.divergence_signals(m1, m2),
                "scope_match": m1.scope == m2.scope,
            }),
        })
    }

    /// Divergence: asymmetry of opposing-marker counts, plus penalties for
    /// scope mismatch and priority gap, capped at 1.0
    fn divergence(&self, m1: &MemoryFile, m2: &MemoryFile) -> f64 {
        let text1 = format!("{} {}", m1.title, m1.body).to_lowercase();
        let text2 = format!("{} {}", m2.title, m2.body).to_lowercase();

        let count1 = DIVERGENCE_KEYWORDS.iter().filter(|k| text1.contains(*k)).count() as f64;
        let count2 = DIVERGENCE_KEYWORDS.iter().filter(|k| text2.contains(*k)).count() as f64;

        let asymmetry = if count1.max(count2) == 0.0 {
            0.0
        } else {
            (count1 - count2).abs() / (count1.max(count2) + 1.0)
        };
        let scope_penalty = if m1.scope != m2.scope { 0.2 } else { 0.0 };
        let priority_penalty = (m1.priority - m2.priority).abs() * 0.1;

        (asymmetry + scope_penalty + priority_penalty).min(1.0)
    }

    fn divergence_signals(&self, m1: &MemoryFile, m2: &MemoryFile) -> Vec<String> {
        let text1 = format!("{} {}", m1.title, m1.body).to_lowercase();
        let text2 = format!("{} {}", m2.title, m2.body).to_lowercase();

        let mut only_in_1: Vec<&str> = Vec::new();
        let mut only_in_2: Vec<&str> = Vec::new();
        for keyword in DIVERGENCE_KEYWORDS {
            match (text1.contains(keyword), text2.contains(keyword)) {
                (true, false) => only_in_1.push(keyword),
                (false, true) => only_in_2.push(keyword),
                _ => {}
            }
        }

        let mut signals = Vec::new();
        if !only_in_1.is_empty() {
            signals.push(format!("Memory 1 contains: {}", only_in_1.join(", ")));
        }
        if !only_in_2.is_empty() {
            signals.push(format!("Memory 2 contains: {}", only_in_2.join(", ")));
        }
        if m1.scope != m2.scope {
            signals.push(format!("Different scopes: {} vs {}", m1.scope, m2.scope));
        }
        if (m1.priority - m2.priority).abs() > 0.3 {
            signals.push(format!(
                "Priority difference: {} vs {}",
                m1.priority, m2.priority
            ));
        }
        signals
    }

    fn get_memories(&self, memory_ids: Option<&[String]>) -> Result<Vec<MemoryFile>> {
        match memory_ids {
            Some(ids) => {
                let mut memories = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(memory) = self.storage.get_memory(id)? {
                        memories.push(memory);
                    }
                }
                Ok(memories)
            }
            None => Ok(self.storage.get_all_memories(true)?),
        }
    }

    fn embeddings_for(
        &self,
        memories: &[MemoryFile],
    ) -> Result<HashMap<String, Vec<f32>>> {
        let all = self.storage.all_composite_embeddings(true)?;
        let wanted: std::collections::HashSet<&str> =
            memories.iter().map(|m| m.id.as_str()).collect();
        Ok(all
            .into_iter()
            .filter(|(id, _)| wanted.contains(id.as_str()))
            .collect())
    }
}

fn sort_and_cap(candidates: &mut Vec<ConflictCandidate>, cap: usize) {
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.pair_key().cmp(&b.pair_key()))
    });
    candidates.truncate(cap);
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::{Embedder, HashEmbedder};
    use crate::memory::{Confidence, Scope, Status};
    use tempfile::TempDir;

    const DIMS: usize = 64;

    fn setup() -> (SemanticAnalyzer, Arc<Storage>, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(Some(dir.path().join("t.db")), DIMS).unwrap());
        let analyzer = SemanticAnalyzer::new(Arc::clone(&storage), SemanticConfig::default());
        (analyzer, storage, dir)
    }

    fn insert(storage: &Storage, id: &str, scope: Scope, priority: f64, body: &str) {
        let memory = MemoryFile {
            id: id.to_string(),
            path: format!("{}/{id}.md", scope.as_str()),
            title: format!("Guidance {id}"),
            body: body.to_string(),
            token_count: 60,
            tags: vec!["retry".to_string(), "policy".to_string()],
            scope,
            priority,
            confidence: Confidence::Active,
            status: Status::Active,
            created: None,
            last_used: None,
            expires: None,
            usage_count: 0,
            supersedes: vec![],
            related: vec![],
            file_hash: "0".repeat(64),
        };
        let embedder = HashEmbedder::with_dimensions(DIMS);
        let vectors = embedder.embed_memory(&memory).unwrap();
        storage.upsert_memory(&memory, &vectors, "test").unwrap();
    }

    #[test]
    fn test_similar_but_divergent_pair_is_flagged() {
        let (analyzer, storage, _dir) = setup();
        let shared = "retry policy for the payment gateway request pipeline timeout handling";
        insert(
            &storage,
            "mem_a",
            Scope::Project,
            0.9,
            &format!("You must always retry failed calls. {shared} {shared}"),
        );
        insert(
            &storage,
            "mem_b",
            Scope::Global,
            0.2,
            &format!("{shared} {shared}"),
        );

        let cancel = AtomicBool::new(false);
        let candidates = analyzer.analyze(None, &cancel).unwrap();
        assert_eq!(candidates.len(), 1, "{candidates:?}");
        let candidate = &candidates[0];
        assert_eq!(candidate.detection_method, DetectionMethod::SemanticSimilarity);
        assert!(candidate.raw_score > 0.0);
        assert!(candidate.evidence["divergence"].as_f64().unwrap() >= 0.15);
    }

    #[test]
    fn test_unrelated_memories_not_flagged() {
        let (analyzer, storage, _dir) = setup();
        insert(
            &storage,
            "mem_a",
            Scope::Project,
            0.5,
            "You must always retry failed payment calls with exponential backoff.",
        );
        insert(
            &storage,
            "mem_b",
            Scope::Project,
            0.5,
            "The design system uses an indigo palette for primary buttons.",
        );

        let cancel = AtomicBool::new(false);
        let candidates = analyzer.analyze(None, &cancel).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_same_scope_near_duplicates_skipped() {
        let (analyzer, storage, _dir) = setup();
        let body = "You must always retry failed payment calls with exponential backoff.";
        insert(&storage, "mem_a", Scope::Project, 0.5, body);
        insert(&storage, "mem_b", Scope::Project, 0.5, body);

        let cancel = AtomicBool::new(false);
        let candidates = analyzer.analyze(None, &cancel).unwrap();
        // identical same-scope content is a duplicate concern, not a conflict
        assert!(candidates.is_empty(), "{candidates:?}");
    }

    #[test]
    fn test_cancellation_stops_pair_iteration() {
        let (analyzer, storage, _dir) = setup();
        for i in 0..5 {
            insert(
                &storage,
                &format!("mem_{i}"),
                Scope::Project,
                0.5,
                "Shared retry policy text for all of these memories here.",
            );
        }
        let cancel = AtomicBool::new(true);
        let candidates = analyzer.analyze(None, &cancel).unwrap();
        assert!(candidates.is_empty());
    }
}
