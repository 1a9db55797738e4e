//! Tag-overlap analyzer
//!
//! Two active memories in *different* scopes with near-identical tag sets are
//! likely describing the same topic at different trust levels. A pair is
//! flagged when Jaccard tag overlap crosses the threshold and the bodies are
//! not simply the same text (distinct 200-char prefixes).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::json;

use crate::config::TagOverlapConfig;
use crate::conflicts::types::{ConflictCandidate, DetectionMethod, Result};
use crate::memory::{MemoryFile, Status};
use crate::store::Storage;

/// Detects cross-scope pairs with near-identical tag sets
pub struct TagOverlapAnalyzer {
    storage: Arc<Storage>,
    config: TagOverlapConfig,
}

impl TagOverlapAnalyzer {
    pub fn new(storage: Arc<Storage>, config: TagOverlapConfig) -> Self {
        Self { storage, config }
    }

    /// Analyze the given memories (all active memories when `None`)
    pub fn analyze(
        &self,
        memory_ids: Option<&[String]>,
        cancel: &AtomicBool,
    ) -> Result<Vec<ConflictCandidate>> {
        let memories = self.get_memories(memory_ids)?;
        let mut candidates = Vec::new();

        'outer: for i in 0..memories.len() {
            for j in (i + 1)..memories.len() {
                if cancel.load(Ordering::Relaxed) {
                    break 'outer;
                }
                if let Some(candidate) = self.examine_pair(&memories[i], &memories[j]) {
                    candidates.push(candidate);
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.pair_key().cmp(&b.pair_key()))
        });
        candidates.truncate(self.config.max_candidates);
        Ok(candidates)
    }

    /// Analyze a single memory against the rest of the corpus
    pub fn analyze_single(&self, memory_id: &str) -> Result<Vec<ConflictCandidate>> {
        let Some(target) = self.storage.get_memory(memory_id)? else {
            return Ok(vec![]);
        };
        let memories = self.get_memories(None)?;
        let mut candidates: Vec<ConflictCandidate> = memories
            .iter()
            .filter(|m| m.id != memory_id)
            .filter_map(|other| self.examine_pair(&target, other))
            .collect();
        candidates.truncate(self.config.max_candidates);
        Ok(candidates)
    }

    fn examine_pair(&self, m1: &MemoryFile, m2: &MemoryFile) -> Option<ConflictCandidate> {
        if m1.scope == m2.scope {
            return None;
        }
        if m1.status != Status::Active || m2.status != Status::Active {
            return None;
        }

        let tags1: HashSet<String> = m1.tags.iter().map(|t| t.to_lowercase()).collect();
        let tags2: HashSet<String> = m2.tags.iter().map(|t| t.to_lowercase()).collect();
        if tags1.is_empty() || tags2.is_empty() {
            return None;
        }

        let intersection = tags1.intersection(&tags2).count() as f64;
        let union = tags1.union(&tags2).count() as f64;
        let jaccard = intersection / union;
        if jaccard < self.config.jaccard_threshold {
            return None;
        }

        // Same prefix means the file was copied between scopes; that is a
        // duplicate concern rather than a scope conflict
        let prefix1: String = m1.body.chars().take(self.config.prefix_len).collect();
        let prefix2: String = m2.body.chars().take(self.config.prefix_len).collect();
        if prefix1 == prefix2 {
            return None;
        }

        let severity = if jaccard >= self.config.high_severity_threshold {
            "high"
        } else {
            "medium"
        };
        let mut shared: Vec<String> = tags1.intersection(&tags2).cloned().collect();
        shared.sort();

        Some(ConflictCandidate {
            memory_ids: (m1.id.clone(), m2.id.clone()),
            detection_method: DetectionMethod::TagOverlap,
            raw_score: jaccard,
            evidence: json!({
                "jaccard": (jaccard * 10_000.0).round() / 10_000.0,
                "shared_tags": shared,
                "severity": severity,
                "scopes": [m1.scope.as_str(), m2.scope.as_str()],
            }),
        })
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
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::{Embedder, HashEmbedder};
    use crate::memory::{Confidence, Scope};
    use tempfile::TempDir;

    const DIMS: usize = 16;

    fn setup() -> (TagOverlapAnalyzer, Arc<Storage>, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(Some(dir.path().join("t.db")), DIMS).unwrap());
        let analyzer = TagOverlapAnalyzer::new(Arc::clone(&storage), TagOverlapConfig::default());
        (analyzer, storage, dir)
    }

    fn insert(storage: &Storage, id: &str, scope: Scope, tags: &[&str], body: &str) {
        let memory = MemoryFile {
            id: id.to_string(),
            path: format!("{}/{id}.md", scope.as_str()),
            title: id.to_string(),
            body: body.to_string(),
            token_count: 30,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            scope,
            priority: 0.5,
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
    fn test_cross_scope_overlap_flagged() {
        let (analyzer, storage, _dir) = setup();
        insert(
            &storage,
            "mem_a",
            Scope::Project,
            &["auth", "jwt", "tokens"],
            "Project-level auth guidance with its own wording.",
        );
        insert(
            &storage,
            "mem_b",
            Scope::Global,
            &["auth", "jwt", "tokens"],
            "Global auth guidance phrased differently from the project one.",
        );

        let cancel = AtomicBool::new(false);
        let candidates = analyzer.analyze(None, &cancel).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].evidence["severity"], "high");
        assert!(candidates[0].raw_score >= 0.9);
    }

    #[test]
    fn test_same_scope_not_flagged() {
        let (analyzer, storage, _dir) = setup();
        insert(&storage, "mem_a", Scope::Project, &["auth", "jwt"], "First body.");
        insert(&storage, "mem_b", Scope::Project, &["auth", "jwt"], "Second body.");

        let cancel = AtomicBool::new(false);
        assert!(analyzer.analyze(None, &cancel).unwrap().is_empty());
    }

    #[test]
    fn test_low_overlap_not_flagged() {
        let (analyzer, storage, _dir) = setup();
        insert(&storage, "mem_a", Scope::Project, &["auth", "jwt"], "First body.");
        insert(&storage, "mem_b", Scope::Global, &["auth", "styling"], "Second body.");

        let cancel = AtomicBool::new(false);
        assert!(analyzer.analyze(None, &cancel).unwrap().is_empty());
    }

    #[test]
    fn test_identical_prefix_skipped() {
        let (analyzer, storage, _dir) = setup();
        let body = "Exactly the same opening two hundred characters in both copies.";
        insert(&storage, "mem_a", Scope::Project, &["auth", "jwt"], body);
        insert(&storage, "mem_b", Scope::Global, &["auth", "jwt"], body);

        let cancel = AtomicBool::new(false);
        assert!(analyzer.analyze(None, &cancel).unwrap().is_empty());
    }
}
