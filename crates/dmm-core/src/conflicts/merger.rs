//! Conflict candidate merger
//!
//! Groups candidates from all analyzers by unordered memory pair, combines
//! their evidence, computes the final confidence (best raw score plus a
//! capped boost per additional detection method), picks the conflict type,
//! and persists new conflicts after deduplicating against existing ones.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::config::MergerConfig;
use crate::memory::MemoryFile;

use super::store::ConflictStore;
use super::types::{
    generate_conflict_id, Conflict, ConflictCandidate, ConflictMemory, ConflictStatus,
    ConflictType, DetectionMethod, MemoryRole, Result,
};

/// Statistics from one merge pass
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MergeResult {
    pub total_candidates: usize,
    pub unique_pairs: usize,
    pub new_conflicts: usize,
    pub existing_conflicts: usize,
}

/// Merges candidates from multiple detection methods
pub struct ConflictMerger {
    store: Arc<ConflictStore>,
    multi_method_boost: f64,
    max_boost: f64,
}

impl ConflictMerger {
    pub fn new(store: Arc<ConflictStore>, config: &MergerConfig) -> Self {
        Self {
            store,
            multi_method_boost: config.multi_method_boost,
            max_boost: config.max_boost,
        }
    }

    /// Merge candidates and persist new conflicts. `memory_lookup` resolves
    /// ids to current memory records for the denormalized snapshots.
    pub fn merge_and_persist(
        &self,
        candidates: Vec<ConflictCandidate>,
        memory_lookup: &dyn Fn(&str) -> Option<MemoryFile>,
        scan_id: &str,
    ) -> Result<MergeResult> {
        if candidates.is_empty() {
            return Ok(MergeResult::default());
        }

        let total_candidates = candidates.len();
        // BTreeMap for a deterministic persist order
        let mut by_pair: BTreeMap<String, Vec<ConflictCandidate>> = BTreeMap::new();
        for candidate in candidates {
            by_pair.entry(candidate.pair_key()).or_default().push(candidate);
        }

        let mut result = MergeResult {
            total_candidates,
            unique_pairs: by_pair.len(),
            ..Default::default()
        };

        for (pair_key, pair_candidates) in by_pair {
            if self.store.exists_for_pair(&pair_key)? {
                result.existing_conflicts += 1;
                continue;
            }

            let (id_a, id_b) = pair_key
                .split_once('|')
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .unwrap_or_default();
            let (Some(m1), Some(m2)) = (memory_lookup(&id_a), memory_lookup(&id_b)) else {
                continue;
            };

            let conflict = self.build_conflict(&pair_candidates, &m1, &m2, scan_id);
            match self.store.create(&conflict) {
                Ok(()) => result.new_conflicts += 1,
                // a concurrent scan can win the insert race for the pair
                Err(e) => {
                    tracing::debug!("conflict insert for {pair_key} lost to existing: {e}");
                    result.existing_conflicts += 1;
                }
            }
        }

        Ok(result)
    }

    fn build_conflict(
        &self,
        candidates: &[ConflictCandidate],
        m1: &MemoryFile,
        m2: &MemoryFile,
        scan_id: &str,
    ) -> Conflict {
        let confidence = self.compute_confidence(candidates);
        let conflict_type = determine_type(candidates, m1, m2);
        let primary_method = primary_method(candidates);

        Conflict {
            conflict_id: generate_conflict_id(),
            memories: vec![
                ConflictMemory::snapshot(m1, MemoryRole::Primary),
                ConflictMemory::snapshot(m2, MemoryRole::Secondary),
            ],
            conflict_type,
            detection_method: primary_method,
            confidence,
            description: describe(m1, m2, candidates, conflict_type),
            evidence: combine_evidence(candidates),
            status: ConflictStatus::Unresolved,
            detected_at: Utc::now(),
            scan_id: scan_id.to_string(),
            resolved_at: None,
            resolution_action: None,
            resolution_target: None,
            resolution_reason: None,
            resolved_by: None,
        }
    }

    /// Best raw score plus a capped boost for each extra detection method
    fn compute_confidence(&self, candidates: &[ConflictCandidate]) -> f64 {
        let base = candidates
            .iter()
            .map(|c| c.raw_score)
            .fold(0.0_f64, f64::max);
        let methods: HashSet<DetectionMethod> =
            candidates.iter().map(|c| c.detection_method).collect();
        let boost = (self.multi_method_boost * (methods.len() as f64 - 1.0)).min(self.max_boost);
        (base + boost).clamp(0.0, 1.0)
    }
}

/// Signal priority: supersession issues, then hard-duplicate similarity, then
/// cross-scope tag overlap, else contradictory
fn determine_type(
    candidates: &[ConflictCandidate],
    m1: &MemoryFile,
    m2: &MemoryFile,
) -> ConflictType {
    for candidate in candidates {
        if candidate.detection_method == DetectionMethod::SupersessionChain {
            let issue = candidate.evidence["issue_type"].as_str().unwrap_or("");
            if matches!(issue, "orphaned" | "incomplete" | "circular" | "contested") {
                return ConflictType::Supersession;
            }
        }
        if candidate.detection_method == DetectionMethod::SemanticSimilarity
            && candidate.evidence["similarity"].as_f64().unwrap_or(0.0) > 0.95
        {
            return ConflictType::Duplicate;
        }
    }

    if m1.scope != m2.scope {
        let tags1: HashSet<&String> = m1.tags.iter().collect();
        let shared = m2.tags.iter().filter(|t| tags1.contains(t)).count();
        if shared >= 3 {
            return ConflictType::ScopeOverlap;
        }
    }
    ConflictType::Contradictory
}

fn primary_method(candidates: &[ConflictCandidate]) -> DetectionMethod {
    candidates
        .iter()
        .max_by(|a, b| {
            a.raw_score
                .partial_cmp(&b.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|c| c.detection_method)
        .unwrap_or(DetectionMethod::Manual)
}

fn combine_evidence(candidates: &[ConflictCandidate]) -> serde_json::Value {
    let mut methods = Vec::new();
    let mut scores = Vec::new();
    let mut details = serde_json::Map::new();
    for candidate in candidates {
        let method = candidate.detection_method.as_str();
        methods.push(method);
        scores.push(json!({
            "method": method,
            "score": (candidate.raw_score * 10_000.0).round() / 10_000.0,
        }));
        details.insert(method.to_string(), candidate.evidence.clone());
    }
    json!({ "methods": methods, "scores": scores, "details": details })
}

fn describe(
    m1: &MemoryFile,
    m2: &MemoryFile,
    candidates: &[ConflictCandidate],
    conflict_type: ConflictType,
) -> String {
    let base = match conflict_type {
        ConflictType::Contradictory => "contain contradictory information",
        ConflictType::Duplicate => "appear to be duplicates",
        ConflictType::Supersession => "have supersession relationship issues",
        ConflictType::ScopeOverlap => "cover the same topic in different scopes",
        ConflictType::Stale => "may have stale or outdated information",
    };
    let mut methods: Vec<&str> = candidates
        .iter()
        .map(|c| c.detection_method.as_str())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    methods.sort_unstable();
    format!(
        "Memories '{}' and '{}' {base}. Detected via: {}.",
        m1.title,
        m2.title,
        methods.join(", ")
    )
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Confidence, Scope, Status};
    use tempfile::TempDir;

    fn memory(id: &str, scope: Scope, tags: &[&str]) -> MemoryFile {
        MemoryFile {
            id: id.to_string(),
            path: format!("{}/{id}.md", scope.as_str()),
            title: format!("Title {id}"),
            body: format!("# Title {id}\n\nBody."),
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
        }
    }

    fn candidate(a: &str, b: &str, method: DetectionMethod, score: f64) -> ConflictCandidate {
        ConflictCandidate {
            memory_ids: (a.to_string(), b.to_string()),
            detection_method: method,
            raw_score: score,
            evidence: json!({"similarity": score}),
        }
    }

    fn merger() -> (ConflictMerger, Arc<ConflictStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ConflictStore::new(&dir.path().join("c.db")).unwrap());
        let merger = ConflictMerger::new(Arc::clone(&store), &MergerConfig::default());
        (merger, store, dir)
    }

    #[test]
    fn test_multi_method_boost_capped() {
        let (merger, _store, _dir) = merger();
        let candidates = vec![
            candidate("a", "b", DetectionMethod::SemanticSimilarity, 0.5),
            candidate("a", "b", DetectionMethod::TagOverlap, 0.4),
            candidate("a", "b", DetectionMethod::SupersessionChain, 0.3),
            candidate("a", "b", DetectionMethod::CoRetrieval, 0.2),
        ];
        // base 0.5 + boost min(0.1 * 3, 0.25) = 0.75
        assert!((merger.compute_confidence(&candidates) - 0.75).abs() < 1e-9);

        let single = vec![candidate("a", "b", DetectionMethod::TagOverlap, 0.9)];
        assert!((merger.compute_confidence(&single) - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_type_priority_supersession_wins() {
        let m1 = memory("a", Scope::Project, &["x", "y", "z"]);
        let m2 = memory("b", Scope::Global, &["x", "y", "z"]);
        let mut supersession = candidate("a", "b", DetectionMethod::SupersessionChain, 0.9);
        supersession.evidence = json!({"issue_type": "orphaned"});
        let candidates = vec![
            candidate("a", "b", DetectionMethod::SemanticSimilarity, 0.99),
            supersession,
        ];
        assert_eq!(determine_type(&candidates, &m1, &m2), ConflictType::Supersession);
    }

    #[test]
    fn test_type_duplicate_and_scope_overlap() {
        let m1 = memory("a", Scope::Project, &["x", "y", "z"]);
        let m2 = memory("b", Scope::Global, &["x", "y", "z"]);

        let high_sim = vec![candidate("a", "b", DetectionMethod::SemanticSimilarity, 0.99)];
        assert_eq!(determine_type(&high_sim, &m1, &m2), ConflictType::Duplicate);

        let tag_only = vec![candidate("a", "b", DetectionMethod::TagOverlap, 0.8)];
        assert_eq!(determine_type(&tag_only, &m1, &m2), ConflictType::ScopeOverlap);

        let same_scope = memory("b", Scope::Project, &["x"]);
        let weak = vec![candidate("a", "b", DetectionMethod::TagOverlap, 0.8)];
        assert_eq!(
            determine_type(&weak, &m1, &same_scope),
            ConflictType::Contradictory
        );
    }

    #[test]
    fn test_merge_persists_and_dedups() {
        let (merger, store, _dir) = merger();
        let m1 = memory("mem_a", Scope::Project, &["x", "y"]);
        let m2 = memory("mem_b", Scope::Global, &["x", "y"]);
        let lookup = move |id: &str| -> Option<MemoryFile> {
            match id {
                "mem_a" => Some(m1.clone()),
                "mem_b" => Some(m2.clone()),
                _ => None,
            }
        };

        let result = merger
            .merge_and_persist(
                vec![
                    candidate("mem_a", "mem_b", DetectionMethod::SemanticSimilarity, 0.6),
                    candidate("mem_b", "mem_a", DetectionMethod::TagOverlap, 0.8),
                ],
                &lookup,
                "scan_1",
            )
            .unwrap();
        assert_eq!(result.unique_pairs, 1);
        assert_eq!(result.new_conflicts, 1);

        // second scan finds the same pair: counted as existing, not re-created
        let result = merger
            .merge_and_persist(
                vec![candidate("mem_a", "mem_b", DetectionMethod::SemanticSimilarity, 0.6)],
                &lookup,
                "scan_2",
            )
            .unwrap();
        assert_eq!(result.new_conflicts, 0);
        assert_eq!(result.existing_conflicts, 1);
        assert!(store.exists_for_pair("mem_a|mem_b").unwrap());
    }

    #[test]
    fn test_combined_evidence_keeps_per_method_details() {
        let (merger, store, _dir) = merger();
        let m1 = memory("mem_a", Scope::Project, &["x"]);
        let m2 = memory("mem_b", Scope::Global, &["x"]);
        let lookup = move |id: &str| -> Option<MemoryFile> {
            match id {
                "mem_a" => Some(m1.clone()),
                "mem_b" => Some(m2.clone()),
                _ => None,
            }
        };
        merger
            .merge_and_persist(
                vec![
                    candidate("mem_a", "mem_b", DetectionMethod::SemanticSimilarity, 0.6),
                    candidate("mem_a", "mem_b", DetectionMethod::TagOverlap, 0.75),
                ],
                &lookup,
                "scan_1",
            )
            .unwrap();

        let conflicts = store.list(None, 10).unwrap();
        assert_eq!(conflicts.len(), 1);
        let evidence = &conflicts[0].evidence;
        assert!(evidence["details"]["semantic_similarity"].is_object());
        assert!(evidence["details"]["tag_overlap"].is_object());
        assert_eq!(conflicts[0].detection_method, DetectionMethod::TagOverlap);
    }
}
