//! Supersession-chain analyzer
//!
//! The `supersedes` frontmatter field declares replacement relations; the
//! commit engine never follows them automatically, so they drift. This
//! analyzer walks the declared graph and reports:
//!
//! - **Orphaned**: an active memory supersedes a still-active one
//! - **Incomplete**: a deprecated memory supersedes a still-active one
//! - **Contested**: two or more active memories supersede the same target
//! - **Circular**: the chain loops within the configured depth

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::json;

use crate::config::SupersessionConfig;
use crate::conflicts::types::{ConflictCandidate, DetectionMethod, Result};
use crate::memory::{MemoryFile, Status};
use crate::store::Storage;

/// Detects inconsistencies in declared supersession chains
pub struct SupersessionAnalyzer {
    storage: Arc<Storage>,
    config: SupersessionConfig,
}

impl SupersessionAnalyzer {
    pub fn new(storage: Arc<Storage>, config: SupersessionConfig) -> Self {
        Self { storage, config }
    }

    /// Analyze the given memories (the whole corpus when `None`)
    pub fn analyze(&self, memory_ids: Option<&[String]>) -> Result<Vec<ConflictCandidate>> {
        let memories = self.get_memories(memory_ids)?;
        if memories.is_empty() {
            return Ok(vec![]);
        }

        let memory_map: HashMap<&str, &MemoryFile> =
            memories.iter().map(|m| (m.id.as_str(), m)).collect();
        let (supersedes_map, superseded_by) = build_graph(&memories);

        let mut candidates = Vec::new();
        candidates.extend(self.find_orphaned_and_incomplete(&memories, &memory_map));
        candidates.extend(self.find_contested(&superseded_by, &memory_map));
        candidates.extend(self.find_circular(&supersedes_map));

        dedup_sort_cap(&mut candidates, self.config.max_candidates);
        Ok(candidates)
    }

    /// Analyze chains involving a single memory
    pub fn analyze_single(&self, memory_id: &str) -> Result<Vec<ConflictCandidate>> {
        let Some(target) = self.storage.get_memory(memory_id)? else {
            return Ok(vec![]);
        };
        let memories = self.get_memories(None)?;
        let memory_map: HashMap<&str, &MemoryFile> =
            memories.iter().map(|m| (m.id.as_str(), m)).collect();
        let (supersedes_map, superseded_by) = build_graph(&memories);

        let mut candidates = Vec::new();

        // Outgoing edges of this memory
        for superseded_id in &target.supersedes {
            if let Some(other) = memory_map.get(superseded_id.as_str()) {
                if other.status == Status::Active {
                    candidates.push(self.chain_candidate(&target, other));
                }
            }
        }

        // Contested claims on this memory
        if let Some(claimants) = superseded_by.get(memory_id) {
            let active: Vec<&str> = claimants
                .iter()
                .filter(|id| {
                    memory_map
                        .get(id.as_str())
                        .is_some_and(|m| m.status == Status::Active)
                })
                .map(String::as_str)
                .collect();
            if active.len() > 1 {
                candidates.push(self.contested_candidate(memory_id, &active));
            }
        }

        // Cycles reachable from this memory
        if let Some(cycle) = self.find_cycle_from(memory_id, &supersedes_map) {
            candidates.push(self.circular_candidate(&cycle));
        }

        dedup_sort_cap(&mut candidates, self.config.max_candidates);
        Ok(candidates)
    }

    fn find_orphaned_and_incomplete(
        &self,
        memories: &[MemoryFile],
        memory_map: &HashMap<&str, &MemoryFile>,
    ) -> Vec<ConflictCandidate> {
        let mut candidates = Vec::new();
        for memory in memories {
            for superseded_id in &memory.supersedes {
                let Some(target) = memory_map.get(superseded_id.as_str()) else {
                    // dangling supersedes: permitted, nothing to pair against
                    continue;
                };
                if target.status != Status::Active {
                    continue;
                }
                candidates.push(self.chain_candidate(memory, target));
            }
        }
        candidates
    }

    fn chain_candidate(&self, from: &MemoryFile, target: &MemoryFile) -> ConflictCandidate {
        let (issue_type, score) = if from.status == Status::Deprecated {
            ("incomplete", self.config.incomplete_score)
        } else {
            ("orphaned", self.config.orphan_score)
        };
        ConflictCandidate {
            memory_ids: (from.id.clone(), target.id.clone()),
            detection_method: DetectionMethod::SupersessionChain,
            raw_score: score,
            evidence: json!({
                "issue_type": issue_type,
                "description": format!(
                    "{} claims to supersede {}, but {} is still active",
                    from.id, target.id, target.id
                ),
                "superseding_memory": from.id,
                "superseded_memory": target.id,
            }),
        }
    }

    fn find_contested(
        &self,
        superseded_by: &HashMap<String, Vec<String>>,
        memory_map: &HashMap<&str, &MemoryFile>,
    ) -> Vec<ConflictCandidate> {
        let mut candidates = Vec::new();
        let mut targets: Vec<&String> = superseded_by.keys().collect();
        targets.sort();
        for target_id in targets {
            let mut active: Vec<&str> = superseded_by[target_id]
                .iter()
                .filter(|id| {
                    memory_map
                        .get(id.as_str())
                        .is_some_and(|m| m.status == Status::Active)
                })
                .map(String::as_str)
                .collect();
            active.sort_unstable();
            if active.len() > 1 {
                candidates.push(self.contested_candidate(target_id, &active));
            }
        }
        candidates
    }

    fn contested_candidate(&self, target_id: &str, competitors: &[&str]) -> ConflictCandidate {
        ConflictCandidate {
            memory_ids: (competitors[0].to_string(), competitors[1].to_string()),
            detection_method: DetectionMethod::SupersessionChain,
            raw_score: self.config.contested_score,
            evidence: json!({
                "issue_type": "contested",
                "description": format!(
                    "Multiple memories ({}) claim to supersede {target_id}",
                    competitors.join(", ")
                ),
                "contested_target": target_id,
                "competing_memories": competitors,
            }),
        }
    }

    fn find_circular(
        &self,
        supersedes_map: &HashMap<String, Vec<String>>,
    ) -> Vec<ConflictCandidate> {
        let mut candidates = Vec::new();
        let mut reported: HashSet<String> = HashSet::new();
        let mut starts: Vec<&String> = supersedes_map.keys().collect();
        starts.sort();
        for start in starts {
            if let Some(cycle) = self.find_cycle_from(start, supersedes_map) {
                let candidate = self.circular_candidate(&cycle);
                if reported.insert(candidate.pair_key()) {
                    candidates.push(candidate);
                }
            }
        }
        candidates
    }

    fn circular_candidate(&self, cycle: &[String]) -> ConflictCandidate {
        let second = cycle.get(1).unwrap_or(&cycle[0]);
        ConflictCandidate {
            memory_ids: (cycle[0].clone(), second.clone()),
            detection_method: DetectionMethod::SupersessionChain,
            raw_score: self.config.circular_score,
            evidence: json!({
                "issue_type": "circular",
                "description": format!("Circular supersession detected: {}", cycle.join(" -> ")),
                "cycle": cycle,
            }),
        }
    }

    /// Depth-bounded walk from `start`; returns the path when it loops back
    fn find_cycle_from(
        &self,
        start: &str,
        supersedes_map: &HashMap<String, Vec<String>>,
    ) -> Option<Vec<String>> {
        let mut path = vec![start.to_string()];
        let mut current = start.to_string();
        for _ in 0..self.config.max_chain_depth {
            let next = supersedes_map.get(&current)?.first()?.clone();
            if next == start {
                return Some(path);
            }
            if path.contains(&next) {
                return None; // inner loop not through start; reported from its own start
            }
            path.push(next.clone());
            current = next;
        }
        None
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
            None => Ok(self.storage.get_all_memories(false)?),
        }
    }
}

fn build_graph(
    memories: &[MemoryFile],
) -> (HashMap<String, Vec<String>>, HashMap<String, Vec<String>>) {
    let mut supersedes_map: HashMap<String, Vec<String>> = HashMap::new();
    let mut superseded_by: HashMap<String, Vec<String>> = HashMap::new();
    for memory in memories {
        if memory.supersedes.is_empty() {
            continue;
        }
        supersedes_map.insert(memory.id.clone(), memory.supersedes.clone());
        for target in &memory.supersedes {
            superseded_by
                .entry(target.clone())
                .or_default()
                .push(memory.id.clone());
        }
    }
    (supersedes_map, superseded_by)
}

fn dedup_sort_cap(candidates: &mut Vec<ConflictCandidate>, cap: usize) {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    candidates.retain(|c| {
        let issue = c.evidence["issue_type"].as_str().unwrap_or("").to_string();
        seen.insert((c.pair_key(), issue))
    });
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.pair_key().cmp(&b.pair_key()))
    });
    candidates.truncate(cap);
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflicts::types::make_pair_key;
    use crate::embedder::{Embedder, HashEmbedder};
    use crate::memory::{Confidence, Scope};
    use tempfile::TempDir;

    const DIMS: usize = 16;

    fn setup() -> (SupersessionAnalyzer, Arc<Storage>, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(Some(dir.path().join("t.db")), DIMS).unwrap());
        let analyzer =
            SupersessionAnalyzer::new(Arc::clone(&storage), SupersessionConfig::default());
        (analyzer, storage, dir)
    }

    fn insert(storage: &Storage, id: &str, status: Status, supersedes: &[&str]) {
        let memory = MemoryFile {
            id: id.to_string(),
            path: format!("project/{id}.md"),
            title: id.to_string(),
            body: format!("# {id}\n\nBody."),
            token_count: 20,
            tags: vec!["chain".to_string()],
            scope: Scope::Project,
            priority: 0.5,
            confidence: Confidence::Active,
            status,
            created: None,
            last_used: None,
            expires: None,
            usage_count: 0,
            supersedes: supersedes.iter().map(|s| s.to_string()).collect(),
            related: vec![],
            file_hash: "0".repeat(64),
        };
        let embedder = HashEmbedder::with_dimensions(DIMS);
        let vectors = embedder.embed_memory(&memory).unwrap();
        storage.upsert_memory(&memory, &vectors, "test").unwrap();
    }

    #[test]
    fn test_orphaned_supersession() {
        let (analyzer, storage, _dir) = setup();
        insert(&storage, "mem_b", Status::Active, &[]);
        insert(&storage, "mem_a", Status::Active, &["mem_b"]);

        let candidates = analyzer.analyze(None).unwrap();
        assert_eq!(candidates.len(), 1);
        let candidate = &candidates[0];
        assert_eq!(candidate.evidence["issue_type"], "orphaned");
        assert!((candidate.raw_score - 0.9).abs() < 1e-9);
        assert_eq!(candidate.detection_method, DetectionMethod::SupersessionChain);
    }

    #[test]
    fn test_incomplete_supersession() {
        let (analyzer, storage, _dir) = setup();
        insert(&storage, "mem_b", Status::Active, &[]);
        insert(&storage, "mem_a", Status::Deprecated, &["mem_b"]);

        let candidates = analyzer.analyze(None).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].evidence["issue_type"], "incomplete");
        assert!((candidates[0].raw_score - 0.72).abs() < 1e-9);
    }

    #[test]
    fn test_contested_supersession() {
        let (analyzer, storage, _dir) = setup();
        insert(&storage, "mem_target", Status::Active, &[]);
        insert(&storage, "mem_a", Status::Active, &["mem_target"]);
        insert(&storage, "mem_b", Status::Active, &["mem_target"]);

        let candidates = analyzer.analyze(None).unwrap();
        let contested: Vec<_> = candidates
            .iter()
            .filter(|c| c.evidence["issue_type"] == "contested")
            .collect();
        assert_eq!(contested.len(), 1);
        assert_eq!(
            make_pair_key(&contested[0].memory_ids.0, &contested[0].memory_ids.1),
            "mem_a|mem_b"
        );
    }

    #[test]
    fn test_circular_supersession() {
        let (analyzer, storage, _dir) = setup();
        insert(&storage, "mem_a", Status::Active, &["mem_b"]);
        insert(&storage, "mem_b", Status::Active, &["mem_c"]);
        insert(&storage, "mem_c", Status::Active, &["mem_a"]);

        let candidates = analyzer.analyze(None).unwrap();
        let circular: Vec<_> = candidates
            .iter()
            .filter(|c| c.evidence["issue_type"] == "circular")
            .collect();
        assert!(!circular.is_empty());
        assert!((circular[0].raw_score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_dangling_supersedes_ignored() {
        let (analyzer, storage, _dir) = setup();
        insert(&storage, "mem_a", Status::Active, &["mem_gone"]);

        let candidates = analyzer.analyze(None).unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_analyze_single_sees_own_edges() {
        let (analyzer, storage, _dir) = setup();
        insert(&storage, "mem_b", Status::Active, &[]);
        insert(&storage, "mem_a", Status::Active, &["mem_b"]);

        let candidates = analyzer.analyze_single("mem_a").unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].evidence["issue_type"], "orphaned");
    }
}
