//! Configuration
//!
//! Every component receives its knobs through these structs; there is no
//! process-wide config singleton. `Config::default()` matches the documented
//! contract defaults, so behavioral tests agree across hosts.

use serde::{Deserialize, Serialize};

/// Top-level configuration passed to [`crate::engine::Dmm::open`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub parser: ParserConfig,
    pub retrieval: RetrievalConfig,
    pub review: ReviewConfig,
    pub commit: CommitConfig,
    pub conflicts: ConflictsConfig,
}

/// Token-count bounds for parsing and quality checking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    /// Soft floor; below this is a warning
    pub soft_min_tokens: usize,
    /// Soft ceiling; above this is a warning
    pub soft_max_tokens: usize,
    /// Hard ceiling; above this is a schema error
    pub hard_max_tokens: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            soft_min_tokens: 300,
            soft_max_tokens: 800,
            hard_max_tokens: 1200,
        }
    }
}

/// Retrieval and pack-assembly knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Directories kept from the coarse ranking stage
    pub top_directories: usize,
    /// Content candidates fetched from the fine ranking stage
    pub content_candidates: usize,
    /// Weight of cosine similarity in the final score
    pub cosine_weight: f64,
    /// Weight of memory priority in the final score
    pub priority_weight: f64,
    /// Per-entry markdown rendering envelope, in tokens
    pub fence_overhead: usize,
    /// Default baseline reservation when the request does not set one
    pub default_baseline_budget: usize,
    /// Query-embedding LRU capacity
    pub query_cache_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_directories: 3,
            content_candidates: 20,
            cosine_weight: 0.7,
            priority_weight: 0.3,
            fence_overhead: 10,
            default_baseline_budget: 800,
            query_cache_size: 128,
        }
    }
}

/// Reviewer thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Confidence at or above which a clean proposal auto-approves
    pub auto_approve_threshold: f64,
    /// Composite similarity at or above which a duplicate is a hard reject
    pub hard_duplicate_threshold: f64,
    /// Composite similarity at or above which a duplicate defers
    pub near_duplicate_threshold: f64,
    /// Minimum length of a deprecation reason
    pub min_deprecation_reason_len: usize,
    /// Maximum title length accepted by the quality checker
    pub max_title_length: usize,
    /// Minimum body length (characters) accepted by the quality checker
    pub min_body_length: usize,
    /// Recommended tag count bounds
    pub min_tags: usize,
    pub max_tags: usize,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            auto_approve_threshold: 0.95,
            hard_duplicate_threshold: 0.95,
            near_duplicate_threshold: 0.85,
            min_deprecation_reason_len: 10,
            max_title_length: 80,
            min_body_length: 50,
            min_tags: 2,
            max_tags: 8,
        }
    }
}

/// Commit-engine knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    /// Take a byte-identical backup before mutating existing files
    pub backup_enabled: bool,
    /// Orphaned backups older than this are garbage-collected
    pub backup_max_age_hours: u64,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            backup_enabled: true,
            backup_max_age_hours: 24,
        }
    }
}

/// All conflict-engine knobs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConflictsConfig {
    pub semantic: SemanticConfig,
    pub tag_overlap: TagOverlapConfig,
    pub supersession: SupersessionConfig,
    pub merger: MergerConfig,
    pub scan: ScanConfig,
}

/// Semantic-similarity analyzer knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    /// Pairs below this cosine similarity are ignored
    pub similarity_threshold: f64,
    /// Divergence at or above this emits a candidate
    pub divergence_threshold: f64,
    /// Same-scope pairs above this similarity are near-duplicates, not
    /// conflicts, for this analyzer
    pub high_similarity_threshold: f64,
    /// Scan-time bound on pairwise comparisons
    pub max_pairs_to_check: usize,
    pub max_candidates: usize,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.80,
            divergence_threshold: 0.15,
            high_similarity_threshold: 0.95,
            max_pairs_to_check: 10_000,
            max_candidates: 100,
        }
    }
}

/// Tag-overlap analyzer knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TagOverlapConfig {
    /// Jaccard overlap at or above this emits a candidate
    pub jaccard_threshold: f64,
    /// Jaccard overlap at or above this marks the candidate high severity
    pub high_severity_threshold: f64,
    /// Body prefix length compared for distinctness
    pub prefix_len: usize,
    pub max_candidates: usize,
}

impl Default for TagOverlapConfig {
    fn default() -> Self {
        Self {
            jaccard_threshold: 0.70,
            high_severity_threshold: 0.90,
            prefix_len: 200,
            max_candidates: 100,
        }
    }
}

/// Supersession-chain analyzer knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupersessionConfig {
    pub orphan_score: f64,
    pub incomplete_score: f64,
    pub contested_score: f64,
    pub circular_score: f64,
    pub max_chain_depth: usize,
    pub max_candidates: usize,
}

impl Default for SupersessionConfig {
    fn default() -> Self {
        Self {
            orphan_score: 0.9,
            incomplete_score: 0.72,
            contested_score: 0.85,
            circular_score: 0.95,
            max_chain_depth: 10,
            max_candidates: 100,
        }
    }
}

/// Candidate-merging knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MergerConfig {
    /// Confidence boost per additional detection method
    pub multi_method_boost: f64,
    /// Cap on the total multi-method boost
    pub max_boost: f64,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            multi_method_boost: 0.1,
            max_boost: 0.25,
        }
    }
}

/// Scan scheduling knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub scan_at_startup: bool,
    pub periodic_enabled: bool,
    pub periodic_interval_hours: u64,
    pub incremental_on_commit: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            scan_at_startup: false,
            periodic_enabled: true,
            periodic_interval_hours: 24,
            incremental_on_commit: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_defaults() {
        let config = Config::default();
        assert_eq!(config.parser.hard_max_tokens, 1200);
        assert_eq!(config.retrieval.top_directories, 3);
        assert!((config.retrieval.cosine_weight - 0.7).abs() < f64::EPSILON);
        assert!((config.retrieval.priority_weight - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.retrieval.fence_overhead, 10);
        assert!((config.review.auto_approve_threshold - 0.95).abs() < f64::EPSILON);
        assert!((config.conflicts.semantic.similarity_threshold - 0.80).abs() < f64::EPSILON);
        assert_eq!(config.conflicts.scan.periodic_interval_hours, 24);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.retrieval.content_candidates, 20);
    }
}
