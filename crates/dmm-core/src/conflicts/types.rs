//! Conflict record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::memory::MemoryFile;

// ============================================================================
// ENUMS
// ============================================================================

/// What kind of conflict two memories are in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Contradictory,
    Duplicate,
    Supersession,
    ScopeOverlap,
    Stale,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictType::Contradictory => "contradictory",
            ConflictType::Duplicate => "duplicate",
            ConflictType::Supersession => "supersession",
            ConflictType::ScopeOverlap => "scope_overlap",
            ConflictType::Stale => "stale",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "contradictory" => Some(ConflictType::Contradictory),
            "duplicate" => Some(ConflictType::Duplicate),
            "supersession" => Some(ConflictType::Supersession),
            "scope_overlap" => Some(ConflictType::ScopeOverlap),
            "stale" => Some(ConflictType::Stale),
            _ => None,
        }
    }
}

/// How a conflict was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    TagOverlap,
    SemanticSimilarity,
    SupersessionChain,
    /// LLM-backed rule extraction; recognized but no analyzer ships for it
    RuleExtraction,
    Manual,
    CoRetrieval,
}

impl DetectionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::TagOverlap => "tag_overlap",
            DetectionMethod::SemanticSimilarity => "semantic_similarity",
            DetectionMethod::SupersessionChain => "supersession_chain",
            DetectionMethod::RuleExtraction => "rule_extraction",
            DetectionMethod::Manual => "manual",
            DetectionMethod::CoRetrieval => "co_retrieval",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tag_overlap" => Some(DetectionMethod::TagOverlap),
            "semantic_similarity" => Some(DetectionMethod::SemanticSimilarity),
            "supersession_chain" => Some(DetectionMethod::SupersessionChain),
            "rule_extraction" => Some(DetectionMethod::RuleExtraction),
            "manual" => Some(DetectionMethod::Manual),
            "co_retrieval" => Some(DetectionMethod::CoRetrieval),
            _ => None,
        }
    }
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a persisted conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Unresolved,
    InProgress,
    Resolved,
    Dismissed,
}

impl ConflictStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStatus::Unresolved => "unresolved",
            ConflictStatus::InProgress => "in_progress",
            ConflictStatus::Resolved => "resolved",
            ConflictStatus::Dismissed => "dismissed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unresolved" => Some(ConflictStatus::Unresolved),
            "in_progress" => Some(ConflictStatus::InProgress),
            "resolved" => Some(ConflictStatus::Resolved),
            "dismissed" => Some(ConflictStatus::Dismissed),
            _ => None,
        }
    }
}

/// Which side of a conflict a memory is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryRole {
    Primary,
    Secondary,
}

// ============================================================================
// RECORDS
// ============================================================================

/// Denormalized snapshot of one conflict participant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictMemory {
    pub memory_id: String,
    pub path: String,
    pub title: String,
    /// First 200 characters of the body at detection time
    pub summary: String,
    pub scope: String,
    pub priority: f64,
    pub role: MemoryRole,
}

impl ConflictMemory {
    pub fn snapshot(memory: &MemoryFile, role: MemoryRole) -> Self {
        Self {
            memory_id: memory.id.clone(),
            path: memory.path.clone(),
            title: memory.title.clone(),
            summary: memory.body.chars().take(200).collect(),
            scope: memory.scope.as_str().to_string(),
            priority: memory.priority,
            role,
        }
    }
}

/// A persisted conflict between exactly two memories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub conflict_id: String,
    pub memories: Vec<ConflictMemory>,
    pub conflict_type: ConflictType,
    pub detection_method: DetectionMethod,
    pub confidence: f64,
    pub description: String,
    /// Structured per-method evidence
    pub evidence: serde_json::Value,
    pub status: ConflictStatus,
    pub detected_at: DateTime<Utc>,
    pub scan_id: String,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_action: Option<String>,
    pub resolution_target: Option<String>,
    pub resolution_reason: Option<String>,
    pub resolved_by: Option<String>,
}

impl Conflict {
    /// Dedup key: the unordered id pair, smaller id first
    pub fn pair_key(&self) -> String {
        let a = self.memories.first().map(|m| m.memory_id.as_str()).unwrap_or("");
        let b = self.memories.get(1).map(|m| m.memory_id.as_str()).unwrap_or("");
        make_pair_key(a, b)
    }

    pub fn is_resolved(&self) -> bool {
        matches!(
            self.status,
            ConflictStatus::Resolved | ConflictStatus::Dismissed
        )
    }
}

/// Canonical unordered pair key
pub fn make_pair_key(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}|{b}")
    } else {
        format!("{b}|{a}")
    }
}

/// Raw finding from one analyzer, before merging
#[derive(Debug, Clone)]
pub struct ConflictCandidate {
    pub memory_ids: (String, String),
    pub detection_method: DetectionMethod,
    /// [0, 1]
    pub raw_score: f64,
    pub evidence: serde_json::Value,
}

impl ConflictCandidate {
    pub fn pair_key(&self) -> String {
        make_pair_key(&self.memory_ids.0, &self.memory_ids.1)
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// How to resolve a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionAction {
    Deprecate,
    Merge,
    Clarify,
    Dismiss,
    Defer,
}

impl ResolutionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionAction::Deprecate => "deprecate",
            ResolutionAction::Merge => "merge",
            ResolutionAction::Clarify => "clarify",
            ResolutionAction::Dismiss => "dismiss",
            ResolutionAction::Defer => "defer",
        }
    }
}

/// A request to resolve a conflict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionRequest {
    pub conflict_id: String,
    pub action: ResolutionAction,
    /// Memory to deprecate (DEPRECATE)
    pub target_memory_id: Option<String>,
    /// Replacement content (MERGE)
    pub merged_content: Option<String>,
    /// Where the merged memory lands (MERGE)
    pub merged_target_path: Option<String>,
    /// Advisory clarification text (CLARIFY)
    pub clarification: Option<String>,
    /// Why the conflict is a false positive (DISMISS)
    pub dismiss_reason: Option<String>,
    pub reason: Option<String>,
    pub resolved_by: String,
}

impl ResolutionRequest {
    pub fn new(conflict_id: &str, action: ResolutionAction, resolved_by: &str) -> Self {
        Self {
            conflict_id: conflict_id.to_string(),
            action,
            target_memory_id: None,
            merged_content: None,
            merged_target_path: None,
            clarification: None,
            dismiss_reason: None,
            reason: None,
            resolved_by: resolved_by.to_string(),
        }
    }
}

/// Outcome of a resolution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub success: bool,
    pub conflict_id: String,
    pub action_taken: ResolutionAction,
    pub memories_modified: Vec<String>,
    pub memories_deprecated: Vec<String>,
    pub memories_created: Vec<String>,
    pub error: Option<String>,
}

impl ResolutionResult {
    pub fn failure(conflict_id: &str, action: ResolutionAction, error: impl Into<String>) -> Self {
        Self {
            success: false,
            conflict_id: conflict_id.to_string(),
            action_taken: action,
            memories_modified: vec![],
            memories_deprecated: vec![],
            memories_created: vec![],
            error: Some(error.into()),
        }
    }

    pub fn ok(conflict_id: &str, action: ResolutionAction) -> Self {
        Self {
            success: true,
            conflict_id: conflict_id.to_string(),
            action_taken: action,
            memories_modified: vec![],
            memories_deprecated: vec![],
            memories_created: vec![],
            error: None,
        }
    }
}

// ============================================================================
// SCANS
// ============================================================================

/// Persisted record of one conflict scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRecord {
    pub scan_id: String,
    /// `full`, `incremental`, `targeted`, or `startup`
    pub scan_type: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub memories_scanned: usize,
    pub methods_used: Vec<DetectionMethod>,
    pub conflicts_detected: usize,
    pub conflicts_new: usize,
    pub conflicts_existing: usize,
    pub errors: Vec<String>,
}

/// Generate a unique scan id
pub fn generate_scan_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("scan_{timestamp}_{}", &suffix[..8])
}

/// Generate a unique conflict id
pub fn generate_conflict_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("conflict_{timestamp}_{}", &suffix[..8])
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Conflict engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ConflictError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("conflict not found: {0}")]
    NotFound(String),
    #[error("resolution of {conflict_id} failed: {message}")]
    ResolutionFailed { conflict_id: String, message: String },
    #[error("scan failed: {0}")]
    Scan(String),
    #[error("initialization error: {0}")]
    Init(String),
}

pub type Result<T> = std::result::Result<T, ConflictError>;

// ============================================================================
// TESTS
// ============================================================================
