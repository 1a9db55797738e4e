//! Memory record types
//!
//! A memory is a markdown file under the memory root whose first path
//! segment names its scope folder. The parsed form carries the frontmatter
//! fields, the extracted title, the token count, and the file hash used for
//! change detection.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// SCOPE
// ============================================================================

/// Durability / trust level of a memory, carried by its first path segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Included in every pack assembly
    Baseline,
    /// Cross-project knowledge
    Global,
    /// Agent-specific knowledge
    Agent,
    /// Project-specific knowledge
    Project,
    /// Short-lived, should carry an expiry
    Ephemeral,
    /// Retired memories parked under `deprecated/`
    Deprecated,
}

impl Scope {
    /// Convert to the frontmatter string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Baseline => "baseline",
            Scope::Global => "global",
            Scope::Agent => "agent",
            Scope::Project => "project",
            Scope::Ephemeral => "ephemeral",
            Scope::Deprecated => "deprecated",
        }
    }

    /// Parse from a frontmatter string; `None` for unknown values
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "baseline" => Some(Scope::Baseline),
            "global" => Some(Scope::Global),
            "agent" => Some(Scope::Agent),
            "project" => Some(Scope::Project),
            "ephemeral" => Some(Scope::Ephemeral),
            "deprecated" => Some(Scope::Deprecated),
            _ => None,
        }
    }

    /// All valid scope folder names
    pub const ALL: [Scope; 6] = [
        Scope::Baseline,
        Scope::Global,
        Scope::Agent,
        Scope::Project,
        Scope::Ephemeral,
        Scope::Deprecated,
    ];
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Position of a scope in the promotion hierarchy.
///
/// `ephemeral < project < agent < global < baseline`. `Deprecated` has no
/// rank; a promotion involving it is never a plain demotion check.
pub fn scope_rank(scope: Scope) -> Option<u8> {
    match scope {
        Scope::Ephemeral => Some(0),
        Scope::Project => Some(1),
        Scope::Agent => Some(2),
        Scope::Global => Some(3),
        Scope::Baseline => Some(4),
        Scope::Deprecated => None,
    }
}

// ============================================================================
// CONFIDENCE / STATUS
// ============================================================================

/// How settled the knowledge in a memory is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Stable,
    Active,
    Tentative,
    Deprecated,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Confidence::Stable => "stable",
            Confidence::Active => "active",
            Confidence::Tentative => "tentative",
            Confidence::Deprecated => "deprecated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stable" => Some(Confidence::Stable),
            "active" => Some(Confidence::Active),
            "tentative" => Some(Confidence::Tentative),
            "deprecated" => Some(Confidence::Deprecated),
            _ => None,
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Active,
    Draft,
    Deprecated,
    Archived,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Active => "active",
            Status::Draft => "draft",
            Status::Deprecated => "deprecated",
            Status::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Status::Active),
            "draft" => Some(Status::Draft),
            "deprecated" => Some(Status::Deprecated),
            "archived" => Some(Status::Archived),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// MEMORY FILE
// ============================================================================

/// A parsed memory file
///
/// `path` is always relative to the memory root and uses `/` separators;
/// its first segment equals the scope folder (except under `deprecated/`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFile {
    /// Unique identifier from frontmatter (convention: `mem_<date>_<seq>`)
    pub id: String,
    /// Memory-root-relative path
    pub path: String,
    /// First H1 in the body, or a filename-derived fallback
    pub title: String,
    /// Markdown content after the frontmatter block
    pub body: String,
    /// Deterministic token count of the body (cl100k_base)
    pub token_count: usize,
    /// Free-form tags
    pub tags: Vec<String>,
    pub scope: Scope,
    /// Retrieval priority in [0.0, 1.0]
    pub priority: f64,
    pub confidence: Confidence,
    pub status: Status,
    pub created: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    /// Informational usage counter carried in frontmatter
    pub usage_count: i64,
    /// Ordered ids this memory replaces
    pub supersedes: Vec<String>,
    /// Sibling ids; not used by retrieval
    pub related: Vec<String>,
    /// SHA-256 of the raw file bytes, hex-encoded
    pub file_hash: String,
}

impl MemoryFile {
    /// Directory key used by the coarse search stage.
    ///
    /// `project/auth.md` -> `project`, `project/constraints/x.md` ->
    /// `project/constraints`, a bare filename -> `""`.
    pub fn directory(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[..idx],
            None => "",
        }
    }

    /// Whether the memory has expired at the given instant
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map(|t| t < now).unwrap_or(false)
    }

    /// Whether the memory or its confidence marks it deprecated
    pub fn is_deprecated(&self) -> bool {
        self.status == Status::Deprecated || self.confidence == Confidence::Deprecated
    }
}

// ============================================================================
// SEARCH FILTERS
// ============================================================================

/// Filters applied to content searches in the store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Allowed scopes; `None` means all
    pub scopes: Option<Vec<Scope>>,
    /// Drop entries with deprecated status or confidence
    pub exclude_deprecated: bool,
    /// Drop ephemeral-scope entries
    pub exclude_ephemeral: bool,
    /// Minimum priority, inclusive
    pub min_priority: Option<f64>,
    /// Keep entries whose `expires` is in the past
    pub include_expired: bool,
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            scopes: None,
            exclude_deprecated: true,
            exclude_ephemeral: false,
            min_priority: None,
            include_expired: false,
        }
    }
}

impl SearchFilters {
    /// Check a memory against the filters at the given instant
    pub fn matches(&self, memory: &MemoryFile, now: DateTime<Utc>) -> bool {
        if let Some(scopes) = &self.scopes {
            if !scopes.contains(&memory.scope) {
                return false;
            }
        }
        if self.exclude_deprecated && memory.is_deprecated() {
            return false;
        }
        if self.exclude_ephemeral && memory.scope == Scope::Ephemeral {
            return false;
        }
        if let Some(min) = self.min_priority {
            if memory.priority < min {
                return false;
            }
        }
        if !self.include_expired && memory.is_expired(now) {
            return false;
        }
        true
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Corpus-level statistics reported by the store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStats {
    pub total_memories: usize,
    pub total_tokens: usize,
    pub baseline_count: usize,
    /// Count per scope folder name
    pub by_scope: HashMap<String, usize>,
    /// Count per status name
    pub by_status: HashMap<String, usize>,
}

// ============================================================================
// TESTS
// ============================================================================
