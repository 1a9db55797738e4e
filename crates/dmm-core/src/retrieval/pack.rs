//! Memory pack structure and rendering
//!
//! The rendered markdown is the wire contract for the retrieval path:
//! consumers must see the `Baseline (Always Included)` and `Retrieved`
//! sections in that order, and may ignore trailing statistics lines.
//! Rendering is deterministic: same pack, same bytes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One entry included in a pack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackEntry {
    pub memory_id: String,
    pub path: String,
    pub title: String,
    pub body: String,
    pub token_count: usize,
    /// Final relevance score; `None` for baseline entries
    pub score: Option<f64>,
}

/// Token accounting for an assembled pack
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackStats {
    pub baseline_tokens: usize,
    pub retrieved_tokens: usize,
    pub total_tokens: usize,
    pub budget: usize,
    pub included: usize,
    pub excluded: usize,
}

/// An assembled, token-budgeted memory pack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPack {
    pub query: String,
    pub generated_at: DateTime<Utc>,
    /// Baseline entries in declared (priority) order
    pub baseline: Vec<PackEntry>,
    /// Retrieved entries in score order
    pub retrieved: Vec<PackEntry>,
    /// Paths of candidates that did not fit the budget
    pub excluded_paths: Vec<String>,
    pub stats: PackStats,
    /// Whether baseline tokens were reserved ahead of retrieval
    pub baseline_reserved: bool,
    /// Set when a deadline cut the budget fill short
    pub truncated: bool,
}

impl MemoryPack {
    /// Render the pack as markdown. Deterministic: identical packs render to
    /// identical bytes.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("# DMM Memory Pack\n");
        out.push_str(&format!(
            "_generated: {}_\n",
            self.generated_at.format("%Y-%m-%dT%H:%M:%SZ")
        ));
        out.push_str(&format!("_query: \"{}\"_\n\n", self.query));

        out.push_str("## Baseline (Always Included)\n\n");
        for entry in &self.baseline {
            out.push_str(&format!("### {}\n{}\n\n", entry.path, entry.body.trim_end()));
        }

        out.push_str("## Retrieved\n\n");
        for entry in &self.retrieved {
            match entry.score {
                Some(score) => out.push_str(&format!(
                    "### {}  (score: {:.2})\n{}\n\n",
                    entry.path,
                    score,
                    entry.body.trim_end()
                )),
                None => {
                    out.push_str(&format!("### {}\n{}\n\n", entry.path, entry.body.trim_end()))
                }
            }
        }

        out.push_str("## Pack Statistics\n");
        out.push_str(&format!("- baseline_tokens: {}\n", self.stats.baseline_tokens));
        out.push_str(&format!(
            "- retrieved_tokens: {}\n",
            self.stats.retrieved_tokens
        ));
        out.push_str(&format!("- total_tokens: {}\n", self.stats.total_tokens));
        out.push_str(&format!("- budget: {}\n", self.stats.budget));
        out.push_str(&format!(
            "- included: {}, excluded: {}\n",
            self.stats.included, self.stats.excluded
        ));
        if self.truncated {
            out.push_str("- truncated: true\n");
        }
        out
    }
}
