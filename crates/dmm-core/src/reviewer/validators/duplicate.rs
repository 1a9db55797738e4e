//! Duplicate detector
//!
//! Embeds the proposed content's composite text and compares it against the
//! composite embeddings of all indexed memories. A match at or above the hard
//! threshold is a reject; the near-duplicate band defers with the match list
//! attached so a human can decide.

use std::sync::Arc;

use crate::config::ReviewConfig;
use crate::embedder::{cosine_similarity, Embedder};
use crate::parser::{extract_title, frontmatter};
use crate::reviewer::ValidationIssue;
use crate::store::{Storage, StoreError};

/// An existing memory similar to the proposed content
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DuplicateMatch {
    pub memory_id: String,
    pub path: String,
    pub title: String,
    pub similarity: f64,
}

/// Detects near- and hard-duplicates of proposed content
pub struct DuplicateDetector {
    storage: Arc<Storage>,
    embedder: Arc<dyn Embedder>,
    hard_threshold: f64,
    near_threshold: f64,
}

impl DuplicateDetector {
    pub fn new(storage: Arc<Storage>, embedder: Arc<dyn Embedder>, config: &ReviewConfig) -> Self {
        Self {
            storage,
            embedder,
            hard_threshold: config.hard_duplicate_threshold,
            near_threshold: config.near_duplicate_threshold,
        }
    }

    /// Check proposed content against the corpus.
    ///
    /// `exclude_id` skips the memory being updated so an UPDATE does not
    /// collide with itself.
    pub fn check(
        &self,
        content: &str,
        exclude_id: Option<&str>,
    ) -> Result<(Vec<ValidationIssue>, Vec<DuplicateMatch>), StoreError> {
        let Ok((_, body)) = frontmatter::split(content) else {
            // schema validation reports the malformed frontmatter
            return Ok((vec![], vec![]));
        };

        let title = extract_title(body).unwrap_or_default();
        let composite_text = format!("{title}\n{body}");
        let proposed = match self.embedder.embed(&composite_text) {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!("duplicate check skipped, embedding failed: {e}");
                return Ok((vec![], vec![]));
            }
        };

        let mut matches: Vec<DuplicateMatch> = Vec::new();
        for (id, embedding) in self.storage.all_composite_embeddings(true)? {
            if exclude_id == Some(id.as_str()) {
                continue;
            }
            let similarity = f64::from(cosine_similarity(&proposed, &embedding));
            if similarity >= self.near_threshold {
                if let Some(memory) = self.storage.get_memory(&id)? {
                    matches.push(DuplicateMatch {
                        memory_id: memory.id,
                        path: memory.path,
                        title: memory.title,
                        similarity,
                    });
                }
            }
        }
        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut issues = Vec::new();
        if let Some(best) = matches.first() {
            if best.similarity >= self.hard_threshold {
                issues.push(ValidationIssue::error(
                    "hard_duplicate",
                    format!(
                        "Content duplicates '{}' ({}) at similarity {:.3}",
                        best.title, best.memory_id, best.similarity
                    ),
                    "content",
                ));
            } else {
                issues.push(ValidationIssue::warning(
                    "near_duplicate",
                    format!(
                        "Content is close to '{}' ({}) at similarity {:.3}",
                        best.title, best.memory_id, best.similarity
                    ),
                    "content",
                ));
            }
        }

        Ok((issues, matches))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::HashEmbedder;
    use crate::memory::{Confidence, MemoryFile, Scope, Status};
    use tempfile::TempDir;

    const DIMS: usize = 64;

    fn setup() -> (DuplicateDetector, Arc<Storage>, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(Some(dir.path().join("t.db")), DIMS).unwrap());
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::with_dimensions(DIMS));
        let detector = DuplicateDetector::new(
            Arc::clone(&storage),
            Arc::clone(&embedder),
            &ReviewConfig::default(),
        );
        (detector, storage, dir)
    }

    fn insert(storage: &Storage, id: &str, title: &str, body: &str) {
        let memory = MemoryFile {
            id: id.to_string(),
            path: format!("project/{id}.md"),
            title: title.to_string(),
            body: body.to_string(),
            token_count: 50,
            tags: vec!["test".to_string()],
            scope: Scope::Project,
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

    fn proposed(title: &str, body: &str) -> String {
        format!(
            "---\nid: mem_new\ntags: [test]\nscope: project\npriority: 0.5\nconfidence: active\nstatus: active\n---\n\n# {title}\n\n{body}\n"
        )
    }

    #[test]
    fn test_identical_body_is_hard_duplicate() {
        let (detector, storage, _dir) = setup();
        let body = "The deploy pipeline must never push directly to production.";
        insert(&storage, "mem_orig", "Deploy Rule", &format!("# Deploy Rule\n\n{body}"));

        let (issues, matches) = detector
            .check(&proposed("Deploy Rule", body), None)
            .unwrap();
        assert!(issues.iter().any(|i| i.code == "hard_duplicate"));
        assert_eq!(matches[0].memory_id, "mem_orig");
    }

    #[test]
    fn test_unrelated_content_passes() {
        let (detector, storage, _dir) = setup();
        insert(
            &storage,
            "mem_orig",
            "Deploy Rule",
            "# Deploy Rule\n\nThe deploy pipeline must never push directly to production.",
        );

        let (issues, matches) = detector
            .check(
                &proposed("Color Palette", "Buttons use the indigo palette from the design system."),
                None,
            )
            .unwrap();
        assert!(issues.is_empty(), "{issues:?}");
        assert!(matches.is_empty());
    }

    #[test]
    fn test_exclude_id_skips_self() {
        let (detector, storage, _dir) = setup();
        let body = "The deploy pipeline must never push directly to production.";
        insert(&storage, "mem_orig", "Deploy Rule", &format!("# Deploy Rule\n\n{body}"));

        let (issues, _) = detector
            .check(&proposed("Deploy Rule", body), Some("mem_orig"))
            .unwrap();
        assert!(issues.is_empty(), "{issues:?}");
    }
}
