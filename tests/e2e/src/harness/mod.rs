//! Test Workspace Harness
//!
//! Builds isolated DMM workspaces in temporary directories:
//! - a memory tree with scope folders
//! - the shared database
//! - an engine wired with the deterministic hash embedder
//!
//! Everything is deleted when the workspace is dropped.

use std::path::PathBuf;
use std::sync::Arc;

use dmm_core::{Config, Dmm, Embedder, HashEmbedder, TokenCounter};
use tempfile::TempDir;

/// Embedding dimension used across the e2e suite (small for fast scans)
pub const TEST_DIMS: usize = 64;

/// An isolated DMM workspace backed by a temp directory
pub struct TestWorkspace {
    pub dmm: Dmm,
    /// Kept alive so the tempdir outlives the engine
    _dir: TempDir,
}

impl TestWorkspace {
    /// Create a workspace with default configuration
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Create a workspace with custom configuration
    pub fn with_config(config: Config) -> Self {
        let dir = TempDir::new().expect("failed to create temp directory");
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::with_dimensions(TEST_DIMS));
        let dmm = Dmm::open_with_embedder(dir.path(), config, embedder)
            .expect("failed to open test engine");
        Self { dmm, _dir: dir }
    }

    /// Write a memory file under the memory root and return its full path
    pub fn write_memory_file(&self, rel_path: &str, content: &str) -> PathBuf {
        let path = self.dmm.memory_root().join(rel_path);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Write a memory file and reindex it into the store
    pub fn seed_memory(&self, rel_path: &str, content: &str) {
        self.write_memory_file(rel_path, content);
        let report = self.dmm.reindex().unwrap();
        assert!(
            report.errors.is_empty(),
            "seed reindex errors: {:?}",
            report.errors
        );
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

/// Build a full memory file (frontmatter + body)
pub fn memory_file(
    id: &str,
    scope: &str,
    priority: f64,
    tags: &[&str],
    title: &str,
    body: &str,
) -> String {
    let tag_list = tags.join(", ");
    format!(
        "---\nid: {id}\ntags: [{tag_list}]\nscope: {scope}\npriority: {priority}\nconfidence: active\nstatus: active\ncreated: 2026-01-10\n---\n\n# {title}\n\n{body}\n"
    )
}

/// Like [`memory_file`] but with a `supersedes` list
pub fn memory_file_superseding(
    id: &str,
    scope: &str,
    priority: f64,
    tags: &[&str],
    title: &str,
    body: &str,
    supersedes: &[&str],
) -> String {
    let tag_list = tags.join(", ");
    let supersedes_list = supersedes.join(", ");
    format!(
        "---\nid: {id}\ntags: [{tag_list}]\nscope: {scope}\npriority: {priority}\nconfidence: active\nstatus: active\nsupersedes: [{supersedes_list}]\n---\n\n# {title}\n\n{body}\n"
    )
}

/// Build a body about `topic` that is at least `min_tokens` long, measured
/// with the same tokenizer the parser uses.
///
/// The text is deliberately topic-heavy so two bodies about different topics
/// stay dissimilar under the bag-of-words hash embedder; a shared scaffold
/// sentence would make everything look like a near-duplicate.
pub fn body_about(topic: &str, min_tokens: usize) -> String {
    let counter = TokenCounter::new();
    let sentence =
        format!("{topic}: {topic} matters because {topic} keeps coming up. {topic} again. ");
    let mut body = String::new();
    while counter.count(&body) < min_tokens {
        body.push_str(&sentence);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_boots() {
        let workspace = TestWorkspace::new();
        assert!(workspace.dmm.memory_root().exists());
        assert_eq!(workspace.dmm.stats().unwrap().total_memories, 0);
    }

    #[test]
    fn test_body_about_reaches_target() {
        let counter = TokenCounter::new();
        let body = body_about("retry policies", 200);
        assert!(counter.count(&body) >= 200);
    }

    #[test]
    fn test_seed_memory_indexes() {
        let workspace = TestWorkspace::new();
        workspace.seed_memory(
            "project/auth.md",
            &memory_file(
                "mem_auth",
                "project",
                0.8,
                &["auth", "jwt"],
                "Auth Flow",
                &body_about("authentication", 100),
            ),
        );
        assert_eq!(workspace.dmm.stats().unwrap().total_memories, 1);
    }
}
