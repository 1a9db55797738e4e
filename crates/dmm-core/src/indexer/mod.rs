//! Indexer
//!
//! Orchestrates full and incremental reindexing: walks the memory tree,
//! diffs file hashes against the store, and drives parse -> embed -> upsert.
//! A single bad file never aborts a pass; its error lands in the report.
//!
//! The indexer also owns the version guard: if the embedder, tokenizer, or
//! schema version recorded in `system_meta` differs from the current one, the
//! next reindex is forced full (stored vectors from an older embedder are not
//! comparable with new query vectors).

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use walkdir::WalkDir;

use crate::embedder::Embedder;
use crate::parser::{hash_bytes, MemoryParser, ParseResult, TOKENIZER_VERSION};
use crate::store::{Storage, StoreError};

/// Meta keys consulted by the version guard
pub const META_SCHEMA_VERSION: &str = "schema_version";
pub const META_EMBEDDER_VERSION: &str = "embedder_version";
pub const META_TOKENIZER_VERSION: &str = "tokenizer_version";
pub const META_LAST_FULL_REINDEX: &str = "last_full_reindex_at";

/// Core schema version recorded alongside the migration level
const CORE_SCHEMA_VERSION: &str = "4";

// ============================================================================
// REPORT
// ============================================================================

/// One structured failure from a reindex pass
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IndexError {
    pub path: String,
    /// `parse`, `embed`, or `store`
    pub kind: String,
    pub message: String,
}

/// Outcome of a reindex pass
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ReindexReport {
    pub reindexed: usize,
    pub skipped_unchanged: usize,
    pub deleted: usize,
    pub errors: Vec<IndexError>,
    pub duration_ms: u64,
}

// ============================================================================
// INDEXER
// ============================================================================

/// Drives Parser -> Embedder -> Store
#[derive(Clone)]
pub struct Indexer {
    storage: Arc<Storage>,
    embedder: Arc<dyn Embedder>,
    parser: MemoryParser,
    memory_root: PathBuf,
}

impl Indexer {
    pub fn new(
        storage: Arc<Storage>,
        embedder: Arc<dyn Embedder>,
        parser: MemoryParser,
        memory_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            storage,
            embedder,
            parser,
            memory_root: memory_root.into(),
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn memory_root(&self) -> &Path {
        &self.memory_root
    }

    /// Check the recorded embedder/tokenizer/schema versions; on any
    /// mismatch, drop the index and run a full pass, then rewrite the keys.
    ///
    /// Returns the report of the forced pass, or `None` when versions match.
    pub fn ensure_versions(&self) -> Result<Option<ReindexReport>, StoreError> {
        let current = [
            (META_EMBEDDER_VERSION, self.embedder.version().to_string()),
            (META_TOKENIZER_VERSION, TOKENIZER_VERSION.to_string()),
            (META_SCHEMA_VERSION, CORE_SCHEMA_VERSION.to_string()),
        ];

        let mut stale = false;
        for (key, value) in &current {
            match self.storage.get_system_meta(key)? {
                Some(recorded) if &recorded == value => {}
                Some(recorded) => {
                    tracing::info!("{key} changed ({recorded} -> {value}), forcing full reindex");
                    stale = true;
                }
                None => stale = true,
            }
        }

        if !stale {
            return Ok(None);
        }

        self.storage.clear_all()?;
        let report = self.full_reindex()?;
        for (key, value) in &current {
            self.storage.set_system_meta(key, value)?;
        }
        Ok(Some(report))
    }

    /// Walk the memory tree, reindexing changed files and pruning entries
    /// whose files are gone. `deprecated/` is never walked.
    pub fn full_reindex(&self) -> Result<ReindexReport, StoreError> {
        let start = Instant::now();
        let mut report = ReindexReport::default();
        let mut seen: HashSet<String> = HashSet::new();

        for entry in WalkDir::new(&self.memory_root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.file_name().to_str() != Some("deprecated"))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    report.errors.push(IndexError {
                        path: e
                            .path()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default(),
                        kind: "walk".to_string(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            if !entry.file_type().is_file()
                || entry.path().extension().is_none_or(|ext| ext != "md")
            {
                continue;
            }

            let rel_path = self.relative_path(entry.path());
            seen.insert(rel_path.clone());

            match self.index_file_inner(entry.path(), &rel_path)? {
                IndexOutcome::Reindexed => report.reindexed += 1,
                IndexOutcome::Unchanged => report.skipped_unchanged += 1,
                IndexOutcome::Failed(error) => report.errors.push(error),
            }
        }

        // Prune entries whose files vanished from disk
        for path in self.storage.get_all_paths()? {
            if !seen.contains(&path) && self.storage.delete_memory_by_path(&path)? {
                report.deleted += 1;
            }
        }

        self.storage
            .set_system_meta(META_LAST_FULL_REINDEX, &Utc::now().to_rfc3339())?;

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            "full reindex: {} reindexed, {} unchanged, {} deleted, {} errors in {}ms",
            report.reindexed,
            report.skipped_unchanged,
            report.deleted,
            report.errors.len(),
            report.duration_ms
        );
        Ok(report)
    }

    /// Incrementally reindex a single file
    pub fn index_file(&self, path: &Path) -> Result<(), IndexError> {
        let rel_path = self.relative_path(path);
        match self.index_file_inner(path, &rel_path) {
            Ok(IndexOutcome::Reindexed | IndexOutcome::Unchanged) => Ok(()),
            Ok(IndexOutcome::Failed(error)) => Err(error),
            Err(e) => Err(IndexError {
                path: rel_path,
                kind: "store".to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Remove a deleted file from the index
    pub fn remove_file(&self, rel_path: &str) -> Result<bool, StoreError> {
        self.storage.delete_memory_by_path(rel_path)
    }

    fn index_file_inner(
        &self,
        path: &Path,
        rel_path: &str,
    ) -> Result<IndexOutcome, StoreError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                return Ok(IndexOutcome::Failed(IndexError {
                    path: rel_path.to_string(),
                    kind: "parse".to_string(),
                    message: format!("failed to read file: {e}"),
                }));
            }
        };
        let hash = hash_bytes(&bytes);
        if self.storage.get_file_hash(rel_path)?.as_deref() == Some(hash.as_str()) {
            return Ok(IndexOutcome::Unchanged);
        }

        let result: ParseResult = self.parser.parse(path);
        for warning in &result.warnings {
            tracing::warn!("{warning}");
        }
        let memory = match (result.memory, result.error) {
            (Some(memory), None) => memory,
            (_, error) => {
                return Ok(IndexOutcome::Failed(IndexError {
                    path: rel_path.to_string(),
                    kind: "parse".to_string(),
                    message: error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "parser produced no memory".to_string()),
                }));
            }
        };

        let vectors = match self.embedder.embed_memory(&memory) {
            Ok(vectors) => vectors,
            Err(e) => {
                return Ok(IndexOutcome::Failed(IndexError {
                    path: rel_path.to_string(),
                    kind: "embed".to_string(),
                    message: e.to_string(),
                }));
            }
        };

        self.storage
            .upsert_memory(&memory, &vectors, self.embedder.version())?;
        Ok(IndexOutcome::Reindexed)
    }

    fn relative_path(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.memory_root).unwrap_or(path);
        rel.components()
            .filter_map(|c| match c {
                std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

enum IndexOutcome {
    Reindexed,
    Unchanged,
    Failed(IndexError),
}

// ============================================================================
// TESTS
// ============================================================================
