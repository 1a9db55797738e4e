//! Conflict Detector
//!
//! Orchestrates the analyzers over the corpus (or a single memory), feeds
//! their candidates through the merger, and records a scan log row. One
//! failing analyzer never aborts a scan; its error lands in the record.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::config::ConflictsConfig;
use crate::store::Storage;

use super::analyzers::{SemanticAnalyzer, SupersessionAnalyzer, TagOverlapAnalyzer};
use super::merger::ConflictMerger;
use super::store::ConflictStore;
use super::types::{
    generate_scan_id, ConflictCandidate, DetectionMethod, Result, ScanRecord,
};

/// Default method set for scheduled scans
pub const DEFAULT_METHODS: [DetectionMethod; 3] = [
    DetectionMethod::TagOverlap,
    DetectionMethod::SemanticSimilarity,
    DetectionMethod::SupersessionChain,
];

/// Runs analyzers and persists merged conflicts
pub struct ConflictDetector {
    storage: Arc<Storage>,
    conflict_store: Arc<ConflictStore>,
    semantic: SemanticAnalyzer,
    tag_overlap: TagOverlapAnalyzer,
    supersession: SupersessionAnalyzer,
    merger: ConflictMerger,
    cancel: Arc<AtomicBool>,
}

impl ConflictDetector {
    pub fn new(
        storage: Arc<Storage>,
        conflict_store: Arc<ConflictStore>,
        config: &ConflictsConfig,
    ) -> Self {
        Self {
            semantic: SemanticAnalyzer::new(Arc::clone(&storage), config.semantic.clone()),
            tag_overlap: TagOverlapAnalyzer::new(Arc::clone(&storage), config.tag_overlap.clone()),
            supersession: SupersessionAnalyzer::new(
                Arc::clone(&storage),
                config.supersession.clone(),
            ),
            merger: ConflictMerger::new(Arc::clone(&conflict_store), &config.merger),
            storage,
            conflict_store,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cooperative cancellation flag, checked at pair-iteration boundaries
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn conflict_store(&self) -> &Arc<ConflictStore> {
        &self.conflict_store
    }

    /// Run a scan over the whole corpus (or `target_ids` when given)
    pub fn scan(
        &self,
        scan_type: &str,
        methods: &[DetectionMethod],
        target_ids: Option<&[String]>,
    ) -> Result<ScanRecord> {
        let start = Instant::now();
        let started_at = Utc::now();
        self.cancel.store(false, Ordering::Relaxed);

        let memories_scanned = match target_ids {
            Some(ids) => ids.len(),
            None => self.storage.get_all_memories(true)?.len(),
        };

        let mut candidates: Vec<ConflictCandidate> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        for method in methods {
            let outcome = match method {
                DetectionMethod::SemanticSimilarity => {
                    self.semantic.analyze(target_ids, &self.cancel)
                }
                DetectionMethod::TagOverlap => self.tag_overlap.analyze(target_ids, &self.cancel),
                DetectionMethod::SupersessionChain => self.supersession.analyze(target_ids),
                // methods without a shipped analyzer are skipped, not errors
                other => {
                    tracing::debug!("no analyzer for {other}, skipping");
                    Ok(vec![])
                }
            };
            match outcome {
                Ok(found) => candidates.extend(found),
                Err(e) => errors.push(format!("{method}: {e}")),
            }
        }

        self.finish_scan(
            scan_type,
            methods,
            candidates,
            memories_scanned,
            errors,
            started_at,
            start,
        )
    }

    /// Scan a single memory against the rest using each analyzer's
    /// single-memory variant (used after commits)
    pub fn scan_memory(&self, memory_id: &str, scan_type: &str) -> Result<ScanRecord> {
        let start = Instant::now();
        let started_at = Utc::now();

        let mut candidates: Vec<ConflictCandidate> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        for (method, outcome) in [
            (
                DetectionMethod::TagOverlap,
                self.tag_overlap.analyze_single(memory_id),
            ),
            (
                DetectionMethod::SemanticSimilarity,
                self.semantic.analyze_single(memory_id),
            ),
            (
                DetectionMethod::SupersessionChain,
                self.supersession.analyze_single(memory_id),
            ),
        ] {
            match outcome {
                Ok(found) => candidates.extend(found),
                Err(e) => errors.push(format!("{method}: {e}")),
            }
        }

        self.finish_scan(
            scan_type,
            &DEFAULT_METHODS,
            candidates,
            1,
            errors,
            started_at,
            start,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_scan(
        &self,
        scan_type: &str,
        methods: &[DetectionMethod],
        candidates: Vec<ConflictCandidate>,
        memories_scanned: usize,
        errors: Vec<String>,
        started_at: chrono::DateTime<Utc>,
        start: Instant,
    ) -> Result<ScanRecord> {
        let scan_id = generate_scan_id();
        let storage = Arc::clone(&self.storage);
        let lookup = move |id: &str| storage.get_memory(id).ok().flatten();
        let merge = self
            .merger
            .merge_and_persist(candidates, &lookup, &scan_id)?;

        let record = ScanRecord {
            scan_id,
            scan_type: scan_type.to_string(),
            started_at,
            completed_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
            memories_scanned,
            methods_used: methods.to_vec(),
            conflicts_detected: merge.new_conflicts + merge.existing_conflicts,
            conflicts_new: merge.new_conflicts,
            conflicts_existing: merge.existing_conflicts,
            errors,
        };
        self.conflict_store.record_scan(&record)?;
        tracing::info!(
            "{} scan {}: {} new, {} existing ({}ms)",
            record.scan_type,
            record.scan_id,
            record.conflicts_new,
            record.conflicts_existing,
            record.duration_ms
        );
        Ok(record)
    }
}

// ============================================================================
// TESTS
// ============================================================================
