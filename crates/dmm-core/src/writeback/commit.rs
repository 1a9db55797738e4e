//! Commit Engine
//!
//! Atomic, all-or-nothing application of approved proposals. Either the
//! target filesystem state and the indexed store both reflect the proposal,
//! or neither does: every mutation of an existing file is preceded by a
//! byte-identical backup, files created by a failing commit are removed, and
//! the backup is restored on any failure. A failed rollback is the one fatal
//! condition and surfaces as [`CommitError`].
//!
//! The store upsert is the linearization point: the file lands first, the
//! single-transaction upsert second, and a failure between the two rolls the
//! file back.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::config::CommitConfig;
use crate::indexer::Indexer;
use crate::memory::{MemoryFile, Scope};
use crate::parser::frontmatter;
use crate::writeback::queue::{ProposalQueue, ProposalStatus, ProposalType, WriteProposal};

// ============================================================================
// ERROR / RESULT TYPES
// ============================================================================

/// Fatal commit failure: the mutation failed AND the rollback failed, so the
/// corpus may be in a degraded state. The supervisor must alert.
#[derive(Debug, Clone, thiserror::Error)]
#[error("commit failed at {path}: {message} (rollback_success: {rollback_success})")]
pub struct CommitError {
    pub proposal_id: Option<String>,
    pub path: String,
    pub message: String,
    pub rollback_success: bool,
}

/// Outcome of a commit attempt
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CommitResult {
    pub proposal_id: String,
    pub success: bool,
    pub memory_id: Option<String>,
    /// Final memory-root-relative path of the affected file
    pub memory_path: Option<String>,
    pub error: Option<String>,
    pub rollback_performed: bool,
    pub rollback_success: bool,
    pub commit_duration_ms: u64,
    pub reindex_duration_ms: u64,
}

impl CommitResult {
    fn failure(proposal_id: &str, error: impl Into<String>) -> Self {
        Self {
            proposal_id: proposal_id.to_string(),
            success: false,
            memory_id: None,
            memory_path: None,
            error: Some(error.into()),
            rollback_performed: false,
            rollback_success: false,
            commit_duration_ms: 0,
            reindex_duration_ms: 0,
        }
    }
}

/// What a type-specific mutation did, for reindexing and rollback
struct MutationOutcome {
    memory_id: Option<String>,
    /// Final memory-root-relative path
    memory_path: String,
    /// File to parse+embed+upsert after the mutation (None for DEPRECATE)
    reindex_target: Option<PathBuf>,
    /// Files this mutation created; removed on rollback
    created: Vec<PathBuf>,
}

// ============================================================================
// COMMIT ENGINE
// ============================================================================

/// Applies approved proposals to the memory tree and the store
pub struct CommitEngine {
    queue: Arc<ProposalQueue>,
    indexer: Indexer,
    memory_root: PathBuf,
    backup_dir: PathBuf,
    backup_enabled: bool,
}

impl CommitEngine {
    pub fn new(queue: Arc<ProposalQueue>, indexer: Indexer, config: &CommitConfig) -> Self {
        let memory_root = indexer.memory_root().to_path_buf();
        let backup_dir = memory_root
            .parent()
            .map(|p| p.join("backups"))
            .unwrap_or_else(|| memory_root.join("backups"));
        Self {
            queue,
            indexer,
            memory_root,
            backup_dir,
            backup_enabled: config.backup_enabled,
        }
    }

    /// Commit an APPROVED or MODIFIED proposal.
    ///
    /// Returns `Ok` with a failure result for recoverable errors (the
    /// proposal is put back to PENDING with `commit_error` set); returns
    /// `Err(CommitError)` only when the rollback itself failed.
    pub fn commit(&self, proposal: &WriteProposal) -> Result<CommitResult, CommitError> {
        if !matches!(
            proposal.status,
            ProposalStatus::Approved | ProposalStatus::Modified
        ) {
            return Ok(CommitResult::failure(
                &proposal.proposal_id,
                format!("cannot commit proposal with status '{}'", proposal.status),
            ));
        }

        let start = Instant::now();
        let target_path = self.memory_root.join(&proposal.target_path);

        // Backup point for mutations of existing files
        let backup_path = if proposal.proposal_type == ProposalType::Create {
            None
        } else if self.backup_enabled {
            match self.create_backup(&target_path) {
                Ok(backup) => backup,
                Err(e) => {
                    return self.fail(proposal, &target_path, None, &[], e);
                }
            }
        } else {
            None
        };

        // Type-specific mutation
        let outcome = match self.apply_mutation(proposal, &target_path) {
            Ok(outcome) => outcome,
            Err(e) => {
                return self.fail(proposal, &target_path, backup_path.as_deref(), &[], e);
            }
        };

        // Synchronous incremental reindex
        let reindex_start = Instant::now();
        let reindex_result = match (&outcome.reindex_target, &proposal.proposal_type) {
            (_, ProposalType::Deprecate) => {
                let memory_id = outcome
                    .memory_id
                    .as_deref()
                    .or(proposal.memory_id.as_deref());
                match memory_id {
                    Some(id) => self
                        .indexer
                        .storage()
                        .delete_memory(id)
                        .map(|_| ())
                        .map_err(|e| e.to_string()),
                    None => Err("deprecate proposal has no memory_id".to_string()),
                }
            }
            (Some(path), _) => self.indexer.index_file(path).map_err(|e| e.message),
            (None, _) => Ok(()),
        };
        if let Err(e) = reindex_result {
            return self.fail(
                proposal,
                &target_path,
                backup_path.as_deref(),
                &outcome.created,
                format!("reindex failed: {e}"),
            );
        }
        let reindex_duration_ms = reindex_start.elapsed().as_millis() as u64;

        // Success: terminal status, drop the backup
        if let Err(e) = self.queue.update_status(
            &proposal.proposal_id,
            ProposalStatus::Committed,
            Some("successfully committed"),
        ) {
            return self.fail(
                proposal,
                &target_path,
                backup_path.as_deref(),
                &outcome.created,
                format!("failed to mark proposal committed: {e}"),
            );
        }
        if let Some(backup) = &backup_path {
            let _ = std::fs::remove_file(backup);
        }

        tracing::info!(
            "committed {} ({}) at {}",
            proposal.proposal_id,
            proposal.proposal_type,
            outcome.memory_path
        );

        Ok(CommitResult {
            proposal_id: proposal.proposal_id.clone(),
            success: true,
            memory_id: outcome.memory_id,
            memory_path: Some(outcome.memory_path),
            error: None,
            rollback_performed: false,
            rollback_success: false,
            commit_duration_ms: start.elapsed().as_millis() as u64,
            reindex_duration_ms,
        })
    }

    /// Delete orphaned backups older than `max_age_hours`
    pub fn cleanup_old_backups(&self, max_age_hours: u64) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.backup_dir) else {
            return 0;
        };
        let cutoff = std::time::SystemTime::now()
            - std::time::Duration::from_secs(max_age_hours * 3600);
        let mut deleted = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_backup = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".md.bak"));
            if !is_backup {
                continue;
            }
            let old_enough = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|m| m < cutoff)
                .unwrap_or(false);
            if old_enough && std::fs::remove_file(&path).is_ok() {
                deleted += 1;
            }
        }
        deleted
    }

    // ========================================================================
    // DIRECT MUTATIONS (shared with the conflict resolver)
    // ========================================================================

    /// Deprecate a memory file directly: rewrite frontmatter, move it under
    /// `deprecated/`, and drop it from the store. Returns the new relative
    /// path.
    pub fn apply_deprecation(
        &self,
        memory: &MemoryFile,
        reason: &str,
    ) -> Result<String, CommitError> {
        let target_path = self.memory_root.join(&memory.path);
        let backup = self
            .create_backup(&target_path)
            .map_err(|e| self.direct_error(&memory.path, e, true))?;

        match self.deprecate_file(&target_path, reason) {
            Ok(new_rel) => {
                if let Err(e) = self.indexer.storage().delete_memory(&memory.id) {
                    let rollback_success = self.restore_backup(backup.as_deref(), &target_path, &[]);
                    return Err(CommitError {
                        proposal_id: None,
                        path: memory.path.clone(),
                        message: format!("store delete failed: {e}"),
                        rollback_success,
                    });
                }
                if let Some(backup) = backup {
                    let _ = std::fs::remove_file(backup);
                }
                Ok(new_rel)
            }
            Err(e) => {
                let rollback_success = self.restore_backup(backup.as_deref(), &target_path, &[]);
                Err(CommitError {
                    proposal_id: None,
                    path: memory.path.clone(),
                    message: e,
                    rollback_success,
                })
            }
        }
    }

    /// Create and index a memory file directly (merge resolutions). Returns
    /// the new memory's id.
    pub fn apply_create(&self, rel_path: &str, content: &str) -> Result<String, CommitError> {
        let target_path = self.memory_root.join(rel_path);
        if target_path.exists() {
            return Err(self.direct_error(
                rel_path,
                format!("file already exists: {rel_path}"),
                true,
            ));
        }
        if let Err(e) = write_file(&target_path, content) {
            return Err(self.direct_error(rel_path, e, true));
        }
        if let Err(e) = self.indexer.index_file(&target_path) {
            let rollback_success = std::fs::remove_file(&target_path).is_ok();
            return Err(CommitError {
                proposal_id: None,
                path: rel_path.to_string(),
                message: format!("index failed: {}", e.message),
                rollback_success,
            });
        }
        extract_memory_id(content).ok_or_else(|| {
            // file landed and indexed; id missing means the content was
            // schema-invalid, which index_file would have caught
            self.direct_error(rel_path, "content has no id field".to_string(), true)
        })
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn apply_mutation(
        &self,
        proposal: &WriteProposal,
        target_path: &Path,
    ) -> Result<MutationOutcome, String> {
        match proposal.proposal_type {
            ProposalType::Create => {
                if target_path.exists() {
                    return Err(format!("file already exists: {}", proposal.target_path));
                }
                let content = proposal
                    .content
                    .as_deref()
                    .ok_or("no content provided for CREATE proposal")?;
                write_file(target_path, content)?;
                Ok(MutationOutcome {
                    memory_id: extract_memory_id(content),
                    memory_path: proposal.target_path.clone(),
                    reindex_target: Some(target_path.to_path_buf()),
                    created: vec![target_path.to_path_buf()],
                })
            }
            ProposalType::Update => {
                if !target_path.exists() {
                    return Err(format!("file does not exist: {}", proposal.target_path));
                }
                let content = proposal
                    .content
                    .as_deref()
                    .ok_or("no content provided for UPDATE proposal")?;
                write_file(target_path, content)?;
                Ok(MutationOutcome {
                    memory_id: proposal.memory_id.clone(),
                    memory_path: proposal.target_path.clone(),
                    reindex_target: Some(target_path.to_path_buf()),
                    created: vec![],
                })
            }
            ProposalType::Deprecate => {
                let reason = proposal
                    .deprecation_reason
                    .as_deref()
                    .or(Some(proposal.reason.as_str()))
                    .unwrap_or_default();
                let new_rel = self.deprecate_file(target_path, reason)?;
                let deprecated_abs = self.memory_root.join(&new_rel);
                Ok(MutationOutcome {
                    memory_id: proposal.memory_id.clone(),
                    memory_path: new_rel,
                    reindex_target: None,
                    created: vec![deprecated_abs],
                })
            }
            ProposalType::Promote => {
                if !target_path.exists() {
                    return Err(format!("file does not exist: {}", proposal.target_path));
                }
                let new_scope = proposal
                    .new_scope
                    .ok_or("no new_scope specified for PROMOTE proposal")?;
                let new_rel =
                    self.promote_file(target_path, &proposal.target_path, new_scope, proposal.source_scope)?;
                let new_abs = self.memory_root.join(&new_rel);
                Ok(MutationOutcome {
                    memory_id: proposal.memory_id.clone(),
                    memory_path: new_rel,
                    reindex_target: Some(new_abs.clone()),
                    created: vec![new_abs],
                })
            }
        }
    }

    /// Rewrite frontmatter for deprecation and move the file under
    /// `deprecated/`, avoiding name collisions. Returns the new relative path.
    fn deprecate_file(&self, target_path: &Path, reason: &str) -> Result<String, String> {
        if !target_path.exists() {
            return Err(format!("file does not exist: {}", target_path.display()));
        }
        let content = std::fs::read_to_string(target_path)
            .map_err(|e| format!("failed to read file: {e}"))?;
        let (mut mapping, body) =
            frontmatter::split(&content).map_err(|e| format!("invalid frontmatter: {e}"))?;

        frontmatter::set_str(&mut mapping, "status", "deprecated");
        frontmatter::set_str(&mut mapping, "confidence", "deprecated");
        frontmatter::set_str(&mut mapping, "deprecated_at", &Utc::now().to_rfc3339());
        frontmatter::set_str(&mut mapping, "deprecation_reason", reason);
        let new_content =
            frontmatter::render(&mapping, body).map_err(|e| format!("render failed: {e}"))?;
        write_file(target_path, &new_content)?;

        let deprecated_dir = self.memory_root.join("deprecated");
        std::fs::create_dir_all(&deprecated_dir)
            .map_err(|e| format!("failed to create deprecated/: {e}"))?;
        let file_name = target_path
            .file_name()
            .ok_or("target path has no file name")?
            .to_string_lossy()
            .into_owned();
        let destination = collision_free(&deprecated_dir, &file_name);

        std::fs::rename(target_path, &destination)
            .map_err(|e| format!("failed to move file into deprecated/: {e}"))?;

        Ok(format!(
            "deprecated/{}",
            destination.file_name().unwrap_or_default().to_string_lossy()
        ))
    }

    /// Rewrite frontmatter for promotion and move the file into the new
    /// scope folder. Returns the new relative path.
    fn promote_file(
        &self,
        target_path: &Path,
        target_rel: &str,
        new_scope: Scope,
        source_scope: Option<Scope>,
    ) -> Result<String, String> {
        let content = std::fs::read_to_string(target_path)
            .map_err(|e| format!("failed to read file: {e}"))?;
        let (mut mapping, body) =
            frontmatter::split(&content).map_err(|e| format!("invalid frontmatter: {e}"))?;

        frontmatter::set_str(&mut mapping, "scope", new_scope.as_str());
        frontmatter::set_str(&mut mapping, "promoted_at", &Utc::now().to_rfc3339());
        if let Some(source) = source_scope {
            frontmatter::set_str(&mut mapping, "promoted_from", source.as_str());
        }
        let new_content =
            frontmatter::render(&mapping, body).map_err(|e| format!("render failed: {e}"))?;

        // Keep everything after the old scope folder
        let remainder = match target_rel.split_once('/') {
            Some((_, rest)) => rest,
            None => target_rel,
        };
        let new_dir = self.memory_root.join(new_scope.as_str());
        let new_path = new_dir.join(remainder);
        let parent = new_path.parent().ok_or("promoted path has no parent")?;
        std::fs::create_dir_all(parent).map_err(|e| format!("failed to create scope dir: {e}"))?;
        let file_name = new_path
            .file_name()
            .ok_or("promoted path has no file name")?
            .to_string_lossy()
            .into_owned();
        let destination = collision_free(parent, &file_name);

        write_file(&destination, &new_content)?;
        std::fs::remove_file(target_path)
            .map_err(|e| format!("failed to remove original file: {e}"))?;

        let rel = destination
            .strip_prefix(&self.memory_root)
            .map_err(|_| "promoted path escapes memory root".to_string())?;
        Ok(rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/"))
    }

    fn create_backup(&self, target_path: &Path) -> Result<Option<PathBuf>, String> {
        if !target_path.exists() {
            return Ok(None);
        }
        std::fs::create_dir_all(&self.backup_dir)
            .map_err(|e| format!("failed to create backup dir: {e}"))?;
        let stem = target_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let backup_path = self.backup_dir.join(format!("{stem}_{timestamp}.md.bak"));
        std::fs::copy(target_path, &backup_path).map_err(|e| format!("backup failed: {e}"))?;
        Ok(Some(backup_path))
    }

    /// Remove files the failed mutation created and restore the backup.
    /// Returns whether the restore succeeded (vacuously true with no backup).
    fn restore_backup(
        &self,
        backup_path: Option<&Path>,
        target_path: &Path,
        created: &[PathBuf],
    ) -> bool {
        for path in created {
            if path.exists() && std::fs::remove_file(path).is_err() {
                return false;
            }
        }
        match backup_path {
            Some(backup) if backup.exists() => {
                if let Some(parent) = target_path.parent() {
                    if std::fs::create_dir_all(parent).is_err() {
                        return false;
                    }
                }
                if std::fs::copy(backup, target_path).is_err() {
                    return false;
                }
                let _ = std::fs::remove_file(backup);
                true
            }
            Some(_) => false,
            None => true,
        }
    }

    fn fail(
        &self,
        proposal: &WriteProposal,
        target_path: &Path,
        backup_path: Option<&Path>,
        created: &[PathBuf],
        message: String,
    ) -> Result<CommitResult, CommitError> {
        let rollback_needed = backup_path.is_some() || !created.is_empty();
        let rollback_success = self.restore_backup(backup_path, target_path, created);

        let _ = self.queue.set_commit_error(&proposal.proposal_id, &message);
        // Back to PENDING so the proposal can be retried
        let _ = self
            .queue
            .update_status(&proposal.proposal_id, ProposalStatus::Pending, None);

        if rollback_needed && !rollback_success {
            return Err(CommitError {
                proposal_id: Some(proposal.proposal_id.clone()),
                path: proposal.target_path.clone(),
                message,
                rollback_success: false,
            });
        }

        tracing::warn!("commit of {} failed: {message}", proposal.proposal_id);
        Ok(CommitResult {
            rollback_performed: rollback_needed,
            rollback_success,
            ..CommitResult::failure(&proposal.proposal_id, message)
        })
    }

    fn direct_error(&self, path: &str, message: String, rollback_success: bool) -> CommitError {
        CommitError {
            proposal_id: None,
            path: path.to_string(),
            message,
            rollback_success,
        }
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| format!("failed to create parent dir: {e}"))?;
    }
    std::fs::write(path, content).map_err(|e| format!("failed to write file: {e}"))
}

/// First collision-free name in `dir` for `file_name`: `x.md`, `x_1.md`, ...
fn collision_free(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = file_name.trim_end_matches(".md");
    let mut counter = 1;
    loop {
        let candidate = dir.join(format!("{stem}_{counter}.md"));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

fn extract_memory_id(content: &str) -> Option<String> {
    let (mapping, _) = frontmatter::split(content).ok()?;
    frontmatter::get_str(&mapping, "id")
}

// ============================================================================
// TESTS
// ============================================================================
