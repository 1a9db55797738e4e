//! Conflict Resolver
//!
//! Executes resolution actions against persisted conflicts. Corpus mutations
//! go through the commit engine's deprecation/create paths so resolved
//! conflicts observe the same backup/rollback discipline as proposals.
//! On success the conflict transitions `unresolved -> in_progress ->
//! resolved | dismissed`; on failure it reverts to `unresolved` with the
//! error recorded.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::store::Storage;
use crate::writeback::CommitEngine;

use super::store::ConflictStore;
use super::types::{
    Conflict, ConflictError, ConflictStatus, ResolutionAction, ResolutionRequest,
    ResolutionResult, Result,
};

/// Applies resolution requests to conflicts
pub struct ConflictResolver {
    conflict_store: Arc<ConflictStore>,
    storage: Arc<Storage>,
    commit: Arc<CommitEngine>,
}

impl ConflictResolver {
    pub fn new(
        conflict_store: Arc<ConflictStore>,
        storage: Arc<Storage>,
        commit: Arc<CommitEngine>,
    ) -> Self {
        Self {
            conflict_store,
            storage,
            commit,
        }
    }

    /// Execute a resolution request
    pub fn resolve(&self, request: &ResolutionRequest) -> Result<ResolutionResult> {
        let conflict = self
            .conflict_store
            .get(&request.conflict_id)?
            .ok_or_else(|| ConflictError::NotFound(request.conflict_id.clone()))?;

        if conflict.is_resolved() {
            return Ok(ResolutionResult::failure(
                &request.conflict_id,
                request.action,
                format!(
                    "conflict already resolved with action: {}",
                    conflict.resolution_action.as_deref().unwrap_or("unknown")
                ),
            ));
        }

        self.conflict_store
            .update_status(&request.conflict_id, ConflictStatus::InProgress, None)?;

        let result = match request.action {
            ResolutionAction::Deprecate => self.resolve_deprecate(&conflict, request),
            ResolutionAction::Merge => self.resolve_merge(&conflict, request),
            ResolutionAction::Clarify => self.resolve_clarify(&conflict, request),
            ResolutionAction::Dismiss => self.resolve_dismiss(&conflict, request),
            ResolutionAction::Defer => self.resolve_defer(&conflict, request),
        };

        match result {
            Ok(result) if result.success => {
                self.conflict_store.log_resolution(
                    &request.conflict_id,
                    request.action.as_str(),
                    &request.resolved_by,
                    &json!({"reason": request.reason}),
                    &result.memories_modified,
                    &result.memories_deprecated,
                    &result.memories_created,
                )?;
                Ok(result)
            }
            Ok(result) => {
                // recoverable failure: conflict goes back to unresolved
                self.conflict_store.update_status(
                    &request.conflict_id,
                    ConflictStatus::Unresolved,
                    None,
                )?;
                tracing::warn!(
                    "resolution of {} failed: {}",
                    request.conflict_id,
                    result.error.as_deref().unwrap_or("unknown")
                );
                Ok(result)
            }
            Err(e) => {
                let _ = self.conflict_store.update_status(
                    &request.conflict_id,
                    ConflictStatus::Unresolved,
                    None,
                );
                Err(e)
            }
        }
    }

    /// Dismiss several conflicts as false positives
    pub fn batch_dismiss(
        &self,
        conflict_ids: &[String],
        reason: &str,
        resolved_by: &str,
    ) -> HashMap<String, bool> {
        let mut results = HashMap::new();
        for conflict_id in conflict_ids {
            let mut request =
                ResolutionRequest::new(conflict_id, ResolutionAction::Dismiss, resolved_by);
            request.dismiss_reason = Some(reason.to_string());
            request.reason = Some(reason.to_string());
            let success = matches!(self.resolve(&request), Ok(result) if result.success);
            results.insert(conflict_id.clone(), success);
        }
        results
    }

    fn resolve_deprecate(
        &self,
        conflict: &Conflict,
        request: &ResolutionRequest,
    ) -> Result<ResolutionResult> {
        let Some(target_id) = request.target_memory_id.as_deref() else {
            return Ok(ResolutionResult::failure(
                &conflict.conflict_id,
                ResolutionAction::Deprecate,
                "target_memory_id is required for deprecate action",
            ));
        };
        if !conflict.memories.iter().any(|m| m.memory_id == target_id) {
            return Ok(ResolutionResult::failure(
                &conflict.conflict_id,
                ResolutionAction::Deprecate,
                format!("memory {target_id} not found in conflict"),
            ));
        }
        let survivor = conflict
            .memories
            .iter()
            .find(|m| m.memory_id != target_id)
            .map(|m| m.memory_id.clone());

        let Some(memory) = self.storage.get_memory(target_id)? else {
            return Ok(ResolutionResult::failure(
                &conflict.conflict_id,
                ResolutionAction::Deprecate,
                format!("memory {target_id} no longer exists"),
            ));
        };

        let reason = request.reason.clone().unwrap_or_else(|| {
            format!(
                "conflict resolution: superseded by {}",
                survivor.as_deref().unwrap_or("another memory")
            )
        });
        if let Err(e) = self.commit.apply_deprecation(&memory, &reason) {
            return Ok(ResolutionResult::failure(
                &conflict.conflict_id,
                ResolutionAction::Deprecate,
                e.to_string(),
            ));
        }

        self.conflict_store.update_status(
            &conflict.conflict_id,
            ConflictStatus::Resolved,
            Some(request),
        )?;

        let mut result = ResolutionResult::ok(&conflict.conflict_id, ResolutionAction::Deprecate);
        result.memories_deprecated = vec![target_id.to_string()];
        result.memories_modified = survivor.into_iter().collect();
        Ok(result)
    }

    fn resolve_merge(
        &self,
        conflict: &Conflict,
        request: &ResolutionRequest,
    ) -> Result<ResolutionResult> {
        let Some(content) = request.merged_content.as_deref() else {
            return Ok(ResolutionResult::failure(
                &conflict.conflict_id,
                ResolutionAction::Merge,
                "merged_content is required for merge action",
            ));
        };
        let Some(target_path) = request.merged_target_path.as_deref() else {
            return Ok(ResolutionResult::failure(
                &conflict.conflict_id,
                ResolutionAction::Merge,
                "merged_target_path is required for merge action",
            ));
        };
        if conflict.memories.len() < 2 {
            return Ok(ResolutionResult::failure(
                &conflict.conflict_id,
                ResolutionAction::Merge,
                "merge requires at least 2 memories",
            ));
        }

        // Create the combined memory first; failing here leaves the
        // originals untouched
        let new_id = match self.commit.apply_create(target_path, content) {
            Ok(id) => id,
            Err(e) => {
                return Ok(ResolutionResult::failure(
                    &conflict.conflict_id,
                    ResolutionAction::Merge,
                    e.to_string(),
                ));
            }
        };

        let mut deprecated = Vec::new();
        for member in &conflict.memories {
            if let Some(memory) = self.storage.get_memory(&member.memory_id)? {
                let reason = format!("merged into {new_id} as part of conflict resolution");
                match self.commit.apply_deprecation(&memory, &reason) {
                    Ok(_) => deprecated.push(member.memory_id.clone()),
                    Err(e) => {
                        tracing::warn!("merge deprecation of {} failed: {e}", member.memory_id);
                    }
                }
            }
        }

        self.conflict_store.update_status(
            &conflict.conflict_id,
            ConflictStatus::Resolved,
            Some(request),
        )?;

        let mut result = ResolutionResult::ok(&conflict.conflict_id, ResolutionAction::Merge);
        result.memories_created = vec![new_id];
        result.memories_deprecated = deprecated;
        Ok(result)
    }

    fn resolve_clarify(
        &self,
        conflict: &Conflict,
        request: &ResolutionRequest,
    ) -> Result<ResolutionResult> {
        let Some(clarification) = request.clarification.as_deref() else {
            return Ok(ResolutionResult::failure(
                &conflict.conflict_id,
                ResolutionAction::Clarify,
                "clarification is required for clarify action",
            ));
        };

        // Advisory: the clarification is recorded, content is not rewritten
        self.conflict_store.log_resolution(
            &conflict.conflict_id,
            "clarify_note",
            &request.resolved_by,
            &json!({"clarification": clarification}),
            &[],
            &[],
            &[],
        )?;
        self.conflict_store.update_status(
            &conflict.conflict_id,
            ConflictStatus::Resolved,
            Some(request),
        )?;

        let mut result = ResolutionResult::ok(&conflict.conflict_id, ResolutionAction::Clarify);
        result.memories_modified = conflict
            .memories
            .iter()
            .map(|m| m.memory_id.clone())
            .collect();
        Ok(result)
    }

    fn resolve_dismiss(
        &self,
        conflict: &Conflict,
        request: &ResolutionRequest,
    ) -> Result<ResolutionResult> {
        let reason = request
            .dismiss_reason
            .clone()
            .or_else(|| request.reason.clone())
            .unwrap_or_else(|| "marked as false positive".to_string());

        let mut effective = request.clone();
        effective.dismiss_reason = Some(reason);
        self.conflict_store.update_status(
            &conflict.conflict_id,
            ConflictStatus::Dismissed,
            Some(&effective),
        )?;
        Ok(ResolutionResult::ok(
            &conflict.conflict_id,
            ResolutionAction::Dismiss,
        ))
    }

    fn resolve_defer(
        &self,
        conflict: &Conflict,
        request: &ResolutionRequest,
    ) -> Result<ResolutionResult> {
        self.conflict_store.update_status(
            &conflict.conflict_id,
            ConflictStatus::Unresolved,
            None,
        )?;
        self.conflict_store.log_resolution(
            &conflict.conflict_id,
            "defer",
            &request.resolved_by,
            &json!({
                "reason": request.reason.clone().unwrap_or_else(|| "needs more context".to_string()),
                "deferred_at": Utc::now().to_rfc3339(),
            }),
            &[],
            &[],
            &[],
        )?;
        Ok(ResolutionResult::ok(
            &conflict.conflict_id,
            ResolutionAction::Defer,
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================
