//! Proposal handler
//!
//! Precheck layer in front of the queue. Validates path shape and occupancy
//! (one open proposal per path), performs basic content checks, and enqueues
//! well-formed proposals. Deep validation is the reviewer's job.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use crate::memory::{Scope, Status};
use crate::reviewer::{Severity, ValidationIssue};
use crate::store::Storage;
use crate::writeback::queue::{
    generate_proposal_id, ProposalError, ProposalQueue, ProposalStatus, ProposalType,
    QueueStats, WriteProposal,
};

/// Creates and prechecks write proposals
pub struct ProposalHandler {
    queue: Arc<ProposalQueue>,
    storage: Arc<Storage>,
    memory_root: PathBuf,
}

impl ProposalHandler {
    pub fn new(queue: Arc<ProposalQueue>, storage: Arc<Storage>, memory_root: impl Into<PathBuf>) -> Self {
        Self {
            queue,
            storage,
            memory_root: memory_root.into(),
        }
    }

    /// Propose adding a new memory at `target_path`
    pub fn propose_create(
        &self,
        target_path: &str,
        content: &str,
        reason: &str,
        proposed_by: &str,
    ) -> Result<WriteProposal, ProposalError> {
        let issues = self.precheck_create(target_path, content)?;
        reject_on_errors(issues)?;

        let proposal = new_proposal(ProposalType::Create, target_path, proposed_by, reason);
        let proposal = WriteProposal {
            content: Some(content.to_string()),
            ..proposal
        };
        self.queue.enqueue(&proposal)?;
        Ok(proposal)
    }

    /// Propose replacing the content of an existing memory
    pub fn propose_update(
        &self,
        memory_id: &str,
        content: &str,
        reason: &str,
        proposed_by: &str,
    ) -> Result<WriteProposal, ProposalError> {
        let existing = self.storage.get_memory(memory_id)?.ok_or_else(|| {
            precheck_error(
                "memory_not_found",
                format!("memory '{memory_id}' not found"),
            )
        })?;

        let mut issues = Vec::new();
        if self.queue.has_pending_for_path(&existing.path)? {
            issues.push(pending_exists_issue(&existing.path));
        }
        issues.extend(validate_content_basic(content));
        reject_on_errors(issues)?;

        let proposal = WriteProposal {
            memory_id: Some(memory_id.to_string()),
            content: Some(content.to_string()),
            ..new_proposal(ProposalType::Update, &existing.path, proposed_by, reason)
        };
        self.queue.enqueue(&proposal)?;
        Ok(proposal)
    }

    /// Propose deprecating an existing memory
    pub fn propose_deprecate(
        &self,
        memory_id: &str,
        reason: &str,
        proposed_by: &str,
    ) -> Result<WriteProposal, ProposalError> {
        let existing = self.storage.get_memory(memory_id)?.ok_or_else(|| {
            precheck_error(
                "memory_not_found",
                format!("memory '{memory_id}' not found"),
            )
        })?;
        if existing.status == Status::Deprecated {
            return Err(precheck_error(
                "already_deprecated",
                format!("memory '{memory_id}' is already deprecated"),
            ));
        }
        if self.queue.has_pending_for_path(&existing.path)? {
            return Err(precheck_error(
                "pending_exists",
                format!("pending proposal already exists for path '{}'", existing.path),
            ));
        }

        let proposal = WriteProposal {
            memory_id: Some(memory_id.to_string()),
            deprecation_reason: Some(reason.to_string()),
            ..new_proposal(ProposalType::Deprecate, &existing.path, proposed_by, reason)
        };
        self.queue.enqueue(&proposal)?;
        Ok(proposal)
    }

    /// Propose moving a memory to a different scope
    pub fn propose_promote(
        &self,
        memory_id: &str,
        new_scope: Scope,
        reason: &str,
        proposed_by: &str,
    ) -> Result<WriteProposal, ProposalError> {
        let existing = self.storage.get_memory(memory_id)?.ok_or_else(|| {
            precheck_error(
                "memory_not_found",
                format!("memory '{memory_id}' not found"),
            )
        })?;
        if existing.scope == new_scope {
            return Err(precheck_error(
                "same_scope",
                format!("memory '{memory_id}' is already in scope '{new_scope}'"),
            ));
        }
        if self.queue.has_pending_for_path(&existing.path)? {
            return Err(precheck_error(
                "pending_exists",
                format!("pending proposal already exists for path '{}'", existing.path),
            ));
        }

        let proposal = WriteProposal {
            memory_id: Some(memory_id.to_string()),
            new_scope: Some(new_scope),
            source_scope: Some(existing.scope),
            ..new_proposal(ProposalType::Promote, &existing.path, proposed_by, reason)
        };
        self.queue.enqueue(&proposal)?;
        Ok(proposal)
    }

    /// Point lookup
    pub fn get_proposal(&self, proposal_id: &str) -> Result<Option<WriteProposal>, ProposalError> {
        self.queue.get(proposal_id)
    }

    /// Pending proposals, FIFO
    pub fn get_pending_proposals(&self, limit: usize) -> Result<Vec<WriteProposal>, ProposalError> {
        self.queue.get_pending(limit)
    }

    /// Cancel a PENDING or DEFERRED proposal
    pub fn cancel_proposal(&self, proposal_id: &str) -> Result<bool, ProposalError> {
        self.queue.delete(proposal_id)
    }

    /// Queue statistics
    pub fn get_stats(&self) -> Result<QueueStats, ProposalError> {
        self.queue.get_stats()
    }

    fn precheck_create(
        &self,
        target_path: &str,
        content: &str,
    ) -> Result<Vec<ValidationIssue>, ProposalError> {
        let mut issues = validate_path(target_path);

        if self.memory_root.join(target_path).exists() {
            issues.push(
                ValidationIssue::error(
                    "path_exists",
                    format!("file already exists at path '{target_path}'"),
                    "target_path",
                )
                .with_suggestion("Use propose_update to modify existing memories"),
            );
        }
        if self.storage.get_memory_by_path(target_path)?.is_some() {
            issues.push(ValidationIssue::error(
                "memory_exists",
                format!("memory already indexed at path '{target_path}'"),
                "target_path",
            ));
        }
        if self.queue.has_pending_for_path(target_path)? {
            issues.push(pending_exists_issue(target_path));
        }
        issues.extend(validate_content_basic(content));
        Ok(issues)
    }
}

fn new_proposal(
    proposal_type: ProposalType,
    target_path: &str,
    proposed_by: &str,
    reason: &str,
) -> WriteProposal {
    let now = Utc::now();
    WriteProposal {
        proposal_id: generate_proposal_id(),
        proposal_type,
        target_path: target_path.to_string(),
        memory_id: None,
        content: None,
        reason: reason.to_string(),
        deprecation_reason: None,
        new_scope: None,
        source_scope: None,
        proposed_by: proposed_by.to_string(),
        status: ProposalStatus::Pending,
        review_notes: None,
        commit_error: None,
        created_at: now,
        updated_at: now,
    }
}

fn pending_exists_issue(path: &str) -> ValidationIssue {
    ValidationIssue::error(
        "pending_exists",
        format!("pending proposal already exists for path '{path}'"),
        "target_path",
    )
}

fn precheck_error(reason: &str, message: String) -> ProposalError {
    ProposalError::Precheck {
        reason: reason.to_string(),
        message,
        issues: vec![],
    }
}

fn reject_on_errors(issues: Vec<ValidationIssue>) -> Result<(), ProposalError> {
    if let Some(first) = issues.iter().find(|i| i.severity == Severity::Error) {
        return Err(ProposalError::Precheck {
            reason: first.code.clone(),
            message: first.message.clone(),
            issues,
        });
    }
    Ok(())
}

/// Validate the shape of a target path
fn validate_path(target_path: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if target_path.is_empty() {
        issues.push(ValidationIssue::error(
            "empty_path",
            "Target path cannot be empty",
            "target_path",
        ));
        return issues;
    }
    if !target_path.ends_with(".md") {
        issues.push(
            ValidationIssue::error(
                "invalid_extension",
                "Target path must end with .md",
                "target_path",
            )
            .with_suggestion("Add .md extension to the filename"),
        );
    }
    if target_path.starts_with('/') || target_path.starts_with('\\') {
        issues.push(ValidationIssue::error(
            "absolute_path",
            "Target path must be relative",
            "target_path",
        ));
    }
    if target_path.split(['/', '\\']).any(|part| part == "..") {
        issues.push(ValidationIssue::error(
            "path_traversal",
            "Target path cannot contain '..'",
            "target_path",
        ));
    }

    let parts: Vec<&str> = target_path.split('/').collect();
    if parts.len() < 2 {
        issues.push(
            ValidationIssue::error(
                "missing_scope_dir",
                "Target path must include a scope directory (e.g. 'project/file.md')",
                "target_path",
            )
            .with_suggestion("Prefix the path with baseline/, global/, agent/, project/, or ephemeral/"),
        );
    } else if Scope::parse(parts[0]).is_none() {
        issues.push(ValidationIssue::error(
            "invalid_scope_dir",
            format!("invalid scope directory '{}'", parts[0]),
            "target_path",
        ));
    }
    issues
}

/// Shallow content checks; the reviewer validates the schema in depth
fn validate_content_basic(content: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    if content.trim().is_empty() {
        issues.push(ValidationIssue::error(
            "empty_content",
            "Content cannot be empty",
            "content",
        ));
        return issues;
    }
    if !content.trim_start().starts_with("---") {
        issues.push(
            ValidationIssue::error(
                "missing_frontmatter",
                "Content must start with YAML frontmatter (---)",
                "content",
            )
            .with_suggestion(
                "Add frontmatter with required fields: id, tags, scope, priority, confidence, status",
            ),
        );
    } else if content.matches("---").count() < 2 {
        issues.push(ValidationIssue::error(
            "incomplete_frontmatter",
            "Frontmatter must be closed with ---",
            "content",
        ));
    }
    issues
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedder::{Embedder, HashEmbedder};
    use crate::memory::{Confidence, MemoryFile};
    use tempfile::TempDir;

    const DIMS: usize = 16;

    fn handler() -> (ProposalHandler, Arc<Storage>, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("t.db");
        let storage = Arc::new(Storage::new(Some(db.clone()), DIMS).unwrap());
        let queue = Arc::new(ProposalQueue::new(&db).unwrap());
        let handler = ProposalHandler::new(queue, Arc::clone(&storage), dir.path().join("memory"));
        (handler, storage, dir)
    }

    fn insert_memory(storage: &Storage, id: &str, path: &str) {
        let memory = MemoryFile {
            id: id.to_string(),
            path: path.to_string(),
            title: id.to_string(),
            body: format!("# {id}\n\nBody."),
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

    const CONTENT: &str = "---\nid: mem_new\ntags: [a, b]\nscope: project\npriority: 0.5\nconfidence: active\nstatus: active\n---\n\n# New\n\nBody because reasons.\n";

    #[test]
    fn test_propose_create_enqueues() {
        let (handler, _storage, _dir) = handler();
        let proposal = handler
            .propose_create("project/new.md", CONTENT, "capture the rule", "agent")
            .unwrap();
        assert_eq!(proposal.status, ProposalStatus::Pending);
        assert!(handler.get_proposal(&proposal.proposal_id).unwrap().is_some());
    }

    #[test]
    fn test_create_rejects_bad_paths() {
        let (handler, _storage, _dir) = handler();
        for bad in [
            "project/new.txt",
            "/project/abs.md",
            "project/../sneaky.md",
            "rootfile.md",
            "attic/new.md",
        ] {
            let err = handler.propose_create(bad, CONTENT, "r", "agent");
            assert!(err.is_err(), "path {bad} should be rejected");
        }
    }

    #[test]
    fn test_create_rejects_occupied_path() {
        let (handler, storage, _dir) = handler();
        insert_memory(&storage, "mem_taken", "project/taken.md");
        let err = handler
            .propose_create("project/taken.md", CONTENT, "r", "agent")
            .unwrap_err();
        assert!(matches!(err, ProposalError::Precheck { ref reason, .. } if reason == "memory_exists"));
    }

    #[test]
    fn test_one_open_proposal_per_path() {
        let (handler, _storage, _dir) = handler();
        handler
            .propose_create("project/new.md", CONTENT, "r", "agent")
            .unwrap();
        let err = handler
            .propose_create("project/new.md", CONTENT, "r", "agent")
            .unwrap_err();
        assert!(matches!(err, ProposalError::Precheck { ref reason, .. } if reason == "pending_exists"));
    }

    #[test]
    fn test_update_requires_existing_memory() {
        let (handler, storage, _dir) = handler();
        assert!(handler
            .propose_update("mem_ghost", CONTENT, "r", "agent")
            .is_err());

        insert_memory(&storage, "mem_real", "project/real.md");
        let proposal = handler
            .propose_update("mem_real", CONTENT, "r", "agent")
            .unwrap();
        assert_eq!(proposal.proposal_type, ProposalType::Update);
        assert_eq!(proposal.target_path, "project/real.md");
    }

    #[test]
    fn test_promote_same_scope_rejected() {
        let (handler, storage, _dir) = handler();
        insert_memory(&storage, "mem_p", "project/p.md");
        let err = handler
            .propose_promote("mem_p", Scope::Project, "r", "agent")
            .unwrap_err();
        assert!(matches!(err, ProposalError::Precheck { ref reason, .. } if reason == "same_scope"));
    }

    #[test]
    fn test_content_without_frontmatter_rejected() {
        let (handler, _storage, _dir) = handler();
        let err = handler
            .propose_create("project/new.md", "# bare markdown\n", "r", "agent")
            .unwrap_err();
        assert!(matches!(err, ProposalError::Precheck { ref reason, .. } if reason == "missing_frontmatter"));
    }
}
