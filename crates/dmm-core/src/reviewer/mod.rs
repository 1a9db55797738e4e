//! Reviewer
//!
//! Multi-stage validation of write proposals: schema, quality, duplicate
//! detection, collated by the decision engine into approve / reject /
//! modify / defer. The reviewer moves proposals through the queue but never
//! mutates memory files; that is the commit engine's job.

mod decisions;
mod issues;
pub mod validators;

pub use decisions::{DecisionEngine, ReviewDecision, ReviewResult};
pub use issues::{has_errors, warning_count, Severity, ValidationIssue};
pub use validators::{DuplicateDetector, DuplicateMatch, QualityChecker, SchemaValidator};

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::embedder::Embedder;
use crate::memory::{scope_rank, Scope, Status};
use crate::parser::frontmatter;
use crate::store::{Storage, StoreError};
use crate::writeback::{ProposalError, ProposalQueue, ProposalStatus, ProposalType, WriteProposal};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Review pipeline failure (distinct from a REJECT decision)
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("queue error: {0}")]
    Queue(#[from] ProposalError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

// ============================================================================
// AGENT
// ============================================================================

/// Orchestrates the review process for write proposals
pub struct ReviewerAgent {
    queue: Arc<ProposalQueue>,
    storage: Arc<Storage>,
    schema: SchemaValidator,
    quality: QualityChecker,
    duplicates: DuplicateDetector,
    engine: DecisionEngine,
    min_deprecation_reason_len: usize,
}

impl ReviewerAgent {
    pub fn new(
        queue: Arc<ProposalQueue>,
        storage: Arc<Storage>,
        embedder: Arc<dyn Embedder>,
        config: &Config,
    ) -> Self {
        Self {
            schema: SchemaValidator::new(),
            quality: QualityChecker::new(&config.parser, &config.review),
            duplicates: DuplicateDetector::new(
                Arc::clone(&storage),
                embedder,
                &config.review,
            ),
            engine: DecisionEngine::new(
                config.review.auto_approve_threshold,
                config.review.hard_duplicate_threshold,
            ),
            min_deprecation_reason_len: config.review.min_deprecation_reason_len,
            queue,
            storage,
        }
    }

    /// Review a proposal and move it through the queue accordingly
    pub fn review(&self, proposal: &WriteProposal) -> Result<ReviewResult, ReviewError> {
        let start = Instant::now();

        self.queue
            .update_status(&proposal.proposal_id, ProposalStatus::InReview, None)?;

        let outcome = match proposal.proposal_type {
            ProposalType::Create => self.review_create(proposal),
            ProposalType::Update => self.review_update(proposal),
            ProposalType::Deprecate => self.review_deprecate(proposal),
            ProposalType::Promote => self.review_promote(proposal),
        };

        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                // Pipeline failure: put the proposal back so review can retry
                let _ = self.queue.update_status(
                    &proposal.proposal_id,
                    ProposalStatus::Pending,
                    Some(&format!("review failed: {e}")),
                );
                return Err(e);
            }
        };
        result.review_duration_ms = start.elapsed().as_millis() as u64;

        let new_status = match result.decision {
            ReviewDecision::Approve => ProposalStatus::Approved,
            ReviewDecision::Reject => ProposalStatus::Rejected,
            ReviewDecision::Modify => ProposalStatus::Modified,
            ReviewDecision::Defer => ProposalStatus::Deferred,
        };
        self.queue
            .update_status(&proposal.proposal_id, new_status, Some(&result.notes))?;
        tracing::info!(
            "reviewed {} -> {} ({})",
            proposal.proposal_id,
            new_status,
            result.notes
        );

        Ok(result)
    }

    /// Review up to `limit` pending proposals in FIFO order
    pub fn review_pending(&self, limit: usize) -> Result<Vec<ReviewResult>, ReviewError> {
        let pending = self.queue.get_pending(limit)?;
        let mut results = Vec::with_capacity(pending.len());
        for proposal in pending {
            results.push(self.review(&proposal)?);
        }
        Ok(results)
    }

    fn review_create(&self, proposal: &WriteProposal) -> Result<ReviewResult, ReviewError> {
        let Some(content) = proposal.content.as_deref() else {
            return Ok(ReviewResult::rejected(
                &proposal.proposal_id,
                "no content provided",
            ));
        };
        self.review_content(proposal, content, None)
    }

    fn review_update(&self, proposal: &WriteProposal) -> Result<ReviewResult, ReviewError> {
        let Some(content) = proposal.content.as_deref() else {
            return Ok(ReviewResult::rejected(
                &proposal.proposal_id,
                "no content provided for update",
            ));
        };
        let Some(memory_id) = proposal.memory_id.as_deref() else {
            return Ok(ReviewResult::rejected(
                &proposal.proposal_id,
                "no memory_id specified for update",
            ));
        };
        if self.storage.get_memory(memory_id)?.is_none() {
            return Ok(ReviewResult::rejected(
                &proposal.proposal_id,
                format!("memory '{memory_id}' not found"),
            ));
        }
        self.review_content(proposal, content, Some(memory_id))
    }

    fn review_content(
        &self,
        proposal: &WriteProposal,
        content: &str,
        exclude_id: Option<&str>,
    ) -> Result<ReviewResult, ReviewError> {
        let schema_issues = self.schema.validate(content);
        if has_errors(&schema_issues) {
            return Ok(self.engine.decide(
                &proposal.proposal_id,
                None,
                schema_issues,
                vec![],
                vec![],
                vec![],
            ));
        }

        let target_scope = self
            .schema
            .extract_metadata(content)
            .and_then(|m| frontmatter::get_str(&m, "scope"))
            .and_then(|s| Scope::parse(&s));

        let quality_issues = self.quality.check(content);
        let (duplicate_issues, duplicate_matches) = self.duplicates.check(content, exclude_id)?;

        Ok(self.engine.decide(
            &proposal.proposal_id,
            target_scope,
            schema_issues,
            quality_issues,
            duplicate_issues,
            duplicate_matches,
        ))
    }

    fn review_deprecate(&self, proposal: &WriteProposal) -> Result<ReviewResult, ReviewError> {
        let Some(memory_id) = proposal.memory_id.as_deref() else {
            return Ok(ReviewResult::rejected(
                &proposal.proposal_id,
                "no memory_id specified for deprecation",
            ));
        };
        let Some(memory) = self.storage.get_memory(memory_id)? else {
            return Ok(ReviewResult::rejected(
                &proposal.proposal_id,
                format!("memory '{memory_id}' not found"),
            ));
        };
        if memory.status == Status::Deprecated {
            return Ok(ReviewResult::rejected(
                &proposal.proposal_id,
                format!("memory '{memory_id}' is already deprecated"),
            ));
        }
        let reason_len = proposal
            .deprecation_reason
            .as_deref()
            .map(|r| r.trim().len())
            .unwrap_or(0);
        if reason_len < self.min_deprecation_reason_len {
            return Ok(ReviewResult::rejected(
                &proposal.proposal_id,
                format!(
                    "deprecation reason too short ({} chars, need {})",
                    reason_len, self.min_deprecation_reason_len
                ),
            ));
        }
        if memory.scope == Scope::Baseline {
            return Ok(ReviewResult::plain(
                &proposal.proposal_id,
                ReviewDecision::Defer,
                "baseline deprecation requires human review",
            ));
        }
        Ok(ReviewResult::plain(
            &proposal.proposal_id,
            ReviewDecision::Approve,
            "deprecation approved",
        ))
    }

    fn review_promote(&self, proposal: &WriteProposal) -> Result<ReviewResult, ReviewError> {
        let Some(memory_id) = proposal.memory_id.as_deref() else {
            return Ok(ReviewResult::rejected(
                &proposal.proposal_id,
                "no memory_id specified for promotion",
            ));
        };
        let Some(memory) = self.storage.get_memory(memory_id)? else {
            return Ok(ReviewResult::rejected(
                &proposal.proposal_id,
                format!("memory '{memory_id}' not found"),
            ));
        };
        let Some(new_scope) = proposal.new_scope else {
            return Ok(ReviewResult::rejected(
                &proposal.proposal_id,
                "no new_scope specified for promotion",
            ));
        };
        if new_scope == memory.scope {
            return Ok(ReviewResult::rejected(
                &proposal.proposal_id,
                format!("memory is already in scope '{new_scope}'"),
            ));
        }
        if new_scope == Scope::Baseline {
            return Ok(ReviewResult::plain(
                &proposal.proposal_id,
                ReviewDecision::Defer,
                "promotion to baseline requires human review",
            ));
        }
        if let (Some(from), Some(to)) = (scope_rank(memory.scope), scope_rank(new_scope)) {
            if to < from {
                return Ok(ReviewResult::plain(
                    &proposal.proposal_id,
                    ReviewDecision::Defer,
                    format!("demotion {} -> {new_scope} requires human review", memory.scope),
                ));
            }
        }
        Ok(ReviewResult::plain(
            &proposal.proposal_id,
            ReviewDecision::Approve,
            "promotion approved",
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================
