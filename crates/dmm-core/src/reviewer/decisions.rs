//! Decision engine
//!
//! Collates validator output into a single review decision. Precedence:
//! schema errors reject, quality errors and hard duplicates reject, baseline
//! targets always defer to a human, near duplicates and quality warnings
//! defer, and only a clean proposal at high confidence auto-approves.

use serde::{Deserialize, Serialize};

use crate::memory::Scope;
use crate::reviewer::validators::DuplicateMatch;
use crate::reviewer::{has_errors, Severity, ValidationIssue};

/// Outcome of a review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject,
    Modify,
    Defer,
}

impl ReviewDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewDecision::Approve => "approve",
            ReviewDecision::Reject => "reject",
            ReviewDecision::Modify => "modify",
            ReviewDecision::Defer => "defer",
        }
    }
}

/// Full result of reviewing a proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewResult {
    pub proposal_id: String,
    pub decision: ReviewDecision,
    /// Confidence in the decision, [0.0, 1.0]
    pub confidence: f64,
    pub schema_valid: bool,
    pub quality_valid: bool,
    pub duplicate_check_passed: bool,
    pub issues: Vec<ValidationIssue>,
    pub duplicates: Vec<DuplicateMatch>,
    pub notes: String,
    pub review_duration_ms: u64,
}

impl ReviewResult {
    /// A terse rejection produced before the validators could run
    pub fn rejected(proposal_id: &str, notes: impl Into<String>) -> Self {
        Self {
            proposal_id: proposal_id.to_string(),
            decision: ReviewDecision::Reject,
            confidence: 1.0,
            schema_valid: false,
            quality_valid: false,
            duplicate_check_passed: false,
            issues: vec![],
            duplicates: vec![],
            notes: notes.into(),
            review_duration_ms: 0,
        }
    }

    /// A decision produced without content validation (DEPRECATE/PROMOTE)
    pub fn plain(proposal_id: &str, decision: ReviewDecision, notes: impl Into<String>) -> Self {
        Self {
            proposal_id: proposal_id.to_string(),
            decision,
            confidence: 1.0,
            schema_valid: true,
            quality_valid: true,
            duplicate_check_passed: true,
            issues: vec![],
            duplicates: vec![],
            notes: notes.into(),
            review_duration_ms: 0,
        }
    }
}

/// Collates validator findings into decisions
#[derive(Debug, Clone)]
pub struct DecisionEngine {
    auto_approve_threshold: f64,
    hard_duplicate_threshold: f64,
}

impl DecisionEngine {
    pub fn new(auto_approve_threshold: f64, hard_duplicate_threshold: f64) -> Self {
        Self {
            auto_approve_threshold,
            hard_duplicate_threshold,
        }
    }

    /// Decide on a content-bearing proposal (CREATE/UPDATE)
    pub fn decide(
        &self,
        proposal_id: &str,
        target_scope: Option<Scope>,
        schema_issues: Vec<ValidationIssue>,
        quality_issues: Vec<ValidationIssue>,
        duplicate_issues: Vec<ValidationIssue>,
        duplicates: Vec<DuplicateMatch>,
    ) -> ReviewResult {
        let schema_valid = !has_errors(&schema_issues);
        let quality_valid = !has_errors(&quality_issues);
        let hard_duplicate = duplicates
            .first()
            .is_some_and(|d| d.similarity >= self.hard_duplicate_threshold);
        let near_duplicate = !hard_duplicate && !duplicates.is_empty();

        let mut issues = schema_issues;
        issues.extend(quality_issues);
        issues.extend(duplicate_issues);

        let warning_count = issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count();
        let info_count = issues
            .iter()
            .filter(|i| i.severity == Severity::Info)
            .count();

        let mut confidence = 1.0
            - 0.1 * warning_count as f64
            - 0.02 * info_count as f64
            - if near_duplicate { 0.3 } else { 0.0 };
        confidence = confidence.clamp(0.0, 1.0);

        let (decision, confidence, notes) = if !schema_valid {
            (
                ReviewDecision::Reject,
                1.0,
                first_error(&issues).unwrap_or_else(|| "schema validation failed".to_string()),
            )
        } else if !quality_valid || hard_duplicate {
            let notes = if hard_duplicate {
                format!(
                    "hard duplicate of {}",
                    duplicates.first().map(|d| d.memory_id.as_str()).unwrap_or("?")
                )
            } else {
                first_error(&issues).unwrap_or_else(|| "quality check failed".to_string())
            };
            (ReviewDecision::Reject, 1.0, notes)
        } else if target_scope == Some(Scope::Baseline) {
            (
                ReviewDecision::Defer,
                confidence,
                "baseline changes require human review".to_string(),
            )
        } else if near_duplicate || warning_count > 0 {
            let notes = if near_duplicate {
                format!(
                    "near duplicate of {}",
                    duplicates.first().map(|d| d.memory_id.as_str()).unwrap_or("?")
                )
            } else {
                format!("{warning_count} quality warning(s)")
            };
            (ReviewDecision::Defer, confidence, notes)
        } else if confidence >= self.auto_approve_threshold {
            (
                ReviewDecision::Approve,
                confidence,
                format!("approved automatically (confidence {confidence:.2})"),
            )
        } else {
            (
                ReviewDecision::Defer,
                confidence,
                format!("confidence {confidence:.2} below auto-approve threshold"),
            )
        };

        ReviewResult {
            proposal_id: proposal_id.to_string(),
            decision,
            confidence,
            schema_valid,
            quality_valid,
            duplicate_check_passed: !hard_duplicate && !near_duplicate,
            issues,
            duplicates,
            notes,
            review_duration_ms: 0,
        }
    }
}

fn first_error(issues: &[ValidationIssue]) -> Option<String> {
    issues
        .iter()
        .find(|i| i.severity == Severity::Error)
        .map(|i| i.message.clone())
}

// ============================================================================
// TESTS
// ============================================================================
