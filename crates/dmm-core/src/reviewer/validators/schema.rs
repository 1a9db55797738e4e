//! Schema validator for proposed memory content
//!
//! Reuses the parser's frontmatter rules but works on raw content: a
//! proposal's file need not exist yet. Unlike the parser, every problem is
//! collected as an issue instead of stopping at the first failure, so the
//! reviewer can report all of them at once.

use serde_yaml::Mapping;

use crate::memory::{Confidence, Scope, Status};
use crate::parser::frontmatter;
use crate::parser::REQUIRED_FIELDS;
use crate::reviewer::{Severity, ValidationIssue};

/// Validates the frontmatter schema of proposed content
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl SchemaValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate full markdown content including frontmatter
    pub fn validate(&self, content: &str) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if content.trim().is_empty() {
            issues.push(ValidationIssue::error(
                "empty_content",
                "Content is empty",
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
                .with_suggestion("Add a frontmatter block starting with ---"),
            );
            return issues;
        }

        let (mapping, body) = match frontmatter::split(content) {
            Ok(parts) => parts,
            Err(e) => {
                issues.push(ValidationIssue::error(
                    "invalid_yaml",
                    format!("Failed to parse YAML frontmatter: {e}"),
                    "frontmatter",
                ));
                return issues;
            }
        };

        issues.extend(self.validate_required_fields(&mapping));
        if issues.is_empty() {
            issues.extend(self.validate_field_values(&mapping));
        }
        issues.extend(self.validate_body(body));
        issues
    }

    /// Extract the frontmatter mapping without validation; `None` when the
    /// content has no parseable frontmatter
    pub fn extract_metadata(&self, content: &str) -> Option<Mapping> {
        if !content.trim_start().starts_with("---") {
            return None;
        }
        frontmatter::split(content).ok().map(|(mapping, _)| mapping)
    }

    fn validate_required_fields(&self, mapping: &Mapping) -> Vec<ValidationIssue> {
        let missing: Vec<&str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|f| !mapping.contains_key(serde_yaml::Value::String((*f).to_string())))
            .collect();
        if missing.is_empty() {
            vec![]
        } else {
            vec![ValidationIssue::error(
                "missing_required_fields",
                format!("Missing required fields: {}", missing.join(", ")),
                "frontmatter",
            )
            .with_suggestion(&format!("Add the following fields: {}", missing.join(", ")))]
        }
    }

    fn validate_field_values(&self, mapping: &Mapping) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        let id = frontmatter::get_str(mapping, "id");
        match &id {
            None => issues.push(ValidationIssue::error(
                "invalid_type",
                "Field 'id' must be a string",
                "id",
            )),
            Some(id) if !id.starts_with("mem_") => issues.push(
                ValidationIssue::warning(
                    "invalid_format",
                    format!("Memory ID '{id}' should start with 'mem_'"),
                    "id",
                )
                .with_suggestion("Use format: mem_YYYY_MM_DD_NNN"),
            ),
            Some(_) => {}
        }

        match frontmatter::get_str_list(mapping, "tags") {
            None => issues.push(
                ValidationIssue::error("invalid_type", "Field 'tags' must be a list", "tags")
                    .with_suggestion("Use YAML list syntax: tags: [tag1, tag2]"),
            ),
            Some(tags) if tags.is_empty() => issues.push(
                ValidationIssue::warning("empty_tags", "Tags list is empty", "tags")
                    .with_suggestion("Add at least one relevant tag"),
            ),
            Some(_) => {}
        }

        let scope = frontmatter::get_str(mapping, "scope");
        match scope.as_deref().map(Scope::parse) {
            Some(Some(_)) => {}
            _ => issues.push(ValidationIssue::error(
                "invalid_enum",
                format!("Invalid scope '{}'", scope.clone().unwrap_or_default()),
                "scope",
            )),
        }

        match frontmatter::get_f64(mapping, "priority") {
            Some(p) if (0.0..=1.0).contains(&p) => {}
            Some(p) => issues.push(ValidationIssue::error(
                "out_of_range",
                format!("Priority {p} is outside valid range [0.0, 1.0]"),
                "priority",
            )),
            None => issues.push(ValidationIssue::error(
                "invalid_type",
                "Field 'priority' must be a number",
                "priority",
            )),
        }

        let confidence = frontmatter::get_str(mapping, "confidence");
        match confidence.as_deref().map(Confidence::parse) {
            Some(Some(_)) => {}
            _ => issues.push(ValidationIssue::error(
                "invalid_enum",
                format!("Invalid confidence '{}'", confidence.clone().unwrap_or_default()),
                "confidence",
            )),
        }

        let status = frontmatter::get_str(mapping, "status");
        match status.as_deref().map(Status::parse) {
            Some(Some(_)) => {}
            _ => issues.push(ValidationIssue::error(
                "invalid_enum",
                format!("Invalid status '{}'", status.clone().unwrap_or_default()),
                "status",
            )),
        }

        // Cross-field consistency
        if scope.as_deref() == Some("ephemeral")
            && frontmatter::get_str(mapping, "expires").is_none()
        {
            issues.push(
                ValidationIssue::warning(
                    "missing_expires",
                    "Ephemeral memories should have an 'expires' field",
                    "expires",
                )
                .with_suggestion("Add an expiration date for ephemeral memories"),
            );
        }
        if confidence.as_deref() == Some("deprecated") && status.as_deref() != Some("deprecated") {
            issues.push(
                ValidationIssue::warning(
                    "status_mismatch",
                    "Confidence is 'deprecated' but status is not",
                    "status",
                )
                .with_suggestion("Set status to 'deprecated' to match confidence"),
            );
        }

        issues
    }

    fn validate_body(&self, body: &str) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if body.trim().is_empty() {
            issues.push(
                ValidationIssue::error("empty_body", "Memory body is empty", "body")
                    .with_suggestion("Add content after the frontmatter"),
            );
            return issues;
        }
        if crate::parser::extract_title(body).is_none() {
            issues.push(
                ValidationIssue::warning("missing_title", "No H1 heading found in body", "body")
                    .with_suggestion("Add a title using # Heading syntax"),
            );
        }
        issues
    }
}

/// Convenience filter
pub fn errors_only(issues: &[ValidationIssue]) -> Vec<&ValidationIssue> {
    issues.iter().filter(|i| i.severity == Severity::Error).collect()
}

// ============================================================================
// TESTS
// ============================================================================
