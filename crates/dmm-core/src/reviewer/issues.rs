//! Validation issue type shared by the precheck and review stages

use serde::{Deserialize, Serialize};

/// Severity of a validation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// One finding from a validator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Stable machine-readable code, e.g. `missing_frontmatter`
    pub code: String,
    pub message: String,
    pub severity: Severity,
    /// Field the issue is about (`content`, `tags`, `target_path`, ...)
    pub field: String,
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn error(code: &str, message: impl Into<String>, field: &str) -> Self {
        Self::new(code, message, Severity::Error, field, None)
    }

    pub fn warning(code: &str, message: impl Into<String>, field: &str) -> Self {
        Self::new(code, message, Severity::Warning, field, None)
    }

    pub fn info(code: &str, message: impl Into<String>, field: &str) -> Self {
        Self::new(code, message, Severity::Info, field, None)
    }

    pub fn new(
        code: &str,
        message: impl Into<String>,
        severity: Severity,
        field: &str,
        suggestion: Option<&str>,
    ) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            severity,
            field: field.to_string(),
            suggestion: suggestion.map(str::to_string),
        }
    }

    pub fn with_suggestion(mut self, suggestion: &str) -> Self {
        self.suggestion = Some(suggestion.to_string());
        self
    }
}

/// Whether any issue in the list is an error
pub fn has_errors(issues: &[ValidationIssue]) -> bool {
    issues.iter().any(|i| i.severity == Severity::Error)
}

/// Count issues at warning severity
pub fn warning_count(issues: &[ValidationIssue]) -> usize {
    issues.iter().filter(|i| i.severity == Severity::Warning).count()
}
