//! Quality checker for proposed memory content
//!
//! Heuristics beyond the schema: token bounds, single-concept shape, title
//! and body quality, tag hygiene, and tag-title coherence. Only the token
//! hard ceiling is an error; everything else is a warning or info.

use std::collections::HashSet;

use serde_yaml::Mapping;

use crate::config::{ParserConfig, ReviewConfig};
use crate::parser::{extract_title, frontmatter, TokenCounter};
use crate::reviewer::ValidationIssue;

const VAGUE_TITLES: [&str; 7] = ["note", "notes", "info", "information", "stuff", "things", "misc"];
const VAGUE_TAGS: [&str; 6] = ["misc", "other", "general", "stuff", "info", "note"];

const RATIONALE_MARKERS: [&str; 8] = [
    "## rationale",
    "## why",
    "## reason",
    "## background",
    "## context",
    "because ",
    "due to",
    "the reason",
];

/// Checks content quality for memory files
#[derive(Debug, Clone)]
pub struct QualityChecker {
    min_tokens: usize,
    max_tokens: usize,
    hard_max_tokens: usize,
    max_title_length: usize,
    min_body_length: usize,
    min_tags: usize,
    max_tags: usize,
    counter: TokenCounter,
}

impl QualityChecker {
    pub fn new(parser_config: &ParserConfig, review_config: &ReviewConfig) -> Self {
        Self {
            min_tokens: parser_config.soft_min_tokens,
            max_tokens: parser_config.soft_max_tokens,
            hard_max_tokens: parser_config.hard_max_tokens,
            max_title_length: review_config.max_title_length,
            min_body_length: review_config.min_body_length,
            min_tags: review_config.min_tags,
            max_tags: review_config.max_tags,
            counter: TokenCounter::new(),
        }
    }

    /// Check full markdown content including frontmatter
    pub fn check(&self, content: &str) -> Vec<ValidationIssue> {
        let (mapping, body) = match frontmatter::split(content) {
            Ok(parts) => parts,
            Err(_) => {
                return vec![ValidationIssue::error(
                    "parse_error",
                    "Cannot parse content for quality check",
                    "content",
                )];
            }
        };

        let mut issues = Vec::new();
        issues.extend(self.check_token_count(body));
        issues.extend(self.check_single_concept(body));
        issues.extend(self.check_title_quality(body));
        issues.extend(self.check_body_quality(body));
        issues.extend(self.check_tag_quality(&mapping));
        issues.extend(self.check_coherence(body, &mapping));
        issues
    }

    fn check_token_count(&self, body: &str) -> Vec<ValidationIssue> {
        let token_count = self.counter.count(body);
        if token_count > self.hard_max_tokens {
            vec![ValidationIssue::error(
                "token_count_hard_limit",
                format!(
                    "Token count {token_count} exceeds hard limit {}",
                    self.hard_max_tokens
                ),
                "body",
            )
            .with_suggestion("Split this memory into multiple smaller memories")]
        } else if token_count > self.max_tokens {
            vec![ValidationIssue::warning(
                "token_count_high",
                format!(
                    "Token count {token_count} exceeds recommended maximum {}",
                    self.max_tokens
                ),
                "body",
            )
            .with_suggestion("Consider splitting into multiple memories for better retrieval")]
        } else if token_count < self.min_tokens {
            vec![ValidationIssue::warning(
                "token_count_low",
                format!(
                    "Token count {token_count} below recommended minimum {}",
                    self.min_tokens
                ),
                "body",
            )
            .with_suggestion("Consider adding more context or rationale")]
        } else {
            vec![]
        }
    }

    fn check_single_concept(&self, body: &str) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let h1_count = heading_count(body, 1);
        if h1_count > 1 {
            issues.push(
                ValidationIssue::error(
                    "multiple_concepts",
                    format!("Found {h1_count} H1 headings - memory should have single main topic"),
                    "body",
                )
                .with_suggestion("Split into separate memories, one per main concept"),
            );
        }
        let h2_count = heading_count(body, 2);
        if h2_count > 5 {
            issues.push(
                ValidationIssue::warning(
                    "too_many_sections",
                    format!("Found {h2_count} sections - memory may be too broad"),
                    "body",
                )
                .with_suggestion("Consider focusing on fewer aspects"),
            );
        }
        issues
    }

    fn check_title_quality(&self, body: &str) -> Vec<ValidationIssue> {
        let Some(title) = extract_title(body) else {
            return vec![ValidationIssue::warning(
                "missing_title",
                "No H1 title found",
                "body",
            )
            .with_suggestion("Add a descriptive title using # Heading syntax")];
        };

        let mut issues = Vec::new();
        if title.len() > self.max_title_length {
            issues.push(
                ValidationIssue::warning(
                    "title_too_long",
                    format!(
                        "Title length {} exceeds maximum {}",
                        title.len(),
                        self.max_title_length
                    ),
                    "body",
                )
                .with_suggestion("Use a shorter, more concise title"),
            );
        }
        if title.len() < 5 {
            issues.push(
                ValidationIssue::warning(
                    "title_too_short",
                    "Title is too short to be descriptive",
                    "body",
                )
                .with_suggestion("Use a more descriptive title"),
            );
        }
        if VAGUE_TITLES.contains(&title.to_lowercase().as_str()) {
            issues.push(
                ValidationIssue::warning(
                    "vague_title",
                    format!("Title '{title}' is too vague"),
                    "body",
                )
                .with_suggestion("Use a specific, descriptive title"),
            );
        }
        issues
    }

    fn check_body_quality(&self, body: &str) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        let body_without_title: String = body
            .lines()
            .filter(|line| !line.trim_start().starts_with("# "))
            .collect::<Vec<_>>()
            .join("\n");
        let body_text = body_without_title.trim();

        if body_text.len() < self.min_body_length {
            issues.push(
                ValidationIssue::warning(
                    "body_too_short",
                    format!("Body content is too short ({} chars)", body_text.len()),
                    "body",
                )
                .with_suggestion("Add more context, rationale, or details"),
            );
        }

        let lowered = body.to_lowercase();
        let has_rationale = RATIONALE_MARKERS.iter().any(|m| lowered.contains(m));
        if !has_rationale {
            issues.push(
                ValidationIssue::info(
                    "missing_rationale",
                    "No rationale or reasoning found",
                    "body",
                )
                .with_suggestion("Consider adding a Rationale section explaining why"),
            );
        }

        issues
    }

    fn check_tag_quality(&self, mapping: &Mapping) -> Vec<ValidationIssue> {
        let Some(tags) = frontmatter::get_str_list(mapping, "tags") else {
            return vec![];
        };

        let mut issues = Vec::new();
        if tags.len() < self.min_tags {
            issues.push(
                ValidationIssue::warning(
                    "too_few_tags",
                    format!(
                        "Only {} tag(s) - minimum recommended is {}",
                        tags.len(),
                        self.min_tags
                    ),
                    "tags",
                )
                .with_suggestion("Add more relevant tags for better retrieval"),
            );
        }
        if tags.len() > self.max_tags {
            issues.push(
                ValidationIssue::warning(
                    "too_many_tags",
                    format!(
                        "Found {} tags - maximum recommended is {}",
                        tags.len(),
                        self.max_tags
                    ),
                    "tags",
                )
                .with_suggestion("Focus on the most relevant tags"),
            );
        }
        for tag in &tags {
            if VAGUE_TAGS.contains(&tag.to_lowercase().as_str()) {
                issues.push(
                    ValidationIssue::info(
                        "vague_tag",
                        format!("Tag '{tag}' is too vague"),
                        "tags",
                    )
                    .with_suggestion("Use more specific, descriptive tags"),
                );
            }
        }
        let unique: HashSet<&String> = tags.iter().collect();
        if unique.len() != tags.len() {
            issues.push(
                ValidationIssue::warning("duplicate_tags", "Duplicate tags found", "tags")
                    .with_suggestion("Remove duplicate tags"),
            );
        }
        issues
    }

    fn check_coherence(&self, body: &str, mapping: &Mapping) -> Vec<ValidationIssue> {
        let Some(title) = extract_title(body) else {
            return vec![];
        };
        let Some(tags) = frontmatter::get_str_list(mapping, "tags") else {
            return vec![];
        };

        let stop_words: HashSet<&str> =
            ["the", "and", "for", "with", "this", "that", "from", "have", "are"]
                .into_iter()
                .collect();
        let title_words: HashSet<String> = significant_words(&title)
            .into_iter()
            .filter(|w| !stop_words.contains(w.as_str()))
            .collect();
        let tag_words: HashSet<String> = tags
            .iter()
            .flat_map(|t| significant_words(t))
            .filter(|w| !stop_words.contains(w.as_str()))
            .collect();

        if title_words.len() > 2
            && tag_words.len() > 2
            && title_words.is_disjoint(&tag_words)
        {
            return vec![ValidationIssue::info(
                "low_coherence",
                "Title and tags appear unrelated",
                "tags",
            )
            .with_suggestion("Ensure tags reflect the main topic in the title")];
        }
        vec![]
    }
}

/// Count headings of exactly the given level
fn heading_count(body: &str, level: usize) -> usize {
    let prefix: String = "#".repeat(level) + " ";
    let deeper: String = "#".repeat(level + 1);
    body.lines()
        .map(str::trim_start)
        .filter(|line| line.starts_with(&prefix) && !line.starts_with(&deeper))
        .count()
}

/// Lowercase alphabetic words of length >= 3
fn significant_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(str::to_string)
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reviewer::{has_errors, Severity};

    fn checker() -> QualityChecker {
        QualityChecker::new(&ParserConfig::default(), &ReviewConfig::default())
    }

    fn content(title: &str, tags: &str, body: &str) -> String {
        format!(
            "---\nid: mem_x\ntags: {tags}\nscope: project\npriority: 0.5\nconfidence: active\nstatus: active\n---\n\n# {title}\n\n{body}\n"
        )
    }

    #[test]
    fn test_reasonable_content_has_no_errors() {
        let body = "We chose JWT tokens because sessions do not survive restarts. ".repeat(12);
        let issues = checker().check(&content("Authentication Tokens", "[auth, jwt]", &body));
        assert!(!has_errors(&issues), "{issues:?}");
    }

    #[test]
    fn test_multiple_h1_is_error() {
        let body = "First part.\n\n# Second Concept\n\nSecond part because reasons.";
        let issues = checker().check(&content("First Concept", "[auth, jwt]", body));
        assert!(issues.iter().any(|i| i.code == "multiple_concepts" && i.severity == Severity::Error));
    }

    #[test]
    fn test_too_many_sections_warns() {
        let body = (1..=6)
            .map(|i| format!("## Section {i}\n\ntext because reasons"))
            .collect::<Vec<_>>()
            .join("\n\n");
        let issues = checker().check(&content("Broad Memory", "[auth, jwt]", &body));
        assert!(issues.iter().any(|i| i.code == "too_many_sections"));
    }

    #[test]
    fn test_vague_title_warns() {
        let issues = checker().check(&content("Notes", "[auth, jwt]", "Body because reasons."));
        assert!(issues.iter().any(|i| i.code == "vague_title"));
    }

    #[test]
    fn test_tag_count_bounds() {
        let few = checker().check(&content("Auth Tokens", "[auth]", "Body because reasons."));
        assert!(few.iter().any(|i| i.code == "too_few_tags"));

        let many = checker().check(&content(
            "Auth Tokens",
            "[a1, a2, a3, a4, a5, a6, a7, a8, a9]",
            "Body because reasons.",
        ));
        assert!(many.iter().any(|i| i.code == "too_many_tags"));
    }

    #[test]
    fn test_duplicate_tags() {
        let issues = checker().check(&content("Auth Tokens", "[auth, auth]", "Body because reasons."));
        assert!(issues.iter().any(|i| i.code == "duplicate_tags"));
    }

    #[test]
    fn test_missing_rationale_is_info() {
        let issues = checker().check(&content(
            "Auth Tokens",
            "[auth, jwt]",
            "Plain statement with no justification at all here.",
        ));
        let rationale = issues.iter().find(|i| i.code == "missing_rationale").unwrap();
        assert_eq!(rationale.severity, Severity::Info);
    }

    #[test]
    fn test_low_coherence_info() {
        let issues = checker().check(&content(
            "Kubernetes Cluster Sizing Guidance",
            "[frontend, styling, buttons]",
            "Body because reasons.",
        ));
        assert!(issues.iter().any(|i| i.code == "low_coherence"));
    }

    #[test]
    fn test_heading_count() {
        let body = "# One\n## A\n## B\n### deep\n# Two\n";
        assert_eq!(heading_count(body, 1), 2);
        assert_eq!(heading_count(body, 2), 2);
    }
}
