//! Memory File Parser
//!
//! Reads a memory markdown file, validates its frontmatter schema, extracts
//! the title, counts tokens with the pinned tokenizer, and computes the
//! SHA-256 file hash used for change detection.
//!
//! Schema violations are terminal (`SchemaValidationError`); everything else
//! the parser can recover from becomes a [`ValidationWarning`] attached to
//! the [`ParseResult`].

pub mod frontmatter;
mod tokens;

pub use tokens::{TokenCounter, TOKENIZER_VERSION};

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};

use crate::config::ParserConfig;
use crate::memory::{Confidence, MemoryFile, Scope, Status};

/// Frontmatter fields that must be present
pub const REQUIRED_FIELDS: [&str; 6] = ["id", "tags", "scope", "priority", "confidence", "status"];

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Terminal schema failure for a memory file
#[derive(Debug, Clone, thiserror::Error)]
#[error("schema validation failed for {path}: {message}")]
pub struct SchemaValidationError {
    pub path: String,
    pub message: String,
    pub missing_fields: Vec<String>,
    /// (field, problem) pairs
    pub invalid_fields: Vec<(String, String)>,
}

/// Parse error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// Frontmatter block missing or malformed
    #[error("invalid frontmatter in {path}: {message}")]
    Frontmatter { path: String, message: String },
    /// Frontmatter present but schema-invalid
    #[error(transparent)]
    Schema(#[from] SchemaValidationError),
}

// ============================================================================
// WARNINGS
// ============================================================================

/// Non-fatal finding from parsing a memory file
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidationWarning {
    pub path: String,
    /// Stable machine-readable kind, e.g. `missing_title`
    pub kind: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl ValidationWarning {
    fn new(path: &str, kind: &str, message: String, suggestion: Option<&str>) -> Self {
        Self {
            path: path.to_string(),
            kind: kind.to_string(),
            message,
            suggestion: suggestion.map(str::to_string),
        }
    }
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.path, self.message)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (suggestion: {suggestion})")?;
        }
        Ok(())
    }
}

/// Result of parsing a memory file
#[derive(Debug, Default)]
pub struct ParseResult {
    pub memory: Option<MemoryFile>,
    pub warnings: Vec<ValidationWarning>,
    pub error: Option<ParseError>,
}

impl ParseResult {
    pub fn success(&self) -> bool {
        self.memory.is_some() && self.error.is_none()
    }

    fn failed(error: ParseError, warnings: Vec<ValidationWarning>) -> Self {
        Self {
            memory: None,
            warnings,
            error: Some(error),
        }
    }
}

// ============================================================================
// HASHING
// ============================================================================

/// SHA-256 of raw bytes, hex-encoded
pub fn hash_bytes(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

// ============================================================================
// PARSER
// ============================================================================

/// Parser for memory markdown files
#[derive(Debug, Clone)]
pub struct MemoryParser {
    memory_root: PathBuf,
    min_tokens: usize,
    max_tokens: usize,
    hard_max_tokens: usize,
    counter: TokenCounter,
}

impl MemoryParser {
    pub fn new(memory_root: impl Into<PathBuf>, config: &ParserConfig) -> Self {
        Self {
            memory_root: memory_root.into(),
            min_tokens: config.soft_min_tokens,
            max_tokens: config.soft_max_tokens,
            hard_max_tokens: config.hard_max_tokens,
            counter: TokenCounter::new(),
        }
    }

    pub fn token_counter(&self) -> TokenCounter {
        self.counter
    }

    /// Parse a memory file from disk
    pub fn parse(&self, path: &Path) -> ParseResult {
        let rel_path = self.normalize_path(path);
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                return ParseResult::failed(
                    ParseError::Io {
                        path: rel_path,
                        source: e,
                    },
                    vec![],
                );
            }
        };
        let content = match std::str::from_utf8(&bytes) {
            Ok(content) => content,
            Err(e) => {
                return ParseResult::failed(
                    ParseError::Frontmatter {
                        path: rel_path,
                        message: format!("file is not valid UTF-8: {e}"),
                    },
                    vec![],
                );
            }
        };
        self.parse_inner(&rel_path, content, hash_bytes(&bytes))
    }

    /// Parse already-loaded content (used by the reviewer and commit engine,
    /// where the file need not exist yet)
    pub fn parse_content(&self, rel_path: &str, content: &str) -> ParseResult {
        self.parse_inner(rel_path, content, hash_bytes(content.as_bytes()))
    }

    fn parse_inner(&self, rel_path: &str, content: &str, file_hash: String) -> ParseResult {
        let mut warnings = Vec::new();

        let (mapping, body) = match frontmatter::split(content) {
            Ok(parts) => parts,
            Err(e) => {
                return ParseResult::failed(
                    ParseError::Frontmatter {
                        path: rel_path.to_string(),
                        message: e.to_string(),
                    },
                    warnings,
                );
            }
        };

        if let Some(error) = self.validate_schema(rel_path, &mapping) {
            return ParseResult::failed(ParseError::Schema(error), warnings);
        }

        let title = match extract_title(body) {
            Some(title) => title,
            None => {
                warnings.push(ValidationWarning::new(
                    rel_path,
                    "missing_title",
                    "No H1 heading found in content".to_string(),
                    Some("Add a title using # Heading syntax"),
                ));
                fallback_title(rel_path)
            }
        };

        let token_count = self.counter.count(body);
        if token_count < self.min_tokens {
            warnings.push(ValidationWarning::new(
                rel_path,
                "low_token_count",
                format!(
                    "Token count {token_count} below recommended minimum {}",
                    self.min_tokens
                ),
                Some("Consider expanding the content with more context"),
            ));
        } else if token_count > self.max_tokens {
            warnings.push(ValidationWarning::new(
                rel_path,
                "high_token_count",
                format!(
                    "Token count {token_count} exceeds recommended maximum {}",
                    self.max_tokens
                ),
                Some("Consider splitting into multiple memory files"),
            ));
        }

        if token_count > self.hard_max_tokens {
            return ParseResult::failed(
                ParseError::Schema(SchemaValidationError {
                    path: rel_path.to_string(),
                    message: format!(
                        "token count {token_count} exceeds hard limit {}",
                        self.hard_max_tokens
                    ),
                    missing_fields: vec![],
                    invalid_fields: vec![(
                        "body".to_string(),
                        format!("token count {token_count} over hard ceiling"),
                    )],
                }),
                warnings,
            );
        }

        // Schema validation guarantees the required fields below are present
        // and well-formed.
        let scope = Scope::parse(&frontmatter::get_str(&mapping, "scope").unwrap_or_default())
            .unwrap_or(Scope::Project);
        let confidence =
            Confidence::parse(&frontmatter::get_str(&mapping, "confidence").unwrap_or_default())
                .unwrap_or(Confidence::Active);
        let status = Status::parse(&frontmatter::get_str(&mapping, "status").unwrap_or_default())
            .unwrap_or(Status::Active);

        let memory = MemoryFile {
            id: frontmatter::get_str(&mapping, "id").unwrap_or_default(),
            path: rel_path.to_string(),
            title,
            body: body.to_string(),
            token_count,
            tags: frontmatter::get_str_list(&mapping, "tags").unwrap_or_default(),
            scope,
            priority: frontmatter::get_f64(&mapping, "priority").unwrap_or(0.0),
            confidence,
            status,
            created: frontmatter::get_datetime(&mapping, "created"),
            last_used: frontmatter::get_datetime(&mapping, "last_used"),
            expires: frontmatter::get_datetime(&mapping, "expires"),
            usage_count: frontmatter::get_i64(&mapping, "usage_count").unwrap_or(0),
            supersedes: frontmatter::get_str_list(&mapping, "supersedes").unwrap_or_default(),
            related: frontmatter::get_str_list(&mapping, "related").unwrap_or_default(),
            file_hash,
        };

        if memory.tags.is_empty() {
            warnings.push(ValidationWarning::new(
                rel_path,
                "empty_tags",
                "No tags specified".to_string(),
                Some("Add relevant tags for better retrieval"),
            ));
        }
        if memory.scope == Scope::Ephemeral && memory.expires.is_none() {
            warnings.push(ValidationWarning::new(
                rel_path,
                "ephemeral_no_expiry",
                "Ephemeral memory without expiration date".to_string(),
                Some("Add an 'expires' field"),
            ));
        }
        if memory.confidence == Confidence::Deprecated && memory.status != Status::Deprecated {
            warnings.push(ValidationWarning::new(
                rel_path,
                "status_mismatch",
                "Confidence is 'deprecated' but status is not".to_string(),
                Some("Set status to 'deprecated'"),
            ));
        }

        ParseResult {
            memory: Some(memory),
            warnings,
            error: None,
        }
    }

    fn validate_schema(&self, rel_path: &str, mapping: &Mapping) -> Option<SchemaValidationError> {
        let missing: Vec<String> = REQUIRED_FIELDS
            .iter()
            .filter(|f| !mapping.contains_key(Value::String((*f).to_string())))
            .map(|f| (*f).to_string())
            .collect();
        if !missing.is_empty() {
            return Some(SchemaValidationError {
                path: rel_path.to_string(),
                message: format!("missing required fields: {}", missing.join(", ")),
                missing_fields: missing,
                invalid_fields: vec![],
            });
        }

        let mut invalid: Vec<(String, String)> = Vec::new();

        if frontmatter::get_str(mapping, "id").is_none() {
            invalid.push(("id".to_string(), "must be a string".to_string()));
        }
        if frontmatter::get_str_list(mapping, "tags").is_none() {
            invalid.push(("tags".to_string(), "must be a list of strings".to_string()));
        }
        match frontmatter::get_str(mapping, "scope").as_deref().map(Scope::parse) {
            Some(Some(_)) => {}
            _ => invalid.push((
                "scope".to_string(),
                "must be one of baseline, global, agent, project, ephemeral, deprecated"
                    .to_string(),
            )),
        }
        match frontmatter::get_f64(mapping, "priority") {
            Some(p) if (0.0..=1.0).contains(&p) => {}
            Some(_) => invalid.push((
                "priority".to_string(),
                "must be between 0.0 and 1.0".to_string(),
            )),
            None => invalid.push((
                "priority".to_string(),
                "must be a number between 0.0 and 1.0".to_string(),
            )),
        }
        match frontmatter::get_str(mapping, "confidence")
            .as_deref()
            .map(Confidence::parse)
        {
            Some(Some(_)) => {}
            _ => invalid.push((
                "confidence".to_string(),
                "must be one of stable, active, tentative, deprecated".to_string(),
            )),
        }
        match frontmatter::get_str(mapping, "status").as_deref().map(Status::parse) {
            Some(Some(_)) => {}
            _ => invalid.push((
                "status".to_string(),
                "must be one of active, draft, deprecated, archived".to_string(),
            )),
        }

        if invalid.is_empty() {
            None
        } else {
            let message = invalid
                .iter()
                .map(|(field, problem)| format!("{field} {problem}"))
                .collect::<Vec<_>>()
                .join("; ");
            Some(SchemaValidationError {
                path: rel_path.to_string(),
                message,
                missing_fields: vec![],
                invalid_fields: invalid,
            })
        }
    }

    /// Normalize an absolute path to a memory-root-relative `/`-separated one
    fn normalize_path(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.memory_root).unwrap_or(path);
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                std::path::Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            parts.join("/")
        }
    }
}

/// Extract the first top-level `# ` heading
pub fn extract_title(body: &str) -> Option<String> {
    for line in body.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("# ") {
            let title = rest.trim().trim_end_matches('#').trim();
            if !title.is_empty() {
                return Some(title.to_string());
            }
        }
    }
    None
}

/// Derive a title from the file stem: `no_async-rule.md` -> `No Async Rule`
fn fallback_title(rel_path: &str) -> String {
    let stem = rel_path
        .rsplit('/')
        .next()
        .unwrap_or(rel_path)
        .trim_end_matches(".md");
    stem.split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

// ============================================================================
// TESTS
// ============================================================================
