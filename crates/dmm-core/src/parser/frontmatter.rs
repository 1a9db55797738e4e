//! YAML frontmatter handling
//!
//! Memory files open with a `---` delimited YAML block. The block is kept as
//! a `serde_yaml::Mapping` so rewrites (deprecation, promotion) preserve
//! fields the core does not model.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_yaml::{Mapping, Value};

/// Error splitting or emitting a frontmatter block
#[derive(Debug, Clone, thiserror::Error)]
pub enum FrontmatterError {
    #[error("content does not start with a --- frontmatter block")]
    Missing,
    #[error("frontmatter block is not terminated with ---")]
    Unterminated,
    #[error("invalid YAML: {0}")]
    Yaml(String),
}

/// Split content into its frontmatter mapping and markdown body.
///
/// The body is returned with the single blank line separating it from the
/// closing delimiter stripped.
pub fn split(content: &str) -> Result<(Mapping, &str), FrontmatterError> {
    let trimmed = content.trim_start_matches('\u{feff}');
    let rest = trimmed
        .strip_prefix("---\n")
        .or_else(|| trimmed.strip_prefix("---\r\n"))
        .ok_or(FrontmatterError::Missing)?;

    // Find the closing delimiter on its own line.
    let mut offset = 0usize;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            let mapping = parse_yaml(yaml)?;
            return Ok((mapping, body.strip_prefix('\n').unwrap_or(body)));
        }
        offset += line.len();
    }
    Err(FrontmatterError::Unterminated)
}

fn parse_yaml(yaml: &str) -> Result<Mapping, FrontmatterError> {
    if yaml.trim().is_empty() {
        return Ok(Mapping::new());
    }
    match serde_yaml::from_str::<Value>(yaml) {
        Ok(Value::Mapping(mapping)) => Ok(mapping),
        Ok(_) => Err(FrontmatterError::Yaml(
            "frontmatter must be a mapping".to_string(),
        )),
        Err(e) => Err(FrontmatterError::Yaml(e.to_string())),
    }
}

/// Emit a full memory file from a frontmatter mapping and body
pub fn render(mapping: &Mapping, body: &str) -> Result<String, FrontmatterError> {
    let yaml =
        serde_yaml::to_string(mapping).map_err(|e| FrontmatterError::Yaml(e.to_string()))?;
    Ok(format!("---\n{yaml}---\n\n{body}"))
}

// ============================================================================
// FIELD ACCESSORS
// ============================================================================

/// Read a string field
pub fn get_str(mapping: &Mapping, key: &str) -> Option<String> {
    match mapping.get(Value::String(key.to_string())) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Read a numeric field, accepting numbers and numeric strings
pub fn get_f64(mapping: &Mapping, key: &str) -> Option<f64> {
    match mapping.get(Value::String(key.to_string()))? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read an integer field
pub fn get_i64(mapping: &Mapping, key: &str) -> Option<i64> {
    match mapping.get(Value::String(key.to_string()))? {
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

/// Read a list of strings; scalars inside the list are stringified
pub fn get_str_list(mapping: &Mapping, key: &str) -> Option<Vec<String>> {
    match mapping.get(Value::String(key.to_string()))? {
        Value::Sequence(seq) => Some(
            seq.iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect(),
        ),
        _ => None,
    }
}

/// Read a timestamp field, accepting ISO dates and common datetime shapes
pub fn get_datetime(mapping: &Mapping, key: &str) -> Option<DateTime<Utc>> {
    let raw = get_str(mapping, key)?;
    parse_datetime(&raw)
}

/// Parse an ISO date or datetime into UTC
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
    }
    None
}

/// Insert or replace a string field
pub fn set_str(mapping: &mut Mapping, key: &str, value: &str) {
    mapping.insert(
        Value::String(key.to_string()),
        Value::String(value.to_string()),
    );
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "---\nid: mem_001\ntags: [rust, memory]\npriority: 0.8\n---\n\n# Title\n\nBody text.\n";

    #[test]
    fn test_split_basic() {
        let (mapping, body) = split(SAMPLE).unwrap();
        assert_eq!(get_str(&mapping, "id").as_deref(), Some("mem_001"));
        assert_eq!(get_f64(&mapping, "priority"), Some(0.8));
        assert_eq!(
            get_str_list(&mapping, "tags"),
            Some(vec!["rust".to_string(), "memory".to_string()])
        );
        assert_eq!(body, "# Title\n\nBody text.\n");
    }

    #[test]
    fn test_split_missing_frontmatter() {
        assert!(matches!(
            split("# Just markdown\n"),
            Err(FrontmatterError::Missing)
        ));
    }

    #[test]
    fn test_split_unterminated() {
        assert!(matches!(
            split("---\nid: x\n# no closing fence\n"),
            Err(FrontmatterError::Unterminated)
        ));
    }

    #[test]
    fn test_render_roundtrip() {
        let (mapping, body) = split(SAMPLE).unwrap();
        let rendered = render(&mapping, body).unwrap();
        let (mapping2, body2) = split(&rendered).unwrap();
        assert_eq!(mapping, mapping2);
        assert_eq!(body, body2);
    }

    #[test]
    fn test_parse_datetime_shapes() {
        assert!(parse_datetime("2026-03-01").is_some());
        assert!(parse_datetime("2026-03-01T12:30:00").is_some());
        assert!(parse_datetime("2026-03-01T12:30:00Z").is_some());
        assert!(parse_datetime("2026-03-01 12:30:00").is_some());
        assert!(parse_datetime("not a date").is_none());
    }

    #[test]
    fn test_numeric_string_priority() {
        let (mapping, _) = split("---\npriority: \"0.5\"\n---\nx").unwrap();
        assert_eq!(get_f64(&mapping, "priority"), Some(0.5));
    }
}
