//! Conflict Store
//!
//! Persists conflicts, resolution log entries, and scan records. Owns its
//! own connection to the shared database (independent lock domain). The
//! partial unique index on `pair_key` enforces at most one live conflict per
//! unordered memory pair.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::types::{
    Conflict, ConflictError, ConflictStatus, ConflictType, DetectionMethod, ResolutionRequest,
    Result, ScanRecord,
};

/// Persistent store for the conflict engine
pub struct ConflictStore {
    conn: Mutex<Connection>,
}

impl ConflictStore {
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        crate::store::apply_migrations(&conn)
            .map_err(|e| ConflictError::Init(format!("migrations failed: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ConflictError::Init("conflict store lock poisoned".to_string()))
    }

    /// Persist a new conflict. Fails if a live conflict already exists for
    /// the pair.
    pub fn create(&self, conflict: &Conflict) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO conflict (
                conflict_id, pair_key, memories, conflict_type, detection_method,
                confidence, description, evidence, status, detected_at, scan_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                conflict.conflict_id,
                conflict.pair_key(),
                serde_json::to_string(&conflict.memories).unwrap_or_else(|_| "[]".to_string()),
                conflict.conflict_type.as_str(),
                conflict.detection_method.as_str(),
                conflict.confidence,
                conflict.description,
                conflict.evidence.to_string(),
                conflict.status.as_str(),
                conflict.detected_at.to_rfc3339(),
                conflict.scan_id,
            ],
        )?;
        Ok(())
    }

    /// Point lookup
    pub fn get(&self, conflict_id: &str) -> Result<Option<Conflict>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {CONFLICT_COLUMNS} FROM conflict WHERE conflict_id = ?1"),
            params![conflict_id],
            conflict_from_row,
        )
        .optional()
        .map_err(ConflictError::from)
    }

    /// Whether a live (non-dismissed) conflict exists for the pair key
    pub fn exists_for_pair(&self, pair_key: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conflict WHERE pair_key = ?1 AND status != 'dismissed'",
            params![pair_key],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Conflicts filtered by status, most recent first
    pub fn list(&self, status: Option<ConflictStatus>, limit: usize) -> Result<Vec<Conflict>> {
        let conn = self.lock()?;
        let mut out = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CONFLICT_COLUMNS} FROM conflict WHERE status = ?1
                     ORDER BY detected_at DESC, conflict_id ASC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![status.as_str(), limit as i64], conflict_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CONFLICT_COLUMNS} FROM conflict
                     ORDER BY detected_at DESC, conflict_id ASC LIMIT ?1"
                ))?;
                let rows = stmt.query_map(params![limit as i64], conflict_from_row)?;
                for row in rows {
                    out.push(row?);
                }
            }
        }
        Ok(out)
    }

    /// Transition a conflict's status, recording resolution details when
    /// moving into a resolved/dismissed state
    pub fn update_status(
        &self,
        conflict_id: &str,
        status: ConflictStatus,
        resolution: Option<&ResolutionRequest>,
    ) -> Result<()> {
        let conn = self.lock()?;
        match resolution {
            Some(request) => {
                let reason = request
                    .reason
                    .clone()
                    .or_else(|| request.dismiss_reason.clone());
                conn.execute(
                    "UPDATE conflict SET status = ?2, resolved_at = ?3, resolution_action = ?4,
                     resolution_target = ?5, resolution_reason = ?6, resolved_by = ?7
                     WHERE conflict_id = ?1",
                    params![
                        conflict_id,
                        status.as_str(),
                        Utc::now().to_rfc3339(),
                        request.action.as_str(),
                        request.target_memory_id,
                        reason,
                        request.resolved_by,
                    ],
                )?;
            }
            None => {
                conn.execute(
                    "UPDATE conflict SET status = ?2 WHERE conflict_id = ?1",
                    params![conflict_id, status.as_str()],
                )?;
            }
        }
        Ok(())
    }

    /// Append an entry to the resolution audit log
    pub fn log_resolution(
        &self,
        conflict_id: &str,
        action: &str,
        actor: &str,
        details: &serde_json::Value,
        memories_modified: &[String],
        memories_deprecated: &[String],
        memories_created: &[String],
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO resolution_log (
                conflict_id, action, actor, details,
                memories_modified, memories_deprecated, memories_created, ts
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                conflict_id,
                action,
                actor,
                details.to_string(),
                serde_json::to_string(memories_modified).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(memories_deprecated).unwrap_or_else(|_| "[]".to_string()),
                serde_json::to_string(memories_created).unwrap_or_else(|_| "[]".to_string()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Persist one scan record
    pub fn record_scan(&self, record: &ScanRecord) -> Result<()> {
        let conn = self.lock()?;
        let methods: Vec<&str> = record.methods_used.iter().map(|m| m.as_str()).collect();
        conn.execute(
            "INSERT INTO scan_log (
                scan_id, scan_type, started_at, completed_at, duration_ms,
                memories_scanned, methods_used, conflicts_detected,
                conflicts_new, conflicts_existing, errors
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.scan_id,
                record.scan_type,
                record.started_at.to_rfc3339(),
                record.completed_at.to_rfc3339(),
                record.duration_ms as i64,
                record.memories_scanned as i64,
                serde_json::to_string(&methods).unwrap_or_else(|_| "[]".to_string()),
                record.conflicts_detected as i64,
                record.conflicts_new as i64,
                record.conflicts_existing as i64,
                serde_json::to_string(&record.errors).unwrap_or_else(|_| "[]".to_string()),
            ],
        )?;
        Ok(())
    }

    /// Most recent scans first
    pub fn get_scan_history(&self, limit: usize) -> Result<Vec<ScanRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT scan_id, scan_type, started_at, completed_at, duration_ms,
                    memories_scanned, methods_used, conflicts_detected,
                    conflicts_new, conflicts_existing, errors
             FROM scan_log ORDER BY started_at DESC, scan_id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            let methods_json: String = row.get(6)?;
            let errors_json: String = row.get(10)?;
            let methods: Vec<String> = serde_json::from_str(&methods_json).unwrap_or_default();
            Ok(ScanRecord {
                scan_id: row.get(0)?,
                scan_type: row.get(1)?,
                started_at: parse_ts(row.get::<_, String>(2)?),
                completed_at: parse_ts(row.get::<_, String>(3)?),
                duration_ms: row.get::<_, i64>(4)? as u64,
                memories_scanned: row.get::<_, i64>(5)? as usize,
                methods_used: methods
                    .iter()
                    .filter_map(|m| DetectionMethod::parse(m))
                    .collect(),
                conflicts_detected: row.get::<_, i64>(7)? as usize,
                conflicts_new: row.get::<_, i64>(8)? as usize,
                conflicts_existing: row.get::<_, i64>(9)? as usize,
                errors: serde_json::from_str(&errors_json).unwrap_or_default(),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(ConflictError::from)
    }

    /// Count conflicts by status
    pub fn count_by_status(&self, status: ConflictStatus) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM conflict WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

const CONFLICT_COLUMNS: &str = "conflict_id, memories, conflict_type, detection_method, \
     confidence, description, evidence, status, detected_at, scan_id, resolved_at, \
     resolution_action, resolution_target, resolution_reason, resolved_by";

fn conflict_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conflict> {
    let memories_json: String = row.get(1)?;
    let evidence_json: String = row.get(6)?;
    let type_raw: String = row.get(2)?;
    let method_raw: String = row.get(3)?;
    let status_raw: String = row.get(7)?;
    Ok(Conflict {
        conflict_id: row.get(0)?,
        memories: serde_json::from_str(&memories_json).unwrap_or_default(),
        conflict_type: ConflictType::parse(&type_raw).unwrap_or(ConflictType::Contradictory),
        detection_method: DetectionMethod::parse(&method_raw).unwrap_or(DetectionMethod::Manual),
        confidence: row.get(4)?,
        description: row.get(5)?,
        evidence: serde_json::from_str(&evidence_json).unwrap_or(serde_json::Value::Null),
        status: ConflictStatus::parse(&status_raw).unwrap_or(ConflictStatus::Unresolved),
        detected_at: parse_ts(row.get::<_, String>(8)?),
        scan_id: row.get(9)?,
        resolved_at: row.get::<_, Option<String>>(10)?.map(parse_ts),
        resolution_action: row.get(11)?,
        resolution_target: row.get(12)?,
        resolution_reason: row.get(13)?,
        resolved_by: row.get(14)?,
    })
}

fn parse_ts(raw: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflicts::types::{generate_conflict_id, ConflictMemory, MemoryRole};
    use tempfile::TempDir;

    fn store() -> (ConflictStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = ConflictStore::new(&dir.path().join("c.db")).unwrap();
        (store, dir)
    }

    fn conflict(a: &str, b: &str) -> Conflict {
        Conflict {
            conflict_id: generate_conflict_id(),
            memories: vec![
                ConflictMemory {
                    memory_id: a.to_string(),
                    path: format!("project/{a}.md"),
                    title: a.to_string(),
                    summary: "summary".to_string(),
                    scope: "project".to_string(),
                    priority: 0.5,
                    role: MemoryRole::Primary,
                },
                ConflictMemory {
                    memory_id: b.to_string(),
                    path: format!("project/{b}.md"),
                    title: b.to_string(),
                    summary: "summary".to_string(),
                    scope: "project".to_string(),
                    priority: 0.5,
                    role: MemoryRole::Secondary,
                },
            ],
            conflict_type: ConflictType::Contradictory,
            detection_method: DetectionMethod::SemanticSimilarity,
            confidence: 0.8,
            description: "test conflict".to_string(),
            evidence: serde_json::json!({"similarity": 0.9}),
            status: ConflictStatus::Unresolved,
            detected_at: Utc::now(),
            scan_id: "scan_test".to_string(),
            resolved_at: None,
            resolution_action: None,
            resolution_target: None,
            resolution_reason: None,
            resolved_by: None,
        }
    }

    #[test]
    fn test_create_and_get() {
        let (store, _dir) = store();
        let c = conflict("mem_a", "mem_b");
        store.create(&c).unwrap();

        let loaded = store.get(&c.conflict_id).unwrap().unwrap();
        assert_eq!(loaded.memories.len(), 2);
        assert_eq!(loaded.conflict_type, ConflictType::Contradictory);
        assert_eq!(loaded.evidence["similarity"], 0.9);
    }

    #[test]
    fn test_pair_dedup_enforced() {
        let (store, _dir) = store();
        store.create(&conflict("mem_a", "mem_b")).unwrap();
        // same pair in the other order still collides
        assert!(store.create(&conflict("mem_b", "mem_a")).is_err());
        assert!(store.exists_for_pair("mem_a|mem_b").unwrap());
    }

    #[test]
    fn test_dismissed_pair_can_reopen() {
        let (store, _dir) = store();
        let c = conflict("mem_a", "mem_b");
        store.create(&c).unwrap();

        let mut request = ResolutionRequest::new(
            &c.conflict_id,
            super::super::types::ResolutionAction::Dismiss,
            "tester",
        );
        request.dismiss_reason = Some("false positive".to_string());
        store
            .update_status(&c.conflict_id, ConflictStatus::Dismissed, Some(&request))
            .unwrap();

        assert!(!store.exists_for_pair("mem_a|mem_b").unwrap());
        // a new conflict for the same pair is allowed once dismissed
        store.create(&conflict("mem_a", "mem_b")).unwrap();
    }

    #[test]
    fn test_resolution_fields_recorded() {
        let (store, _dir) = store();
        let c = conflict("mem_a", "mem_b");
        store.create(&c).unwrap();

        let mut request = ResolutionRequest::new(
            &c.conflict_id,
            super::super::types::ResolutionAction::Deprecate,
            "agent",
        );
        request.target_memory_id = Some("mem_b".to_string());
        request.reason = Some("mem_a wins".to_string());
        store
            .update_status(&c.conflict_id, ConflictStatus::Resolved, Some(&request))
            .unwrap();

        let loaded = store.get(&c.conflict_id).unwrap().unwrap();
        assert_eq!(loaded.status, ConflictStatus::Resolved);
        assert_eq!(loaded.resolution_action.as_deref(), Some("deprecate"));
        assert_eq!(loaded.resolution_target.as_deref(), Some("mem_b"));
        assert!(loaded.resolved_at.is_some());
    }

    #[test]
    fn test_scan_history() {
        let (store, _dir) = store();
        let record = ScanRecord {
            scan_id: "scan_1".to_string(),
            scan_type: "full".to_string(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            duration_ms: 12,
            memories_scanned: 5,
            methods_used: vec![DetectionMethod::TagOverlap, DetectionMethod::SemanticSimilarity],
            conflicts_detected: 2,
            conflicts_new: 1,
            conflicts_existing: 1,
            errors: vec![],
        };
        store.record_scan(&record).unwrap();

        let history = store.get_scan_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].scan_id, "scan_1");
        assert_eq!(history[0].methods_used.len(), 2);
    }
}
