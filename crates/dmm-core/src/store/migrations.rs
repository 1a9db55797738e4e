//! Database Migrations
//!
//! Numbered schema migrations for the unified store. All subsystem tables
//! (memory index, proposal queue, conflicts, scan log) live in one database
//! so a single version number describes the on-disk schema.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Memory index: records, dual embeddings, system meta",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Write pipeline: proposal queue and history log",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "Conflict engine: conflicts, resolution log, scan log",
        up: MIGRATION_V3_UP,
    },
    Migration {
        version: 4,
        description: "Query telemetry",
        up: MIGRATION_V4_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: memory index
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memory (
    id TEXT PRIMARY KEY,
    path TEXT NOT NULL UNIQUE,
    directory TEXT NOT NULL,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    token_count INTEGER NOT NULL DEFAULT 0,
    tags TEXT NOT NULL DEFAULT '[]',
    scope TEXT NOT NULL,
    priority REAL NOT NULL DEFAULT 0.5,
    confidence TEXT NOT NULL,
    status TEXT NOT NULL,
    created TEXT,
    last_used TEXT,
    expires TEXT,
    usage_count INTEGER NOT NULL DEFAULT 0,
    supersedes TEXT NOT NULL DEFAULT '[]',
    related TEXT NOT NULL DEFAULT '[]',
    file_hash TEXT NOT NULL,
    indexed_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_memory_path ON memory(path);
CREATE INDEX IF NOT EXISTS idx_memory_directory ON memory(directory);
CREATE INDEX IF NOT EXISTS idx_memory_scope ON memory(scope);
CREATE INDEX IF NOT EXISTS idx_memory_status ON memory(status);
CREATE INDEX IF NOT EXISTS idx_memory_priority ON memory(priority);

-- Both vectors in one row: they are written in the same transaction as the
-- memory record and can never be observed out of sync.
CREATE TABLE IF NOT EXISTS embedding (
    memory_id TEXT PRIMARY KEY REFERENCES memory(id) ON DELETE CASCADE,
    directory_embedding BLOB NOT NULL,
    composite_embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    model TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Flat key/value metadata: schema_version, embedder_version,
-- tokenizer_version, last_full_reindex_at
CREATE TABLE IF NOT EXISTS system_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: write pipeline
const MIGRATION_V2_UP: &str = r#"
CREATE TABLE IF NOT EXISTS proposal (
    proposal_id TEXT PRIMARY KEY,
    proposal_type TEXT NOT NULL,
    target_path TEXT NOT NULL,
    memory_id TEXT,
    content TEXT,
    reason TEXT NOT NULL DEFAULT '',
    deprecation_reason TEXT,
    new_scope TEXT,
    source_scope TEXT,
    proposed_by TEXT NOT NULL DEFAULT 'agent',
    status TEXT NOT NULL DEFAULT 'pending',
    review_notes TEXT,
    commit_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_proposal_status ON proposal(status);
CREATE INDEX IF NOT EXISTS idx_proposal_path ON proposal(target_path);
CREATE INDEX IF NOT EXISTS idx_proposal_created ON proposal(created_at);

-- Append-only status history
CREATE TABLE IF NOT EXISTS proposal_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    proposal_id TEXT NOT NULL,
    from_status TEXT,
    to_status TEXT NOT NULL,
    action TEXT NOT NULL,
    notes TEXT,
    ts TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_proposal_history_id ON proposal_history(proposal_id);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: conflict engine
const MIGRATION_V3_UP: &str = r#"
CREATE TABLE IF NOT EXISTS conflict (
    conflict_id TEXT PRIMARY KEY,
    pair_key TEXT NOT NULL,
    memories TEXT NOT NULL,
    conflict_type TEXT NOT NULL,
    detection_method TEXT NOT NULL,
    confidence REAL NOT NULL,
    description TEXT NOT NULL,
    evidence TEXT NOT NULL DEFAULT '{}',
    status TEXT NOT NULL DEFAULT 'unresolved',
    detected_at TEXT NOT NULL,
    scan_id TEXT NOT NULL,
    resolved_at TEXT,
    resolution_action TEXT,
    resolution_target TEXT,
    resolution_reason TEXT,
    resolved_by TEXT
);

-- Dedup key: one live conflict per unordered memory pair
CREATE UNIQUE INDEX IF NOT EXISTS idx_conflict_pair_live
    ON conflict(pair_key) WHERE status != 'dismissed';
CREATE INDEX IF NOT EXISTS idx_conflict_status ON conflict(status);
CREATE INDEX IF NOT EXISTS idx_conflict_detected ON conflict(detected_at);

CREATE TABLE IF NOT EXISTS resolution_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conflict_id TEXT NOT NULL,
    action TEXT NOT NULL,
    actor TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '{}',
    memories_modified TEXT NOT NULL DEFAULT '[]',
    memories_deprecated TEXT NOT NULL DEFAULT '[]',
    memories_created TEXT NOT NULL DEFAULT '[]',
    ts TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_resolution_log_conflict ON resolution_log(conflict_id);

CREATE TABLE IF NOT EXISTS scan_log (
    scan_id TEXT PRIMARY KEY,
    scan_type TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT NOT NULL,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    memories_scanned INTEGER NOT NULL DEFAULT 0,
    methods_used TEXT NOT NULL DEFAULT '[]',
    conflicts_detected INTEGER NOT NULL DEFAULT 0,
    conflicts_new INTEGER NOT NULL DEFAULT 0,
    conflicts_existing INTEGER NOT NULL DEFAULT 0,
    errors TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_scan_log_started ON scan_log(started_at);

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// V4: optional query telemetry
const MIGRATION_V4_UP: &str = r#"
CREATE TABLE IF NOT EXISTS query_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query TEXT NOT NULL,
    budget INTEGER NOT NULL,
    included INTEGER NOT NULL,
    excluded INTEGER NOT NULL,
    truncated INTEGER NOT NULL DEFAULT 0,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    ts TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_query_log_ts ON query_log(ts);

UPDATE schema_version SET version = 4, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply_in_order() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let applied = apply_migrations(&conn).unwrap();
        assert_eq!(applied as usize, MIGRATIONS.len());
        assert_eq!(
            get_current_version(&conn).unwrap(),
            MIGRATIONS.last().unwrap().version
        );
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        let applied_again = apply_migrations(&conn).unwrap();
        assert_eq!(applied_again, 0);
    }

    #[test]
    fn test_versions_are_sequential() {
        for (i, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version as usize, i + 1);
        }
    }
}
