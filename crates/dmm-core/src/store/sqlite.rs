//! SQLite Storage Implementation
//!
//! One database holds every subsystem table. This type owns the memory index
//! surface: memory records, their dual embeddings, system metadata, and the
//! query telemetry log. The proposal queue and conflict store open their own
//! connections to the same file (independent lock domains), which WAL mode
//! supports.
//!
//! Uses separate reader/writer connections behind mutexes so all methods take
//! `&self` and `Storage` is `Send + Sync`. Readers see a WAL snapshot: either
//! the pre- or post-commit state of any upsert, never a half-written row.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use crate::embedder::{cosine_similarity, vector_from_bytes, vector_to_bytes, MemoryVectors};
use crate::memory::{Confidence, MemoryFile, MemoryStats, Scope, SearchFilters, Status};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Storage error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Initialization error
    #[error("initialization error: {0}")]
    Init(String),
    /// Vector dimension does not match the store's configured dimension
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    /// Violated invariant surfaced from the data itself
    #[error("integrity error: {0}")]
    Integrity(String),
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// STORAGE
// ============================================================================

const MEMORY_COLUMNS: &str = "id, path, directory, title, body, token_count, tags, scope, \
     priority, confidence, status, created, last_used, expires, usage_count, supersedes, \
     related, file_hash";

/// Main storage struct for the memory index
pub struct Storage {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    dimensions: usize,
    db_path: PathBuf,
}

impl Storage {
    /// Apply PRAGMAs to a connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Create a new storage instance.
    ///
    /// `db_path = None` uses the platform data directory. `dimensions` is the
    /// embedder's vector dimension; upserts with any other length are
    /// rejected.
    pub fn new(db_path: Option<PathBuf>, dimensions: usize) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let proj_dirs = ProjectDirs::from("dev", "dmm", "core").ok_or_else(|| {
                    StoreError::Init("could not determine project directories".to_string())
                })?;
                let data_dir = proj_dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                data_dir.join("dmm.db")
            }
        };

        let writer_conn = Connection::open(&path)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        Ok(Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            dimensions,
            db_path: path,
        })
    }

    /// Path of the backing database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Configured embedding dimension
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn read(&self) -> Result<MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| StoreError::Init("reader lock poisoned".to_string()))
    }

    fn write(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Init("writer lock poisoned".to_string()))
    }

    // ========================================================================
    // MEMORY RECORDS
    // ========================================================================

    /// Atomic replace-by-id of a memory record and both its vectors.
    ///
    /// Both embeddings land in the same transaction as the record, so a
    /// reader never observes them out of sync.
    pub fn upsert_memory(&self, memory: &MemoryFile, vectors: &MemoryVectors, model: &str) -> Result<()> {
        for vector in [&vectors.directory, &vectors.composite] {
            if vector.len() != self.dimensions {
                return Err(StoreError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: vector.len(),
                });
            }
        }

        let now = Utc::now().to_rfc3339();
        let tags = serde_json::to_string(&memory.tags).unwrap_or_else(|_| "[]".to_string());
        let supersedes =
            serde_json::to_string(&memory.supersedes).unwrap_or_else(|_| "[]".to_string());
        let related = serde_json::to_string(&memory.related).unwrap_or_else(|_| "[]".to_string());

        let mut writer = self.write()?;
        let tx = writer.transaction()?;
        tx.execute(
            "INSERT INTO memory (
                id, path, directory, title, body, token_count, tags, scope,
                priority, confidence, status, created, last_used, expires,
                usage_count, supersedes, related, file_hash, indexed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
            ON CONFLICT(id) DO UPDATE SET
                path = excluded.path,
                directory = excluded.directory,
                title = excluded.title,
                body = excluded.body,
                token_count = excluded.token_count,
                tags = excluded.tags,
                scope = excluded.scope,
                priority = excluded.priority,
                confidence = excluded.confidence,
                status = excluded.status,
                created = excluded.created,
                last_used = excluded.last_used,
                expires = excluded.expires,
                usage_count = excluded.usage_count,
                supersedes = excluded.supersedes,
                related = excluded.related,
                file_hash = excluded.file_hash,
                indexed_at = excluded.indexed_at",
            params![
                memory.id,
                memory.path,
                memory.directory(),
                memory.title,
                memory.body,
                memory.token_count as i64,
                tags,
                memory.scope.as_str(),
                memory.priority,
                memory.confidence.as_str(),
                memory.status.as_str(),
                memory.created.map(|t| t.to_rfc3339()),
                memory.last_used.map(|t| t.to_rfc3339()),
                memory.expires.map(|t| t.to_rfc3339()),
                memory.usage_count,
                supersedes,
                related,
                memory.file_hash,
                now,
            ],
        )?;
        tx.execute(
            "INSERT INTO embedding (memory_id, directory_embedding, composite_embedding, dimensions, model, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(memory_id) DO UPDATE SET
                directory_embedding = excluded.directory_embedding,
                composite_embedding = excluded.composite_embedding,
                dimensions = excluded.dimensions,
                model = excluded.model,
                updated_at = excluded.updated_at",
            params![
                memory.id,
                vector_to_bytes(&vectors.directory),
                vector_to_bytes(&vectors.composite),
                self.dimensions as i64,
                model,
                now,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Point lookup by id
    pub fn get_memory(&self, id: &str) -> Result<Option<MemoryFile>> {
        let reader = self.read()?;
        let sql = format!("SELECT {MEMORY_COLUMNS} FROM memory WHERE id = ?1");
        reader
            .query_row(&sql, params![id], memory_from_row)
            .optional()
            .map_err(StoreError::from)?
            .transpose()
    }

    /// Point lookup by memory-root-relative path
    pub fn get_memory_by_path(&self, path: &str) -> Result<Option<MemoryFile>> {
        let reader = self.read()?;
        let sql = format!("SELECT {MEMORY_COLUMNS} FROM memory WHERE path = ?1");
        reader
            .query_row(&sql, params![path], memory_from_row)
            .optional()
            .map_err(StoreError::from)?
            .transpose()
    }

    /// Delete by id; embeddings cascade
    pub fn delete_memory(&self, id: &str) -> Result<bool> {
        let writer = self.write()?;
        let deleted = writer.execute("DELETE FROM memory WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// Delete by path; embeddings cascade
    pub fn delete_memory_by_path(&self, path: &str) -> Result<bool> {
        let writer = self.write()?;
        let deleted = writer.execute("DELETE FROM memory WHERE path = ?1", params![path])?;
        Ok(deleted > 0)
    }

    /// File hash for change detection without reparsing
    pub fn get_file_hash(&self, path: &str) -> Result<Option<String>> {
        let reader = self.read()?;
        reader
            .query_row(
                "SELECT file_hash FROM memory WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// All indexed paths (used by the reindex deletion pass)
    pub fn get_all_paths(&self) -> Result<Vec<String>> {
        let reader = self.read()?;
        let mut stmt = reader.prepare("SELECT path FROM memory")?;
        let paths = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(paths)
    }

    /// Active baseline memories, priority descending then id ascending
    pub fn get_baseline_memories(&self) -> Result<Vec<MemoryFile>> {
        let reader = self.read()?;
        let sql = format!(
            "SELECT {MEMORY_COLUMNS} FROM memory
             WHERE scope = 'baseline' AND status = 'active'
             ORDER BY priority DESC, id ASC"
        );
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map([], memory_from_row)?;
        collect_memories(rows)
    }

    /// All memories; `enabled_only` drops deprecated-status entries
    pub fn get_all_memories(&self, enabled_only: bool) -> Result<Vec<MemoryFile>> {
        let reader = self.read()?;
        let sql = if enabled_only {
            format!(
                "SELECT {MEMORY_COLUMNS} FROM memory WHERE status != 'deprecated' ORDER BY id ASC"
            )
        } else {
            format!("SELECT {MEMORY_COLUMNS} FROM memory ORDER BY id ASC")
        };
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map([], memory_from_row)?;
        collect_memories(rows)
    }

    /// Total number of indexed memories
    pub fn get_memory_count(&self) -> Result<usize> {
        let reader = self.read()?;
        let count: i64 = reader.query_row("SELECT COUNT(*) FROM memory", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Distinct directory keys in the index
    pub fn get_all_directories(&self) -> Result<Vec<String>> {
        let reader = self.read()?;
        let mut stmt =
            reader.prepare("SELECT DISTINCT directory FROM memory ORDER BY directory ASC")?;
        let dirs = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(dirs)
    }

    /// Set status of a memory record
    pub fn update_memory_status(&self, id: &str, status: Status) -> Result<bool> {
        let writer = self.write()?;
        let updated = writer.execute(
            "UPDATE memory SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        Ok(updated > 0)
    }

    // ========================================================================
    // VECTOR SEARCH
    // ========================================================================

    /// Coarse stage: rank directories by max cosine similarity of their
    /// member directory embeddings against the query vector.
    pub fn search_by_directory(
        &self,
        query_embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<(String, f32)>> {
        let reader = self.read()?;
        let mut stmt = reader.prepare(
            "SELECT m.directory, e.directory_embedding
             FROM memory m JOIN embedding e ON e.memory_id = m.id
             WHERE m.status != 'deprecated'",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut best: HashMap<String, f32> = HashMap::new();
        for row in rows {
            let (directory, blob) = row?;
            let Some(vector) = vector_from_bytes(&blob) else {
                continue;
            };
            let score = cosine_similarity(query_embedding, &vector);
            let entry = best.entry(directory).or_insert(f32::NEG_INFINITY);
            if score > *entry {
                *entry = score;
            }
        }

        let mut ranked: Vec<(String, f32)> = best.into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }

    /// Fine stage: rank memories by cosine similarity of their composite
    /// embeddings, restricted to `directories` when given, after filters.
    pub fn search_by_content(
        &self,
        query_embedding: &[f32],
        directories: Option<&[String]>,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<(MemoryFile, f32)>> {
        let now = Utc::now();
        let reader = self.read()?;
        let sql = format!(
            "SELECT {MEMORY_COLUMNS}, e.composite_embedding
             FROM memory JOIN embedding e ON e.memory_id = memory.id"
        );
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            let memory = memory_from_row(row)?;
            let blob: Vec<u8> = row.get(18)?;
            Ok((memory, blob))
        })?;

        let mut scored: Vec<(MemoryFile, f32)> = Vec::new();
        for row in rows {
            let (memory, blob) = row?;
            let memory = memory?;
            if let Some(dirs) = directories {
                if !dirs.iter().any(|d| d == memory.directory()) {
                    continue;
                }
            }
            if !filters.matches(&memory, now) {
                continue;
            }
            let Some(vector) = vector_from_bytes(&blob) else {
                continue;
            };
            let score = cosine_similarity(query_embedding, &vector);
            scored.push((memory, score));
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Both stored vectors for a memory
    pub fn get_embedding(&self, id: &str) -> Result<Option<MemoryVectors>> {
        let reader = self.read()?;
        let row = reader
            .query_row(
                "SELECT directory_embedding, composite_embedding FROM embedding WHERE memory_id = ?1",
                params![id],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .optional()?;
        match row {
            Some((dir_blob, comp_blob)) => {
                let directory = vector_from_bytes(&dir_blob).ok_or_else(|| {
                    StoreError::Integrity(format!("corrupt directory embedding for {id}"))
                })?;
                let composite = vector_from_bytes(&comp_blob).ok_or_else(|| {
                    StoreError::Integrity(format!("corrupt composite embedding for {id}"))
                })?;
                Ok(Some(MemoryVectors {
                    directory,
                    composite,
                }))
            }
            None => Ok(None),
        }
    }

    /// Composite embeddings for pairwise scans
    pub fn all_composite_embeddings(
        &self,
        exclude_deprecated: bool,
    ) -> Result<Vec<(String, Vec<f32>)>> {
        let reader = self.read()?;
        let sql = if exclude_deprecated {
            "SELECT m.id, e.composite_embedding FROM memory m
             JOIN embedding e ON e.memory_id = m.id WHERE m.status != 'deprecated'
             ORDER BY m.id ASC"
        } else {
            "SELECT m.id, e.composite_embedding FROM memory m
             JOIN embedding e ON e.memory_id = m.id ORDER BY m.id ASC"
        };
        let mut stmt = reader.prepare(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, blob) = row?;
            if let Some(vector) = vector_from_bytes(&blob) {
                out.push((id, vector));
            }
        }
        Ok(out)
    }

    // ========================================================================
    // SYSTEM META
    // ========================================================================

    /// Set a system metadata key
    pub fn set_system_meta(&self, key: &str, value: &str) -> Result<()> {
        let writer = self.write()?;
        writer.execute(
            "INSERT INTO system_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Get a system metadata key
    pub fn get_system_meta(&self, key: &str) -> Result<Option<String>> {
        let reader = self.read()?;
        reader
            .query_row(
                "SELECT value FROM system_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
    }

    // ========================================================================
    // STATISTICS / TELEMETRY
    // ========================================================================

    /// Corpus statistics
    pub fn get_stats(&self) -> Result<MemoryStats> {
        let memories = self.get_all_memories(false)?;
        let mut stats = MemoryStats {
            total_memories: memories.len(),
            ..Default::default()
        };
        for memory in &memories {
            stats.total_tokens += memory.token_count;
            *stats
                .by_scope
                .entry(memory.scope.as_str().to_string())
                .or_default() += 1;
            *stats
                .by_status
                .entry(memory.status.as_str().to_string())
                .or_default() += 1;
            if memory.scope == Scope::Baseline {
                stats.baseline_count += 1;
            }
        }
        Ok(stats)
    }

    /// Append a query telemetry row
    pub fn log_query(
        &self,
        query: &str,
        budget: usize,
        included: usize,
        excluded: usize,
        truncated: bool,
        duration_ms: u64,
    ) -> Result<()> {
        let writer = self.write()?;
        writer.execute(
            "INSERT INTO query_log (query, budget, included, excluded, truncated, duration_ms, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                query,
                budget as i64,
                included as i64,
                excluded as i64,
                truncated,
                duration_ms as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Remove every memory and embedding row (tests and forced reindex)
    pub fn clear_all(&self) -> Result<()> {
        let writer = self.write()?;
        writer.execute_batch("DELETE FROM embedding; DELETE FROM memory;")?;
        Ok(())
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

type MemoryRowResult = std::result::Result<MemoryFile, StoreError>;

fn memory_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemoryRowResult> {
    let id: String = row.get(0)?;
    let scope_raw: String = row.get(7)?;
    let confidence_raw: String = row.get(9)?;
    let status_raw: String = row.get(10)?;
    let tags_json: String = row.get(6)?;
    let supersedes_json: String = row.get(15)?;
    let related_json: String = row.get(16)?;

    let parse_enums = || -> MemoryRowResult {
        let scope = Scope::parse(&scope_raw)
            .ok_or_else(|| StoreError::Integrity(format!("unknown scope '{scope_raw}' on {id}")))?;
        let confidence = Confidence::parse(&confidence_raw).ok_or_else(|| {
            StoreError::Integrity(format!("unknown confidence '{confidence_raw}' on {id}"))
        })?;
        let status = Status::parse(&status_raw).ok_or_else(|| {
            StoreError::Integrity(format!("unknown status '{status_raw}' on {id}"))
        })?;

        Ok(MemoryFile {
            id: id.clone(),
            path: row.get(1)?,
            title: row.get(3)?,
            body: row.get(4)?,
            token_count: row.get::<_, i64>(5)? as usize,
            tags: serde_json::from_str(&tags_json).unwrap_or_default(),
            scope,
            priority: row.get(8)?,
            confidence,
            status,
            created: parse_ts(row.get::<_, Option<String>>(11)?),
            last_used: parse_ts(row.get::<_, Option<String>>(12)?),
            expires: parse_ts(row.get::<_, Option<String>>(13)?),
            usage_count: row.get(14)?,
            supersedes: serde_json::from_str(&supersedes_json).unwrap_or_default(),
            related: serde_json::from_str(&related_json).unwrap_or_default(),
            file_hash: row.get(17)?,
        })
    };

    Ok(parse_enums())
}

fn parse_ts(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    })
}

fn collect_memories<'a>(
    rows: rusqlite::MappedRows<'a, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<MemoryRowResult>>,
) -> Result<Vec<MemoryFile>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row??);
    }
    Ok(out)
}

// ============================================================================
// TESTS
// ============================================================================
