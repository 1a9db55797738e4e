//! Proposal Queue
//!
//! Durable FIFO of write proposals with an enforced status-transition graph
//! and an append-only history log. The queue is its own lock domain: it opens
//! its own connection to the shared database, so proposals are never blocked
//! by an ongoing reindex.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::memory::Scope;
use crate::reviewer::ValidationIssue;

// ============================================================================
// TYPES
// ============================================================================

/// Kind of corpus mutation a proposal requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalType {
    Create,
    Update,
    Deprecate,
    Promote,
}

impl ProposalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalType::Create => "create",
            ProposalType::Update => "update",
            ProposalType::Deprecate => "deprecate",
            ProposalType::Promote => "promote",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(ProposalType::Create),
            "update" => Some(ProposalType::Update),
            "deprecate" => Some(ProposalType::Deprecate),
            "promote" => Some(ProposalType::Promote),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProposalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    InReview,
    Approved,
    Modified,
    Rejected,
    Deferred,
    Committed,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::InReview => "in_review",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Modified => "modified",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Deferred => "deferred",
            ProposalStatus::Committed => "committed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ProposalStatus::Pending),
            "in_review" => Some(ProposalStatus::InReview),
            "approved" => Some(ProposalStatus::Approved),
            "modified" => Some(ProposalStatus::Modified),
            "rejected" => Some(ProposalStatus::Rejected),
            "deferred" => Some(ProposalStatus::Deferred),
            "committed" => Some(ProposalStatus::Committed),
            _ => None,
        }
    }

    /// Terminal statuses accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProposalStatus::Rejected | ProposalStatus::Committed)
    }

    /// Open statuses count toward the one-proposal-per-path rule
    pub fn is_open(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Allowed status transitions
pub fn allowed_transition(from: ProposalStatus, to: ProposalStatus) -> bool {
    use ProposalStatus::*;
    matches!(
        (from, to),
        (Pending, InReview)
            | (Pending, Rejected)
            | (Pending, Deferred)
            | (InReview, Approved)
            | (InReview, Modified)
            | (InReview, Rejected)
            | (InReview, Deferred)
            | (InReview, Pending)
            | (Approved, Committed)
            | (Approved, Pending)
            | (Modified, Committed)
            | (Modified, Pending)
            | (Deferred, Approved)
            | (Deferred, Rejected)
    )
}

/// A durable write proposal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteProposal {
    pub proposal_id: String,
    pub proposal_type: ProposalType,
    /// Memory-root-relative target path
    pub target_path: String,
    /// Required for non-CREATE proposals
    pub memory_id: Option<String>,
    /// Full new file bytes; required for CREATE/UPDATE
    pub content: Option<String>,
    /// Free-form justification
    pub reason: String,
    pub deprecation_reason: Option<String>,
    pub new_scope: Option<Scope>,
    pub source_scope: Option<Scope>,
    pub proposed_by: String,
    pub status: ProposalStatus,
    pub review_notes: Option<String>,
    pub commit_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Generate a unique proposal id: `prop_<timestamp>_<hex>`
pub fn generate_proposal_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("prop_{timestamp}_{}", &suffix[..8])
}

/// One entry of the append-only history log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalHistoryEntry {
    pub proposal_id: String,
    pub from_status: Option<ProposalStatus>,
    pub to_status: ProposalStatus,
    pub action: String,
    pub notes: Option<String>,
    pub ts: DateTime<Utc>,
}

/// Queue totals and per-status / per-type counts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    pub by_type: HashMap<String, usize>,
}

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Proposal pipeline error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ProposalError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),
    #[error("proposal not found: {0}")]
    NotFound(String),
    #[error("invalid status transition {from} -> {to} for {id}")]
    InvalidTransition {
        id: String,
        from: ProposalStatus,
        to: ProposalStatus,
    },
    /// Precheck failure; `reason` is the first error issue's code
    #[error("proposal precheck failed ({reason}): {message}")]
    Precheck {
        reason: String,
        message: String,
        issues: Vec<ValidationIssue>,
    },
    #[error("initialization error: {0}")]
    Init(String),
}

pub type Result<T> = std::result::Result<T, ProposalError>;

// ============================================================================
// QUEUE
// ============================================================================

/// Durable, transactional proposal queue
pub struct ProposalQueue {
    conn: Mutex<Connection>,
}

impl ProposalQueue {
    /// Open the queue over the shared database file
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        crate::store::apply_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ProposalError::Init("queue lock poisoned".to_string()))
    }

    /// Insert a proposal with status PENDING and append the first history
    /// entry, atomically
    pub fn enqueue(&self, proposal: &WriteProposal) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO proposal (
                proposal_id, proposal_type, target_path, memory_id, content,
                reason, deprecation_reason, new_scope, source_scope,
                proposed_by, status, review_notes, commit_error, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                proposal.proposal_id,
                proposal.proposal_type.as_str(),
                proposal.target_path,
                proposal.memory_id,
                proposal.content,
                proposal.reason,
                proposal.deprecation_reason,
                proposal.new_scope.map(|s| s.as_str()),
                proposal.source_scope.map(|s| s.as_str()),
                proposal.proposed_by,
                ProposalStatus::Pending.as_str(),
                proposal.review_notes,
                proposal.commit_error,
                proposal.created_at.to_rfc3339(),
                proposal.updated_at.to_rfc3339(),
            ],
        )?;
        append_history(
            &tx,
            &proposal.proposal_id,
            None,
            ProposalStatus::Pending,
            "enqueue",
            None,
        )?;
        tx.commit()?;
        tracing::info!(
            "enqueued {} proposal {} for {}",
            proposal.proposal_type,
            proposal.proposal_id,
            proposal.target_path
        );
        Ok(())
    }

    /// Point lookup
    pub fn get(&self, proposal_id: &str) -> Result<Option<WriteProposal>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {PROPOSAL_COLUMNS} FROM proposal WHERE proposal_id = ?1"),
            params![proposal_id],
            proposal_from_row,
        )
        .optional()
        .map_err(ProposalError::from)
    }

    /// Pending proposals in FIFO order
    pub fn get_pending(&self, limit: usize) -> Result<Vec<WriteProposal>> {
        self.get_by_status(ProposalStatus::Pending, limit)
    }

    /// Proposals with the given status, oldest first
    pub fn get_by_status(&self, status: ProposalStatus, limit: usize) -> Result<Vec<WriteProposal>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM proposal WHERE status = ?1
             ORDER BY created_at ASC, proposal_id ASC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![status.as_str(), limit as i64], proposal_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(ProposalError::from)
    }

    /// Whether an open proposal exists for a path; at most one is allowed
    pub fn has_pending_for_path(&self, target_path: &str) -> Result<bool> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM proposal WHERE target_path = ?1
             AND status IN ('pending', 'in_review', 'approved', 'modified', 'deferred')",
            params![target_path],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Transition a proposal, appending a history entry atomically.
    ///
    /// Transitions outside the allowed graph are rejected.
    pub fn update_status(
        &self,
        proposal_id: &str,
        new_status: ProposalStatus,
        notes: Option<&str>,
    ) -> Result<WriteProposal> {
        let current = self
            .get(proposal_id)?
            .ok_or_else(|| ProposalError::NotFound(proposal_id.to_string()))?;

        if !allowed_transition(current.status, new_status) {
            return Err(ProposalError::InvalidTransition {
                id: proposal_id.to_string(),
                from: current.status,
                to: new_status,
            });
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE proposal SET status = ?2, review_notes = COALESCE(?3, review_notes), updated_at = ?4
             WHERE proposal_id = ?1",
            params![
                proposal_id,
                new_status.as_str(),
                notes,
                Utc::now().to_rfc3339(),
            ],
        )?;
        append_history(
            &tx,
            proposal_id,
            Some(current.status),
            new_status,
            "update_status",
            notes,
        )?;
        tx.commit()?;
        drop(conn);

        self.get(proposal_id)?
            .ok_or_else(|| ProposalError::NotFound(proposal_id.to_string()))
    }

    /// Record a commit failure without changing the status
    pub fn set_commit_error(&self, proposal_id: &str, message: &str) -> Result<()> {
        let current = self
            .get(proposal_id)?
            .ok_or_else(|| ProposalError::NotFound(proposal_id.to_string()))?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE proposal SET commit_error = ?2, updated_at = ?3 WHERE proposal_id = ?1",
            params![proposal_id, message, Utc::now().to_rfc3339()],
        )?;
        append_history(
            &tx,
            proposal_id,
            Some(current.status),
            current.status,
            "commit_error",
            Some(message),
        )?;
        tx.commit()?;
        Ok(())
    }

    /// The full append-only history of a proposal
    pub fn get_history(&self, proposal_id: &str) -> Result<Vec<ProposalHistoryEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT proposal_id, from_status, to_status, action, notes, ts
             FROM proposal_history WHERE proposal_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![proposal_id], |row| {
            Ok(ProposalHistoryEntry {
                proposal_id: row.get(0)?,
                from_status: row
                    .get::<_, Option<String>>(1)?
                    .and_then(|s| ProposalStatus::parse(&s)),
                to_status: ProposalStatus::parse(&row.get::<_, String>(2)?)
                    .unwrap_or(ProposalStatus::Pending),
                action: row.get(3)?,
                notes: row.get(4)?,
                ts: row
                    .get::<_, String>(5)?
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(ProposalError::from)
    }

    /// Cancel a PENDING or DEFERRED proposal. History rows are retained.
    pub fn delete(&self, proposal_id: &str) -> Result<bool> {
        let Some(current) = self.get(proposal_id)? else {
            return Ok(false);
        };
        if !matches!(
            current.status,
            ProposalStatus::Pending | ProposalStatus::Deferred
        ) {
            return Ok(false);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        append_history(
            &tx,
            proposal_id,
            Some(current.status),
            current.status,
            "deleted",
            None,
        )?;
        tx.execute(
            "DELETE FROM proposal WHERE proposal_id = ?1",
            params![proposal_id],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Totals and per-status / per-type counts
    pub fn get_stats(&self) -> Result<QueueStats> {
        let conn = self.lock()?;
        let mut stats = QueueStats::default();

        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM proposal GROUP BY status")?;
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })? {
            let (status, count) = row?;
            stats.total += count as usize;
            stats.by_status.insert(status, count as usize);
        }

        let mut stmt =
            conn.prepare("SELECT proposal_type, COUNT(*) FROM proposal GROUP BY proposal_type")?;
        for row in stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })? {
            let (proposal_type, count) = row?;
            stats.by_type.insert(proposal_type, count as usize);
        }

        Ok(stats)
    }
}

const PROPOSAL_COLUMNS: &str = "proposal_id, proposal_type, target_path, memory_id, content, \
     reason, deprecation_reason, new_scope, source_scope, proposed_by, status, review_notes, \
     commit_error, created_at, updated_at";

fn append_history(
    tx: &rusqlite::Transaction<'_>,
    proposal_id: &str,
    from_status: Option<ProposalStatus>,
    to_status: ProposalStatus,
    action: &str,
    notes: Option<&str>,
) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO proposal_history (proposal_id, from_status, to_status, action, notes, ts)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            proposal_id,
            from_status.map(|s| s.as_str()),
            to_status.as_str(),
            action,
            notes,
            Utc::now().to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn proposal_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WriteProposal> {
    let type_raw: String = row.get(1)?;
    let status_raw: String = row.get(10)?;
    Ok(WriteProposal {
        proposal_id: row.get(0)?,
        proposal_type: ProposalType::parse(&type_raw).unwrap_or(ProposalType::Create),
        target_path: row.get(2)?,
        memory_id: row.get(3)?,
        content: row.get(4)?,
        reason: row.get(5)?,
        deprecation_reason: row.get(6)?,
        new_scope: row
            .get::<_, Option<String>>(7)?
            .and_then(|s| Scope::parse(&s)),
        source_scope: row
            .get::<_, Option<String>>(8)?
            .and_then(|s| Scope::parse(&s)),
        proposed_by: row.get(9)?,
        status: ProposalStatus::parse(&status_raw).unwrap_or(ProposalStatus::Pending),
        review_notes: row.get(11)?,
        commit_error: row.get(12)?,
        created_at: parse_ts(row.get::<_, String>(13)?),
        updated_at: parse_ts(row.get::<_, String>(14)?),
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
