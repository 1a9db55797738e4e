//! # DMM Core
//!
//! Dynamic Markdown Memory: a persistent, queryable memory substrate for
//! long-running AI agents.
//!
//! - **Indexed store**: markdown memories with typed frontmatter, parsed,
//!   token-counted (cl100k_base), hash-diffed, and indexed under two
//!   embeddings per memory (coarse directory vector, fine composite vector)
//! - **Retrieval**: two-stage hierarchical search (directory rank, then
//!   content rank), baseline reservation, greedy token-budget fill, and
//!   deterministic markdown rendering of the resulting memory pack
//! - **Write pipeline**: agent proposals flow through a durable review queue
//!   (schema / quality / duplicate validation) and an atomic commit engine
//!   with backup/rollback and synchronous post-commit reindex
//! - **Conflict engine**: tag-overlap, semantic-divergence, and
//!   supersession-chain analyzers, merged and deduplicated per memory pair,
//!   with deprecate/merge/clarify/dismiss resolution
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dmm_core::{Config, Dmm, QueryRequest};
//!
//! let dmm = Dmm::open("/path/to/workspace", Config::default())?;
//! dmm.reindex()?;
//!
//! // Assemble a token-budgeted memory pack
//! let pack = dmm.query(&QueryRequest::new("how does our auth flow work", 4000))?;
//! println!("{}", pack.render());
//!
//! // Propose, review, and commit a new memory
//! let proposal = dmm.propose_create("project/auth.md", content, "capture auth flow", "agent")?;
//! dmm.review_pending(10)?;
//! dmm.commit_proposal(&proposal.proposal_id)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): bundle SQLite with rusqlite
//! - `embeddings`: local neural embeddings via fastembed; without it the
//!   deterministic feature-hashing embedder is used
//! - `full`: all features

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod conflicts;
pub mod embedder;
pub mod engine;
pub mod indexer;
pub mod memory;
pub mod parser;
pub mod retrieval;
pub mod reviewer;
pub mod store;
pub mod writeback;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Engine
pub use engine::{Dmm, DmmError};

// Configuration
pub use config::{
    CommitConfig, Config, ConflictsConfig, MergerConfig, ParserConfig, RetrievalConfig,
    ReviewConfig, ScanConfig, SemanticConfig, SupersessionConfig, TagOverlapConfig,
};

// Memory model
pub use memory::{scope_rank, Confidence, MemoryFile, MemoryStats, Scope, SearchFilters, Status};

// Parser
pub use parser::{
    extract_title, hash_bytes, MemoryParser, ParseError, ParseResult, SchemaValidationError,
    TokenCounter, ValidationWarning, TOKENIZER_VERSION,
};

// Embeddings
pub use embedder::{
    cosine_similarity, Embedder, EmbeddingError, HashEmbedder, MemoryVectors,
    EMBEDDING_DIMENSIONS,
};
#[cfg(feature = "embeddings")]
pub use embedder::LocalEmbedder;

// Storage
pub use store::{Storage, StoreError};

// Indexer
pub use indexer::{IndexError, Indexer, ReindexReport};

// Retrieval
pub use retrieval::{MemoryPack, PackEntry, PackStats, QueryRequest, RetrievalError, Retriever};

// Write pipeline
pub use writeback::{
    allowed_transition, CommitEngine, CommitError, CommitResult, ProposalError, ProposalHandler,
    ProposalHistoryEntry, ProposalQueue, ProposalStatus, ProposalType, QueueStats, WriteProposal,
};

// Reviewer
pub use reviewer::{
    DecisionEngine, DuplicateDetector, DuplicateMatch, QualityChecker, ReviewDecision,
    ReviewError, ReviewResult, ReviewerAgent, SchemaValidator, Severity, ValidationIssue,
};

// Conflict engine
pub use conflicts::{
    Conflict, ConflictCandidate, ConflictDetector, ConflictError, ConflictMemory,
    ConflictResolver, ConflictScanner, ConflictStatus, ConflictStore, ConflictType,
    DetectionMethod, MemoryRole, ResolutionAction, ResolutionRequest, ResolutionResult,
    ScanRecord,
};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Config, Confidence, Dmm, DmmError, MemoryFile, MemoryPack, ProposalStatus, ProposalType,
        QueryRequest, ResolutionAction, ResolutionRequest, Scope, SearchFilters, Status,
        WriteProposal,
    };

    pub use crate::{Embedder, HashEmbedder};

    #[cfg(feature = "embeddings")]
    pub use crate::LocalEmbedder;
}
