//! Conflict Engine
//!
//! Detects and resolves contradictions in the corpus:
//!
//! - Analyzers (tag overlap, semantic divergence, supersession chains) emit
//!   raw candidates
//! - The merger dedups candidates across methods, computes confidence, and
//!   persists conflicts (one live conflict per unordered memory pair)
//! - The scanner dispatches startup / periodic / incremental / targeted scans
//! - The resolver executes deprecate / merge / clarify / dismiss / defer

pub mod analyzers;
mod detector;
mod merger;
mod resolver;
mod scanner;
mod store;
mod types;

pub use analyzers::{SemanticAnalyzer, SupersessionAnalyzer, TagOverlapAnalyzer};
pub use detector::{ConflictDetector, DEFAULT_METHODS};
pub use merger::{ConflictMerger, MergeResult};
pub use resolver::ConflictResolver;
pub use scanner::ConflictScanner;
pub use store::ConflictStore;
pub use types::{
    generate_conflict_id, generate_scan_id, make_pair_key, Conflict, ConflictCandidate,
    ConflictError, ConflictMemory, ConflictStatus, ConflictType, DetectionMethod, MemoryRole,
    ResolutionAction, ResolutionRequest, ResolutionResult, ScanRecord,
};
