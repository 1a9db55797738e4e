//! Memory Model
//!
//! The fundamental unit of DMM is a markdown memory file with typed
//! frontmatter. This module defines:
//! - The scope / confidence / status enums
//! - The parsed `MemoryFile` record
//! - Search filters applied by the store
//! - Corpus statistics

mod record;

pub use record::{
    Confidence, MemoryFile, MemoryStats, Scope, SearchFilters, Status, scope_rank,
};
