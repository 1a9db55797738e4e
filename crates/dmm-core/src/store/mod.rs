//! Storage Module
//!
//! SQLite-backed persistence for the whole core:
//! - Memory records with dual embedding vectors (one transaction per upsert)
//! - System metadata (schema / embedder / tokenizer versions)
//! - Cosine searches: per-directory aggregation and content ranking
//!
//! The proposal queue and conflict store share the database file but open
//! their own connections; see `writeback::queue` and `conflicts::store`.

mod migrations;
mod sqlite;

pub use migrations::{apply_migrations, get_current_version, Migration, MIGRATIONS};
pub use sqlite::{Result, Storage, StoreError};
