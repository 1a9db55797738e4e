//! Engine wiring
//!
//! [`Dmm`] constructs every component from one [`Config`] and a base
//! directory, making each component's dependencies explicit — there are no
//! process-wide singletons. The layout under the base directory:
//!
//! ```text
//! <base>/memory/    scope folders with memory markdown files
//! <base>/backups/   commit-engine backups (transient)
//! <base>/dmm.db     the shared SQLite database
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::config::Config;
use crate::conflicts::{
    ConflictDetector, ConflictError, ConflictResolver, ConflictScanner, ConflictStore,
    ResolutionRequest, ResolutionResult, ScanRecord,
};
use crate::embedder::{Embedder, EmbeddingError};
#[cfg(not(feature = "embeddings"))]
use crate::embedder::HashEmbedder;
#[cfg(feature = "embeddings")]
use crate::embedder::LocalEmbedder;
use crate::indexer::{Indexer, ReindexReport};
use crate::memory::{MemoryStats, Scope};
use crate::parser::MemoryParser;
use crate::retrieval::{MemoryPack, QueryRequest, Retriever, RetrievalError};
use crate::reviewer::{ReviewError, ReviewResult, ReviewerAgent};
use crate::store::{Storage, StoreError};
use crate::writeback::{
    CommitEngine, CommitError, CommitResult, ProposalError, ProposalHandler, ProposalQueue,
    ProposalType, WriteProposal,
};

/// Top-level error for engine entry points
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum DmmError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),
    #[error(transparent)]
    Proposal(#[from] ProposalError),
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error(transparent)]
    Commit(#[from] CommitError),
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error("proposal not found: {0}")]
    ProposalNotFound(String),
}

/// The assembled DMM engine
pub struct Dmm {
    config: Config,
    base_path: PathBuf,
    storage: Arc<Storage>,
    embedder: Arc<dyn Embedder>,
    indexer: Indexer,
    retriever: Retriever,
    queue: Arc<ProposalQueue>,
    handler: ProposalHandler,
    reviewer: ReviewerAgent,
    commit: Arc<CommitEngine>,
    scanner: ConflictScanner,
    resolver: ConflictResolver,
}

impl Dmm {
    /// Open the engine with the default embedder (fastembed when the
    /// `embeddings` feature is on, the deterministic hasher otherwise)
    pub fn open(base_path: impl Into<PathBuf>, config: Config) -> Result<Self, DmmError> {
        #[cfg(feature = "embeddings")]
        let embedder: Arc<dyn Embedder> = Arc::new(LocalEmbedder::new());
        #[cfg(not(feature = "embeddings"))]
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new());
        Self::open_with_embedder(base_path, config, embedder)
    }

    /// Open the engine with an explicit embedder implementation
    pub fn open_with_embedder(
        base_path: impl Into<PathBuf>,
        config: Config,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, DmmError> {
        let base_path = base_path.into();
        let memory_root = base_path.join("memory");
        std::fs::create_dir_all(&memory_root).map_err(StoreError::from)?;
        let db_path = base_path.join("dmm.db");

        let storage = Arc::new(Storage::new(Some(db_path.clone()), embedder.dimensions())?);
        let parser = MemoryParser::new(&memory_root, &config.parser);
        let indexer = Indexer::new(
            Arc::clone(&storage),
            Arc::clone(&embedder),
            parser,
            &memory_root,
        );
        // Version guard: embedder/tokenizer/schema drift forces a full pass
        indexer.ensure_versions()?;

        let retriever = Retriever::new(
            Arc::clone(&storage),
            Arc::clone(&embedder),
            config.retrieval.clone(),
        );

        let queue = Arc::new(ProposalQueue::new(&db_path)?);
        let handler = ProposalHandler::new(Arc::clone(&queue), Arc::clone(&storage), &memory_root);
        let reviewer = ReviewerAgent::new(
            Arc::clone(&queue),
            Arc::clone(&storage),
            Arc::clone(&embedder),
            &config,
        );
        let commit = Arc::new(CommitEngine::new(
            Arc::clone(&queue),
            indexer.clone(),
            &config.commit,
        ));

        let conflict_store = Arc::new(ConflictStore::new(&db_path)?);
        let detector = ConflictDetector::new(
            Arc::clone(&storage),
            Arc::clone(&conflict_store),
            &config.conflicts,
        );
        let scanner = ConflictScanner::new(detector, config.conflicts.scan.clone());
        let resolver = ConflictResolver::new(
            conflict_store,
            Arc::clone(&storage),
            Arc::clone(&commit),
        );

        let engine = Self {
            config,
            base_path,
            storage,
            embedder,
            indexer,
            retriever,
            queue,
            handler,
            reviewer,
            commit,
            scanner,
            resolver,
        };
        engine.scanner.run_startup_scan()?;
        Ok(engine)
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn memory_root(&self) -> PathBuf {
        self.base_path.join("memory")
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn queue(&self) -> &Arc<ProposalQueue> {
        &self.queue
    }

    pub fn handler(&self) -> &ProposalHandler {
        &self.handler
    }

    pub fn reviewer(&self) -> &ReviewerAgent {
        &self.reviewer
    }

    pub fn scanner(&self) -> &ConflictScanner {
        &self.scanner
    }

    pub fn resolver(&self) -> &ConflictResolver {
        &self.resolver
    }

    // ========================================================================
    // INDEX + QUERY
    // ========================================================================

    /// Full reindex of the memory tree
    pub fn reindex(&self) -> Result<ReindexReport, DmmError> {
        Ok(self.indexer.full_reindex()?)
    }

    /// Assemble a memory pack for a query
    pub fn query(&self, request: &QueryRequest) -> Result<MemoryPack, DmmError> {
        Ok(self.retriever.assemble(request)?)
    }

    /// Corpus statistics
    pub fn stats(&self) -> Result<MemoryStats, DmmError> {
        Ok(self.storage.get_stats()?)
    }

    // ========================================================================
    // WRITE PIPELINE
    // ========================================================================

    pub fn propose_create(
        &self,
        target_path: &str,
        content: &str,
        reason: &str,
        proposed_by: &str,
    ) -> Result<WriteProposal, DmmError> {
        Ok(self
            .handler
            .propose_create(target_path, content, reason, proposed_by)?)
    }

    pub fn propose_update(
        &self,
        memory_id: &str,
        content: &str,
        reason: &str,
        proposed_by: &str,
    ) -> Result<WriteProposal, DmmError> {
        Ok(self
            .handler
            .propose_update(memory_id, content, reason, proposed_by)?)
    }

    pub fn propose_deprecate(
        &self,
        memory_id: &str,
        reason: &str,
        proposed_by: &str,
    ) -> Result<WriteProposal, DmmError> {
        Ok(self.handler.propose_deprecate(memory_id, reason, proposed_by)?)
    }

    pub fn propose_promote(
        &self,
        memory_id: &str,
        new_scope: Scope,
        reason: &str,
        proposed_by: &str,
    ) -> Result<WriteProposal, DmmError> {
        Ok(self
            .handler
            .propose_promote(memory_id, new_scope, reason, proposed_by)?)
    }

    /// Review up to `limit` pending proposals
    pub fn review_pending(&self, limit: usize) -> Result<Vec<ReviewResult>, DmmError> {
        Ok(self.reviewer.review_pending(limit)?)
    }

    /// Commit one proposal by id, then run the post-commit incremental
    /// conflict scan over the affected memory
    pub fn commit_proposal(&self, proposal_id: &str) -> Result<CommitResult, DmmError> {
        let proposal = self
            .queue
            .get(proposal_id)?
            .ok_or_else(|| DmmError::ProposalNotFound(proposal_id.to_string()))?;
        let result = self.commit.commit(&proposal)?;

        if result.success && proposal.proposal_type != ProposalType::Deprecate {
            if let Some(memory_id) = &result.memory_id {
                if let Err(e) = self.scanner.run_incremental_scan(memory_id) {
                    tracing::warn!("post-commit conflict scan failed: {e}");
                }
            }
        }
        Ok(result)
    }

    /// Commit every APPROVED proposal, oldest first
    pub fn commit_approved(&self, limit: usize) -> Result<Vec<CommitResult>, DmmError> {
        let approved = self
            .queue
            .get_by_status(crate::writeback::ProposalStatus::Approved, limit)?;
        let mut results = Vec::with_capacity(approved.len());
        for proposal in approved {
            results.push(self.commit_proposal(&proposal.proposal_id)?);
        }
        Ok(results)
    }

    /// Garbage-collect orphaned commit backups
    pub fn cleanup_backups(&self) -> usize {
        self.commit
            .cleanup_old_backups(self.config.commit.backup_max_age_hours)
    }

    // ========================================================================
    // CONFLICTS
    // ========================================================================

    /// Manually triggered full conflict scan
    pub fn scan_conflicts(&self) -> Result<ScanRecord, DmmError> {
        Ok(self.scanner.run_full_scan(None)?)
    }

    /// Run the periodic scan when due
    pub fn tick(&self) -> Result<Option<ScanRecord>, DmmError> {
        Ok(self.scanner.maybe_run_periodic(Utc::now())?)
    }

    /// Execute a conflict resolution
    pub fn resolve_conflict(
        &self,
        request: &ResolutionRequest,
    ) -> Result<ResolutionResult, DmmError> {
        Ok(self.resolver.resolve(request)?)
    }
}

// ============================================================================
// TESTS
// ============================================================================
