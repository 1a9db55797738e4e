//! Token counter — tiktoken wrapper for deterministic token counting.
//!
//! Pack budgets are denominated in cl100k_base tokens. The count is a wire
//! contract: two hosts must agree bit-exactly for the same byte sequence, so
//! the encoding is pinned and never configurable per call.

use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

/// Version string recorded in `system_meta` (see store metadata keys)
pub const TOKENIZER_VERSION: &str = "cl100k_base";

static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();

fn bpe() -> Option<&'static CoreBPE> {
    BPE.get_or_init(|| match tiktoken_rs::cl100k_base() {
        Ok(bpe) => Some(bpe),
        Err(e) => {
            tracing::warn!("cl100k_base tokenizer unavailable, using approximate counts: {e}");
            None
        }
    })
    .as_ref()
}

/// Deterministic token counter pinned to cl100k_base
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounter;

impl TokenCounter {
    pub fn new() -> Self {
        Self
    }

    /// Count tokens in the given text
    pub fn count(&self, text: &str) -> usize {
        match bpe() {
            Some(bpe) => bpe.encode_with_special_tokens(text).len(),
            // 4 chars per token approximation, only hit if the embedded
            // vocabulary failed to load
            None => text.len().div_ceil(4),
        }
    }

    /// Count tokens plus a fixed rendering-envelope overhead
    pub fn count_with_overhead(&self, text: &str, overhead: usize) -> usize {
        self.count(text) + overhead
    }
}
