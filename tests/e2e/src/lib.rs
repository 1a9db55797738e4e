//! End-to-end test support for DMM
//!
//! Journey tests drive the whole engine over a tempdir workspace with the
//! deterministic hash embedder, so no model download is ever needed.

pub mod harness;
