//! Review validators: schema, quality, duplicate

mod duplicate;
mod quality;
mod schema;

pub use duplicate::{DuplicateDetector, DuplicateMatch};
pub use quality::QualityChecker;
pub use schema::SchemaValidator;
