//! Type definitions module
//!
//! Data model shared by the ingest and query paths.

pub mod document;
pub mod index;

// Re-export commonly used types
pub use document::{Document, Metadata, MetadataValue, SOURCE_KEY, TEXT_KEY};
pub use index::{
    CreateOutcome, EmbeddingVector, IndexEntry, IndexSpec, IndexStats, QueryMatch, QueryRequest,
    QueryResult, SimilarityMetric,
};
