//! ragline - retrieval-augmented question answering over a vector index
//!
//! Documents are embedded through a hosted embedding API and upserted into
//! a vector index. Questions are embedded the same way, matched top-k
//! against the index, and optionally answered by a chat model grounded in
//! the matched passages.
//!
//! # Architecture
//!
//! - **dataset**: CSV and built-in sample documents
//! - **embedding**: `Embedder` trait, OpenAI and local hashing providers
//! - **index**: `VectorIndex` trait, Pinecone, Qdrant and in-memory backends
//! - **rag**: ingest/query pipeline, context assembly, answer synthesis
//! - **repl** / **cli**: terminal surfaces

pub mod errors;
pub mod types;

pub mod http;
pub mod retry;
pub mod telemetry;

pub mod dataset;
pub mod embedding;
pub mod index;
pub mod rag;

pub mod cli;
pub mod repl;

// Re-export commonly used types
pub use errors::{RagError, Result, Stage};
pub use rag::{Answer, AskOutcome, IngestReport, RagPipeline};
