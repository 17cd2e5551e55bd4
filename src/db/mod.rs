//! Document index and analytic database.
//!
//! - **Vector store**: append-only chunk index over an HNSW index
//! - **Chinook**: read-only SQLite store queried by the assistant

#![allow(missing_docs)]

/// HNSW-backed document index with a chunk journal.
pub mod ares_vector;
/// Read-only Chinook database access.
pub mod chinook;
/// Vector store abstraction.
pub mod vectorstore;

// Re-exports
pub use ares_vector::AresVectorStore;
pub use chinook::{ChinookDatabase, QueryExecutor, QueryRows, CHINOOK_SCHEMA};
pub use vectorstore::{CollectionInfo, VectorStore};
