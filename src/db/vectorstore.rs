//! Vector Store Abstraction Layer
//!
//! The document index behind the retrieval pipeline. Collections are
//! append-only: chunks are never updated or deleted, and re-ingesting a file
//! adds a second copy of every page.
//!
//! # Example
//!
//! ```rust,ignore
//! use ragdesk::db::{AresVectorStore, VectorStore};
//!
//! let store = AresVectorStore::open("./data/vectors").await?;
//! store.ensure_collection("Electric_Vehicles").await?;
//! store.append("Electric_Vehicles", &chunks).await?;
//!
//! let hits = store.search("Electric_Vehicles", &query_embedding, 10).await?;
//! ```

use crate::types::{DocumentChunk, Result, RetrievedChunk};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Information about a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    /// Name of the collection.
    pub name: String,
    /// Number of chunks in the collection.
    pub document_count: usize,
    /// Vector dimensions, unknown until the first append.
    pub dimensions: Option<usize>,
}

// ============================================================================
// Vector Store Trait
// ============================================================================

/// Abstract trait for the document index.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Get the name of this vector store provider.
    fn provider_name(&self) -> &'static str;

    /// Create the collection if it does not exist yet.
    async fn ensure_collection(&self, name: &str) -> Result<()>;

    /// Append embedded chunks to a collection.
    ///
    /// # Errors
    ///
    /// Fails without modifying the collection if any chunk lacks an embedding,
    /// has the wrong dimensionality, or reuses an existing identifier.
    async fn append(&self, collection: &str, chunks: &[DocumentChunk]) -> Result<usize>;

    /// Return up to `limit` chunks ordered by cosine similarity, ranked from 1.
    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>>;

    /// Number of chunks in a collection.
    async fn count(&self, collection: &str) -> Result<usize>;

    /// All chunks of a collection in insertion order, without embeddings.
    async fn list_chunks(&self, collection: &str) -> Result<Vec<DocumentChunk>>;

    /// List all collections.
    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;
}
