//! AresVector document index
//!
//! Similarity search runs on an in-process HNSW index from the `ares-vector`
//! crate. Chunk text, `{file, page}` metadata and embeddings are kept in a
//! side journal (a local libsql file) that is only ever appended to; opening
//! a persisted store replays the journal into a fresh index.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = AresVectorStore::open("./data/vectors").await?;
//! store.ensure_collection("Electric_Vehicles").await?;
//! store.append("Electric_Vehicles", &chunks).await?;
//! let hits = store.search("Electric_Vehicles", &embedding, 10).await?;
//! ```

use crate::types::{AppError, ChunkMetadata, DocumentChunk, Result, RetrievedChunk};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Database, Value};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::vectorstore::{CollectionInfo, VectorStore};
use ares_vector::{Config, DistanceMetric, VectorDb, VectorMetadata};

const JOURNAL_FILE: &str = "chunks.db";

// ============================================================================
// Side document map
// ============================================================================

#[derive(Debug, Default)]
struct CollectionDocs {
    dimensions: Option<usize>,
    /// Chunks in insertion order, embeddings stripped
    chunks: Vec<DocumentChunk>,
    positions: HashMap<String, usize>,
}

impl CollectionDocs {
    fn push(&mut self, chunk: &DocumentChunk) {
        self.positions.insert(chunk.id.clone(), self.chunks.len());
        self.chunks.push(DocumentChunk {
            embedding: None,
            ..chunk.clone()
        });
    }
}

// ============================================================================
// Journal
// ============================================================================

/// Append-only record of collections and chunks
struct ChunkJournal {
    db: Database,
    path: PathBuf,
}

impl ChunkJournal {
    async fn open(path: PathBuf) -> Result<Self> {
        let db = Builder::new_local(&path).build().await.map_err(|e| {
            AppError::VectorStore(format!("Failed to open {}: {}", path.display(), e))
        })?;
        let journal = Self { db, path };
        journal.initialize_schema().await?;
        Ok(journal)
    }

    fn connection(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| AppError::VectorStore(format!("Failed to get connection: {}", e)))
    }

    async fn initialize_schema(&self) -> Result<()> {
        let conn = self.connection()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                created_at INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| AppError::VectorStore(format!("Failed to create collections table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunks (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                text TEXT NOT NULL,
                file TEXT NOT NULL,
                page INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                embedding BLOB NOT NULL,
                FOREIGN KEY (collection) REFERENCES collections(name)
            )",
            (),
        )
        .await
        .map_err(|e| AppError::VectorStore(format!("Failed to create chunks table: {}", e)))?;

        Ok(())
    }

    async fn record_collection(&self, name: &str) -> Result<()> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT OR IGNORE INTO collections (name, created_at) VALUES (?, ?)",
            (name, Utc::now().timestamp()),
        )
        .await
        .map_err(|e| AppError::VectorStore(format!("Failed to record collection: {}", e)))?;
        Ok(())
    }

    /// Write a whole batch in one transaction
    async fn record_chunks(&self, collection: &str, chunks: &[DocumentChunk]) -> Result<()> {
        let conn = self.connection()?;
        let tx = conn
            .transaction()
            .await
            .map_err(|e| AppError::VectorStore(format!("Failed to begin append: {}", e)))?;

        for chunk in chunks {
            let embedding = chunk.embedding.as_deref().unwrap_or_default();
            tx.execute(
                "INSERT INTO chunks (collection, id, text, file, page, created_at, embedding)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                vec![
                    Value::Text(collection.to_string()),
                    Value::Text(chunk.id.clone()),
                    Value::Text(chunk.text.clone()),
                    Value::Text(chunk.metadata.file.clone()),
                    Value::Integer(chunk.metadata.page as i64),
                    Value::Text(chunk.created_at.to_rfc3339()),
                    Value::Blob(encode_embedding(embedding)),
                ],
            )
            .await
            .map_err(|e| AppError::VectorStore(format!("Failed to append chunk: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::VectorStore(format!("Failed to commit append: {}", e)))?;
        Ok(())
    }

    async fn collection_names(&self) -> Result<Vec<String>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query("SELECT name FROM collections ORDER BY name", ())
            .await
            .map_err(|e| AppError::VectorStore(format!("Failed to list collections: {}", e)))?;

        let mut names = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::VectorStore(e.to_string()))?
        {
            names.push(
                row.get::<String>(0)
                    .map_err(|e| AppError::VectorStore(e.to_string()))?,
            );
        }
        Ok(names)
    }

    /// Every chunk in insertion order, embeddings included
    async fn replay(&self) -> Result<Vec<(String, DocumentChunk)>> {
        let conn = self.connection()?;
        let mut rows = conn
            .query(
                "SELECT collection, id, text, file, page, created_at, embedding
                 FROM chunks ORDER BY seq",
                (),
            )
            .await
            .map_err(|e| AppError::VectorStore(format!("Failed to read journal: {}", e)))?;

        let corrupt = |what: &str| AppError::VectorStore(format!("Corrupt journal entry: {}", what));

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::VectorStore(e.to_string()))?
        {
            let text_at = |idx: i32| -> Result<String> {
                match row.get_value(idx) {
                    Ok(Value::Text(s)) => Ok(s),
                    _ => Err(corrupt("expected text")),
                }
            };

            let collection = text_at(0)?;
            let id = text_at(1)?;
            let text = text_at(2)?;
            let file = text_at(3)?;
            let page = match row.get_value(4) {
                Ok(Value::Integer(p)) if p >= 0 => p as usize,
                _ => return Err(corrupt("page")),
            };
            let created_at = DateTime::parse_from_rfc3339(&text_at(5)?)
                .map_err(|_| corrupt("created_at"))?
                .with_timezone(&Utc);
            let embedding = match row.get_value(6) {
                Ok(Value::Blob(bytes)) => decode_embedding(&bytes).ok_or_else(|| corrupt("embedding"))?,
                _ => return Err(corrupt("embedding")),
            };

            out.push((
                collection,
                DocumentChunk {
                    id,
                    text,
                    metadata: ChunkMetadata { file, page },
                    embedding: Some(embedding),
                    created_at,
                },
            ));
        }
        Ok(out)
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

// ============================================================================
// AresVector Store Implementation
// ============================================================================

/// HNSW index plus an append-only chunk journal.
pub struct AresVectorStore {
    /// The underlying vector database (VectorDb is Clone and uses Arc internally)
    db: VectorDb,
    /// Chunk text and metadata per collection
    documents: Arc<RwLock<HashMap<String, CollectionDocs>>>,
    /// None for in-memory stores
    journal: Option<ChunkJournal>,
    /// Serializes appends so validation and insertion see the same state
    append_lock: tokio::sync::Mutex<()>,
}

impl AresVectorStore {
    /// Store that lives only as long as the process.
    pub async fn in_memory() -> Result<Self> {
        Ok(Self {
            db: Self::open_index().await?,
            documents: Arc::new(RwLock::new(HashMap::new())),
            journal: None,
            append_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Open (or create) a store persisted under `dir`.
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            AppError::VectorStore(format!("Failed to create {}: {}", dir.display(), e))
        })?;

        let journal = ChunkJournal::open(dir.join(JOURNAL_FILE)).await?;
        let store = Self {
            db: Self::open_index().await?,
            documents: Arc::new(RwLock::new(HashMap::new())),
            journal: None,
            append_lock: tokio::sync::Mutex::new(()),
        };

        for name in journal.collection_names().await? {
            store.documents.write().entry(name).or_default();
        }

        let mut by_collection: HashMap<String, Vec<DocumentChunk>> = HashMap::new();
        for (collection, chunk) in journal.replay().await? {
            by_collection.entry(collection).or_default().push(chunk);
        }
        for (collection, chunks) in &by_collection {
            store.index_chunks(collection, chunks).await?;
        }

        tracing::info!(
            path = %journal.path.display(),
            collections = store.documents.read().len(),
            chunks = by_collection.values().map(Vec::len).sum::<usize>(),
            "opened vector store"
        );

        Ok(Self {
            journal: Some(journal),
            ..store
        })
    }

    async fn open_index() -> Result<VectorDb> {
        VectorDb::open(Config::memory()).await.map_err(|e| {
            AppError::VectorStore(format!("Failed to initialize AresVector: {}", e))
        })
    }

    /// Reject the batch unless every chunk can be appended
    fn validate_batch(&self, collection: &str, chunks: &[DocumentChunk]) -> Result<()> {
        let documents = self.documents.read();
        let docs = documents.get(collection).ok_or_else(|| missing(collection))?;

        let mut dimensions = docs.dimensions;
        let mut batch_ids = HashSet::new();
        for chunk in chunks {
            let embedding = chunk.embedding.as_ref().ok_or_else(|| {
                AppError::InvalidInput(format!("Chunk '{}' is missing embedding", chunk.id))
            })?;
            match dimensions {
                Some(d) if d != embedding.len() => {
                    return Err(AppError::VectorStore(format!(
                        "Chunk '{}' has {} dimensions, collection '{}' expects {}",
                        chunk.id,
                        embedding.len(),
                        collection,
                        d
                    )));
                }
                Some(_) => {}
                None if embedding.is_empty() => {
                    return Err(AppError::InvalidInput(format!(
                        "Chunk '{}' has an empty embedding",
                        chunk.id
                    )));
                }
                None => dimensions = Some(embedding.len()),
            }
            if embedding.iter().any(|v| !v.is_finite()) {
                return Err(AppError::InvalidInput(format!(
                    "Chunk '{}' embedding contains NaN or Inf",
                    chunk.id
                )));
            }
            if docs.positions.contains_key(&chunk.id) || !batch_ids.insert(chunk.id.as_str()) {
                return Err(AppError::VectorStore(format!(
                    "Chunk id '{}' already exists in '{}'",
                    chunk.id, collection
                )));
            }
        }
        Ok(())
    }

    /// Insert validated chunks into the HNSW index and the document map
    async fn index_chunks(&self, collection: &str, chunks: &[DocumentChunk]) -> Result<()> {
        let Some(dimensions) = chunks
            .iter()
            .find_map(|c| c.embedding.as_ref().map(Vec::len))
        else {
            return Ok(());
        };

        if !self.db.collection_exists(collection) {
            self.db
                .create_collection(collection, dimensions, DistanceMetric::Cosine)
                .await
                .map_err(|e| {
                    AppError::VectorStore(format!("Failed to create collection: {}", e))
                })?;
        }

        let vectors = chunks.iter().filter_map(|c| {
            c.embedding
                .as_deref()
                .map(|embedding| (c.id.as_str(), embedding, None::<VectorMetadata>))
        });
        self.db
            .insert_batch(collection, vectors)
            .await
            .map_err(|e| AppError::VectorStore(format!("Failed to insert vectors: {}", e)))?;

        let mut documents = self.documents.write();
        let docs = documents.entry(collection.to_string()).or_default();
        docs.dimensions.get_or_insert(dimensions);
        for chunk in chunks {
            docs.push(chunk);
        }
        Ok(())
    }
}

fn missing(collection: &str) -> AppError {
    AppError::NotFound(format!("Collection '{}' not found", collection))
}

#[async_trait]
impl VectorStore for AresVectorStore {
    fn provider_name(&self) -> &'static str {
        "ares-vector"
    }

    async fn ensure_collection(&self, name: &str) -> Result<()> {
        if self.documents.read().contains_key(name) {
            return Ok(());
        }

        if let Some(journal) = &self.journal {
            journal.record_collection(name).await?;
        }
        let created = {
            let mut documents = self.documents.write();
            if documents.contains_key(name) {
                false
            } else {
                documents.insert(name.to_string(), CollectionDocs::default());
                true
            }
        };

        if created {
            tracing::info!(collection = name, "created collection");
        }
        Ok(())
    }

    async fn append(&self, collection: &str, chunks: &[DocumentChunk]) -> Result<usize> {
        let _guard = self.append_lock.lock().await;
        self.validate_batch(collection, chunks)?;
        if chunks.is_empty() {
            return Ok(0);
        }

        if let Some(journal) = &self.journal {
            journal.record_chunks(collection, chunks).await?;
        }
        self.index_chunks(collection, chunks).await?;

        tracing::debug!(collection, chunks = chunks.len(), "appended chunks");
        Ok(chunks.len())
    }

    async fn search(
        &self,
        collection: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let dimensions = {
            let documents = self.documents.read();
            let docs = documents.get(collection).ok_or_else(|| missing(collection))?;
            if docs.chunks.is_empty() || limit == 0 {
                return Ok(Vec::new());
            }
            docs.dimensions
        };

        if let Some(d) = dimensions {
            if d != embedding.len() {
                return Err(AppError::VectorStore(format!(
                    "Query has {} dimensions, collection '{}' expects {}",
                    embedding.len(),
                    collection,
                    d
                )));
            }
        }

        let hits = self
            .db
            .search(collection, embedding, limit)
            .await
            .map_err(|e| AppError::VectorStore(format!("Search failed: {}", e)))?;

        let documents = self.documents.read();
        let docs = documents.get(collection).ok_or_else(|| missing(collection))?;

        let mut scored: Vec<(usize, f32)> = hits
            .into_iter()
            .filter_map(|hit| docs.positions.get(&hit.id).map(|&pos| (pos, hit.score)))
            .collect();

        // Ties keep insertion order
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(limit);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(position, (idx, score))| RetrievedChunk {
                chunk: docs.chunks[idx].clone(),
                score,
                rank: position + 1,
            })
            .collect())
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.documents
            .read()
            .get(collection)
            .map(|docs| docs.chunks.len())
            .ok_or_else(|| missing(collection))
    }

    async fn list_chunks(&self, collection: &str) -> Result<Vec<DocumentChunk>> {
        self.documents
            .read()
            .get(collection)
            .map(|docs| docs.chunks.clone())
            .ok_or_else(|| missing(collection))
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let documents = self.documents.read();
        let mut infos: Vec<CollectionInfo> = documents
            .iter()
            .map(|(name, docs)| CollectionInfo {
                name: name.clone(),
                document_count: docs.chunks.len(),
                dimensions: docs.dimensions,
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(infos)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, text: &str, embedding: Vec<f32>) -> DocumentChunk {
        DocumentChunk {
            id: id.to_string(),
            text: text.to_string(),
            metadata: ChunkMetadata {
                file: "test.pdf".to_string(),
                page: 0,
            },
            embedding: Some(embedding),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_search_ranks_by_similarity() {
        let store = AresVectorStore::in_memory().await.unwrap();
        store.ensure_collection("test").await.unwrap();

        store
            .append(
                "test",
                &[
                    chunk("doc1", "Hello world", vec![1.0, 0.0, 0.0]),
                    chunk("doc2", "Goodbye world", vec![0.0, 1.0, 0.0]),
                    chunk("doc3", "Hello again", vec![0.9, 0.1, 0.0]),
                ],
            )
            .await
            .unwrap();

        let results = store.search("test", &[1.0, 0.0, 0.0], 2).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, "doc1");
        assert_eq!(results[0].rank, 1);
        assert_eq!(results[1].chunk.id, "doc3");
        assert_eq!(results[1].rank, 2);
        assert!(results[0].chunk.embedding.is_none());
    }

    #[tokio::test]
    async fn test_search_empty_collection_returns_nothing() {
        let store = AresVectorStore::in_memory().await.unwrap();
        store.ensure_collection("test").await.unwrap();

        assert!(store.search("test", &[1.0, 0.0], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_collection_is_idempotent() {
        let store = AresVectorStore::in_memory().await.unwrap();
        store.ensure_collection("test").await.unwrap();
        store.append("test", &[chunk("a", "x", vec![1.0])]).await.unwrap();
        store.ensure_collection("test").await.unwrap();

        assert_eq!(store.count("test").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejects_whole_batch() {
        let store = AresVectorStore::in_memory().await.unwrap();
        store.ensure_collection("test").await.unwrap();
        store.append("test", &[chunk("a", "x", vec![1.0, 0.0])]).await.unwrap();

        let result = store
            .append(
                "test",
                &[chunk("b", "y", vec![0.0, 1.0]), chunk("c", "z", vec![1.0])],
            )
            .await;

        assert!(matches!(result, Err(AppError::VectorStore(_))));
        assert_eq!(store.count("test").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let store = AresVectorStore::in_memory().await.unwrap();
        store.ensure_collection("test").await.unwrap();
        store.append("test", &[chunk("a", "x", vec![1.0])]).await.unwrap();

        let result = store.append("test", &[chunk("a", "x", vec![1.0])]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_embedding_rejected() {
        let store = AresVectorStore::in_memory().await.unwrap();
        store.ensure_collection("test").await.unwrap();

        let mut bare = chunk("a", "x", vec![1.0]);
        bare.embedding = None;
        assert!(matches!(
            store.append("test", &[bare]).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_non_finite_embedding_rejected() {
        let store = AresVectorStore::in_memory().await.unwrap();
        store.ensure_collection("test").await.unwrap();

        let result = store.append("test", &[chunk("a", "x", vec![f32::NAN, 1.0])]).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
        assert_eq!(store.count("test").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_unknown_collection() {
        let store = AresVectorStore::in_memory().await.unwrap();
        assert!(matches!(
            store.search("nope", &[1.0], 10).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_persisted_store_reopens_with_chunks() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = AresVectorStore::open(dir.path()).await.unwrap();
            store.ensure_collection("Electric_Vehicles").await.unwrap();
            store
                .append(
                    "Electric_Vehicles",
                    &[
                        chunk("p0", "page zero", vec![1.0, 0.0]),
                        chunk("p1", "page one", vec![0.0, 1.0]),
                    ],
                )
                .await
                .unwrap();
        }

        let reopened = AresVectorStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.provider_name(), "ares-vector");
        assert_eq!(reopened.count("Electric_Vehicles").await.unwrap(), 2);

        let chunks = reopened.list_chunks("Electric_Vehicles").await.unwrap();
        assert_eq!(chunks[0].id, "p0");
        assert_eq!(chunks[1].text, "page one");

        // the index is rebuilt from the journal
        let hits = reopened
            .search("Electric_Vehicles", &[0.0, 1.0], 1)
            .await
            .unwrap();
        assert_eq!(hits[0].chunk.id, "p1");

        // ids survive the reload, so reuse is still caught
        let dup = reopened
            .append("Electric_Vehicles", &[chunk("p0", "again", vec![1.0, 0.0])])
            .await;
        assert!(dup.is_err());
    }

    #[tokio::test]
    async fn test_empty_collection_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        AresVectorStore::open(dir.path())
            .await
            .unwrap()
            .ensure_collection("Cars")
            .await
            .unwrap();

        let reopened = AresVectorStore::open(dir.path()).await.unwrap();
        let infos = reopened.list_collections().await.unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "Cars");
        assert_eq!(infos[0].dimensions, None);
    }

    #[tokio::test]
    async fn test_list_collections() {
        let store = AresVectorStore::in_memory().await.unwrap();
        store.ensure_collection("b").await.unwrap();
        store.ensure_collection("a").await.unwrap();
        store.append("a", &[chunk("x", "t", vec![1.0, 2.0, 3.0])]).await.unwrap();

        let infos = store.list_collections().await.unwrap();
        assert_eq!(infos[0].name, "a");
        assert_eq!(infos[0].dimensions, Some(3));
        assert_eq!(infos[1].document_count, 0);
    }

    #[test]
    fn test_embedding_blob_layout() {
        let bytes = encode_embedding(&[1.0, -0.5]);
        assert_eq!(bytes.len(), 8);
        assert_eq!(decode_embedding(&bytes), Some(vec![1.0, -0.5]));
        assert_eq!(decode_embedding(&bytes[..7]), None);
    }
}
