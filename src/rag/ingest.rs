//! PDF ingestion: one chunk per page.
//!
//! Every page becomes exactly one [`DocumentChunk`] with a random id and
//! `{file, page}` metadata. Nothing is deduplicated: ingesting a file twice
//! stores its pages twice. Any extraction, embedding or store failure aborts
//! the run; pages of files already processed stay in the index.

use crate::db::vectorstore::VectorStore;
use crate::rag::embeddings::Embedder;
use crate::types::{AppError, ChunkMetadata, DocumentChunk, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Splits a document into per-page text
#[async_trait]
pub trait PageExtractor: Send + Sync {
    /// Text of each page, in page order. Pages without text yield an empty string.
    async fn extract_pages(&self, path: &Path) -> Result<Vec<String>>;
}

/// Page text via `pdf-extract`
#[derive(Debug, Default, Clone)]
pub struct PdfPageExtractor;

#[async_trait]
impl PageExtractor for PdfPageExtractor {
    async fn extract_pages(&self, path: &Path) -> Result<Vec<String>> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            AppError::Extraction(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let display = path.display().to_string();
        tokio::task::spawn_blocking(move || {
            pdf_extract::extract_text_from_mem_by_pages(&bytes).map_err(|e| {
                AppError::Extraction(format!("Failed to extract text from {}: {}", display, e))
            })
        })
        .await
        .map_err(|e| AppError::Internal(format!("Extraction task failed: {}", e)))?
    }
}

/// Outcome of an ingestion run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub files: usize,
    pub chunks: usize,
}

/// Builds chunks from documents and appends them to a collection
pub struct Ingestor {
    extractor: Arc<dyn PageExtractor>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
}

impl Ingestor {
    pub fn new(
        extractor: Arc<dyn PageExtractor>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            extractor,
            embedder,
            store,
        }
    }

    /// Ingest one document, returning the number of chunks stored.
    ///
    /// The `file` metadata is the file name without its directory.
    pub async fn ingest_file(&self, collection: &str, path: &Path) -> Result<usize> {
        let file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        tracing::info!(path = %path.display(), collection, "processing document");

        let pages = self.extractor.extract_pages(path).await?;
        if pages.is_empty() {
            tracing::warn!(path = %path.display(), "document has no pages");
            return Ok(0);
        }

        let embeddings = self.embedder.embed_texts(&pages).await?;
        if embeddings.len() != pages.len() {
            return Err(AppError::Internal(format!(
                "Embedder returned {} vectors for {} pages",
                embeddings.len(),
                pages.len()
            )));
        }

        let chunks: Vec<DocumentChunk> = pages
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(page, (text, embedding))| DocumentChunk {
                id: uuid::Uuid::new_v4().simple().to_string(),
                text,
                metadata: ChunkMetadata {
                    file: file.clone(),
                    page,
                },
                embedding: Some(embedding),
                created_at: Utc::now(),
            })
            .collect();

        let stored = self.store.append(collection, &chunks).await?;
        tracing::info!(file = %file, chunks = stored, "document indexed");
        Ok(stored)
    }

    /// Ingest documents in order, stopping at the first failure.
    pub async fn ingest_paths(&self, collection: &str, paths: &[PathBuf]) -> Result<IngestReport> {
        self.store.ensure_collection(collection).await?;

        let mut report = IngestReport::default();
        for path in paths {
            report.chunks += self.ingest_file(collection, path).await?;
            report.files += 1;
        }

        tracing::info!(
            collection,
            files = report.files,
            chunks = report.chunks,
            "ingestion complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_pdf_is_extraction_error() {
        let err = PdfPageExtractor
            .extract_pages(Path::new("/nonexistent/ragdesk/missing.pdf"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Extraction(_)));
    }

    #[tokio::test]
    async fn test_garbage_pdf_is_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"this is not a pdf").unwrap();

        let err = PdfPageExtractor.extract_pages(&path).await.unwrap_err();
        assert!(matches!(err, AppError::Extraction(_)));
    }
}
