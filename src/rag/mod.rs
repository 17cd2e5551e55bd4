//! Retrieval Augmented Generation (RAG) Pipeline
//!
//! # Module Structure
//!
//! - [`rag::ingest`](crate::rag::ingest) - PDF pages to indexed chunks
//! - [`rag::embeddings`](crate::rag::embeddings) - Dense embeddings (OpenAI, or fastembed locally)
//! - [`rag::reranker`](crate::rag::reranker) - Lexical or cross-encoder reranking
//! - [`rag::query`](crate::rag::query) - Retrieve, rerank and stream an answer
//!
//! # RAG Pipeline
//!
//! 1. **Ingestion** - Each PDF page becomes one chunk with `{file, page}` metadata
//! 2. **Storage** - Chunks and embeddings appended to a collection
//! 3. **Retrieval** - Query embedded, top-K similar chunks fetched
//! 4. **Reranking** - Candidates rescored, top-N kept
//! 5. **Generation** - Model answers from the joined context, streamed
//!
//! # Example
//!
//! ```ignore
//! use ragdesk::rag::query::RetrievalPipeline;
//!
//! if let Some(stream) = pipeline.answer_stream("How long does charging take?").await? {
//!     let answer = stream.collect_text().await?;
//!     println!("{}", answer);
//! }
//! ```

pub mod embeddings;
pub mod ingest;
pub mod query;
pub mod reranker;

pub use embeddings::{build_embedder, Embedder, OpenAIEmbedder};
pub use ingest::{IngestReport, Ingestor, PageExtractor, PdfPageExtractor};
pub use query::RetrievalPipeline;
pub use reranker::{build_reranker, rerank_chunks, LexicalReranker, RerankedChunk, Reranker};
