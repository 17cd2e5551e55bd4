//! Retrieve, rerank, then stream a grounded answer.

use crate::db::vectorstore::VectorStore;
use crate::llm::{GenerationOptions, LLMClient, ResponseStream, StreamingResponder};
use crate::rag::embeddings::Embedder;
use crate::rag::reranker::{rerank_chunks, RerankedChunk, Reranker};
use crate::types::{ChatMessage, Result, RetrievedChunk};
use crate::utils::toml_config::RagdeskConfigManager;
use std::sync::Arc;

/// Separator between context passages
const CONTEXT_SEPARATOR: &str = "\n\n";

/// Build the generation prompt for a question and its context block.
pub fn answer_prompt(question: &str, context: &str) -> String {
    format!(
        "Answer the following question using the provided context, and if the answer \
         is not contained within the context, say \"I don't know.\" Explain your answer \
         if possible. Do not use markdown formatting in your output, and do not mention \
         the context provided to you.\n\n\
         Question:\n{question}\n\n\
         Context:\n{context}"
    )
}

/// Two-stage retrieval feeding a streamed generation.
///
/// `retrieve_k`, `rerank_top_n` and the collection name are read from the
/// configuration on every request, so a hot reload applies to the next query.
pub struct RetrievalPipeline {
    config: Arc<RagdeskConfigManager>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    reranker: Arc<dyn Reranker>,
    llm: Arc<dyn LLMClient>,
    responder: StreamingResponder,
}

impl RetrievalPipeline {
    pub fn new(
        config: Arc<RagdeskConfigManager>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        reranker: Arc<dyn Reranker>,
        llm: Arc<dyn LLMClient>,
        responder: StreamingResponder,
    ) -> Self {
        Self {
            config,
            embedder,
            store,
            reranker,
            llm,
            responder,
        }
    }

    /// Top-K chunks by vector similarity.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        let config = self.config.config();
        let embedding = self.embedder.embed_query(query).await?;
        let candidates = self
            .store
            .search(&config.rag.collection, &embedding, config.rag.retrieve_k)
            .await?;

        tracing::debug!(
            collection = %config.rag.collection,
            k = config.rag.retrieve_k,
            retrieved = candidates.len(),
            "retrieved candidates"
        );
        Ok(candidates)
    }

    /// Keep the top-N candidates by reranker score.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievedChunk>,
    ) -> Result<Vec<RerankedChunk>> {
        let top_n = self.config.config().rag.rerank_top_n;
        rerank_chunks(self.reranker.as_ref(), query, candidates, top_n).await
    }

    /// Chunk texts in rank order, separated by blank lines.
    pub fn build_context(chunks: &[RerankedChunk]) -> String {
        chunks
            .iter()
            .map(|c| c.chunk.text.as_str())
            .collect::<Vec<_>>()
            .join(CONTEXT_SEPARATOR)
    }

    /// Answer `query` from the indexed documents as a stream of fragments.
    ///
    /// Returns `Ok(None)` for an empty query: nothing is retrieved and no
    /// model call is made. A whitespace-only query is not empty.
    pub async fn answer_stream(&self, query: &str) -> Result<Option<ResponseStream>> {
        if query.is_empty() {
            tracing::debug!("empty query, no answer produced");
            return Ok(None);
        }

        let candidates = self.retrieve(query).await?;
        let selected = self.rerank(query, candidates).await?;
        let context = Self::build_context(&selected);

        tracing::info!(
            passages = selected.len(),
            model = self.llm.model_name(),
            "generating answer"
        );

        let messages = [ChatMessage::user(answer_prompt(query, &context))];
        let fragments = self
            .llm
            .stream_chat(&messages, &GenerationOptions::default())
            .await?;

        Ok(Some(self.responder.spawn(fragments)))
    }
}
