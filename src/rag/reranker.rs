//! Second-stage relevance scoring for retrieved chunks.
//!
//! Retrieval hands over K candidates ordered by vector similarity; a
//! [`Reranker`] scores each one against the query and [`rerank_chunks`]
//! keeps the best N. Two scorers ship:
//! - **Lexical**: BM25 computed over the candidate set itself
//! - **Cross-encoder**: a local fastembed model (`local-embeddings` feature)

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{AppError, DocumentChunk, Result, RetrievedChunk};
use crate::utils::toml_config::{RagConfig, RerankerKind};

// ============================================================================
// Reranker Trait
// ============================================================================

/// Scores candidate passages against a query
#[async_trait]
pub trait Reranker: Send + Sync {
    /// One relevance score per document, in input order. Higher is better.
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;

    /// Short identifier for logs
    fn name(&self) -> &str;
}

// ============================================================================
// Reranked Result
// ============================================================================

/// A chunk after reranking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankedChunk {
    pub chunk: DocumentChunk,
    /// Similarity score from retrieval
    pub retrieval_score: f32,
    /// Score assigned by the reranker
    pub rerank_score: f32,
    /// 1-based rank before reranking
    pub original_rank: usize,
    /// 1-based rank after reranking
    pub new_rank: usize,
}

/// Rerank `candidates` and keep at most `top_n`.
///
/// Ordering is by rerank score descending; equal scores keep their
/// retrieval order.
pub async fn rerank_chunks(
    reranker: &dyn Reranker,
    query: &str,
    candidates: Vec<RetrievedChunk>,
    top_n: usize,
) -> Result<Vec<RerankedChunk>> {
    if candidates.is_empty() || top_n == 0 {
        return Ok(Vec::new());
    }

    let documents: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();
    let scores = reranker.score(query, &documents).await?;

    if scores.len() != candidates.len() {
        return Err(AppError::Internal(format!(
            "Reranker {} returned {} scores for {} documents",
            reranker.name(),
            scores.len(),
            candidates.len()
        )));
    }

    let mut reranked: Vec<RerankedChunk> = candidates
        .into_iter()
        .zip(scores)
        .enumerate()
        .map(|(idx, (candidate, rerank_score))| RerankedChunk {
            chunk: candidate.chunk,
            retrieval_score: candidate.score,
            rerank_score,
            original_rank: idx + 1,
            new_rank: 0,
        })
        .collect();

    // sort_by is stable, so ties stay in retrieval order
    reranked.sort_by(|a, b| {
        b.rerank_score
            .partial_cmp(&a.rerank_score)
            .unwrap_or(Ordering::Equal)
    });

    for (idx, result) in reranked.iter_mut().enumerate() {
        result.new_rank = idx + 1;
    }

    reranked.truncate(top_n);

    tracing::debug!(
        reranker = reranker.name(),
        kept = reranked.len(),
        top_n,
        "reranked candidates"
    );

    Ok(reranked)
}

// ============================================================================
// Lexical (BM25) Reranker
// ============================================================================

/// BM25 over the candidate set. No model download, deterministic.
#[derive(Debug, Clone)]
pub struct LexicalReranker {
    k1: f32,
    b: f32,
}

impl Default for LexicalReranker {
    fn default() -> Self {
        Self { k1: 1.2, b: 0.75 }
    }
}

impl LexicalReranker {
    pub fn new() -> Self {
        Self::default()
    }

    fn bm25(&self, query: &str, documents: &[String]) -> Vec<f32> {
        let docs: Vec<Vec<String>> = documents.iter().map(|d| tokenize(d)).collect();
        let n = docs.len() as f32;
        let avg_len = if docs.is_empty() {
            0.0
        } else {
            docs.iter().map(|d| d.len()).sum::<usize>() as f32 / n
        };

        let mut query_terms = tokenize(query);
        query_terms.sort();
        query_terms.dedup();

        let mut df: HashMap<&str, usize> = HashMap::new();
        for term in &query_terms {
            let count = docs.iter().filter(|d| d.contains(term)).count();
            df.insert(term.as_str(), count);
        }

        docs.iter()
            .map(|doc| {
                let doc_len = doc.len() as f32;
                query_terms
                    .iter()
                    .map(|term| {
                        let tf = doc.iter().filter(|t| *t == term).count() as f32;
                        if tf == 0.0 {
                            return 0.0;
                        }
                        let df = df.get(term.as_str()).copied().unwrap_or(0) as f32;
                        let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
                        let norm = if avg_len > 0.0 {
                            1.0 - self.b + self.b * doc_len / avg_len
                        } else {
                            1.0
                        };
                        idf * (tf * (self.k1 + 1.0)) / (tf + self.k1 * norm)
                    })
                    .sum()
            })
            .collect()
    }
}

/// Lowercase, split on non-alphanumerics, drop single characters
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() > 1)
        .map(String::from)
        .collect()
}

#[async_trait]
impl Reranker for LexicalReranker {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        Ok(self.bm25(query, documents))
    }

    fn name(&self) -> &str {
        "lexical"
    }
}

// ============================================================================
// Cross-Encoder Reranker
// ============================================================================

#[cfg(feature = "local-embeddings")]
pub use cross_encoder::{CrossEncoderReranker, RerankerModelType};

#[cfg(feature = "local-embeddings")]
mod cross_encoder {
    use super::*;
    use fastembed::{RerankInitOptions, RerankerModel as FastEmbedRerankerModel, TextRerank};
    use std::str::FromStr;
    use tokio::sync::OnceCell;

    /// Supported cross-encoder models
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum RerankerModelType {
        /// Fast English reranker
        #[default]
        JinaRerankerV1TurboEn,
        BgeRerankerBase,
        /// Multilingual
        BgeRerankerV2M3,
    }

    impl RerankerModelType {
        fn to_fastembed_model(self) -> FastEmbedRerankerModel {
            match self {
                Self::JinaRerankerV1TurboEn => FastEmbedRerankerModel::JINARerankerV1TurboEn,
                Self::BgeRerankerBase => FastEmbedRerankerModel::BGERerankerBase,
                Self::BgeRerankerV2M3 => FastEmbedRerankerModel::BGERerankerV2M3,
            }
        }
    }

    impl FromStr for RerankerModelType {
        type Err = AppError;

        fn from_str(s: &str) -> Result<Self> {
            match s.to_lowercase().as_str() {
                "jina-reranker-v1-turbo-en" | "jina-turbo" => Ok(Self::JinaRerankerV1TurboEn),
                "bge-reranker-base" | "bge-base" => Ok(Self::BgeRerankerBase),
                "bge-reranker-v2-m3" | "bge-m3" => Ok(Self::BgeRerankerV2M3),
                _ => Err(AppError::Configuration(format!(
                    "Unknown reranker model: {}. Use one of: jina-reranker-v1-turbo-en, \
                     bge-reranker-base, bge-reranker-v2-m3",
                    s
                ))),
            }
        }
    }

    /// Cross-encoder scoring with a lazily loaded local model
    pub struct CrossEncoderReranker {
        model_type: RerankerModelType,
        model: OnceCell<Arc<tokio::sync::Mutex<TextRerank>>>,
    }

    impl CrossEncoderReranker {
        pub fn new(model_type: RerankerModelType) -> Self {
            Self {
                model_type,
                model: OnceCell::new(),
            }
        }

        async fn get_model(&self) -> Result<Arc<tokio::sync::Mutex<TextRerank>>> {
            self.model
                .get_or_try_init(|| async {
                    let model_type = self.model_type;
                    tokio::task::spawn_blocking(move || {
                        let init_options = RerankInitOptions::new(model_type.to_fastembed_model())
                            .with_show_download_progress(true);
                        let model = TextRerank::try_new(init_options).map_err(|e| {
                            AppError::Internal(format!("Failed to load reranker: {}", e))
                        })?;
                        Ok(Arc::new(tokio::sync::Mutex::new(model)))
                    })
                    .await
                    .map_err(|e| AppError::Internal(format!("Reranker task failed: {}", e)))?
                })
                .await
                .map(Arc::clone)
        }
    }

    #[async_trait]
    impl Reranker for CrossEncoderReranker {
        async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
            if documents.is_empty() {
                return Ok(Vec::new());
            }

            let model = self.get_model().await?;
            let documents = documents.to_vec();
            let len = documents.len();
            let query = query.to_string();
            let results = tokio::task::spawn_blocking(move || {
                let mut model = model.blocking_lock();
                model.rerank(query, &documents, false, None)
            })
            .await
            .map_err(|e| AppError::Internal(format!("Rerank task failed: {}", e)))?
            .map_err(|e| AppError::Internal(format!("Reranking failed: {}", e)))?;

            let mut scores = vec![0.0; len];
            for r in results {
                if let Some(slot) = scores.get_mut(r.index) {
                    *slot = r.score;
                }
            }
            Ok(scores)
        }

        fn name(&self) -> &str {
            "cross-encoder"
        }
    }
}

/// Build the reranker selected by `[rag].reranker`.
pub fn build_reranker(config: &RagConfig) -> Result<Arc<dyn Reranker>> {
    match config.reranker {
        RerankerKind::Lexical => Ok(Arc::new(LexicalReranker::new())),
        #[cfg(feature = "local-embeddings")]
        RerankerKind::CrossEncoder => {
            let model_type: RerankerModelType = config.reranker_model.parse()?;
            Ok(Arc::new(CrossEncoderReranker::new(model_type)))
        }
        #[cfg(not(feature = "local-embeddings"))]
        RerankerKind::CrossEncoder => Err(AppError::Configuration(
            "rag.reranker = \"cross-encoder\" requires the local-embeddings feature".to_string(),
        )),
    }
}

// ============================================================================
// Tests
// ============================================================================
