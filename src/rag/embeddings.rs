//! Dense embeddings for chunks and queries.

use crate::types::{AppError, Result};
use crate::utils::toml_config::{EmbedderKind, RagdeskConfig};
use async_openai::{Client, config::OpenAIConfig, types::CreateEmbeddingRequestArgs};
use async_trait::async_trait;
use std::sync::Arc;

/// Pages per embeddings request
const EMBED_BATCH_SIZE: usize = 64;

/// Turns text into vectors. Query and chunk embeddings must come from the same model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch, preserving input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_texts(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::LLM("Embedding response was empty".to_string()))
    }

    fn model_name(&self) -> &str;
}

/// Embeddings endpoint of the configured provider
pub struct OpenAIEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAIEmbedder {
    pub fn new(api_key: String, api_base: String, model: String) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);

        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            // Blank pages are valid chunks, but the endpoint rejects empty input
            let input: Vec<String> = batch
                .iter()
                .map(|t| if t.trim().is_empty() { " ".to_string() } else { t.clone() })
                .collect();

            let request = CreateEmbeddingRequestArgs::default()
                .model(&self.model)
                .input(input)
                .build()
                .map_err(|e| AppError::LLM(format!("Failed to build embedding request: {}", e)))?;

            let mut response = self
                .client
                .embeddings()
                .create(request)
                .await
                .map_err(|e| AppError::LLM(format!("OpenAI embeddings error: {}", e)))?;

            if response.data.len() != batch.len() {
                return Err(AppError::LLM(format!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    response.data.len()
                )));
            }

            response.data.sort_by_key(|e| e.index);
            vectors.extend(response.data.into_iter().map(|e| e.embedding));
        }

        Ok(vectors)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(feature = "local-embeddings")]
pub use local::FastEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::*;
    use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
    use tokio::sync::OnceCell;

    /// Local ONNX embeddings, loaded on first use
    pub struct FastEmbedder {
        model_name: String,
        model_type: EmbeddingModel,
        model: OnceCell<Arc<tokio::sync::Mutex<TextEmbedding>>>,
    }

    impl FastEmbedder {
        pub fn new(model_name: &str) -> Result<Self> {
            let model_type = match model_name.to_lowercase().as_str() {
                "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" => {
                    EmbeddingModel::AllMiniLML6V2
                }
                "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
                "bge-base-en-v1.5" | "baai/bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
                other => {
                    return Err(AppError::Configuration(format!(
                        "Unknown local embedding model: {}. Use one of: \
                         all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5",
                        other
                    )))
                }
            };

            Ok(Self {
                model_name: model_name.to_string(),
                model_type,
                model: OnceCell::new(),
            })
        }

        async fn get_model(&self) -> Result<Arc<tokio::sync::Mutex<TextEmbedding>>> {
            self.model
                .get_or_try_init(|| async {
                    let model_type = self.model_type.clone();
                    tokio::task::spawn_blocking(move || {
                        let model = TextEmbedding::try_new(
                            InitOptions::new(model_type).with_show_download_progress(true),
                        )
                        .map_err(|e| {
                            AppError::Internal(format!("Failed to load embedding model: {}", e))
                        })?;
                        Ok(Arc::new(tokio::sync::Mutex::new(model)))
                    })
                    .await
                    .map_err(|e| AppError::Internal(format!("Embedding task failed: {}", e)))?
                })
                .await
                .map(Arc::clone)
        }
    }

    #[async_trait]
    impl Embedder for FastEmbedder {
        async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }

            let model = self.get_model().await?;
            let texts = texts.to_vec();
            tokio::task::spawn_blocking(move || {
                let mut model = model.blocking_lock();
                model.embed(texts, None)
            })
            .await
            .map_err(|e| AppError::Internal(format!("Embedding task failed: {}", e)))?
            .map_err(|e| AppError::Internal(format!("Embedding failed: {}", e)))
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }
    }
}

/// Build the embedder selected by `[rag].embedder`.
pub fn build_embedder(config: &RagdeskConfig) -> Result<Arc<dyn Embedder>> {
    match config.rag.embedder {
        EmbedderKind::OpenAI => Ok(Arc::new(OpenAIEmbedder::new(
            config.api_key()?,
            config.provider.api_base.clone(),
            config.rag.embedding_model.clone(),
        ))),
        #[cfg(feature = "local-embeddings")]
        EmbedderKind::FastEmbed => Ok(Arc::new(FastEmbedder::new(&config.rag.embedding_model)?)),
        #[cfg(not(feature = "local-embeddings"))]
        EmbedderKind::FastEmbed => Err(AppError::Configuration(
            "rag.embedder = \"fastembed\" requires the local-embeddings feature".to_string(),
        )),
    }
}
