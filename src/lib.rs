//! # ragdesk
//!
//! Two small LLM pipelines behind one HTTP server:
//!
//! - **Retrieval**: PDF pages are ingested one chunk per page, queries
//!   retrieve the top-K chunks, a reranker keeps the top-N, and the answer
//!   model streams a reply grounded in them.
//! - **Chinook assistant**: a tool-calling dispatcher decides between a
//!   textual answer (SQL, rows, follow-up prose) and a visual one (SQL, rows,
//!   a generated plotting script run in a sandbox, a PNG data URL).
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,ignore
//! use ragdesk::{AppState, RagdeskConfigManager};
//! use std::sync::Arc;
//!
//! let manager = Arc::new(RagdeskConfigManager::new("ragdesk.toml")?);
//! let state = AppState::build(manager).await?;
//!
//! let outcome = state
//!     .dispatcher
//!     .chat("How many employees does Chinook have?", None)
//!     .await?;
//! println!("{}", outcome.reply);
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `local-embeddings` (default) | fastembed embeddings and cross-encoder reranking |
//!
//! ## Modules
//!
//! - [`agents`] - Tool dispatcher for the Chinook assistant
//! - [`api`] - HTTP handlers and routes
//! - [`cli`] - Command-line parsing and output
//! - [`db`] - Vector store and the read-only Chinook database
//! - [`llm`] - LLM client, OpenAI implementation, streaming channel
//! - [`rag`] - Ingestion, embeddings, reranking, retrieval
//! - [`tools`] - Capabilities, SQL translation, chart generation, sandbox
//! - [`types`] - Common types and error handling
//! - [`utils`] - TOML configuration with hot reload

#![warn(rustdoc::missing_crate_level_docs)]

/// Tool dispatch orchestration.
pub mod agents;
/// HTTP API handlers and routes.
pub mod api;
/// Command-line interface.
pub mod cli;
/// Vector store and analytic database.
pub mod db;
/// LLM provider clients and abstractions.
pub mod llm;
/// Retrieval Augmented Generation (RAG) components.
pub mod rag;
/// Assistant capabilities.
pub mod tools;
/// Core types and errors.
pub mod types;
/// Configuration utilities.
pub mod utils;

// Re-export commonly used types
pub use agents::ToolDispatcher;
pub use llm::{LLMClient, LLMClientFactory, LLMResponse, Provider, StreamingResponder};
pub use rag::RetrievalPipeline;
pub use types::{AppError, Result};
pub use utils::toml_config::{RagdeskConfig, RagdeskConfigManager};

use crate::db::{AresVectorStore, ChinookDatabase, QueryExecutor, VectorStore};
use crate::rag::{build_embedder, build_reranker};
use crate::tools::{CodeRunner, SandboxRunner};
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// TOML configuration with hot-reload support
    pub config_manager: Arc<RagdeskConfigManager>,
    /// Retrieve, rerank and stream answers
    pub retrieval: Arc<RetrievalPipeline>,
    /// Chinook assistant
    pub dispatcher: Arc<ToolDispatcher>,
    /// Bounded channels for streamed bodies
    pub responder: StreamingResponder,
}

impl AppState {
    /// Open every service handle described by the current configuration.
    ///
    /// Handles live for the process; only retrieval parameters follow
    /// configuration reloads.
    pub async fn build(config_manager: Arc<RagdeskConfigManager>) -> Result<Self> {
        let config = config_manager.config();

        let factory = LLMClientFactory::from_config(&config)?;
        let assistant_llm = factory.create_default().await?;
        let answer_llm = factory.create_with_model(&config.models.answer).await?;

        let embedder = build_embedder(&config)?;
        let reranker = build_reranker(&config.rag)?;
        let store: Arc<dyn VectorStore> =
            Arc::new(AresVectorStore::open(&config.rag.vector_path).await?);
        let database: Arc<dyn QueryExecutor> =
            Arc::new(ChinookDatabase::open(&config.assistant.database_path).await?);
        let runner: Arc<dyn CodeRunner> = Arc::new(SandboxRunner::new(config.sandbox.clone()));
        let responder = StreamingResponder::new(config.stream.channel_capacity);

        tracing::info!(
            provider = factory.default_provider().name(),
            answer_model = %config.models.answer,
            assistant_model = %config.models.assistant,
            store = store.provider_name(),
            "services ready"
        );

        let retrieval = RetrievalPipeline::new(
            Arc::clone(&config_manager),
            embedder,
            store,
            reranker,
            answer_llm,
            responder.clone(),
        );
        let dispatcher = ToolDispatcher::new(assistant_llm, database, runner);

        Ok(Self::from_parts(config_manager, retrieval, dispatcher, responder))
    }

    /// Assemble state from prebuilt services
    pub fn from_parts(
        config_manager: Arc<RagdeskConfigManager>,
        retrieval: RetrievalPipeline,
        dispatcher: ToolDispatcher,
        responder: StreamingResponder,
    ) -> Self {
        Self {
            config_manager,
            retrieval: Arc::new(retrieval),
            dispatcher: Arc::new(dispatcher),
            responder,
        }
    }
}
