//! Mock implementations for testing.
//!
//! Every service the pipelines depend on has a scripted stand-in here, so
//! integration tests never reach a model provider, a database file or a
//! Python interpreter.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use ragdesk::db::QueryRows;
use ragdesk::llm::{GenerationOptions, LLMClient, LLMResponse, StreamingResponder};
use ragdesk::rag::{Embedder, LexicalReranker, PageExtractor, RetrievalPipeline};
use ragdesk::tools::{Artifact, CodeRunner};
use ragdesk::types::{AppError, ChatMessage, Result, ToolCall};
use ragdesk::{db::QueryExecutor, db::VectorStore, AppState, RagdeskConfig, RagdeskConfigManager};
use ragdesk::ToolDispatcher;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============= LLM =============

/// One recorded model call
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<ChatMessage>,
    /// Names of the tools advertised on this call
    pub tools: Vec<String>,
    pub temperature: Option<f32>,
}

/// Scripted LLM client.
///
/// `chat` pops replies in FIFO order and fails once the script runs out.
/// `stream_chat` replays the configured fragments on every call.
#[derive(Default)]
pub struct ScriptedLLMClient {
    replies: Mutex<VecDeque<Result<LLMResponse>>>,
    fragments: Mutex<Vec<Result<String>>>,
    calls: Mutex<Vec<RecordedCall>>,
    stream_calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLLMClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain text reply.
    pub fn reply(self, content: &str) -> Self {
        self.replies.lock().push_back(Ok(LLMResponse {
            content: content.to_string(),
            tool_calls: vec![],
            finish_reason: "stop".to_string(),
        }));
        self
    }

    /// Queue a reply requesting tool calls.
    pub fn tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.replies.lock().push_back(Ok(LLMResponse {
            content: String::new(),
            tool_calls: calls,
            finish_reason: "tool_calls".to_string(),
        }));
        self
    }

    /// Queue a failed call.
    pub fn failure(self, message: &str) -> Self {
        self.replies
            .lock()
            .push_back(Err(AppError::LLM(message.to_string())));
        self
    }

    /// Fragments replayed by `stream_chat`.
    pub fn streaming(self, fragments: &[&str]) -> Self {
        *self.fragments.lock() = fragments.iter().map(|f| Ok(f.to_string())).collect();
        self
    }

    /// Append a mid-stream failure after the configured fragments.
    pub fn streaming_then_fail(self, fragments: &[&str], message: &str) -> Self {
        let mut items: Vec<Result<String>> =
            fragments.iter().map(|f| Ok(f.to_string())).collect();
        items.push(Err(AppError::LLM(message.to_string())));
        *self.fragments.lock() = items;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    pub fn stream_calls(&self) -> Vec<RecordedCall> {
        self.stream_calls.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().len()
    }

    fn record(messages: &[ChatMessage], options: &GenerationOptions) -> RecordedCall {
        RecordedCall {
            messages: messages.to_vec(),
            tools: options.tools.iter().map(|t| t.name.clone()).collect(),
            temperature: options.temperature,
        }
    }
}

#[async_trait]
impl LLMClient for ScriptedLLMClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<LLMResponse> {
        self.calls.lock().push(Self::record(messages, options));
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::LLM("script exhausted".to_string())))
    }

    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<Box<dyn futures::Stream<Item = Result<String>> + Send + Unpin>> {
        self.stream_calls.lock().push(Self::record(messages, options));
        let items: Vec<Result<String>> = self
            .fragments
            .lock()
            .iter()
            .map(|item| match item {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(AppError::LLM(e.to_string())),
            })
            .collect();
        Ok(Box::new(stream::iter(items).boxed()))
    }

    fn model_name(&self) -> &str {
        "scripted-model"
    }
}

pub fn textual_call(id: &str, input: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: "answer_textually".to_string(),
        arguments: json!({ "input": input }),
    }
}

pub fn visual_call(id: &str, input: &str) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        name: "answer_visually".to_string(),
        arguments: json!({ "input": input }),
    }
}

// ============= Embeddings =============

/// Bag-of-words embedder over a fixed vocabulary.
///
/// Each dimension counts one vocabulary word, plus a constant dimension so
/// no vector is all zeros.
pub struct KeywordEmbedder {
    vocabulary: Vec<String>,
    calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new(vocabulary: &[&str]) -> Self {
        Self {
            vocabulary: vocabulary.iter().map(|w| w.to_lowercase()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(|w| w.to_lowercase())
            .collect();

        let mut vector: Vec<f32> = self
            .vocabulary
            .iter()
            .map(|term| words.iter().filter(|w| *w == term).count() as f32)
            .collect();
        vector.push(0.1);
        vector
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn model_name(&self) -> &str {
        "keyword"
    }
}

// ============= Page extraction =============

/// Extractor serving page texts from a map; unknown paths fail.
#[derive(Default)]
pub struct FakeExtractor {
    documents: HashMap<PathBuf, Vec<String>>,
}

impl FakeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(mut self, path: &str, pages: &[&str]) -> Self {
        self.documents.insert(
            PathBuf::from(path),
            pages.iter().map(|p| p.to_string()).collect(),
        );
        self
    }
}

#[async_trait]
impl PageExtractor for FakeExtractor {
    async fn extract_pages(&self, path: &Path) -> Result<Vec<String>> {
        self.documents
            .get(path)
            .cloned()
            .ok_or_else(|| AppError::Extraction(format!("{} is not a PDF", path.display())))
    }
}

// ============= Assistant services =============

/// Executor returning fixed rows and recording every statement.
pub struct RecordingExecutor {
    rows: QueryRows,
    fail: bool,
    statements: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn returning(rows: QueryRows) -> Self {
        Self {
            rows,
            fail: false,
            statements: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            rows: vec![],
            fail: true,
            statements: Mutex::new(Vec::new()),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn execute(&self, sql: &str) -> Result<QueryRows> {
        self.statements.lock().push(sql.to_string());
        if self.fail {
            return Err(AppError::Database("no such table: employee".to_string()));
        }
        Ok(self.rows.clone())
    }
}

/// Runner producing a fixed artifact and recording the scripts it was given.
pub struct FakeRunner {
    artifact: Artifact,
    scripts: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new(bytes: &[u8]) -> Self {
        Self {
            artifact: Artifact::new(bytes.to_vec()),
            scripts: Mutex::new(Vec::new()),
        }
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().clone()
    }
}

#[async_trait]
impl CodeRunner for FakeRunner {
    async fn run(&self, code: &str) -> Result<Artifact> {
        self.scripts.lock().push(code.to_string());
        Ok(self.artifact.clone())
    }
}

// ============= State builders =============

pub const VOCABULARY: &[&str] = &["battery", "charge", "range", "motor", "tax", "price"];

pub fn config_manager() -> Arc<RagdeskConfigManager> {
    Arc::new(RagdeskConfigManager::from_config(RagdeskConfig::default()))
}

pub fn retrieval_pipeline(
    config: Arc<RagdeskConfigManager>,
    store: Arc<dyn VectorStore>,
    llm: Arc<ScriptedLLMClient>,
) -> RetrievalPipeline {
    RetrievalPipeline::new(
        config,
        Arc::new(KeywordEmbedder::new(VOCABULARY)),
        store,
        Arc::new(LexicalReranker::new()),
        llm,
        StreamingResponder::new(8),
    )
}

/// Handles to the mocks behind a test [`AppState`]
pub struct TestServices {
    pub state: AppState,
    pub answer_llm: Arc<ScriptedLLMClient>,
    pub assistant_llm: Arc<ScriptedLLMClient>,
    pub executor: Arc<RecordingExecutor>,
    pub runner: Arc<FakeRunner>,
}

pub fn app_state(
    store: Arc<dyn VectorStore>,
    answer_llm: ScriptedLLMClient,
    assistant_llm: ScriptedLLMClient,
    executor: RecordingExecutor,
) -> TestServices {
    let config = config_manager();
    let answer_llm = Arc::new(answer_llm);
    let assistant_llm = Arc::new(assistant_llm);
    let executor = Arc::new(executor);
    let runner = Arc::new(FakeRunner::new(b"\x89PNG\r\n\x1a\n"));

    let retrieval = retrieval_pipeline(Arc::clone(&config), store, Arc::clone(&answer_llm));
    let dispatcher = ToolDispatcher::new(
        Arc::clone(&assistant_llm) as Arc<dyn LLMClient>,
        Arc::clone(&executor) as Arc<dyn QueryExecutor>,
        Arc::clone(&runner) as Arc<dyn CodeRunner>,
    );

    TestServices {
        state: AppState::from_parts(config, retrieval, dispatcher, StreamingResponder::new(8)),
        answer_llm,
        assistant_llm,
        executor,
        runner,
    }
}
