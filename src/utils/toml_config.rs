//! TOML-based configuration for ragdesk
//!
//! All settings live in a single `ragdesk.toml`. Every field has a default, so an
//! empty file (or a file with only the sections you care about) is valid.
//! Secrets are never stored in the file: `[provider].api_key_env` names the
//! environment variable that holds the key.
//!
//! # Hot Reloading
//!
//! Configuration changes are detected and applied at runtime. Retrieval
//! parameters are read per request, so they take effect on the next query.
//! Use `RagdeskConfigManager` for thread-safe access to the current configuration.

use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Root configuration structure loaded from ragdesk.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagdeskConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    /// Model names per pipeline
    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub rag: RagConfig,

    /// Chinook assistant settings
    #[serde(default)]
    pub assistant: AssistantConfig,

    /// Limits for generated chart scripts
    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub stream: StreamConfig,
}

// ============= Server Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `pretty` or `json`
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============= Provider Configuration =============

/// OpenAI or any OpenAI-compatible endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Environment variable containing API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_openai_base")]
    pub api_base: String,

    /// Per-request timeout for model calls, 0 disables it
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            api_base: default_openai_base(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// ============= Model Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Model that streams `/answer` responses
    #[serde(default = "default_answer_model")]
    pub answer: String,

    /// Model behind the dispatcher, the SQL translator and the chart generator
    #[serde(default = "default_assistant_model")]
    pub assistant: String,
}

fn default_answer_model() -> String {
    "gpt-4o".to_string()
}

fn default_assistant_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            answer: default_answer_model(),
            assistant: default_assistant_model(),
        }
    }
}

// ============= RAG Configuration =============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    /// Remote embeddings through the configured provider
    #[default]
    OpenAI,
    /// Local ONNX embeddings (requires the `local-embeddings` feature)
    FastEmbed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RerankerKind {
    /// BM25 over the retrieved candidates
    Lexical,
    /// Pairwise cross-encoder (requires the `local-embeddings` feature)
    CrossEncoder,
}

impl Default for RerankerKind {
    /// Cross-encoder whenever it is compiled in.
    fn default() -> Self {
        if cfg!(feature = "local-embeddings") {
            Self::CrossEncoder
        } else {
            Self::Lexical
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Directory holding persisted collections
    #[serde(default = "default_vector_path")]
    pub vector_path: String,

    #[serde(default = "default_collection")]
    pub collection: String,

    /// Candidates fetched by similarity search
    #[serde(default = "default_retrieve_k")]
    pub retrieve_k: usize,

    /// Candidates kept after reranking
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,

    #[serde(default)]
    pub embedder: EmbedderKind,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default)]
    pub reranker: RerankerKind,

    #[serde(default = "default_reranker_model")]
    pub reranker_model: String,
}

fn default_vector_path() -> String {
    "./data/vectors".to_string()
}

fn default_collection() -> String {
    "Electric_Vehicles".to_string()
}

fn default_retrieve_k() -> usize {
    10
}

fn default_rerank_top_n() -> usize {
    5
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_reranker_model() -> String {
    "jina-reranker-v1-turbo-en".to_string()
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            vector_path: default_vector_path(),
            collection: default_collection(),
            retrieve_k: default_retrieve_k(),
            rerank_top_n: default_rerank_top_n(),
            embedder: EmbedderKind::default(),
            embedding_model: default_embedding_model(),
            reranker: RerankerKind::default(),
            reranker_model: default_reranker_model(),
        }
    }
}

// ============= Assistant Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Path to the Chinook SQLite database
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

fn default_database_path() -> String {
    "./data/chinook.db".to_string()
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

// ============= Sandbox Configuration =============

/// Resource limits for model-generated chart scripts. A limit of 0 disables it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Wall-clock limit
    #[serde(default = "default_sandbox_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_cpu_limit")]
    pub cpu_limit_secs: u64,

    #[serde(default = "default_memory_limit")]
    pub memory_limit_mb: u64,

    #[serde(default = "default_file_size_limit")]
    pub file_size_limit_mb: u64,

    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: u64,

    /// Run the script in a fresh network namespace (`unshare -rn`)
    #[serde(default = "default_true")]
    pub isolate_network: bool,

    /// Confine the script with Landlock: writes only inside its scratch
    /// directory, reads only there and under `read_paths`
    #[serde(default = "default_true")]
    pub restrict_filesystem: bool,

    /// Read-only trees the interpreter needs (binaries, libraries, site-packages)
    #[serde(default = "default_read_paths")]
    pub read_paths: Vec<PathBuf>,

    /// Parent of the per-run scratch directories, system temp when unset
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_sandbox_timeout() -> u64 {
    30
}

fn default_cpu_limit() -> u64 {
    30
}

fn default_memory_limit() -> u64 {
    1024
}

fn default_file_size_limit() -> u64 {
    16
}

fn default_max_artifact_bytes() -> u64 {
    8 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_read_paths() -> Vec<PathBuf> {
    ["/usr", "/lib", "/lib64", "/bin", "/sbin", "/etc", "/opt", "/dev", "/proc", "/sys"]
        .iter()
        .map(PathBuf::from)
        .collect()
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            timeout_secs: default_sandbox_timeout(),
            cpu_limit_secs: default_cpu_limit(),
            memory_limit_mb: default_memory_limit(),
            file_size_limit_mb: default_file_size_limit(),
            max_artifact_bytes: default_max_artifact_bytes(),
            isolate_network: default_true(),
            restrict_filesystem: default_true(),
            read_paths: default_read_paths(),
            work_dir: None,
        }
    }
}

// ============= Stream Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Fragments buffered between the model and the HTTP body
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_channel_capacity() -> usize {
    32
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' referenced in config is not set")]
    MissingEnvVar(String),

    #[error("Watch error: {0}")]
    WatchError(#[from] notify::Error),
}

impl From<ConfigError> for crate::types::AppError {
    fn from(err: ConfigError) -> Self {
        crate::types::AppError::Configuration(err.to_string())
    }
}

impl RagdeskConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: RagdeskConfig = toml::from_str(&content)?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rag.retrieve_k == 0 {
            return Err(ConfigError::ValidationError(
                "rag.retrieve_k must be at least 1".to_string(),
            ));
        }
        if self.rag.rerank_top_n == 0 {
            return Err(ConfigError::ValidationError(
                "rag.rerank_top_n must be at least 1".to_string(),
            ));
        }
        if self.rag.rerank_top_n > self.rag.retrieve_k {
            return Err(ConfigError::ValidationError(format!(
                "rag.rerank_top_n ({}) cannot exceed rag.retrieve_k ({})",
                self.rag.rerank_top_n, self.rag.retrieve_k
            )));
        }
        if self.rag.collection.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "rag.collection cannot be empty".to_string(),
            ));
        }
        if self.sandbox.interpreter.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "sandbox.interpreter cannot be empty".to_string(),
            ));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "sandbox.timeout_secs must be at least 1".to_string(),
            ));
        }
        if let Some(relative) = self.sandbox.read_paths.iter().find(|p| !p.is_absolute()) {
            return Err(ConfigError::ValidationError(format!(
                "sandbox.read_paths entries must be absolute, got {}",
                relative.display()
            )));
        }
        if self.stream.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "stream.channel_capacity must be at least 1".to_string(),
            ));
        }
        match self.server.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "server.log_format must be 'pretty' or 'json', got '{}'",
                    other
                )))
            }
        }

        Ok(())
    }

    /// Get a resolved value from an env var reference
    pub fn resolve_env(&self, env_name: &str) -> Option<String> {
        std::env::var(env_name).ok()
    }

    /// Get the provider API key from the environment
    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.resolve_env(&self.provider.api_key_env)
            .ok_or_else(|| ConfigError::MissingEnvVar(self.provider.api_key_env.clone()))
    }

    /// Socket address string for the HTTP listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

// ============= Hot Reloading Configuration Manager =============

/// Thread-safe configuration manager with hot reloading support
pub struct RagdeskConfigManager {
    config: Arc<ArcSwap<RagdeskConfig>>,
    config_path: PathBuf,
    watcher: RwLock<Option<RecommendedWatcher>>,
    reload_tx: Option<mpsc::UnboundedSender<()>>,
}

impl RagdeskConfigManager {
    /// Create a new configuration manager and load the initial config
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        // Absolute path for reliable file watching
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(ConfigError::ReadError)?
                .join(path)
        };

        let config = RagdeskConfig::load(&path)?;

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: path,
            watcher: RwLock::new(None),
            reload_tx: None,
        })
    }

    /// Create a config manager directly from a config, without file watching.
    pub fn from_config(config: RagdeskConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: PathBuf::from("ragdesk.toml"),
            watcher: RwLock::new(None),
            reload_tx: None,
        }
    }

    /// Get the current configuration (lockless read)
    pub fn config(&self) -> Arc<RagdeskConfig> {
        self.config.load_full()
    }

    /// Path the configuration was loaded from
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Manually reload the configuration from disk
    pub fn reload(&self) -> Result<(), ConfigError> {
        info!(path = ?self.config_path, "Reloading configuration");

        let new_config = RagdeskConfig::load(&self.config_path)?;
        self.config.store(Arc::new(new_config));

        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Start watching for configuration file changes
    pub fn start_watching(&mut self) -> Result<(), ConfigError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        self.reload_tx = Some(tx.clone());

        let config_path = self.config_path.clone();
        let config_arc = Arc::clone(&self.config);
        let watched_file = config_path.file_name().map(|name| name.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let touches_config = event.paths.iter().any(|p| {
                        p.file_name().map(|n| n.to_os_string()) == watched_file
                    });
                    if touches_config && (event.kind.is_modify() || event.kind.is_create()) {
                        // Debounced in the receiver
                        let _ = tx.send(());
                    }
                }
                Err(e) => {
                    error!("Config watcher error: {:?}", e);
                }
            }
        })?;

        // Editors replace files, so watch the parent directory
        if let Some(parent) = self.config_path.parent() {
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }

        *self.watcher.write() = Some(watcher);

        tokio::spawn(async move {
            let quiet_period = Duration::from_millis(300);

            while rx.recv().await.is_some() {
                // Trailing edge: reload once the file has been quiet for a while
                loop {
                    match tokio::time::timeout(quiet_period, rx.recv()).await {
                        Ok(Some(())) => continue,
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }

                match RagdeskConfig::load(&config_path) {
                    Ok(new_config) => {
                        config_arc.store(Arc::new(new_config));
                        info!("Configuration hot-reloaded successfully");
                    }
                    Err(e) => {
                        warn!(
                            "Failed to hot-reload config: {}. Keeping previous config.",
                            e
                        );
                    }
                }
            }
        });

        info!("Configuration hot-reload watcher started");
        Ok(())
    }

    /// Stop watching for configuration changes
    pub fn stop_watching(&self) {
        *self.watcher.write() = None;
        info!("Configuration hot-reload watcher stopped");
    }
}

impl Clone for RagdeskConfigManager {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            config_path: self.config_path.clone(),
            watcher: RwLock::new(None), // Watcher is not cloned
            reload_tx: self.reload_tx.clone(),
        }
    }
}
