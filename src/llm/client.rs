//! LLM Client abstractions and provider management
//!
//! Every model call in ragdesk goes through [`LLMClient`]: the dispatcher's
//! tool-calling turns, the deterministic translators, and the streamed
//! `/answer` generation. The only provider is OpenAI (or any endpoint that
//! speaks its chat-completions protocol, selected through `api_base`).

use crate::types::{ChatMessage, Result, ToolCall, ToolDefinition};
use crate::utils::toml_config::RagdeskConfig;
use async_trait::async_trait;
use std::sync::Arc;

/// Per-call generation settings
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    /// Sampling temperature, provider default when unset
    pub temperature: Option<f32>,
    /// Capabilities advertised to the model, none when empty
    pub tools: Vec<ToolDefinition>,
}

impl GenerationOptions {
    /// Temperature zero, no tools
    pub fn deterministic() -> Self {
        Self {
            temperature: Some(0.0),
            tools: Vec::new(),
        }
    }

    /// Advertise the given tools to the model
    pub fn with_tools(tools: Vec<ToolDefinition>) -> Self {
        Self {
            temperature: None,
            tools,
        }
    }
}

/// Generic LLM client trait for provider abstraction
///
/// Implementations must be cheap to share behind an `Arc`; handlers hold one
/// client per configured model for the lifetime of the process.
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Run one chat completion over a conversation
    async fn chat(&self, messages: &[ChatMessage], options: &GenerationOptions)
        -> Result<LLMResponse>;

    /// Stream a chat completion as text fragments in arrival order
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<Box<dyn futures::Stream<Item = Result<String>> + Send + Unpin>>;

    /// Get the model name/identifier
    fn model_name(&self) -> &str;

    /// Generate with a system prompt and a single user prompt
    async fn generate_with_system(
        &self,
        system: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<String> {
        let messages = [ChatMessage::system(system), ChatMessage::user(prompt)];
        Ok(self.chat(&messages, options).await?.content)
    }
}

/// Response from an LLM generation request
#[derive(Debug, Clone)]
pub struct LLMResponse {
    /// The text content of the response
    pub content: String,
    /// Any tool calls requested by the model, in the order received
    pub tool_calls: Vec<ToolCall>,
    /// The reason generation stopped (e.g., "stop", "tool_calls", "length")
    pub finish_reason: String,
}

/// Provider enum for runtime selection
#[derive(Debug, Clone)]
pub enum Provider {
    /// OpenAI API provider (including Azure OpenAI and compatible APIs)
    ///
    /// # Example
    /// ```rust,ignore
    /// let provider = Provider::OpenAI {
    ///     api_key: "sk-...".to_string(),
    ///     api_base: "https://api.openai.com/v1".to_string(),
    ///     model: "gpt-4o-mini".to_string(),
    ///     request_timeout_secs: 120,
    /// };
    /// ```
    OpenAI {
        api_key: String,
        api_base: String,
        model: String,
        request_timeout_secs: u64,
    },
}

impl Provider {
    /// Build the provider described by `[provider]`, targeting `model`
    pub fn from_config(config: &RagdeskConfig, model: &str) -> Result<Self> {
        Ok(Provider::OpenAI {
            api_key: config.api_key()?,
            api_base: config.provider.api_base.clone(),
            model: model.to_string(),
            request_timeout_secs: config.provider.request_timeout_secs,
        })
    }

    /// Create a client instance for this provider
    pub async fn create_client(&self) -> Result<Box<dyn LLMClient>> {
        match self {
            Provider::OpenAI {
                api_key,
                api_base,
                model,
                request_timeout_secs,
            } => Ok(Box::new(super::openai::OpenAIClient::new(
                api_key.clone(),
                api_base.clone(),
                model.clone(),
                *request_timeout_secs,
            )?)),
        }
    }

    /// Same provider, different model
    pub fn with_model(&self, model: &str) -> Self {
        match self {
            Provider::OpenAI {
                api_key,
                api_base,
                request_timeout_secs,
                ..
            } => Provider::OpenAI {
                api_key: api_key.clone(),
                api_base: api_base.clone(),
                model: model.to_string(),
                request_timeout_secs: *request_timeout_secs,
            },
        }
    }

    /// Get a human-readable name for this provider
    pub fn name(&self) -> &'static str {
        match self {
            Provider::OpenAI { .. } => "OpenAI",
        }
    }

    /// Model this provider targets
    pub fn model(&self) -> &str {
        match self {
            Provider::OpenAI { model, .. } => model,
        }
    }
}

/// Creates one shared client per configured model
///
/// # Example
///
/// ```rust,ignore
/// use ragdesk::llm::LLMClientFactory;
///
/// let factory = LLMClientFactory::from_config(&config)?;
/// let answer_client = factory.create_with_model(&config.models.answer).await?;
/// let assistant_client = factory.create_default().await?;
/// ```
pub struct LLMClientFactory {
    default_provider: Provider,
}

impl LLMClientFactory {
    /// Create a new factory with the specified default provider
    pub fn new(default_provider: Provider) -> Self {
        Self { default_provider }
    }

    /// Factory whose default targets the assistant model
    pub fn from_config(config: &RagdeskConfig) -> Result<Self> {
        Ok(Self::new(Provider::from_config(
            config,
            &config.models.assistant,
        )?))
    }

    /// Create a client using the default provider
    pub async fn create_default(&self) -> Result<Arc<dyn LLMClient>> {
        Ok(Arc::from(self.default_provider.create_client().await?))
    }

    /// Create a client for another model on the default provider
    pub async fn create_with_model(&self, model: &str) -> Result<Arc<dyn LLMClient>> {
        Ok(Arc::from(
            self.default_provider.with_model(model).create_client().await?,
        ))
    }

    /// Get a reference to the default provider
    pub fn default_provider(&self) -> &Provider {
        &self.default_provider
    }
}
