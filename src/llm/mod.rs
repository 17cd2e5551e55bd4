//! LLM Provider Clients and Abstractions
//!
//! - [`LLMClient`] - The core trait every model call goes through
//! - [`LLMClientFactory`] - Builds one shared client per configured model
//! - [`streaming`] - Bounded channel between a model stream and an HTTP body
//!
//! # Example
//!
//! ```ignore
//! use ragdesk::llm::{GenerationOptions, LLMClientFactory};
//! use ragdesk::types::ChatMessage;
//!
//! let factory = LLMClientFactory::from_config(&config)?;
//! let client = factory.create_default().await?;
//!
//! let response = client
//!     .chat(&[ChatMessage::user("What is 2+2?")], &GenerationOptions::default())
//!     .await?;
//! println!("{}", response.content);
//! ```

/// Core LLM client trait and provider selection.
pub mod client;
/// OpenAI chat-completions client.
pub mod openai;
/// Channel-backed incremental response delivery.
pub mod streaming;

pub use client::{GenerationOptions, LLMClient, LLMClientFactory, LLMResponse, Provider};
pub use streaming::{ResponseStream, StreamEvent, StreamingResponder};
