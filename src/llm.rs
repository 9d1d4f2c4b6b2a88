//! LLM provider abstraction.
//!
//! Pipelines talk to language models exclusively through [`LlmProvider`].
//! The production implementation is [`crate::openai::OpenAiCompatProvider`];
//! tests substitute scripted providers.

use anyhow::Result;
use answer_engine_core::models::TokenUsage;
use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Role {
        match s {
            "system" => Role::System,
            "assistant" => Role::Assistant,
            _ => Role::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A chat completion request.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Overrides the provider's configured model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            max_tokens: 1024,
            temperature: 0.7,
            model: None,
        }
    }

    /// A system prompt followed by a single user message.
    pub fn prompt(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self::new(vec![Message::system(system), Message::user(user)])
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    pub fn model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    /// Text of each returned choice, in order.
    pub choices: Vec<String>,
    pub usage: TokenUsage,
}

impl ChatResponse {
    /// Text of the first choice, or empty.
    pub fn text(&self) -> &str {
        self.choices.first().map(String::as_str).unwrap_or("")
    }
}

/// One element of a streamed completion.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub delta: String,
    /// Usually only present on the final chunk.
    pub usage: Option<TokenUsage>,
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteModel {
    pub id: String,
    #[serde(default)]
    pub owned_by: String,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logs and accounting.
    fn name(&self) -> &str;

    /// Default model used when a request does not override it.
    fn model(&self) -> &str;

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse>;

    async fn chat_completion_stream(&self, request: ChatRequest) -> Result<ChunkStream>;

    async fn list_models(&self) -> Result<Vec<RemoteModel>>;

    async fn ping(&self) -> Result<()>;
}
