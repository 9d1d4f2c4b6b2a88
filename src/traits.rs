//! Collaborator traits consumed by the engine.
//!
//! The engine owns orchestration only. Search, page fetching, persistence
//! and language models are reached through the traits below so they can be
//! swapped (SearXNG vs. another index, SQLite vs. in-memory stores) and
//! scripted in tests.
//!
//! ```text
//!                  ┌──────────────┐
//!                  │    Engine    │
//!                  └──────┬───────┘
//!     ┌─────────┬─────────┼──────────┬───────────┬─────────┐
//!     ▼         ▼         ▼          ▼           ▼         ▼
//! SearchBackend FetchBackend LlmProvider ConversationStore CacheStore LogStore
//! ```
//!
//! All traits use `anyhow::Result`; the engine decides which failures are
//! fatal.

use anyhow::Result;
use answer_engine_core::models::{
    Chunk, Citation, Document, ImageResult, Mode, SearchResponse,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::Role;

// ═══════════════════════════════════════════════════════════════════════
// Search & Fetch
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub limit: usize,
    pub page: usize,
}

impl SearchOptions {
    pub fn limit(limit: usize) -> Self {
        Self { limit, page: 1 }
    }
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::limit(10)
    }
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, options: SearchOptions) -> Result<SearchResponse>;

    async fn search_images(&self, query: &str, options: SearchOptions)
        -> Result<Vec<ImageResult>>;
}

#[async_trait]
pub trait FetchBackend: Send + Sync {
    /// Fetch and chunk a single page.
    async fn fetch(&self, url: &str) -> Result<Document>;

    /// Chunks most relevant to `query` across `documents`.
    ///
    /// An empty result means relevance ranking is unavailable and callers
    /// should fall back to their own heuristics.
    async fn relevant_chunks(
        &self,
        _documents: &[Document],
        _query: &str,
        _limit: usize,
    ) -> Result<Vec<Chunk>> {
        Ok(Vec::new())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Conversation Store
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_session(&self, title: &str) -> Result<Session>;

    async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        mode: Mode,
        citations: &[Citation],
    ) -> Result<()>;

    /// Prior messages of a session, oldest first.
    async fn conversation_context(&self, session_id: &str) -> Result<Vec<ConversationMessage>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Cache Store
// ═══════════════════════════════════════════════════════════════════════

/// A stored answer keyed by `(query_hash, mode, model)`.
///
/// Structured parts of the response are kept as JSON text so any store
/// that can hold strings can hold an entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub query_hash: String,
    pub query: String,
    pub mode: Mode,
    pub model: String,
    pub response: String,
    pub citations_json: String,
    pub follow_ups_json: String,
    pub related_json: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub total_entries: u64,
    pub live_entries: u64,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, query_hash: &str, mode: Mode, model: &str) -> Result<Option<CacheEntry>>;

    /// Insert or replace.
    async fn set(&self, entry: CacheEntry) -> Result<()>;

    async fn delete(&self, query_hash: &str, mode: Mode, model: &str) -> Result<()>;

    async fn stats(&self) -> Result<CacheStats>;
}

// ═══════════════════════════════════════════════════════════════════════
// Log Store
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Cached,
    Error,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Success => "success",
            LogStatus::Cached => "cached",
            LogStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub request_id: String,
    pub provider: String,
    pub model: String,
    pub mode: Mode,
    pub query: String,
    pub status: LogStatus,
    pub error: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LogStats {
    pub total_requests: u64,
    pub errors: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
}

#[async_trait]
pub trait LogStore: Send + Sync {
    async fn log(&self, entry: LogEntry) -> Result<()>;

    async fn stats(&self) -> Result<LogStats>;
}
