//! In-memory store implementations.
//!
//! Used by tests and by `ask --no-db`. Everything lives behind
//! `std::sync::RwLock`; no lock is held across an `.await`.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use answer_engine_core::models::{Citation, Mode};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::llm::Role;
use crate::traits::{
    CacheEntry, CacheStats, CacheStore, ConversationMessage, ConversationStore, LogEntry,
    LogStats, LogStatus, LogStore, Session,
};

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

// ============ Conversations ============

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub role: Role,
    pub content: String,
    pub mode: Mode,
    pub citations: Vec<Citation>,
}

#[derive(Default)]
pub struct MemoryConversationStore {
    sessions: RwLock<HashMap<String, (Session, Vec<StoredMessage>)>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All messages of a session including their metadata.
    pub fn messages(&self, session_id: &str) -> Vec<StoredMessage> {
        self.sessions
            .read()
            .ok()
            .and_then(|s| s.get(session_id).map(|(_, m)| m.clone()))
            .unwrap_or_default()
    }

    pub fn session(&self, session_id: &str) -> Option<Session> {
        self.sessions
            .read()
            .ok()
            .and_then(|s| s.get(session_id).map(|(sess, _)| sess.clone()))
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create_session(&self, title: &str) -> Result<Session> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            created_at: Utc::now(),
        };
        self.sessions
            .write()
            .map_err(poisoned)?
            .insert(session.id.clone(), (session.clone(), Vec::new()));
        Ok(session)
    }

    async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        mode: Mode,
        citations: &[Citation],
    ) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let (_, messages) = sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow!("session not found: {}", session_id))?;
        messages.push(StoredMessage {
            role,
            content: content.to_string(),
            mode,
            citations: citations.to_vec(),
        });
        Ok(())
    }

    async fn conversation_context(&self, session_id: &str) -> Result<Vec<ConversationMessage>> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions
            .get(session_id)
            .map(|(_, messages)| {
                messages
                    .iter()
                    .map(|m| ConversationMessage {
                        role: m.role,
                        content: m.content.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ============ Cache ============

type CacheKey = (String, Mode, String);

#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, query_hash: &str, mode: Mode, model: &str) -> Result<Option<CacheEntry>> {
        let key = (query_hash.to_string(), mode, model.to_string());
        Ok(self.entries.read().map_err(poisoned)?.get(&key).cloned())
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        let key = (entry.query_hash.clone(), entry.mode, entry.model.clone());
        self.entries.write().map_err(poisoned)?.insert(key, entry);
        Ok(())
    }

    async fn delete(&self, query_hash: &str, mode: Mode, model: &str) -> Result<()> {
        let key = (query_hash.to_string(), mode, model.to_string());
        self.entries.write().map_err(poisoned)?.remove(&key);
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let now = Utc::now();
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(CacheStats {
            total_entries: entries.len() as u64,
            live_entries: entries.values().filter(|e| !e.is_expired(now)).count() as u64,
        })
    }
}

// ============ Request log ============

#[derive(Default)]
pub struct MemoryLogStore {
    entries: RwLock<Vec<LogEntry>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn log(&self, entry: LogEntry) -> Result<()> {
        self.entries.write().map_err(poisoned)?.push(entry);
        Ok(())
    }

    async fn stats(&self) -> Result<LogStats> {
        let entries = self.entries.read().map_err(poisoned)?;
        let mut stats = LogStats::default();
        for e in entries.iter() {
            stats.total_requests += 1;
            if e.status == LogStatus::Error {
                stats.errors += 1;
            }
            stats.total_tokens += e.input_tokens + e.output_tokens;
            stats.total_cost_usd += e.cost_usd;
        }
        Ok(stats)
    }
}
