//! SQLite-backed store implementations.
//!
//! One [`SqliteStore`] wraps the pool and implements all three store
//! traits over the tables created by [`crate::migrate`]. Timestamps are
//! stored as Unix seconds.

use anyhow::{anyhow, Result};
use answer_engine_core::models::{Citation, Mode};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::config::DbConfig;
use crate::db;
use crate::llm::Role;
use crate::migrate;
use crate::traits::{
    CacheEntry, CacheStats, CacheStore, ConversationMessage, ConversationStore, LogEntry,
    LogStats, LogStore, Session,
};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect and make sure the schema exists.
    pub async fn open(config: &DbConfig) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn from_ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn parse_mode(s: &str) -> Result<Mode> {
    s.parse::<Mode>().map_err(|e| anyhow!(e))
}

// ============ Conversations ============

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn create_session(&self, title: &str) -> Result<Session> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            created_at: Utc::now(),
        };
        sqlx::query("INSERT INTO sessions (id, title, created_at) VALUES (?, ?, ?)")
            .bind(&session.id)
            .bind(&session.title)
            .bind(session.created_at.timestamp())
            .execute(&self.pool)
            .await?;
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
        sqlx::query(
            r#"
            INSERT INTO messages (session_id, role, content, mode, citations_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(role.as_str())
        .bind(content)
        .bind(mode.as_str())
        .bind(serde_json::to_string(citations)?)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn conversation_context(&self, session_id: &str) -> Result<Vec<ConversationMessage>> {
        let rows = sqlx::query("SELECT role, content FROM messages WHERE session_id = ? ORDER BY id")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| ConversationMessage {
                role: Role::parse(&row.get::<String, _>("role")),
                content: row.get("content"),
            })
            .collect())
    }
}

// ============ Cache ============

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, query_hash: &str, mode: Mode, model: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query(
            r#"
            SELECT query_hash, mode, model, query, response, citations_json, follow_ups_json,
                   related_json, input_tokens, output_tokens, created_at, expires_at
            FROM llm_cache
            WHERE query_hash = ? AND mode = ? AND model = ?
            "#,
        )
        .bind(query_hash)
        .bind(mode.as_str())
        .bind(model)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(CacheEntry {
            query_hash: row.get("query_hash"),
            mode: parse_mode(&row.get::<String, _>("mode"))?,
            model: row.get("model"),
            query: row.get("query"),
            response: row.get("response"),
            citations_json: row.get("citations_json"),
            follow_ups_json: row.get("follow_ups_json"),
            related_json: row.get("related_json"),
            input_tokens: row.get::<i64, _>("input_tokens").max(0) as u64,
            output_tokens: row.get::<i64, _>("output_tokens").max(0) as u64,
            created_at: from_ts(row.get("created_at")),
            expires_at: from_ts(row.get("expires_at")),
        }))
    }

    async fn set(&self, entry: CacheEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO llm_cache
                (query_hash, mode, model, query, response, citations_json, follow_ups_json,
                 related_json, input_tokens, output_tokens, created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.query_hash)
        .bind(entry.mode.as_str())
        .bind(&entry.model)
        .bind(&entry.query)
        .bind(&entry.response)
        .bind(&entry.citations_json)
        .bind(&entry.follow_ups_json)
        .bind(&entry.related_json)
        .bind(entry.input_tokens as i64)
        .bind(entry.output_tokens as i64)
        .bind(entry.created_at.timestamp())
        .bind(entry.expires_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, query_hash: &str, mode: Mode, model: &str) -> Result<()> {
        sqlx::query("DELETE FROM llm_cache WHERE query_hash = ? AND mode = ? AND model = ?")
            .bind(query_hash)
            .bind(mode.as_str())
            .bind(model)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM llm_cache")
            .fetch_one(&self.pool)
            .await?;
        let live: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM llm_cache WHERE expires_at > ?")
            .bind(Utc::now().timestamp())
            .fetch_one(&self.pool)
            .await?;
        Ok(CacheStats {
            total_entries: total as u64,
            live_entries: live as u64,
        })
    }
}

// ============ Request log ============

#[async_trait]
impl LogStore for SqliteStore {
    async fn log(&self, entry: LogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO llm_log
                (request_id, provider, model, mode, query, status, error, input_tokens,
                 output_tokens, duration_ms, cost_usd, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.request_id)
        .bind(&entry.provider)
        .bind(&entry.model)
        .bind(entry.mode.as_str())
        .bind(&entry.query)
        .bind(entry.status.as_str())
        .bind(&entry.error)
        .bind(entry.input_tokens as i64)
        .bind(entry.output_tokens as i64)
        .bind(entry.duration_ms as i64)
        .bind(entry.cost_usd)
        .bind(entry.created_at.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stats(&self) -> Result<LogStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_requests,
                COALESCE(SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END), 0) AS errors,
                COALESCE(SUM(input_tokens + output_tokens), 0) AS total_tokens,
                COALESCE(SUM(cost_usd), 0.0) AS total_cost_usd
            FROM llm_log
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(LogStats {
            total_requests: row.get::<i64, _>("total_requests") as u64,
            errors: row.get::<i64, _>("errors") as u64,
            total_tokens: row.get::<i64, _>("total_tokens") as u64,
            total_cost_usd: row.get("total_cost_usd"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::LogStatus;
    use std::path::PathBuf;

    async fn store(dir: &tempfile::TempDir) -> SqliteStore {
        let config = DbConfig {
            path: PathBuf::from(dir.path()).join("data").join("test.sqlite"),
        };
        SqliteStore::open(&config).await.unwrap()
    }

    fn entry(hash: &str, expires_in: i64) -> CacheEntry {
        let now = Utc::now();
        CacheEntry {
            query_hash: hash.into(),
            query: "what is rust".into(),
            mode: Mode::Deep,
            model: "m1".into(),
            response: "Rust is a language.".into(),
            citations_json: "[]".into(),
            follow_ups_json: r#"["Why?"]"#.into(),
            related_json: "[]".into(),
            input_tokens: 12,
            output_tokens: 34,
            created_at: now,
            expires_at: now + chrono::Duration::seconds(expires_in),
        }
    }

    #[tokio::test]
    async fn test_cache_set_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir).await;

        s.set(entry("h1", 3600)).await.unwrap();
        let got = s.get("h1", Mode::Deep, "m1").await.unwrap().unwrap();
        assert_eq!(got.response, "Rust is a language.");
        assert_eq!(got.output_tokens, 34);
        assert_eq!(got.mode, Mode::Deep);
        assert!(s.get("h1", Mode::Quick, "m1").await.unwrap().is_none());

        s.set(entry("h2", -10)).await.unwrap();
        let stats = CacheStore::stats(&s).await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.live_entries, 1);

        CacheStore::delete(&s, "h1", Mode::Deep, "m1").await.unwrap();
        assert!(s.get("h1", Mode::Deep, "m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conversation_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir).await;

        let session = s.create_session("rust questions").await.unwrap();
        s.add_message(&session.id, Role::User, "what is rust", Mode::Quick, &[])
            .await
            .unwrap();
        let cites = vec![Citation::new(1, "https://a.com", "A", "s")];
        s.add_message(&session.id, Role::Assistant, "a language", Mode::Quick, &cites)
            .await
            .unwrap();

        let ctx = s.conversation_context(&session.id).await.unwrap();
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx[0].role, Role::User);
        assert_eq!(ctx[1].content, "a language");
        assert!(s.conversation_context("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_log_stats() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir).await;

        for (i, status) in [LogStatus::Success, LogStatus::Error, LogStatus::Cached]
            .into_iter()
            .enumerate()
        {
            s.log(LogEntry {
                request_id: format!("r{}", i),
                provider: "p".into(),
                model: "m".into(),
                mode: Mode::Quick,
                query: "q".into(),
                status,
                error: None,
                input_tokens: 10,
                output_tokens: 5,
                duration_ms: 100,
                cost_usd: 0.5,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        }
        let stats = LogStore::stats(&s).await.unwrap();
        assert_eq!(stats.total_requests, 3);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.total_tokens, 45);
        assert!((stats.total_cost_usd - 1.5).abs() < 1e-9);
    }
}
