//! Response cache.
//!
//! Answers are keyed by `(hash_query(text), mode, model)`. Lookups happen
//! before any pipeline work; a hit is replayed to the caller without
//! touching search or the LLM.
//!
//! Expiry is evaluated at read time. Nothing sweeps the store.
//!
//! Writes are fire-and-forget: [`ResponseCache::store`] spawns the write
//! under its own timeout and returns immediately. Reads share that timeout.
//! Store failures (on read or write) are logged and treated as a miss.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use answer_engine_core::accounting::hash_query;
use answer_engine_core::models::{Citation, Mode, RelatedQuestion, TokenUsage};
use chrono::Utc;
use tokio::task::JoinHandle;

use crate::config::CacheConfig;
use crate::traits::{CacheEntry, CacheStore};

/// The replayable part of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub follow_ups: Vec<String>,
    pub related_questions: Vec<RelatedQuestion>,
    pub usage: TokenUsage,
}

impl CachedAnswer {
    /// Build a storable entry.
    pub fn to_entry(
        &self,
        query: &str,
        mode: Mode,
        model: &str,
        ttl: Duration,
    ) -> Result<CacheEntry> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl)?;
        Ok(CacheEntry {
            query_hash: hash_query(query),
            query: query.to_string(),
            mode,
            model: model.to_string(),
            response: self.answer.clone(),
            citations_json: serde_json::to_string(&self.citations)?,
            follow_ups_json: serde_json::to_string(&self.follow_ups)?,
            related_json: serde_json::to_string(&self.related_questions)?,
            input_tokens: self.usage.input_tokens,
            output_tokens: self.usage.output_tokens,
            created_at: now,
            expires_at: now + ttl,
        })
    }

    /// Restore from a stored entry. Empty JSON columns restore as empty lists.
    pub fn from_entry(entry: &CacheEntry) -> Result<Self> {
        fn list<T: serde::de::DeserializeOwned>(s: &str) -> Result<Vec<T>> {
            if s.trim().is_empty() {
                Ok(Vec::new())
            } else {
                Ok(serde_json::from_str(s)?)
            }
        }
        Ok(Self {
            answer: entry.response.clone(),
            citations: list(&entry.citations_json)?,
            follow_ups: list(&entry.follow_ups_json)?,
            related_questions: list(&entry.related_json)?,
            usage: TokenUsage {
                input_tokens: entry.input_tokens,
                output_tokens: entry.output_tokens,
            },
        })
    }
}

#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    enabled: bool,
    ttl: Duration,
    write_timeout: Duration,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            enabled: config.enabled,
            ttl: config.ttl(),
            write_timeout: Duration::from_secs(config.write_timeout_secs),
        }
    }

    /// Return a live entry for this query, or `None` on miss, expiry,
    /// timeout or store failure.
    pub async fn lookup(&self, query: &str, mode: Mode, model: &str) -> Option<CachedAnswer> {
        if !self.enabled {
            return None;
        }
        let hash = hash_query(query);
        let read = tokio::time::timeout(self.write_timeout, self.store.get(&hash, mode, model));
        let entry = match read.await {
            Ok(Ok(Some(entry))) => entry,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "cache lookup failed");
                return None;
            }
            Err(_) => {
                tracing::warn!("cache lookup timed out");
                return None;
            }
        };
        if entry.is_expired(Utc::now()) {
            tracing::debug!(%mode, model, "cache entry expired");
            return None;
        }
        match CachedAnswer::from_entry(&entry) {
            Ok(answer) => Some(answer),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable cache entry");
                None
            }
        }
    }

    /// Write an answer in the background. The returned handle can be awaited
    /// but never yields an error.
    pub fn store(
        &self,
        query: &str,
        mode: Mode,
        model: &str,
        answer: CachedAnswer,
    ) -> Option<JoinHandle<()>> {
        if !self.enabled {
            return None;
        }
        let entry = match answer.to_entry(query, mode, model, self.ttl) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "failed to build cache entry");
                return None;
            }
        };
        let store = self.store.clone();
        let timeout = self.write_timeout;
        Some(tokio::spawn(async move {
            match tokio::time::timeout(timeout, store.set(entry)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "cache write failed"),
                Err(_) => tracing::warn!("cache write timed out"),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCacheStore;
    use crate::traits::CacheStats;
    use answer_engine_core::models::QuestionCategory;
    use async_trait::async_trait;

    fn sample() -> CachedAnswer {
        let mut c = Citation::new(1, "https://a.com/x", "A \"quoted\" title", "snippet ✓");
        c.domain = "a.com".into();
        c.favicon = "https://www.google.com/s2/favicons?domain=a.com&sz=32".into();
        CachedAnswer {
            answer: "Answer [1].".into(),
            citations: vec![c],
            follow_ups: vec!["What next?".into()],
            related_questions: vec![
                RelatedQuestion {
                    text: "Deeper?".into(),
                    category: Some(QuestionCategory::Deeper),
                },
                RelatedQuestion {
                    text: "Plain?".into(),
                    category: None,
                },
            ],
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 20,
            },
        }
    }

    #[test]
    fn test_entry_roundtrip_lossless() {
        let a = sample();
        let entry = a
            .to_entry("Q", Mode::Quick, "m", Duration::from_secs(60))
            .unwrap();
        assert_eq!(CachedAnswer::from_entry(&entry).unwrap(), a);
    }

    #[tokio::test]
    async fn test_store_then_lookup_normalized_query() {
        let cache = ResponseCache::new(Arc::new(MemoryCacheStore::new()), &CacheConfig::default());
        cache
            .store("What is Rust?", Mode::Quick, "m", sample())
            .unwrap()
            .await
            .unwrap();
        assert!(cache.lookup("  what is rust? ", Mode::Quick, "m").await.is_some());
        assert!(cache.lookup("what is rust?", Mode::Deep, "m").await.is_none());
        assert!(cache.lookup("what is rust?", Mode::Quick, "other").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss() {
        let store = Arc::new(MemoryCacheStore::new());
        let mut entry = sample()
            .to_entry("q", Mode::Quick, "m", Duration::from_secs(60))
            .unwrap();
        entry.expires_at = Utc::now() - chrono::Duration::seconds(1);
        store.set(entry).await.unwrap();
        let cache = ResponseCache::new(store, &CacheConfig::default());
        assert!(cache.lookup("q", Mode::Quick, "m").await.is_none());
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _: &str, _: Mode, _: &str) -> Result<Option<CacheEntry>> {
            anyhow::bail!("disk on fire")
        }
        async fn set(&self, _: CacheEntry) -> Result<()> {
            anyhow::bail!("disk on fire")
        }
        async fn delete(&self, _: &str, _: Mode, _: &str) -> Result<()> {
            Ok(())
        }
        async fn stats(&self) -> Result<CacheStats> {
            Ok(CacheStats::default())
        }
    }

    #[tokio::test]
    async fn test_store_failures_are_swallowed() {
        let cache = ResponseCache::new(Arc::new(BrokenStore), &CacheConfig::default());
        assert!(cache.lookup("q", Mode::Quick, "m").await.is_none());
        cache
            .store("q", Mode::Quick, "m", sample())
            .unwrap()
            .await
            .unwrap();
    }

    struct HungStore;

    #[async_trait]
    impl CacheStore for HungStore {
        async fn get(&self, _: &str, _: Mode, _: &str) -> Result<Option<CacheEntry>> {
            std::future::pending().await
        }
        async fn set(&self, _: CacheEntry) -> Result<()> {
            std::future::pending().await
        }
        async fn delete(&self, _: &str, _: Mode, _: &str) -> Result<()> {
            Ok(())
        }
        async fn stats(&self) -> Result<CacheStats> {
            Ok(CacheStats::default())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_store_lookup_is_miss() {
        let cache = ResponseCache::new(Arc::new(HungStore), &CacheConfig::default());
        assert!(cache.lookup("q", Mode::Quick, "m").await.is_none());
    }
}
