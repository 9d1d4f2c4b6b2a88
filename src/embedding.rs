//! Embedding-based chunk relevance.
//!
//! When `[embedding] provider = "openai"` is configured, the fetch backend
//! ranks chunks by cosine similarity between the query embedding and each
//! chunk embedding. Any OpenAI-compatible `/embeddings` endpoint works.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use answer_engine_core::models::Chunk;
use answer_engine_core::rank::rank_by_similarity;
use std::time::Duration;

use crate::config::EmbeddingConfig;

pub struct EmbeddingRanker {
    model: String,
    endpoint: String,
    api_key: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl EmbeddingRanker {
    /// Build a ranker, or `None` when embeddings are disabled.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Option<Self>> {
        if !config.is_enabled() {
            return Ok(None);
        }
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Some(Self {
            model,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            api_key: std::env::var(&config.api_key_env).ok(),
            max_retries: config.max_retries,
            client,
        }))
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Embed a batch of texts, returning vectors in input order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.post(&self.endpoint).json(&body);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_embeddings(&json);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_err = Some(anyhow!("Embedding API error {}: {}", status, body_text));
                        continue;
                    }
                    bail!("Embedding API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("Embedding failed after retries")))
    }

    /// Rank `chunks` against `query`, keeping at most `limit`.
    pub async fn rank(&self, chunks: Vec<Chunk>, query: &str, limit: usize) -> Result<Vec<Chunk>> {
        let mut texts: Vec<String> = Vec::with_capacity(chunks.len() + 1);
        texts.push(query.to_string());
        texts.extend(chunks.iter().map(|c| c.text.clone()));
        let mut vectors = self.embed(&texts).await?;
        if vectors.len() != texts.len() {
            bail!(
                "Embedding API returned {} vectors for {} inputs",
                vectors.len(),
                texts.len()
            );
        }
        let query_vec = vectors.remove(0);
        Ok(rank_by_similarity(chunks, &vectors, &query_vec, limit))
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_embeddings(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid embeddings response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid embeddings response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_yields_none() {
        let cfg = EmbeddingConfig::default();
        assert!(EmbeddingRanker::from_config(&cfg).unwrap().is_none());
    }

    #[test]
    fn test_parse_embeddings_sorted_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let v = parse_embeddings(&json).unwrap();
        assert_eq!(v[0], vec![1.0, 0.0]);
        assert_eq!(v[1], vec![0.0, 1.0]);
        assert!(parse_embeddings(&serde_json::json!({})).is_err());
    }
}
