//! SearXNG search backend.
//!
//! Queries a SearXNG instance's JSON API (`/search?format=json`). The
//! instance must have the `json` output format enabled in its settings.

use anyhow::{bail, Result};
use answer_engine_core::citation::extract_domain;
use answer_engine_core::models::{ImageResult, SearchResponse, SearchResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::SearchConfig;
use crate::traits::{SearchBackend, SearchOptions};

pub struct SearxngBackend {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    results: Vec<RawResult>,
    #[serde(default)]
    number_of_results: f64,
}

#[derive(Deserialize)]
struct RawResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    img_src: Option<String>,
    #[serde(default)]
    thumbnail_src: Option<String>,
    /// e.g. `"1920 x 1080"`
    #[serde(default)]
    resolution: Option<String>,
}

fn parse_resolution(s: &str) -> (u32, u32) {
    let mut parts = s.split(['x', '×']).map(|p| p.trim().parse::<u32>().unwrap_or(0));
    (parts.next().unwrap_or(0), parts.next().unwrap_or(0))
}

impl SearxngBackend {
    pub fn new(config: &SearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn query(&self, q: &str, category: &str, page: usize) -> Result<RawResponse> {
        let page = page.max(1).to_string();
        let response = self
            .client
            .get(format!("{}/search", self.base_url))
            .query(&[
                ("q", q),
                ("format", "json"),
                ("categories", category),
                ("pageno", page.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("search backend error {}: {}", status, body);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SearchBackend for SearxngBackend {
    async fn search(&self, query: &str, options: SearchOptions) -> Result<SearchResponse> {
        let raw = self.query(query, "general", options.page).await?;
        let results: Vec<SearchResult> = raw
            .results
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .take(options.limit)
            .map(|r| SearchResult {
                url: r.url,
                title: r.title,
                snippet: r.content,
            })
            .collect();
        let total_results = (raw.number_of_results as u64).max(results.len() as u64);
        Ok(SearchResponse {
            results,
            total_results,
        })
    }

    async fn search_images(
        &self,
        query: &str,
        options: SearchOptions,
    ) -> Result<Vec<ImageResult>> {
        let raw = self.query(query, "images", options.page).await?;
        Ok(raw
            .results
            .into_iter()
            .filter_map(|r| {
                let img = r.img_src.filter(|s| !s.is_empty())?;
                let (width, height) = r.resolution.as_deref().map(parse_resolution).unwrap_or((0, 0));
                Some(ImageResult {
                    thumbnail_url: r.thumbnail_src.unwrap_or_else(|| img.clone()),
                    url: img,
                    title: r.title,
                    source_domain: extract_domain(&r.url),
                    source_url: r.url,
                    width,
                    height,
                })
            })
            .take(options.limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolution() {
        assert_eq!(parse_resolution("1920 x 1080"), (1920, 1080));
        assert_eq!(parse_resolution("800×600"), (800, 600));
        assert_eq!(parse_resolution("unknown"), (0, 0));
    }

    #[test]
    fn test_raw_response_tolerates_missing_fields() {
        let raw: RawResponse =
            serde_json::from_str(r#"{"results":[{"url":"https://a.com","title":"A"}]}"#).unwrap();
        assert_eq!(raw.results.len(), 1);
        assert_eq!(raw.results[0].content, "");
        assert_eq!(raw.number_of_results, 0.0);
    }
}
