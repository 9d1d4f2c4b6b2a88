//! HTTP page fetcher and chunker.
//!
//! Downloads a page, converts it to text, and splits it into chunks:
//!
//! | Content type | Extraction |
//! |--------------|------------|
//! | `text/html`, `application/xhtml+xml` | HTML → markdown via `htmd` |
//! | `application/pdf` | `pdf-extract`, on the blocking pool |
//! | `text/*`, other | body as UTF-8 (lossy) |
//!
//! Relevance ranking is embedding-based when an [`EmbeddingRanker`] is
//! configured; otherwise [`FetchBackend::relevant_chunks`] reports
//! "unavailable" and callers rank by query terms.

use anyhow::{anyhow, bail, Context, Result};
use answer_engine_core::chunk::chunk_text;
use answer_engine_core::models::{Chunk, Document};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;

use crate::config::FetchConfig;
use crate::embedding::EmbeddingRanker;
use crate::traits::FetchBackend;

pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
    chunk_max_tokens: usize,
    ranker: Option<EmbeddingRanker>,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig, ranker: Option<EmbeddingRanker>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            client,
            max_bytes: config.max_bytes,
            chunk_max_tokens: config.chunk_max_tokens,
            ranker,
        })
    }
}

/// Contents of the first `<title>` element, whitespace-collapsed.
fn html_title(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find("<title")?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find("</title>")?;
    let title = html[start..end].split_whitespace().collect::<Vec<_>>().join(" ");
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

/// Drop lines that are only markdown scaffolding (images, empty links).
fn clean_markdown(md: &str) -> String {
    md.lines()
        .filter(|l| {
            let t = l.trim();
            !(t.starts_with("![") || t == "[]" || t == "*" || t == "-")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl FetchBackend for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Document> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;
        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {} for {}", status, url);
        }
        if let Some(len) = response.content_length() {
            if len as usize > self.max_bytes {
                bail!("{} is too large ({} bytes)", url, len);
            }
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_ascii_lowercase();
        let bytes = response.bytes().await?;
        if bytes.len() > self.max_bytes {
            bail!("{} is too large ({} bytes)", url, bytes.len());
        }

        let (title, text) = if content_type.contains("application/pdf") {
            let data = bytes.to_vec();
            let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&data))
                .await?
                .map_err(|e| anyhow!("pdf extraction failed: {}", e))?;
            (None, text)
        } else if content_type.contains("html") || content_type.is_empty() {
            let html = String::from_utf8_lossy(&bytes);
            let md = htmd::convert(&html).map_err(|e| anyhow!("html conversion failed: {}", e))?;
            (html_title(&html), clean_markdown(&md))
        } else {
            (None, String::from_utf8_lossy(&bytes).into_owned())
        };

        let chunks = chunk_text(url, &text, self.chunk_max_tokens);
        if chunks.is_empty() {
            bail!("no extractable text at {}", url);
        }
        Ok(Document {
            url: url.to_string(),
            title: title.unwrap_or_else(|| url.to_string()),
            chunks,
            fetched_at: Utc::now(),
        })
    }

    async fn relevant_chunks(
        &self,
        documents: &[Document],
        query: &str,
        limit: usize,
    ) -> Result<Vec<Chunk>> {
        let Some(ranker) = &self.ranker else {
            return Ok(Vec::new());
        };
        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|d| d.chunks.iter().cloned())
            .collect();
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        ranker.rank(chunks, query, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_title() {
        let html = "<html><head><TITLE>\n  Rust   Book </TITLE></head></html>";
        assert_eq!(html_title(html), Some("Rust Book".to_string()));
        assert_eq!(html_title("<p>none</p>"), None);
        assert_eq!(html_title("<title></title>"), None);
    }

    #[test]
    fn test_clean_markdown_drops_images() {
        let md = "# Title\n![logo](x.png)\nBody text";
        assert_eq!(clean_markdown(md), "# Title\nBody text");
    }
}
