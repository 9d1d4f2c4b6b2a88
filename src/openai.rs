//! OpenAI-compatible chat completions provider.
//!
//! Works with any server exposing `POST {base_url}/chat/completions` and
//! `GET {base_url}/models` (OpenAI, Ollama, vLLM, llama.cpp, LM Studio).
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Other 4xx → fail immediately
//! - Network errors → retry
//!
//! Backoff is exponential: 1s, 2s, 4s, … capped at 32s. Streaming requests
//! are retried only until the response headers arrive.

use anyhow::{anyhow, bail, Result};
use answer_engine_core::models::TokenUsage;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::ProviderConfig;
use crate::llm::{ChatRequest, ChatResponse, ChunkStream, LlmProvider, RemoteModel, StreamChunk};

pub struct OpenAiCompatProvider {
    name: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var).map_err(|_| anyhow!("{} not set", var))?,
            ),
            None => None,
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            name: config.name.clone(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
            client,
        })
    }

    fn body(&self, request: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": request.messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if stream {
            body["stream"] = serde_json::Value::Bool(true);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }

    /// POST with retry/backoff; returns the successful response.
    async fn post(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut req = self.client.post(&url).json(body);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let body_text = response.text().await.unwrap_or_default();
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::debug!(provider = %self.name, %status, attempt, "retrying LLM request");
                        last_err = Some(anyhow!("{} API error {}: {}", self.name, status, body_text));
                        continue;
                    }
                    bail!("{} API error {}: {}", self.name, status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("LLM request failed after retries")))
    }
}

fn parse_usage(json: &serde_json::Value) -> Option<TokenUsage> {
    let usage = json.get("usage").filter(|u| !u.is_null())?;
    Some(TokenUsage {
        input_tokens: usage.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0),
        output_tokens: usage
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    })
}

fn parse_completion(json: &serde_json::Value) -> Result<ChatResponse> {
    let choices = json
        .get("choices")
        .and_then(|c| c.as_array())
        .ok_or_else(|| anyhow!("Invalid completion response: missing choices array"))?;
    let choices = choices
        .iter()
        .map(|c| {
            c.pointer("/message/content")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string()
        })
        .collect();
    Ok(ChatResponse {
        choices,
        usage: parse_usage(json).unwrap_or_default(),
    })
}

/// Splits a byte stream into complete lines.
///
/// Bytes are held until a `\n` arrives, so a multi-byte character split
/// across network chunks is decoded whole.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }
}

/// Parse one server-sent `data:` payload. `Ok(None)` marks end of stream.
fn parse_sse_data(data: &str) -> Result<Option<StreamChunk>> {
    if data == "[DONE]" {
        return Ok(None);
    }
    let json: serde_json::Value = serde_json::from_str(data)?;
    if let Some(err) = json.get("error") {
        bail!("stream error: {}", err);
    }
    let delta = json
        .pointer("/choices/0/delta/content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    Ok(Some(StreamChunk {
        delta,
        usage: parse_usage(&json),
    }))
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn chat_completion(&self, request: ChatRequest) -> Result<ChatResponse> {
        let body = self.body(&request, false);
        let response = self.post("/chat/completions", &body).await?;
        let json: serde_json::Value = response.json().await?;
        parse_completion(&json)
    }

    async fn chat_completion_stream(&self, request: ChatRequest) -> Result<ChunkStream> {
        let body = self.body(&request, true);
        let response = self.post("/chat/completions", &body).await?;
        let mut bytes = response.bytes_stream();
        let (tx, rx) = mpsc::channel::<Result<StreamChunk>>(64);

        tokio::spawn(async move {
            let mut buf = LineBuffer::default();
            while let Some(next) = bytes.next().await {
                let data = match next {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                };
                for line in buf.push(&data) {
                    let Some(payload) = line.trim().strip_prefix("data:") else {
                        continue;
                    };
                    match parse_sse_data(payload.trim()) {
                        Ok(Some(chunk)) => {
                            if tx.send(Ok(chunk)).await.is_err() {
                                return;
                            }
                        }
                        Ok(None) => return,
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn list_models(&self) -> Result<Vec<RemoteModel>> {
        let mut req = self.client.get(format!("{}/models", self.base_url));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("{} API error {}", self.name, status);
        }
        let json: serde_json::Value = response.json().await?;
        let data = json
            .get("data")
            .cloned()
            .ok_or_else(|| anyhow!("Invalid models response: missing data array"))?;
        Ok(serde_json::from_value(data)?)
    }

    async fn ping(&self) -> Result<()> {
        self.list_models().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_completion() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Hello"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let r = parse_completion(&json).unwrap();
        assert_eq!(r.text(), "Hello");
        assert_eq!(r.usage.input_tokens, 12);
        assert_eq!(r.usage.output_tokens, 3);
    }

    #[test]
    fn test_parse_sse_data() {
        let c = parse_sse_data(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(c.delta, "Hi");
        assert!(c.usage.is_none());

        let c = parse_sse_data(r#"{"choices":[],"usage":{"prompt_tokens":5,"completion_tokens":7}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(c.delta, "");
        assert_eq!(c.usage.unwrap().output_tokens, 7);

        assert!(parse_sse_data("[DONE]").unwrap().is_none());
        assert!(parse_sse_data(r#"{"error":{"message":"boom"}}"#).is_err());
    }

    #[test]
    fn test_line_buffer_keeps_split_utf8_intact() {
        let line = "data: {\"choices\":[{\"delta\":{\"content\":\"café\"}}]}\n";
        let bytes = line.as_bytes();
        // Cut between the two bytes of 'é'.
        let cut = line.find('é').unwrap() + 1;

        let mut buf = LineBuffer::default();
        assert!(buf.push(&bytes[..cut]).is_empty());
        let lines = buf.push(&bytes[cut..]);
        assert_eq!(lines.len(), 1);

        let payload = lines[0].trim().strip_prefix("data:").unwrap().trim();
        let chunk = parse_sse_data(payload).unwrap().unwrap();
        assert_eq!(chunk.delta, "café");
    }

    #[test]
    fn test_line_buffer_holds_partial_line() {
        let mut buf = LineBuffer::default();
        assert!(buf.push(b"data: a").is_empty());
        assert_eq!(buf.push(b"bc\ndata: d\n"), vec!["data: abc\n", "data: d\n"]);
    }
}
