//! Usage and cost accounting.
//!
//! Every request gets a UUID, a start instant, and a [`LogEntry`] written
//! when it finishes. Like cache writes, log writes run in the background
//! under a short timeout and can never fail the request.

use std::sync::Arc;
use std::time::{Duration, Instant};

use answer_engine_core::accounting::estimate_cost;
use answer_engine_core::models::{Mode, TokenUsage};
use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::LogConfig;
use crate::traits::{LogEntry, LogStatus, LogStore};

pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Per-request accounting state, created when a request starts.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    pub request_id: String,
    pub mode: Mode,
    pub query: String,
    pub provider: String,
    pub model: String,
    started: Instant,
}

impl RequestRecord {
    pub fn start(mode: Mode, query: &str, provider: &str, model: &str) -> Self {
        Self {
            request_id: new_request_id(),
            mode,
            query: query.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Finish the record as a log entry.
    pub fn finish(&self, status: LogStatus, error: Option<String>, usage: TokenUsage) -> LogEntry {
        let cost_usd = match status {
            LogStatus::Cached => 0.0,
            _ => estimate_cost(&self.model, usage),
        };
        LogEntry {
            request_id: self.request_id.clone(),
            provider: self.provider.clone(),
            model: self.model.clone(),
            mode: self.mode,
            query: self.query.clone(),
            status,
            error,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            duration_ms: self.elapsed().as_millis() as u64,
            cost_usd,
            created_at: Utc::now(),
        }
    }
}

#[derive(Clone)]
pub struct RequestLogger {
    store: Arc<dyn LogStore>,
    enabled: bool,
    write_timeout: Duration,
}

impl RequestLogger {
    pub fn new(store: Arc<dyn LogStore>, config: &LogConfig) -> Self {
        Self {
            store,
            enabled: config.enabled,
            write_timeout: Duration::from_secs(config.write_timeout_secs),
        }
    }

    /// Write an entry in the background.
    pub fn record(&self, entry: LogEntry) -> Option<JoinHandle<()>> {
        tracing::info!(
            request_id = %entry.request_id,
            mode = %entry.mode,
            status = entry.status.as_str(),
            input_tokens = entry.input_tokens,
            output_tokens = entry.output_tokens,
            duration_ms = entry.duration_ms,
            cost_usd = entry.cost_usd,
            "request finished"
        );
        if !self.enabled {
            return None;
        }
        let store = self.store.clone();
        let timeout = self.write_timeout;
        Some(tokio::spawn(async move {
            match tokio::time::timeout(timeout, store.log(entry)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "request log write failed"),
                Err(_) => tracing::warn!("request log write timed out"),
            }
        }))
    }
}
