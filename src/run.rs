//! Per-request pipeline context.
//!
//! A [`RunContext`] is created once per request and borrowed by whichever
//! pipeline handles it. It bundles the routed provider, the collaborators,
//! the event sink and the cancellation token, and wraps every external
//! call so that:
//!
//! - cancellation is checked before each blocking call and raced against it;
//! - collaborator errors are mapped into [`EngineError`];
//! - token usage from every LLM call is accumulated in one place.

use std::future::Future;
use std::sync::{Arc, Mutex};

use answer_engine_core::models::{
    Document, Mode, ReasoningStep, SearchResponse, TokenUsage,
};
use answer_engine_core::report::SectionTracker;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::events::{EventSink, StreamEvent};
use crate::llm::{ChatRequest, LlmProvider, Message};
use crate::traits::{ConversationStore, FetchBackend, SearchBackend, SearchOptions};

/// External collaborators shared by all requests.
#[derive(Clone)]
pub struct Services {
    pub search: Arc<dyn SearchBackend>,
    pub fetch: Arc<dyn FetchBackend>,
    pub conversations: Arc<dyn ConversationStore>,
}

pub struct RunContext {
    pub request_id: String,
    pub mode: Mode,
    pub config: Arc<Config>,
    pub services: Services,
    /// Provider for the request's own mode.
    pub provider: Arc<dyn LlmProvider>,
    /// Provider for auxiliary calls (related questions).
    pub aux_provider: Arc<dyn LlmProvider>,
    /// Model override from an explicit or capability-based selection.
    pub model: Option<String>,
    /// Prior conversation turns, oldest first.
    pub history: Vec<Message>,
    pub sink: EventSink,
    pub cancel: CancellationToken,
    usage: Mutex<TokenUsage>,
}

impl RunContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        request_id: String,
        mode: Mode,
        config: Arc<Config>,
        services: Services,
        provider: Arc<dyn LlmProvider>,
        aux_provider: Arc<dyn LlmProvider>,
        model: Option<String>,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request_id,
            mode,
            config,
            services,
            provider,
            aux_provider,
            model,
            history: Vec::new(),
            sink,
            cancel,
            usage: Mutex::new(TokenUsage::default()),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn streaming(&self) -> bool {
        self.sink.is_enabled()
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }

    fn add_usage(&self, usage: TokenUsage) {
        if let Ok(mut u) = self.usage.lock() {
            u.add(usage);
        }
    }

    /// Race `fut` against cancellation.
    pub async fn guard<F, T>(&self, fut: F) -> EngineResult<T>
    where
        F: Future<Output = T>,
    {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            out = fut => Ok(out),
        }
    }

    /// Record a reasoning step and stream it as a `thinking` event.
    pub async fn step(&self, steps: &mut Vec<ReasoningStep>, step: ReasoningStep) {
        self.sink.thinking(&step).await;
        steps.push(step);
    }

    // ============ LLM ============

    async fn complete_with(
        &self,
        provider: &Arc<dyn LlmProvider>,
        request: ChatRequest,
    ) -> EngineResult<String> {
        let request = request.model(self.model.clone());
        let response = self
            .guard(provider.chat_completion(request))
            .await?
            .map_err(EngineError::llm)?;
        self.add_usage(response.usage);
        Ok(response.text().trim().to_string())
    }

    /// One blocking completion against the request's provider.
    pub async fn complete(&self, request: ChatRequest) -> EngineResult<String> {
        let provider = self.provider.clone();
        self.complete_with(&provider, request).await
    }

    /// One blocking completion against the auxiliary provider.
    pub async fn complete_aux(&self, request: ChatRequest) -> EngineResult<String> {
        let provider = self.aux_provider.clone();
        let request = request.model(None);
        let response = self
            .guard(provider.chat_completion(request))
            .await?
            .map_err(EngineError::llm)?;
        self.add_usage(response.usage);
        Ok(response.text().trim().to_string())
    }

    /// Produce the answer text, streaming tokens when the sink is enabled.
    pub async fn answer(&self, request: ChatRequest) -> EngineResult<String> {
        self.answer_tracked(request, None).await
    }

    /// Like [`answer`](Self::answer), additionally emitting a `section`
    /// event for every `## ` heading seen in the stream.
    pub async fn answer_tracked(
        &self,
        request: ChatRequest,
        mut tracker: Option<&mut SectionTracker>,
    ) -> EngineResult<String> {
        if !self.streaming() {
            return self.complete(request).await;
        }

        let request = request.model(self.model.clone());
        let mut stream = self
            .guard(self.provider.chat_completion_stream(request))
            .await?
            .map_err(EngineError::llm)?;

        let mut text = String::new();
        // Cancellation is observed between reads, not during one.
        while let Some(item) = stream.next().await {
            let chunk = item.map_err(EngineError::llm)?;
            if let Some(u) = chunk.usage {
                self.add_usage(u);
            }
            if !chunk.delta.is_empty() {
                text.push_str(&chunk.delta);
                self.sink.token(chunk.delta.clone()).await;
                if let Some(t) = tracker.as_deref_mut() {
                    for title in t.feed(&chunk.delta) {
                        self.sink.emit(StreamEvent::Section { title }).await;
                    }
                }
            }
            if self.cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
        }
        if let Some(t) = tracker {
            if let Some(title) = t.finish() {
                self.sink.emit(StreamEvent::Section { title }).await;
            }
        }
        Ok(text.trim().to_string())
    }

    // ============ Search & fetch ============

    pub async fn search(&self, query: &str, limit: usize) -> EngineResult<SearchResponse> {
        let response = self
            .guard(
                self.services
                    .search
                    .search(query, SearchOptions::limit(limit)),
            )
            .await?
            .map_err(EngineError::search)?;
        self.sink
            .emit(StreamEvent::Search {
                query: query.to_string(),
                result_count: response.results.len(),
            })
            .await;
        Ok(response)
    }

    pub async fn fetch(&self, url: &str) -> EngineResult<Document> {
        self.guard(self.services.fetch.fetch(url))
            .await?
            .map_err(|e| EngineError::fetch(url, e))
    }

    pub async fn emit_source(&self, url: &str, title: &str) {
        self.sink
            .emit(StreamEvent::Source {
                url: url.to_string(),
                title: title.to_string(),
            })
            .await;
    }
}
