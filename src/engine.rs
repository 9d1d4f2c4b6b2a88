//! The orchestration engine.
//!
//! [`Engine`] is the public surface: it routes a [`Query`] to a provider,
//! consults the response cache, drives exactly one pipeline, persists the
//! conversation, and accounts for the request. Blocking and streaming
//! entry points share one driver; the blocking ones pass a disabled
//! [`EventSink`].
//!
//! ```text
//! Query ─▶ prepare (route / select model) ──fatal──▶ Err
//!            │
//!            ▼
//!          start ─▶ cache? ──hit──▶ token + done(from_cache)
//!            │
//!            ▼ miss
//!          quick | deep | research | deepsearch
//!            │                 │
//!            ▼ ok              ▼ err
//!          persist, done,    error
//!          log, cache write  log
//! ```

use std::sync::{Arc, Mutex};

use answer_engine_core::models::{
    Citation, DeepSearchResponse, Mode, ModeInfo, Query, Response, TokenUsage,
};
use answer_engine_core::report::{format_report_markdown, parse_report};
use answer_engine_core::text::truncate;
use anyhow::{bail, Result};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::cache::{CachedAnswer, ResponseCache};
use crate::config::{Config, ProviderConfig};
use crate::embedding::EmbeddingRanker;
use crate::error::{EngineError, EngineResult};
use crate::events::{EventSink, StreamEvent, StreamSummary};
use crate::fetch::HttpFetcher;
use crate::http_search::SearxngBackend;
use crate::llm::{LlmProvider, Message, Role};
use crate::memory::{MemoryCacheStore, MemoryConversationStore, MemoryLogStore};
use crate::openai::OpenAiCompatProvider;
use crate::registry::{Capability, ModelInfo, ModelRegistry, Speed};
use crate::run::{RunContext, Services};
use crate::traits::{
    CacheStore, ConversationStore, FetchBackend, LogStatus, LogStore, SearchBackend,
};
use crate::usage::{RequestLogger, RequestRecord};
use crate::{deep, deepsearch, quick, research};

const SESSION_TITLE_CHARS: usize = 50;

// ═══════════════════════════════════════════════════════════════════════
// Provider routing
// ═══════════════════════════════════════════════════════════════════════

/// Providers bound to modes, indexed by [`Mode::index`].
#[derive(Clone, Default)]
pub struct ProviderTable {
    slots: [Option<Arc<dyn LlmProvider>>; 4],
}

impl ProviderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, mode: Mode, provider: Arc<dyn LlmProvider>) {
        self.slots[mode.index()] = Some(provider);
    }

    pub fn get(&self, mode: Mode) -> Option<&Arc<dyn LlmProvider>> {
        self.slots[mode.index()].as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// The provider bound to `mode`, else quick, deep, research, then any.
    pub fn route(&self, mode: Mode) -> Option<Arc<dyn LlmProvider>> {
        [mode, Mode::Quick, Mode::Deep, Mode::Research]
            .into_iter()
            .find_map(|m| self.get(m).cloned())
            .or_else(|| self.slots.iter().flatten().next().cloned())
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Outcome
// ═══════════════════════════════════════════════════════════════════════

/// What a pipeline produced.
enum Outcome {
    Answer(Response),
    Report(DeepSearchResponse),
}

impl Outcome {
    fn usage(&self) -> TokenUsage {
        match self {
            Outcome::Answer(r) => r.usage,
            Outcome::Report(r) => r.usage,
        }
    }

    fn citations(&self) -> &[Citation] {
        match self {
            Outcome::Answer(r) => &r.citations,
            Outcome::Report(r) => &r.citations,
        }
    }

    /// The answer as one markdown document.
    fn answer_text(&self) -> String {
        match self {
            Outcome::Answer(r) => r.answer.clone(),
            Outcome::Report(r) => format_report_markdown(&r.query, &r.report, &r.citations),
        }
    }

    fn set_session(&mut self, id: String) {
        match self {
            Outcome::Answer(r) => r.session_id = id,
            Outcome::Report(r) => r.session_id = id,
        }
    }

    fn cached(&self) -> CachedAnswer {
        let (follow_ups, related_questions) = match self {
            Outcome::Answer(r) => (r.follow_ups.clone(), r.related_questions.clone()),
            Outcome::Report(r) => (r.follow_ups.clone(), r.related_questions.clone()),
        };
        CachedAnswer {
            answer: self.answer_text(),
            citations: self.citations().to_vec(),
            follow_ups,
            related_questions,
            usage: self.usage(),
        }
    }

    fn summary(&self, request_id: &str, duration_ms: u64) -> StreamSummary {
        match self {
            Outcome::Answer(r) => StreamSummary {
                request_id: request_id.to_string(),
                session_id: r.session_id.clone(),
                mode: r.mode,
                citations: r.citations.clone(),
                follow_ups: r.follow_ups.clone(),
                related_questions: r.related_questions.clone(),
                images: r.images.clone(),
                usage: r.usage,
                from_cache: r.from_cache,
                duration_ms,
                report: None,
            },
            Outcome::Report(r) => StreamSummary {
                request_id: request_id.to_string(),
                session_id: r.session_id.clone(),
                mode: Mode::DeepSearch,
                citations: r.citations.clone(),
                follow_ups: r.follow_ups.clone(),
                related_questions: r.related_questions.clone(),
                images: Vec::new(),
                usage: r.usage,
                from_cache: r.from_cache,
                duration_ms,
                report: Some(r.report.clone()),
            },
        }
    }

    fn from_cache(query: &Query, hit: CachedAnswer) -> Self {
        match query.mode {
            Mode::DeepSearch => Outcome::Report(DeepSearchResponse {
                query: query.text.clone(),
                report: parse_report(&hit.answer),
                citations: hit.citations,
                sources: Vec::new(),
                related_questions: hit.related_questions,
                follow_ups: hit.follow_ups,
                session_id: query.session_id.clone().unwrap_or_default(),
                usage: hit.usage,
                duration_ms: 0,
                from_cache: true,
            }),
            mode => Outcome::Answer(Response {
                answer: hit.answer,
                citations: hit.citations,
                follow_ups: hit.follow_ups,
                related_questions: hit.related_questions,
                session_id: query.session_id.clone().unwrap_or_default(),
                mode,
                usage: hit.usage,
                from_cache: true,
                ..Default::default()
            }),
        }
    }

    fn into_response(self) -> Response {
        match self {
            Outcome::Answer(r) => r,
            Outcome::Report(r) => Response {
                answer: format_report_markdown(&r.query, &r.report, &r.citations),
                citations: r.citations,
                follow_ups: r.follow_ups,
                related_questions: r.related_questions,
                sources: r.sources,
                session_id: r.session_id,
                mode: Mode::DeepSearch,
                usage: r.usage,
                from_cache: r.from_cache,
                ..Default::default()
            },
        }
    }

    fn into_report(self, query: &Query) -> DeepSearchResponse {
        match self {
            Outcome::Report(r) => r,
            Outcome::Answer(r) => DeepSearchResponse {
                query: query.text.clone(),
                report: parse_report(&r.answer),
                citations: r.citations,
                sources: r.sources,
                related_questions: r.related_questions,
                follow_ups: r.follow_ups,
                session_id: r.session_id,
                usage: r.usage,
                duration_ms: 0,
                from_cache: r.from_cache,
            },
        }
    }
}

/// Routing decisions made before any pipeline work.
struct Prepared {
    provider: Arc<dyn LlmProvider>,
    aux_provider: Arc<dyn LlmProvider>,
    model_override: Option<String>,
    model_name: String,
}

// ═══════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct Engine {
    config: Arc<Config>,
    providers: Arc<ProviderTable>,
    registry: Arc<ModelRegistry>,
    services: Services,
    cache: ResponseCache,
    logger: RequestLogger,
    /// Outstanding cache and log writes.
    background: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Route a mode to a provider: bound providers first, then the registry.
    pub fn route(&self, mode: Mode) -> EngineResult<Arc<dyn LlmProvider>> {
        if let Some(p) = self.providers.route(mode) {
            return Ok(p);
        }
        match self.registry.select_model(None, mode, false) {
            Ok(sel) => Ok(sel.provider),
            Err(_) => Err(EngineError::NoProviderAvailable { mode }),
        }
    }

    /// Wait for outstanding cache and log writes. Each write is already
    /// bounded by its own timeout.
    pub async fn flush(&self) {
        let pending: Vec<JoinHandle<()>> = match self.background.lock() {
            Ok(mut b) => b.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in pending {
            let _ = handle.await;
        }
    }

    fn track(&self, handle: Option<JoinHandle<()>>) {
        let Some(handle) = handle else {
            return;
        };
        if let Ok(mut b) = self.background.lock() {
            b.retain(|h| !h.is_finished());
            b.push(handle);
        }
    }

    pub fn list_modes(&self) -> Vec<ModeInfo> {
        Mode::ALL
            .into_iter()
            .map(|mode| ModeInfo {
                id: mode,
                name: mode.display_name().to_string(),
                description: mode.description().to_string(),
                model: self.providers.get(mode).map(|p| p.model().to_string()),
            })
            .collect()
    }

    fn prepare(&self, query: &Query) -> EngineResult<Prepared> {
        if query.text.trim().is_empty() {
            return Err(EngineError::InvalidRequest("query text is empty".into()));
        }

        let (provider, model_override) = if query.model_id.is_some() || query.has_images() {
            let sel = self.registry.select_model(
                query.model_id.as_deref(),
                query.mode,
                query.has_images(),
            )?;
            (sel.provider, Some(sel.info.id))
        } else {
            (self.route(query.mode)?, None)
        };
        let aux_provider = self
            .providers
            .route(Mode::Quick)
            .unwrap_or_else(|| provider.clone());
        let model_name = model_override
            .clone()
            .unwrap_or_else(|| provider.model().to_string());

        Ok(Prepared {
            provider,
            aux_provider,
            model_override,
            model_name,
        })
    }

    // ============ Public entry points ============

    /// Answer a query and return the full response.
    pub async fn process(&self, query: Query) -> EngineResult<Response> {
        let prepared = self.prepare(&query)?;
        let outcome = self
            .drive(query, prepared, EventSink::disabled(), CancellationToken::new())
            .await?;
        Ok(outcome.into_response())
    }

    /// Answer a query as a stream of events.
    ///
    /// Routing failures are returned directly. Anything after that ends
    /// the stream with exactly one `done` or `error` event. Dropping the
    /// stream cancels the request.
    pub fn process_stream(&self, query: Query) -> EngineResult<ReceiverStream<StreamEvent>> {
        let prepared = self.prepare(&query)?;
        let (sink, rx) = EventSink::channel(self.config.engine.event_buffer);
        let engine = self.clone();
        tokio::spawn(async move {
            let _ = engine
                .drive(query, prepared, sink, CancellationToken::new())
                .await;
        });
        Ok(ReceiverStream::new(rx))
    }

    /// Produce a structured research report.
    pub async fn process_deep_search(&self, mut query: Query) -> EngineResult<DeepSearchResponse> {
        query.mode = Mode::DeepSearch;
        let prepared = self.prepare(&query)?;
        let outcome = self
            .drive(
                query.clone(),
                prepared,
                EventSink::disabled(),
                CancellationToken::new(),
            )
            .await?;
        Ok(outcome.into_report(&query))
    }

    pub fn process_deep_search_stream(
        &self,
        mut query: Query,
    ) -> EngineResult<ReceiverStream<StreamEvent>> {
        query.mode = Mode::DeepSearch;
        self.process_stream(query)
    }

    // ============ Driver ============

    async fn drive(
        &self,
        query: Query,
        prepared: Prepared,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> EngineResult<Outcome> {
        let record = RequestRecord::start(
            query.mode,
            &query.text,
            prepared.provider.name(),
            &prepared.model_name,
        );
        let span = tracing::info_span!(
            "request",
            request_id = %record.request_id,
            mode = %query.mode,
            model = %prepared.model_name,
        );

        // A gone receiver cancels the run.
        let watcher = CancellationToken::new();
        if sink.is_enabled() {
            let sink = sink.clone();
            let cancel = cancel.clone();
            let stop = watcher.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = sink.receiver_gone() => cancel.cancel(),
                    _ = stop.cancelled() => {}
                }
            });
        }
        let _stop_watcher = watcher.drop_guard();

        self.drive_inner(&query, prepared, &record, sink, cancel)
            .instrument(span)
            .await
    }

    async fn drive_inner(
        &self,
        query: &Query,
        prepared: Prepared,
        record: &RequestRecord,
        sink: EventSink,
        cancel: CancellationToken,
    ) -> EngineResult<Outcome> {
        sink.emit(StreamEvent::Start {
            request_id: record.request_id.clone(),
            mode: query.mode,
            query: query.text.clone(),
        })
        .await;

        if let Some(hit) = self
            .cache
            .lookup(&query.text, query.mode, &prepared.model_name)
            .await
        {
            tracing::info!("cache hit");
            let mut outcome = Outcome::from_cache(query, hit);
            let answer = outcome.answer_text();
            if let Some(id) = self.persist(query, &answer, outcome.citations()).await {
                outcome.set_session(id);
            }
            sink.token(answer).await;
            self.finish_ok(&sink, record, &outcome, LogStatus::Cached).await;
            return Ok(outcome);
        }

        let history = match &query.session_id {
            Some(id) => self.history(id).await,
            None => Vec::new(),
        };
        let ctx = RunContext::new(
            record.request_id.clone(),
            query.mode,
            self.config.clone(),
            self.services.clone(),
            prepared.provider,
            prepared.aux_provider,
            prepared.model_override,
            sink.clone(),
            cancel,
        )
        .with_history(history);

        let result = match query.mode {
            Mode::Quick => quick::run(&ctx, query).await.map(Outcome::Answer),
            Mode::Deep => deep::run(&ctx, query).await.map(Outcome::Answer),
            Mode::Research => research::run(&ctx, query).await.map(Outcome::Answer),
            Mode::DeepSearch => deepsearch::run(&ctx, query).await.map(Outcome::Report),
        };

        match result {
            Ok(mut outcome) => {
                let answer = outcome.answer_text();
                if let Some(id) = self.persist(query, &answer, outcome.citations()).await {
                    outcome.set_session(id);
                }
                self.finish_ok(&sink, record, &outcome, LogStatus::Success).await;
                self.track(self.cache.store(
                    &query.text,
                    query.mode,
                    &prepared.model_name,
                    outcome.cached(),
                ));
                Ok(outcome)
            }
            Err(e) => {
                tracing::warn!(error = %e, "request failed");
                sink.emit(StreamEvent::Error {
                    message: e.to_string(),
                })
                .await;
                self.track(self.logger.record(record.finish(
                    LogStatus::Error,
                    Some(e.to_string()),
                    ctx.usage(),
                )));
                Err(e)
            }
        }
    }

    async fn finish_ok(
        &self,
        sink: &EventSink,
        record: &RequestRecord,
        outcome: &Outcome,
        status: LogStatus,
    ) {
        let duration_ms = record.elapsed().as_millis() as u64;
        sink.emit(StreamEvent::Done {
            summary: Box::new(outcome.summary(&record.request_id, duration_ms)),
        })
        .await;
        self.track(
            self.logger
                .record(record.finish(status, None, outcome.usage())),
        );
    }

    async fn history(&self, session_id: &str) -> Vec<Message> {
        match self
            .services
            .conversations
            .conversation_context(session_id)
            .await
        {
            Ok(messages) => messages
                .into_iter()
                .map(|m| Message {
                    role: m.role,
                    content: m.content,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(session_id, error = %e, "failed to load conversation history");
                Vec::new()
            }
        }
    }

    /// Append the exchange to the query's session, creating one if needed.
    /// Returns the session id, or `None` if no session could be created.
    async fn persist(&self, query: &Query, answer: &str, citations: &[Citation]) -> Option<String> {
        let store = &self.services.conversations;
        let session_id = match &query.session_id {
            Some(id) => id.clone(),
            None => match store
                .create_session(&truncate(query.text.trim(), SESSION_TITLE_CHARS))
                .await
            {
                Ok(s) => s.id,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to create session");
                    return None;
                }
            },
        };

        let written = async {
            store
                .add_message(&session_id, Role::User, &query.text, query.mode, &[])
                .await?;
            store
                .add_message(&session_id, Role::Assistant, answer, query.mode, citations)
                .await
        };
        if let Err(e) = written.await {
            tracing::warn!(session_id = %session_id, error = %e, "failed to persist conversation");
        }
        Some(session_id)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Builder
// ═══════════════════════════════════════════════════════════════════════

pub struct EngineBuilder {
    config: Config,
    providers: ProviderTable,
    registry: ModelRegistry,
    search: Option<Arc<dyn SearchBackend>>,
    fetch: Option<Arc<dyn FetchBackend>>,
    conversations: Option<Arc<dyn ConversationStore>>,
    cache: Option<Arc<dyn CacheStore>>,
    log: Option<Arc<dyn LogStore>>,
}

impl EngineBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            providers: ProviderTable::new(),
            registry: ModelRegistry::new(),
            search: None,
            fetch: None,
            conversations: None,
            cache: None,
            log: None,
        }
    }

    /// Wire every collaborator from configuration: one OpenAI-compatible
    /// provider per configured mode, SearXNG search and the HTTP fetcher.
    /// Stores stay in memory until replaced.
    pub fn from_config(config: Config) -> Result<Self> {
        let mut builder = Self::new(config.clone());
        for mode in Mode::ALL {
            if let Some(pc) = config.providers.get(mode) {
                let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiCompatProvider::new(pc)?);
                builder.registry.register_model(model_info(pc), provider.clone());
                builder.providers.bind(mode, provider);
            }
        }
        let ranker = EmbeddingRanker::from_config(&config.embedding)?;
        builder.search = Some(Arc::new(SearxngBackend::new(&config.search)?));
        builder.fetch = Some(Arc::new(HttpFetcher::new(&config.fetch, ranker)?));
        Ok(builder)
    }

    pub fn provider(mut self, mode: Mode, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.bind(mode, provider);
        self
    }

    pub fn model(self, info: ModelInfo, provider: Arc<dyn LlmProvider>) -> Self {
        self.registry.register_model(info, provider);
        self
    }

    pub fn search(mut self, search: Arc<dyn SearchBackend>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn fetch(mut self, fetch: Arc<dyn FetchBackend>) -> Self {
        self.fetch = Some(fetch);
        self
    }

    pub fn conversations(mut self, store: Arc<dyn ConversationStore>) -> Self {
        self.conversations = Some(store);
        self
    }

    pub fn cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(store);
        self
    }

    pub fn log_store(mut self, store: Arc<dyn LogStore>) -> Self {
        self.log = Some(store);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let Some(search) = self.search else {
            bail!("engine requires a search backend");
        };
        let Some(fetch) = self.fetch else {
            bail!("engine requires a fetch backend");
        };
        if self.providers.is_empty() && self.registry.is_empty() {
            tracing::warn!("no LLM providers configured; every query will fail");
        }

        let conversations = self
            .conversations
            .unwrap_or_else(|| Arc::new(MemoryConversationStore::new()));
        let cache_store = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryCacheStore::new()));
        let log_store = self.log.unwrap_or_else(|| Arc::new(MemoryLogStore::new()));

        Ok(Engine {
            cache: ResponseCache::new(cache_store, &self.config.cache),
            logger: RequestLogger::new(log_store, &self.config.log),
            background: Arc::new(Mutex::new(Vec::new())),
            config: Arc::new(self.config),
            providers: Arc::new(self.providers),
            registry: Arc::new(self.registry),
            services: Services {
                search,
                fetch,
                conversations,
            },
        })
    }
}

/// Registry entry for a configured provider.
pub fn model_info(pc: &ProviderConfig) -> ModelInfo {
    let capabilities: Vec<Capability> = pc
        .capabilities
        .iter()
        .filter_map(|c| Capability::parse(c))
        .collect();
    ModelInfo {
        id: pc.model.clone(),
        provider: pc.name.clone(),
        name: pc.model.clone(),
        description: pc.description.clone(),
        capabilities,
        context_size: pc.context_size,
        speed: Speed::parse(&pc.speed),
        available: true,
        is_default: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatRequest, ChatResponse, ChunkStream, RemoteModel};
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl LlmProvider for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn model(&self) -> &str {
            self.0
        }
        async fn chat_completion(&self, _: ChatRequest) -> Result<ChatResponse> {
            Ok(ChatResponse::default())
        }
        async fn chat_completion_stream(&self, _: ChatRequest) -> Result<ChunkStream> {
            Ok(Box::pin(futures_util::stream::empty()))
        }
        async fn list_models(&self) -> Result<Vec<RemoteModel>> {
            Ok(Vec::new())
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
    }

    fn p(name: &'static str) -> Arc<dyn LlmProvider> {
        Arc::new(Named(name))
    }

    #[test]
    fn test_route_prefers_bound_mode() {
        let mut t = ProviderTable::new();
        t.bind(Mode::Quick, p("q"));
        t.bind(Mode::Deep, p("d"));
        assert_eq!(t.route(Mode::Deep).map(|p| p.name().to_string()), Some("d".into()));
        assert_eq!(t.route(Mode::Research).map(|p| p.name().to_string()), Some("q".into()));
    }

    #[test]
    fn test_route_fallback_order() {
        let mut t = ProviderTable::new();
        t.bind(Mode::Research, p("r"));
        t.bind(Mode::Deep, p("d"));
        assert_eq!(t.route(Mode::Quick).map(|p| p.name().to_string()), Some("d".into()));

        let mut only_ds = ProviderTable::new();
        only_ds.bind(Mode::DeepSearch, p("ds"));
        assert_eq!(
            only_ds.route(Mode::Quick).map(|p| p.name().to_string()),
            Some("ds".into())
        );
        assert!(ProviderTable::new().route(Mode::Quick).is_none());
    }

    #[test]
    fn test_model_info_from_provider_config() {
        let pc: ProviderConfig = toml::from_str(
            r#"
            base_url = "http://localhost:8080/v1"
            model = "llava"
            capabilities = ["text", "vision", "telepathy"]
            speed = "fast"
            "#,
        )
        .unwrap();
        let info = model_info(&pc);
        assert_eq!(info.id, "llava");
        assert_eq!(info.capabilities, vec![Capability::Text, Capability::Vision]);
        assert_eq!(info.speed, Speed::Fast);
        assert!(info.available);
    }
}
