//! Streaming event protocol.
//!
//! Every pipeline reports progress through an [`EventSink`]. For one
//! invocation the stream is:
//!
//! ```text
//! start
//! (search | citation | thinking | source | progress | section)*
//! token*              (interleaved with the above)
//! done | error        (exactly one, then the stream closes)
//! ```
//!
//! A disabled sink drops everything, which is how the blocking entry
//! points reuse the same pipeline code as the streaming ones.
//!
//! The channel is bounded. A slow consumer back-pressures the pipeline;
//! size `engine.event_buffer` accordingly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use answer_engine_core::models::{
    Citation, DeepSearchReport, ImageResult, Mode, ReasoningStep, RelatedQuestion, TokenUsage,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Final structured summary carried by the `done` event.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StreamSummary {
    pub request_id: String,
    pub session_id: String,
    pub mode: Mode,
    #[serde(default)]
    pub citations: Vec<Citation>,
    #[serde(default)]
    pub follow_ups: Vec<String>,
    #[serde(default)]
    pub related_questions: Vec<RelatedQuestion>,
    #[serde(default)]
    pub images: Vec<ImageResult>,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub from_cache: bool,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<DeepSearchReport>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Start {
        request_id: String,
        mode: Mode,
        query: String,
    },
    Search {
        query: String,
        result_count: usize,
    },
    Citation {
        citation: Citation,
    },
    Thinking {
        step: ReasoningStep,
    },
    Token {
        content: String,
    },
    Source {
        url: String,
        title: String,
    },
    Progress {
        phase: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        completed: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total: Option<usize>,
    },
    Section {
        title: String,
    },
    Done {
        summary: Box<StreamSummary>,
    },
    Error {
        message: String,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Start { .. } => "start",
            StreamEvent::Search { .. } => "search",
            StreamEvent::Citation { .. } => "citation",
            StreamEvent::Thinking { .. } => "thinking",
            StreamEvent::Token { .. } => "token",
            StreamEvent::Source { .. } => "source",
            StreamEvent::Progress { .. } => "progress",
            StreamEvent::Section { .. } => "section",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn progress(phase: &str, message: impl Into<String>) -> Self {
        StreamEvent::Progress {
            phase: phase.to_string(),
            message: message.into(),
            completed: None,
            total: None,
        }
    }

    pub fn progress_count(
        phase: &str,
        message: impl Into<String>,
        completed: usize,
        total: usize,
    ) -> Self {
        StreamEvent::Progress {
            phase: phase.to_string(),
            message: message.into(),
            completed: Some(completed),
            total: Some(total),
        }
    }
}

/// Cloneable handle pipelines emit into.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::Sender<StreamEvent>>,
    closed: Arc<AtomicBool>,
}

impl EventSink {
    /// A sink that discards every event.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A sink backed by a bounded channel.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx: Some(tx),
                closed: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Whether a terminal event has been emitted.
    pub fn is_finished(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Send an event. After the first terminal event every call is a
    /// no-op, so a stream can never carry two terminals or trail events
    /// after one.
    pub async fn emit(&self, event: StreamEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if event.is_terminal() {
            if self
                .closed
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return;
            }
        } else if self.closed.load(Ordering::Acquire) {
            return;
        }
        if tx.send(event).await.is_err() {
            tracing::debug!("event receiver dropped");
        }
    }

    pub async fn token(&self, content: impl Into<String>) {
        if self.is_enabled() {
            self.emit(StreamEvent::Token {
                content: content.into(),
            })
            .await;
        }
    }

    pub async fn thinking(&self, step: &ReasoningStep) {
        if self.is_enabled() {
            self.emit(StreamEvent::Thinking { step: step.clone() }).await;
        }
    }

    pub async fn progress(&self, phase: &str, message: impl Into<String>) {
        if self.is_enabled() {
            self.emit(StreamEvent::progress(phase, message)).await;
        }
    }

    /// Resolves when the receiving side has gone away. Never resolves for a
    /// disabled sink.
    pub async fn receiver_gone(&self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => std::future::pending::<()>().await,
        }
    }
}
