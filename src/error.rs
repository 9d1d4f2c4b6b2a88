//! Engine error taxonomy.
//!
//! Collaborators (search, fetch, LLM, stores) return `anyhow::Result`; the
//! engine maps their failures into [`EngineError`] at each call boundary.
//! Which variants are fatal depends on where they occur:
//!
//! | Variant | Effect |
//! |---------|--------|
//! | `NoProviderAvailable` / `NoModelAvailable` | fatal, returned immediately |
//! | `SearchFailed` | aborts the step; skipped per sub-query in multi-query pipelines |
//! | `FetchFailed` | never fatal; the source is dropped |
//! | `Llm` | aborts the pipeline, except inside the agentic loop |
//! | `Cancelled` / `Timeout` | aborts the pipeline |
//!
//! Cache and log store failures never become an `EngineError`; they are
//! logged and swallowed.

use answer_engine_core::models::Mode;
use thiserror::Error;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("no LLM provider available for mode '{mode}'")]
    NoProviderAvailable { mode: Mode },

    #[error("no model available")]
    NoModelAvailable,

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("search failed: {0}")]
    SearchFailed(String),

    #[error("fetch failed for {url}: {message}")]
    FetchFailed { url: String, message: String },

    #[error("LLM request failed: {0}")]
    Llm(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("{0} timed out")]
    Timeout(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn search(err: anyhow::Error) -> Self {
        EngineError::SearchFailed(format!("{:#}", err))
    }

    pub fn llm(err: anyhow::Error) -> Self {
        EngineError::Llm(format!("{:#}", err))
    }

    pub fn fetch(url: &str, err: anyhow::Error) -> Self {
        EngineError::FetchFailed {
            url: url.to_string(),
            message: format!("{:#}", err),
        }
    }

    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::NoProviderAvailable { .. } => "no_provider",
            EngineError::NoModelAvailable => "no_model",
            EngineError::UnknownModel(_) => "not_found",
            EngineError::SearchFailed(_) => "search_failed",
            EngineError::FetchFailed { .. } => "fetch_failed",
            EngineError::Llm(_) => "llm_error",
            EngineError::Cancelled => "cancelled",
            EngineError::Timeout(_) => "timeout",
            EngineError::InvalidRequest(_) => "bad_request",
            EngineError::Other(_) => "internal",
        }
    }

    /// Fatal errors are returned before any pipeline work starts.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::NoProviderAvailable { .. }
                | EngineError::NoModelAvailable
                | EngineError::InvalidRequest(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_and_codes() {
        let e = EngineError::NoProviderAvailable { mode: Mode::Deep };
        assert_eq!(e.to_string(), "no LLM provider available for mode 'deep'");
        assert_eq!(e.code(), "no_provider");
        assert!(e.is_fatal());

        let e = EngineError::fetch("https://a.com", anyhow::anyhow!("404"));
        assert_eq!(e.to_string(), "fetch failed for https://a.com: 404");
        assert!(!e.is_fatal());
    }
}
