//! Core data models used throughout the answer engine.
//!
//! These types describe the queries, sources, citations and responses that
//! flow through every pipeline, plus the intermediate report structure
//! produced by DeepSearch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ═══════════════════════════════════════════════════════════════════════
// Modes
// ═══════════════════════════════════════════════════════════════════════

/// Inference strategy, ordered by increasing cost and thoroughness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Single-pass retrieval-augmented generation.
    #[default]
    Quick,
    /// Query decomposition, sub-search and synthesis.
    Deep,
    /// Agentic tool-use loop.
    Research,
    /// Multi-phase comprehensive report.
    #[serde(alias = "deep_search")]
    DeepSearch,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Quick, Mode::Deep, Mode::Research, Mode::DeepSearch];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Quick => "quick",
            Mode::Deep => "deep",
            Mode::Research => "research",
            Mode::DeepSearch => "deepsearch",
        }
    }

    /// Stable position used for enum-indexed tables.
    pub fn index(&self) -> usize {
        match self {
            Mode::Quick => 0,
            Mode::Deep => 1,
            Mode::Research => 2,
            Mode::DeepSearch => 3,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Mode::Quick => "Quick",
            Mode::Deep => "Deep",
            Mode::Research => "Research",
            Mode::DeepSearch => "Deep Search",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Mode::Quick => "Fast single-pass answer",
            Mode::Deep => "Multi-source research",
            Mode::Research => "Comprehensive investigation",
            Mode::DeepSearch => "Comprehensive multi-phase report",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" | "" => Ok(Mode::Quick),
            "deep" => Ok(Mode::Deep),
            "research" => Ok(Mode::Research),
            "deepsearch" | "deep_search" | "deep-search" => Ok(Mode::DeepSearch),
            other => Err(format!(
                "unknown mode '{}': must be quick, deep, research, or deepsearch",
                other
            )),
        }
    }
}

/// One entry of the mode catalogue returned by `list_modes`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModeInfo {
    pub id: Mode,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════
// Requests
// ═══════════════════════════════════════════════════════════════════════

/// An incoming query. Created per call and never mutated by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
}

impl Query {
    pub fn new(text: impl Into<String>, mode: Mode) -> Self {
        Self {
            text: text.into(),
            mode,
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        let id = session_id.into();
        self.session_id = if id.is_empty() { None } else { Some(id) };
        self
    }

    pub fn has_images(&self) -> bool {
        !self.image_urls.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Search backend results
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    #[serde(default)]
    pub total_results: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ImageResult {
    pub url: String,
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub source_url: String,
    #[serde(default)]
    pub source_domain: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

// ═══════════════════════════════════════════════════════════════════════
// Fetched content
// ═══════════════════════════════════════════════════════════════════════

/// A bounded span of extracted page text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub url: String,
    pub text: String,
}

/// A fetched and chunked page, as returned by the fetch backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub url: String,
    pub title: String,
    pub chunks: Vec<Chunk>,
    pub fetched_at: DateTime<Utc>,
}

/// A distinct URL used as context in one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub chunks: Vec<String>,
    pub fetched_at: DateTime<Utc>,
}

impl Source {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            url: doc.url.clone(),
            title: doc.title.clone(),
            chunks: doc.chunks.iter().map(|c| c.text.clone()).collect(),
            fetched_at: doc.fetched_at,
        }
    }

    /// A lightweight source built from a search result, without fetching.
    pub fn from_result(result: &SearchResult) -> Self {
        let chunks = if result.snippet.is_empty() {
            Vec::new()
        } else {
            vec![result.snippet.clone()]
        };
        Self {
            url: result.url.clone(),
            title: result.title.clone(),
            chunks,
            fetched_at: Utc::now(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Response
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    /// 1-based, contiguous within one response.
    pub index: usize,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub favicon: String,
    #[serde(default)]
    pub other_sources: usize,
}

impl Citation {
    pub fn new(
        index: usize,
        url: impl Into<String>,
        title: impl Into<String>,
        snippet: impl Into<String>,
    ) -> Self {
        Self {
            index,
            url: url.into(),
            title: title.into(),
            snippet: snippet.into(),
            domain: String::new(),
            favicon: String::new(),
            other_sources: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Decompose,
    Search,
    Fetch,
    Analyze,
    Synthesize,
    Plan,
    Action,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Decompose => "decompose",
            StepKind::Search => "search",
            StepKind::Fetch => "fetch",
            StepKind::Analyze => "analyze",
            StepKind::Synthesize => "synthesize",
            StepKind::Plan => "plan",
            StepKind::Action => "action",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReasoningStep {
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub input: String,
    #[serde(default)]
    pub output: String,
}

impl ReasoningStep {
    pub fn new(kind: StepKind, input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            kind,
            input: input.into(),
            output: output.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionCategory {
    Deeper,
    Related,
    #[serde(alias = "practical")]
    Background,
    Comparison,
    Current,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelatedQuestion {
    pub text: String,
    /// `None` for fallback questions recovered without a category prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<QuestionCategory>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// The result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Response {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    /// Flat follow-up strings kept for older clients.
    #[serde(default)]
    pub follow_ups: Vec<String>,
    #[serde(default)]
    pub related_questions: Vec<RelatedQuestion>,
    #[serde(default)]
    pub images: Vec<ImageResult>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub reasoning: Vec<ReasoningStep>,
    #[serde(default)]
    pub session_id: String,
    pub mode: Mode,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default)]
    pub from_cache: bool,
}

// ═══════════════════════════════════════════════════════════════════════
// DeepSearch
// ═══════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReportSection {
    pub title: String,
    pub content: String,
    pub order: usize,
}

/// Structured report parsed from raw LLM output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DeepSearchReport {
    pub overview: String,
    pub key_findings: Vec<String>,
    pub sections: Vec<ReportSection>,
    pub methodology: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeepSearchResponse {
    pub query: String,
    pub report: DeepSearchReport,
    pub citations: Vec<Citation>,
    pub sources: Vec<Source>,
    #[serde(default)]
    pub related_questions: Vec<RelatedQuestion>,
    #[serde(default)]
    pub follow_ups: Vec<String>,
    pub session_id: String,
    #[serde(default)]
    pub usage: TokenUsage,
    /// Wall-clock duration of the run in milliseconds.
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub from_cache: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("DeepSearch".parse::<Mode>().unwrap(), Mode::DeepSearch);
        assert_eq!("".parse::<Mode>().unwrap(), Mode::Quick);
        assert!("turbo".parse::<Mode>().is_err());
        for m in Mode::ALL {
            assert_eq!(m.as_str().parse::<Mode>().unwrap(), m);
        }
    }

    #[test]
    fn test_mode_indices_distinct() {
        let mut seen = [false; 4];
        for m in Mode::ALL {
            assert!(!seen[m.index()]);
            seen[m.index()] = true;
        }
    }

    #[test]
    fn test_practical_alias_maps_to_background() {
        let q: RelatedQuestion =
            serde_json::from_str(r#"{"text":"How is it used?","category":"practical"}"#).unwrap();
        assert_eq!(q.category, Some(QuestionCategory::Background));
    }

    #[test]
    fn test_query_with_empty_session_is_none() {
        let q = Query::new("hello", Mode::Quick).with_session("");
        assert!(q.session_id.is_none());
    }
}
