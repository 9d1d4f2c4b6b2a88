//! TOML configuration.
//!
//! Every section has serde defaults so a minimal file only needs the
//! providers it wants to use:
//!
//! ```toml
//! [providers.quick]
//! base_url = "http://localhost:11434/v1"
//! model = "gemma-3-1b"
//! ```
//!
//! [`load_config`] parses and validates; invalid values fail fast with a
//! message naming the offending key.

use anyhow::{bail, Context, Result};
use answer_engine_core::models::Mode;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub deepsearch: DeepSearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/ask.sqlite")
}

// ============ Providers ============

/// Providers bound to modes. Unbound modes are routed by fallback.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProvidersConfig {
    pub quick: Option<ProviderConfig>,
    pub deep: Option<ProviderConfig>,
    pub research: Option<ProviderConfig>,
    pub deepsearch: Option<ProviderConfig>,
}

impl ProvidersConfig {
    pub fn get(&self, mode: Mode) -> Option<&ProviderConfig> {
        match mode {
            Mode::Quick => self.quick.as_ref(),
            Mode::Deep => self.deep.as_ref(),
            Mode::Research => self.research.as_ref(),
            Mode::DeepSearch => self.deepsearch.as_ref(),
        }
    }
}

/// An OpenAI-compatible chat completions endpoint.
#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the bearer token, if any.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,
    #[serde(default = "default_context_size")]
    pub context_size: u32,
    #[serde(default = "default_speed")]
    pub speed: String,
    #[serde(default)]
    pub description: String,
}

fn default_provider_name() -> String {
    "openai-compatible".to_string()
}
fn default_llm_timeout() -> u64 {
    120
}
fn default_llm_retries() -> u32 {
    3
}
fn default_capabilities() -> Vec<String> {
    vec!["text".to_string()]
}
fn default_context_size() -> u32 {
    8192
}
fn default_speed() -> String {
    "balanced".to_string()
}

// ============ Collaborators ============

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_backend")]
    pub backend: String,
    #[serde(default = "default_search_url")]
    pub base_url: String,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_results_per_query")]
    pub results_per_query: usize,
    #[serde(default = "default_images_per_query")]
    pub images_per_query: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: default_search_backend(),
            base_url: default_search_url(),
            timeout_secs: default_search_timeout(),
            results_per_query: default_results_per_query(),
            images_per_query: default_images_per_query(),
        }
    }
}

fn default_search_backend() -> String {
    "searxng".to_string()
}
fn default_search_url() -> String {
    "http://localhost:8888".to_string()
}
fn default_search_timeout() -> u64 {
    10
}
fn default_results_per_query() -> usize {
    10
}
fn default_images_per_query() -> usize {
    6
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchConfig {
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
    #[serde(default = "default_chunk_tokens")]
    pub chunk_max_tokens: usize,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout(),
            max_bytes: default_max_bytes(),
            chunk_max_tokens: default_chunk_tokens(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_fetch_timeout() -> u64 {
    15
}
fn default_max_bytes() -> usize {
    2 * 1024 * 1024
}
fn default_chunk_tokens() -> usize {
    256
}
fn default_user_agent() -> String {
    format!("answer-engine/{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_embedding_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            base_url: default_embedding_url(),
            api_key_env: default_embedding_key_env(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "disabled".to_string()
}
fn default_embedding_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_embedding_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

// ============ Stores ============

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: default_ttl(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            write_timeout_secs: default_write_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_ttl() -> u64 {
    24 * 60 * 60
}
fn default_write_timeout() -> u64 {
    5
}

// ============ Engine ============

/// How research mode runs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStrategy {
    /// Agentic loop when blocking, multi-query when streaming.
    #[default]
    Auto,
    Agentic,
    MultiQuery,
}

impl ResearchStrategy {
    pub fn resolve(self, streaming: bool) -> ResearchStrategy {
        match self {
            ResearchStrategy::Auto if streaming => ResearchStrategy::MultiQuery,
            ResearchStrategy::Auto => ResearchStrategy::Agentic,
            other => other,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Distinct pages fetched by the deep pipeline.
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default)]
    pub research_strategy: ResearchStrategy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_sources: default_max_sources(),
            event_buffer: default_event_buffer(),
            research_strategy: ResearchStrategy::Auto,
        }
    }
}

fn default_max_iterations() -> usize {
    10
}
fn default_max_sources() -> usize {
    10
}
fn default_event_buffer() -> usize {
    256
}

/// Whether DeepSearch fetches pages or builds sources from snippets.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Fetch when blocking, snippets when streaming.
    #[default]
    Auto,
    Fetch,
    Snippets,
}

impl FetchMode {
    pub fn resolve(self, streaming: bool) -> FetchMode {
        match self {
            FetchMode::Auto if streaming => FetchMode::Snippets,
            FetchMode::Auto => FetchMode::Fetch,
            other => other,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeepSearchConfig {
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,
    #[serde(default = "default_worker_pool")]
    pub worker_pool: usize,
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    /// Chunks kept per source after ranking.
    #[serde(default = "default_analysis_depth")]
    pub analysis_depth: usize,
    #[serde(default = "default_report_sections")]
    pub report_sections: usize,
    #[serde(default)]
    pub fetch_mode: FetchMode,
}

impl Default for DeepSearchConfig {
    fn default() -> Self {
        Self {
            max_sources: default_max_sources(),
            worker_pool: default_worker_pool(),
            fetch_timeout_secs: default_fetch_timeout(),
            analysis_depth: default_analysis_depth(),
            report_sections: default_report_sections(),
            fetch_mode: FetchMode::Auto,
        }
    }
}

impl DeepSearchConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn default_worker_pool() -> usize {
    5
}
fn default_analysis_depth() -> usize {
    3
}
fn default_report_sections() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

/// Load and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.engine.max_iterations == 0 {
        bail!("engine.max_iterations must be >= 1");
    }
    if config.engine.max_sources == 0 {
        bail!("engine.max_sources must be >= 1");
    }
    if config.engine.event_buffer == 0 {
        bail!("engine.event_buffer must be >= 1");
    }
    if config.deepsearch.worker_pool == 0 {
        bail!("deepsearch.worker_pool must be >= 1");
    }
    if config.deepsearch.max_sources == 0 {
        bail!("deepsearch.max_sources must be >= 1");
    }
    if config.deepsearch.analysis_depth == 0 {
        bail!("deepsearch.analysis_depth must be >= 1");
    }
    if config.deepsearch.fetch_timeout_secs == 0 {
        bail!("deepsearch.fetch_timeout_secs must be > 0");
    }
    if config.cache.ttl_secs == 0 {
        bail!("cache.ttl_secs must be > 0");
    }

    for mode in Mode::ALL {
        if let Some(p) = config.providers.get(mode) {
            if p.base_url.trim().is_empty() {
                bail!("providers.{}.base_url must not be empty", mode);
            }
            if p.model.trim().is_empty() {
                bail!("providers.{}.model must not be empty", mode);
            }
            match p.speed.as_str() {
                "fast" | "balanced" | "thorough" => {}
                other => bail!(
                    "providers.{}.speed: unknown value '{}'. Must be fast, balanced, or thorough.",
                    mode,
                    other
                ),
            }
            for cap in &p.capabilities {
                if !matches!(cap.as_str(), "text" | "vision" | "embeddings" | "voice") {
                    bail!("providers.{}.capabilities: unknown capability '{}'", mode, cap);
                }
            }
        }
    }

    match config.search.backend.as_str() {
        "searxng" => {}
        other => bail!("Unknown search backend: '{}'. Must be searxng.", other),
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let c = parse_config("").unwrap();
        assert_eq!(c.engine.max_iterations, 10);
        assert_eq!(c.deepsearch.worker_pool, 5);
        assert_eq!(c.deepsearch.max_sources, 10);
        assert_eq!(c.deepsearch.fetch_timeout(), Duration::from_secs(15));
        assert_eq!(c.cache.ttl(), Duration::from_secs(86_400));
        assert!(c.providers.get(Mode::Quick).is_none());
    }

    #[test]
    fn test_example_config_parses() {
        let c = parse_config(include_str!("../config/ask.example.toml")).unwrap();
        assert!(c.providers.get(Mode::Quick).is_some());
        assert!(c.providers.get(Mode::Research).is_none());
        assert_eq!(c.engine.research_strategy, ResearchStrategy::Auto);
        assert_eq!(c.deepsearch.fetch_mode, FetchMode::Auto);
    }

    #[test]
    fn test_provider_section_parsed() {
        let c = parse_config(
            r#"
[providers.deep]
base_url = "http://localhost:11434/v1"
model = "gemma-3-1b"
speed = "thorough"

[engine]
research_strategy = "multi_query"

[deepsearch]
fetch_mode = "snippets"
worker_pool = 8
"#,
        )
        .unwrap();
        let p = c.providers.get(Mode::Deep).unwrap();
        assert_eq!(p.model, "gemma-3-1b");
        assert_eq!(p.capabilities, vec!["text"]);
        assert_eq!(c.engine.research_strategy, ResearchStrategy::MultiQuery);
        assert_eq!(c.deepsearch.fetch_mode, FetchMode::Snippets);
        assert_eq!(c.deepsearch.worker_pool, 8);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(parse_config("[deepsearch]\nworker_pool = 0").is_err());
        assert!(parse_config("[engine]\nmax_iterations = 0").is_err());
        assert!(parse_config("[embedding]\nprovider = \"openai\"").is_err());
        assert!(parse_config(
            "[providers.quick]\nbase_url = \"http://x\"\nmodel = \"m\"\nspeed = \"warp\""
        )
        .is_err());
    }

    #[test]
    fn test_auto_resolution() {
        assert_eq!(
            ResearchStrategy::Auto.resolve(true),
            ResearchStrategy::MultiQuery
        );
        assert_eq!(
            ResearchStrategy::Auto.resolve(false),
            ResearchStrategy::Agentic
        );
        assert_eq!(
            ResearchStrategy::Agentic.resolve(true),
            ResearchStrategy::Agentic
        );
        assert_eq!(FetchMode::Auto.resolve(true), FetchMode::Snippets);
        assert_eq!(FetchMode::Auto.resolve(false), FetchMode::Fetch);
    }
}
