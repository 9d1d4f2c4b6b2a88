//! # Answer Engine CLI (`ask`)
//!
//! ## Usage
//!
//! ```bash
//! ask --config ./config/ask.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ask init` | Create the SQLite database and run schema migrations |
//! | `ask query "<text>"` | Answer a question (`--mode quick\|deep\|research\|deepsearch`) |
//! | `ask deepsearch "<text>"` | Produce a structured research report |
//! | `ask modes` | List answer modes |
//! | `ask models` | List registered models (`--check` probes them) |
//! | `ask serve` | Start the HTTP API |
//! | `ask cache stats` | Response cache entry counts |
//! | `ask log stats` | Request totals, errors, tokens and cost |
//!
//! ## Examples
//!
//! ```bash
//! ask init --config ./config/ask.toml
//! ask query "what is quantum computing"
//! ask query "how do vaccines train the immune system" --mode deep --stream
//! ask query "follow up on that" --session 3f2c...
//! ask deepsearch "solid-state battery commercialization" --json
//! ```
//!
//! Logging goes to stderr and honours `RUST_LOG`.

use std::sync::Arc;

use anyhow::{bail, Result};
use answer_engine::config::{self, Config};
use answer_engine::engine::{Engine, EngineBuilder};
use answer_engine::events::StreamEvent;
use answer_engine::migrate;
use answer_engine::models::{Mode, Query};
use answer_engine::progress::{format_number, OutputMode};
use answer_engine::server;
use answer_engine::sqlite_store::SqliteStore;
use answer_engine::traits::{CacheStore, LogStore};
use answer_engine_core::report::format_report_markdown;
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Answer Engine: AI search answers grounded in web sources.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ask.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ask",
    about = "Answer Engine: AI search answers grounded in web sources",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ask.toml")]
    config: PathBuf,

    /// Emit JSON lines even on a terminal.
    #[arg(long, global = true)]
    json: bool,

    /// Keep the cache, request log and sessions in memory for this run.
    #[arg(long, global = true)]
    no_db: bool,

    /// Log filter when `RUST_LOG` is unset (`warn`, or `info` for `serve`).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Answer a question.
    Query {
        /// The question.
        text: String,

        /// Answer mode: `quick`, `deep`, `research` or `deepsearch`.
        #[arg(long, default_value = "quick")]
        mode: Mode,

        /// Continue an existing conversation.
        #[arg(long)]
        session: Option<String>,

        /// Use a specific registered model.
        #[arg(long)]
        model: Option<String>,

        /// Print tokens and progress as they arrive.
        #[arg(long)]
        stream: bool,
    },

    /// Produce a structured research report.
    Deepsearch {
        text: String,

        #[arg(long)]
        session: Option<String>,

        #[arg(long)]
        stream: bool,
    },

    /// List answer modes.
    Modes,

    /// List registered models.
    Models {
        /// Ping every model's provider first and record availability.
        #[arg(long)]
        check: bool,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Response cache maintenance.
    Cache {
        #[command(subcommand)]
        action: StatsAction,
    },

    /// Request log maintenance.
    Log {
        #[command(subcommand)]
        action: StatsAction,
    },
}

#[derive(Subcommand)]
enum StatsAction {
    /// Print summary statistics.
    Stats,
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn build_engine(cfg: &Config, no_db: bool) -> Result<Engine> {
    let mut builder = EngineBuilder::from_config(cfg.clone())?;
    if !no_db {
        let store = Arc::new(SqliteStore::open(&cfg.db).await?);
        builder = builder
            .conversations(store.clone())
            .cache_store(store.clone())
            .log_store(store);
    }
    builder.build()
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Drain an event stream through the reporter. Fails if the stream ended
/// with an `error` event.
async fn render_stream(
    mut events: impl futures_util::Stream<Item = StreamEvent> + Unpin,
    output: OutputMode,
) -> Result<()> {
    let reporter = output.reporter();
    let mut failure = None;
    while let Some(event) = events.next().await {
        reporter.report(&event);
        if let StreamEvent::Error { message } = &event {
            failure = Some(message.clone());
        }
    }
    match failure {
        Some(message) => bail!(message),
        None => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = match (&cli.log_level, &cli.command) {
        (Some(level), _) => level.as_str(),
        (None, Commands::Serve) => "info",
        (None, _) => "warn",
    };
    init_tracing(default_level);

    let cfg = config::load_config(&cli.config)?;
    let output = OutputMode::detect(cli.json);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Query {
            text,
            mode,
            session,
            model,
            stream,
        } => {
            let engine = build_engine(&cfg, cli.no_db).await?;
            let mut query = Query::new(text, mode).with_session(session.unwrap_or_default());
            query.model_id = model;

            let result = if stream {
                let events = engine.process_stream(query)?;
                render_stream(events, output).await
            } else {
                let response = engine.process(query).await?;
                match output {
                    OutputMode::Json => print_json(&response),
                    OutputMode::Human => {
                        println!("{}", response.answer);
                        if !response.citations.is_empty() {
                            println!("\nSources:");
                            for c in &response.citations {
                                println!("  [{}] {} ({})", c.index, c.title, c.url);
                            }
                        }
                        if !response.follow_ups.is_empty() {
                            println!("\nRelated:");
                            for q in &response.follow_ups {
                                println!("  - {}", q);
                            }
                        }
                        eprintln!(
                            "session={}  tokens={}{}",
                            response.session_id,
                            format_number(response.usage.total()),
                            if response.from_cache { "  (cached)" } else { "" }
                        );
                        Ok(())
                    }
                }
            };
            engine.flush().await;
            result?;
        }
        Commands::Deepsearch {
            text,
            session,
            stream,
        } => {
            let engine = build_engine(&cfg, cli.no_db).await?;
            let query =
                Query::new(text, Mode::DeepSearch).with_session(session.unwrap_or_default());

            let result = if stream {
                let events = engine.process_deep_search_stream(query)?;
                render_stream(events, output).await
            } else {
                let report = engine.process_deep_search(query).await?;
                match output {
                    OutputMode::Json => print_json(&report),
                    OutputMode::Human => {
                        println!(
                            "{}",
                            format_report_markdown(&report.query, &report.report, &report.citations)
                        );
                        eprintln!(
                            "session={}  sources={}  tokens={}  {}ms",
                            report.session_id,
                            report.sources.len(),
                            format_number(report.usage.total()),
                            report.duration_ms
                        );
                        Ok(())
                    }
                }
            };
            engine.flush().await;
            result?;
        }
        Commands::Modes => {
            let engine = build_engine(&cfg, true).await?;
            let modes = engine.list_modes();
            match output {
                OutputMode::Json => print_json(&modes)?,
                OutputMode::Human => {
                    for m in modes {
                        println!(
                            "{:<12} {:<12} {:<36} {}",
                            m.id.as_str(),
                            m.name,
                            m.description,
                            m.model.unwrap_or_else(|| "-".to_string())
                        );
                    }
                }
            }
        }
        Commands::Models { check } => {
            let engine = build_engine(&cfg, true).await?;
            if check {
                engine.registry().check_all().await;
            }
            let models = engine.registry().list_models();
            match output {
                OutputMode::Json => print_json(&models)?,
                OutputMode::Human => {
                    if models.is_empty() {
                        println!("No models configured. Add a [providers.<mode>] section.");
                    }
                    for m in models {
                        println!(
                            "{:<32} {:<20} {:<9} {:>7}  {}{}",
                            m.id,
                            m.provider,
                            format!("{:?}", m.speed).to_lowercase(),
                            m.context_size,
                            if m.available { "available" } else { "unavailable" },
                            if m.is_default { "  (default)" } else { "" }
                        );
                    }
                }
            }
        }
        Commands::Serve => {
            let engine = build_engine(&cfg, cli.no_db).await?;
            server::run_server(engine).await?;
        }
        Commands::Cache {
            action: StatsAction::Stats,
        } => {
            let store = SqliteStore::open(&cfg.db).await?;
            let stats = CacheStore::stats(&store).await?;
            match output {
                OutputMode::Json => print_json(&stats)?,
                OutputMode::Human => {
                    println!("  Entries:     {}", format_number(stats.total_entries));
                    println!("  Live:        {}", format_number(stats.live_entries));
                    println!(
                        "  Expired:     {}",
                        format_number(stats.total_entries.saturating_sub(stats.live_entries))
                    );
                }
            }
        }
        Commands::Log {
            action: StatsAction::Stats,
        } => {
            let store = SqliteStore::open(&cfg.db).await?;
            let stats = LogStore::stats(&store).await?;
            match output {
                OutputMode::Json => print_json(&stats)?,
                OutputMode::Human => {
                    println!("  Requests:    {}", format_number(stats.total_requests));
                    println!("  Errors:      {}", format_number(stats.errors));
                    println!("  Tokens:      {}", format_number(stats.total_tokens));
                    println!("  Cost:        ${:.4}", stats.total_cost_usd);
                }
            }
        }
    }

    Ok(())
}
