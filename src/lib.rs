//! # Answer Engine
//!
//! An answer-orchestration engine for AI search: it routes a question to
//! one of four inference pipelines, grounds the answer in web search
//! results and fetched pages, and delivers it either as one response or
//! as a stream of events.
//!
//! ## Architecture
//!
//! ```text
//!                ┌──────────────┐
//!   Query ──────▶│    Engine    │── cache ──▶ CacheStore
//!                │ route+select │── log ────▶ LogStore
//!                └──────┬───────┘── session ▶ ConversationStore
//!                       │
//!        ┌──────────┬───┴──────┬─────────────┐
//!        ▼          ▼          ▼             ▼
//!     quick       deep     research      deepsearch
//!        │          │          │             │ (fetch pool)
//!        └──── SearchBackend / FetchBackend / LlmProvider ────┘
//!                       │
//!                       ▼
//!                 EventSink ──▶ stream of StreamEvent
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ask init                                  # create database
//! ask query "what is quantum computing"     # quick answer
//! ask query "compare raft and paxos" --mode deep --stream
//! ask deepsearch "state of solid-state batteries"
//! ask serve                                 # start HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Router, cache and accounting around the pipelines |
//! | [`quick`], [`deep`], [`research`], [`deepsearch`] | Inference pipelines |
//! | [`fetch_pool`] | Bounded fetch worker pool |
//! | [`events`] | Streaming event protocol |
//! | [`registry`] | Model capability registry |
//! | [`cache`], [`usage`] | Response cache and request accounting |
//! | [`traits`] | Collaborator and store seams |
//! | [`openai`], [`http_search`], [`fetch`], [`embedding`] | HTTP collaborators |
//! | [`memory`], [`sqlite_store`] | Store implementations |
//! | [`server`] | HTTP API |
//! | [`config`] | TOML configuration parsing |
//! | [`db`], [`migrate`] | Database connection and schema |

pub mod cache;
pub mod config;
pub mod db;
pub mod deep;
pub mod deepsearch;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod events;
pub mod fetch;
pub mod fetch_pool;
pub mod http_search;
pub mod llm;
pub mod memory;
pub mod migrate;
pub mod openai;
pub mod progress;
pub mod quick;
pub mod registry;
pub mod related;
pub mod research;
pub mod run;
pub mod server;
pub mod sqlite_store;
pub mod traits;
pub mod usage;

pub use answer_engine_core::models;
pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, EngineResult};
