//! # Answer Engine Core
//!
//! Runtime-free logic for the answer engine: data models, query hashing and
//! cost estimation, citation enhancement, parsers for free-text LLM output
//! (sub-questions, expanded queries, related questions, agent actions), the
//! DeepSearch report parser, chunking and relevance ranking.
//!
//! This crate contains no tokio, sqlx, HTTP, or other I/O dependencies.
//! Everything here is deterministic and unit-testable.

pub mod accounting;
pub mod action;
pub mod chunk;
pub mod citation;
pub mod models;
pub mod rank;
pub mod report;
pub mod text;
