//! LLM-backed translation of plain text, EPUB and SRT documents.
//!
//! A document is split into translation units (chunks of text, EPUB job
//! items, or subtitle blocks), each unit is sent to a configured
//! [`provider::LlmProvider`] with rolling context from the previous unit,
//! and the translated units are reassembled into an output document of the
//! same format. [`job`] ties the per-format pipelines together behind a
//! single submit/status/interrupt API.

pub mod cancel;
pub mod chunk;
pub mod config;
pub mod engine;
pub mod epub;
pub mod error;
pub mod job;
pub mod logging;
pub mod postprocess;
pub mod prompt;
pub mod provider;
pub mod srt;
pub mod tags;

pub use error::DoctranError;
