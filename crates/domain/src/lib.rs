//! Shared domain types for the Switchboard LLM gateway.
//!
//! Everything provider-agnostic lives here: the unified chat and embedding
//! shapes the host sees, the configuration model (provider templates, user
//! configs, and their merge product), the error type, and stream aliases.
//! The translation and gateway crates both depend on this crate and nothing
//! else internal.

pub mod chat;
pub mod config;
pub mod embedding;
pub mod error;
pub mod stream;

pub use error::{Error, Result};
