//! # Portal Common Library
//!
//! Shared code for the portal transfer service:
//! - Common error type
//! - Transfer event types and the per-job EventBus
//! - TOML bootstrap configuration and root folder resolution
//! - SSE helpers for streaming job events

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
