//! HTTP API handlers for portal-transfer
//!
//! REST endpoints to start, query and cancel jobs, plus a per-job SSE
//! event stream for the dashboard.

pub mod health;
pub mod sse;
pub mod transfer;

pub use health::health_routes;
pub use sse::event_routes;
pub use transfer::transfer_routes;
