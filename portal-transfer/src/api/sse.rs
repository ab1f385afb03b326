//! Server-Sent Events for job progress
//!
//! Streams events for one job:
//! - status
//! - progress
//! - record-started / record-completed / record-failed
//! - transfer-completed or transfer-error (last event, closes the stream)

use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
    Router,
};
use futures::stream::Stream;
use std::convert::Infallible;
use uuid::Uuid;

use crate::AppState;

/// GET /transfer/events/:job_id
///
/// Subscribing before the job starts is allowed, so a dashboard can pick
/// its own job id and miss nothing.
pub async fn job_event_stream(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.event_bus.subscribe_job(job_id);
    portal_common::sse::job_event_stream(subscription)
}

/// Build event stream routes
pub fn event_routes() -> Router<AppState> {
    Router::new().route("/transfer/events/:job_id", get(job_event_stream))
}
