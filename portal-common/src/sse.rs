//! Server-Sent Events (SSE) utilities
//!
//! Turns a [`JobSubscription`] into an SSE response for the dashboard.

use crate::events::JobSubscription;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Heartbeat interval for idle SSE connections
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Stream one job's events as SSE
///
/// Each event is named after its type (`progress`, `record-failed`, ...)
/// and carries the JSON-serialized event as data. The stream ends after
/// the job's terminal event.
pub fn job_event_stream(
    mut subscription: JobSubscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let job_id = subscription.job_id();
    info!(job_id = %job_id, "New SSE client connected to job events");

    let stream = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            let event_type = event.kind.event_type();
            let terminal = event.kind.is_terminal();

            match serde_json::to_string(&event) {
                Ok(data) => {
                    debug!(job_id = %job_id, "SSE: Sending {}", event_type);
                    yield Ok(Event::default().event(event_type).data(data));
                }
                Err(e) => {
                    warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                }
            }

            if terminal {
                info!(job_id = %job_id, "SSE: Terminal event sent, closing stream");
                break;
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
