//! Server-sent event framing for hub feeds.
//!
//! Each hub event becomes one frame: `event: <kind>` and `data: <json>`.
//! The response stays open until the client disconnects, at which point the
//! stream (and with it the feed) is dropped and detaches from the hub.

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use relay_core::{Event, Feed};
use std::convert::Infallible;
use std::time::Duration;

/// Interval between keep-alive comments on idle connections.
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Frame a single hub event, or `None` if it cannot be serialized.
pub fn frame(event: &Event) -> Option<SseEvent> {
    match event.data_json() {
        Ok(data) => Some(SseEvent::default().event(event.kind()).data(data)),
        Err(e) => {
            tracing::warn!(error = %e, kind = event.kind(), "dropping unserializable event");
            None
        }
    }
}

/// Turn a feed into a long-lived SSE response.
pub fn feed_response(feed: Feed) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = feed
        .into_stream()
        .filter_map(|event| std::future::ready(frame(&event).map(Ok)));

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("ping"),
    )
}
