//! Server-sent event framing for session subscriptions.
//!
//! Every stream starts with an `open` frame carrying the session's next
//! sequence at attach time. Session events follow with `id` set to the
//! sequence and the event name set to the event type, so a reconnecting
//! client can resume with `Last-Event-ID`. Replay gaps and lag disconnects
//! arrive as `gap` and `lagged` frames.

use std::convert::Infallible;

use axum::http::HeaderMap;
use axum::response::sse::Event;
use futures::Stream;
use ponder_runtime::{Subscription, SubscriptionItem};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::ApiError;
use crate::metrics::{SSE_STREAMS_ACTIVE, SSE_STREAMS_TOTAL};

/// Header browsers send when an `EventSource` reconnects.
pub const LAST_EVENT_ID: &str = "last-event-id";

/// Starting sequence for a subscription.
///
/// `Last-Event-ID` wins over `?from=` since it reflects what the client
/// actually received before reconnecting.
pub fn resolve_cursor(from: Option<u64>, headers: &HeaderMap) -> Result<u64, ApiError> {
    let Some(value) = headers.get(LAST_EVENT_ID) else {
        return Ok(from.unwrap_or(0));
    };
    let last_seen = value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| ApiError::BadRequest(format!("invalid {LAST_EVENT_ID} header")))?;
    Ok(last_seen.saturating_add(1))
}

fn open_frame(subscription: &Subscription) -> Event {
    let data = json!({
        "session_id": subscription.session_id(),
        "subscription_id": subscription.id(),
        "from": subscription.from_sequence(),
        "next_sequence": subscription.next_sequence(),
        "live": subscription.is_live(),
    });
    Event::default()
        .event("open")
        .json_data(data)
        .unwrap_or_else(|_| Event::default().event("open").data("{}"))
}

/// SSE frame for one subscription item.
pub fn frame(item: &SubscriptionItem) -> Event {
    match item {
        SubscriptionItem::Event(event) => {
            let name = event.kind.as_str();
            Event::default()
                .id(event.sequence.to_string())
                .event(name)
                .json_data(event)
                .unwrap_or_else(|_| Event::default().event(name).data("{}"))
        }
        SubscriptionItem::Gap { .. } => Event::default()
            .event("gap")
            .json_data(item)
            .unwrap_or_else(|_| Event::default().event("gap").data("{}")),
        SubscriptionItem::Lagged { .. } => Event::default()
            .event("lagged")
            .json_data(item)
            .unwrap_or_else(|_| Event::default().event("lagged").data("{}")),
    }
}

struct ActiveStream;

impl ActiveStream {
    fn open() -> Self {
        metrics::counter!(SSE_STREAMS_TOTAL).increment(1);
        metrics::gauge!(SSE_STREAMS_ACTIVE).increment(1.0);
        Self
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        metrics::gauge!(SSE_STREAMS_ACTIVE).decrement(1.0);
    }
}

/// Frames for `subscription`, ending with the session or at server shutdown.
///
/// Dropping the stream (client disconnect) drops the subscription, which
/// detaches it from the broker.
pub fn event_stream(
    mut subscription: Subscription,
    shutdown: CancellationToken,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    async_stream::stream! {
        let _active = ActiveStream::open();
        let session_id = subscription.session_id().clone();
        yield Ok(open_frame(&subscription));
        loop {
            let item = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!(%session_id, "closing event stream for shutdown");
                    break;
                }
                item = subscription.recv() => item,
            };
            let Some(item) = item else { break };
            yield Ok(frame(&item));
        }
    }
}
