//! Server-sent event stream over the fan-out hub.
//!
//! `GET /events` is the passive one-way transport: subscribers receive the
//! same [`WatcherEvent`]s the WebSocket pushes, as `data:` frames, plus
//! periodic keep-alive comments. Delivery inherits the hub's bounded-mailbox
//! policy — a slow consumer loses events, never slows ingestion.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use tokio_stream::wrappers::ReceiverStream;

use crate::app_state::AppState;
use crate::domain::event_hub::{EventHub, SubscriberId};
use crate::domain::WatcherEvent;
use crate::persistence::sqlite::format_timestamp;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(25);

/// Hub subscription surfaced as an SSE event stream; unsubscribes on drop.
struct EventStream {
    hub: EventHub,
    subscriber_id: SubscriberId,
    inner: ReceiverStream<WatcherEvent>,
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner)
            .poll_next(cx)
            .map(|event| event.map(|event| Ok(sse_event(&event))))
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.subscriber_id);
    }
}

fn sse_event(event: &WatcherEvent) -> Event {
    let envelope = serde_json::json!({
        "type": event.event_type_str(),
        "at": format_timestamp(event.observed_at()),
        "data": event,
    });
    Event::default().data(envelope.to_string())
}

/// `GET /events` — Subscribe to the push stream.
#[utoipa::path(
    get,
    path = "/events",
    tag = "Events",
    summary = "Server-sent event stream",
    description = "Pushes studies_refresh and studies_updated events as they happen. Best-effort: a slow consumer loses events and should reconcile against the durable endpoints.",
    responses(
        (status = 200, description = "Event stream of studies_refresh / studies_updated frames"),
    )
)]
pub async fn events_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let hub = state.event_hub.clone();
    let (subscriber_id, receiver) = hub.subscribe();

    let stream = EventStream {
        hub,
        subscriber_id,
        inner: ReceiverStream::new(receiver),
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("ping"),
    )
}
