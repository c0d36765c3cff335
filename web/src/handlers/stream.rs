//! Server-sent event stream of flight notifications.
//!
//! ```text
//! Browser                 flight_stream              SubscriberHub
//!   │                          │                          │
//!   ├─ GET /api/flights/stream►│                          │
//!   │                          ├─ register() ────────────►│
//!   │                          │                          │
//!   │                          │◄── Payload ──────────────┤ broadcast
//!   │◄─ event: flight-update ──┤                          │
//!   │                          │                          │
//!   ├─ disconnect ────────────►│ (handle dropped) ───────►│ removed
//! ```
//!
//! Every way the stream can end (client gone, lifetime reached, hub pruned
//! the viewer) drops the [`SubscriberHandle`](flightfeed_runtime::SubscriberHandle),
//! which removes it from the hub.

use crate::state::AppState;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use std::convert::Infallible;
use std::future;

/// Open a push connection.
///
/// # Endpoint
///
/// ```text
/// GET /api/flights/stream
/// ```
///
/// Each notification arrives as:
///
/// ```text
/// event: flight-update
/// data: {"flightNumber":"FF101","eventType":"CANCELLATION",...}
/// ```
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn flight_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut handle = state.hub.register();
    let lifetime = state.stream.timeout;
    let subscriber_id = handle.id();
    tracing::info!(%subscriber_id, subscribers = state.hub.size(), "Viewer connected");

    let stream = async_stream::stream! {
        let deadline = async {
            match lifetime {
                Some(lifetime) => tokio::time::sleep(lifetime).await,
                None => future::pending().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = &mut deadline => {
                    tracing::debug!(%subscriber_id, "Viewer stream reached its lifetime");
                    break;
                }
                payload = handle.recv() => match payload {
                    Some(payload) => {
                        let event = Event::default().event(payload.event_name).data(&*payload.data);
                        yield Ok(event);
                    }
                    None => {
                        tracing::debug!(%subscriber_id, "Viewer removed by hub");
                        break;
                    }
                },
            }
        }

        handle.close();
        tracing::info!(%subscriber_id, "Viewer disconnected");
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(state.stream.keep_alive))
}
