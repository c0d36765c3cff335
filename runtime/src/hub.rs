//! Registry of live viewer connections and notification fan-out.
//!
//! ```text
//! broadcast(notification)
//!     │  serialize once
//!     ▼
//! snapshot ──► [sink 1] try_send ──► ok
//!     │    ──► [sink 2] try_send ──► Full/Closed ──► remove(2)
//!     │    ──► [sink N] try_send ──► ok
//! ```
//!
//! ## Registry
//! The registry is a copy-on-write list: `Arc<Vec<Entry>>` behind a lock that
//! is only held long enough to clone or swap the `Arc`. Broadcasts iterate a
//! snapshot without holding any lock, so registration, removal and delivery
//! never wait on each other.
//!
//! ## Rules
//! - **Bounded effort**: every send is a `try_send`; a full or closed queue
//!   fails immediately instead of stalling the broadcast
//! - **Scoped cleanup**: a failed send removes that subscriber only
//! - **Idempotent removal**: removing an unknown or already removed id is a no-op
//! - **Scoped resource**: a [`SubscriberHandle`] removes itself on drop, so a
//!   disconnect, timeout or error on the connection all release the slot

use crate::metrics::HubMetrics;
use flightfeed_core::notification::{NOTIFICATION_EVENT_NAME, Notification};
use futures::Stream;
use parking_lot::RwLock;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;

/// Queued notifications per viewer before the viewer counts as hung.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Identifier of one registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A serialized notification ready for the wire.
///
/// The JSON body is shared between every subscriber of one broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    /// Name of the pushed event (`flight-update`)
    pub event_name: &'static str,
    /// Notification JSON
    pub data: Arc<str>,
}

/// Why a sink refused a payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The viewer is not keeping up
    #[error("subscriber queue is full")]
    Full,
    /// The viewer went away
    #[error("subscriber is closed")]
    Closed,
    /// Any other delivery failure
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Destination of pushed notifications.
///
/// Implementations must not block: return an error instead of waiting.
pub trait NotificationSink: Send + Sync {
    /// Hand one payload to the viewer.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the payload cannot be accepted right now. The
    /// hub removes the sink on any error.
    fn try_send(&self, payload: &Payload) -> Result<(), SinkError>;
}

/// Sink backed by a bounded channel, used by [`SubscriberHub::register`].
struct ChannelSink {
    sender: mpsc::Sender<Payload>,
}

impl NotificationSink for ChannelSink {
    fn try_send(&self, payload: &Payload) -> Result<(), SinkError> {
        self.sender.try_send(payload.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

#[derive(Clone)]
struct Entry {
    id: SubscriberId,
    sink: Arc<dyn NotificationSink>,
}

/// Result of one [`SubscriberHub::broadcast`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers that accepted the notification
    pub delivered: usize,
    /// Subscribers removed because their send failed
    pub pruned: usize,
}

/// Concurrent registry of live push connections.
///
/// # Example
///
/// ```
/// use flightfeed_runtime::hub::SubscriberHub;
/// use std::sync::Arc;
///
/// let hub = Arc::new(SubscriberHub::new());
/// let handle = hub.register();
/// assert_eq!(hub.size(), 1);
///
/// drop(handle);
/// assert_eq!(hub.size(), 0);
/// ```
pub struct SubscriberHub {
    entries: RwLock<Arc<Vec<Entry>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl SubscriberHub {
    /// Create a hub with [`DEFAULT_SUBSCRIBER_BUFFER`] slots per viewer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Create a hub whose viewers may queue up to `buffer` notifications.
    #[must_use]
    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            entries: RwLock::new(Arc::new(Vec::new())),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Open a new push connection.
    ///
    /// The returned handle yields every notification broadcast after this
    /// call. Dropping it closes the connection.
    #[must_use]
    pub fn register(self: &Arc<Self>) -> SubscriberHandle {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.register_sink(Arc::new(ChannelSink { sender }));
        SubscriberHandle {
            id,
            receiver,
            hub: Arc::downgrade(self),
        }
    }

    /// Add a custom sink and return its id.
    pub fn register_sink(&self, sink: Arc<dyn NotificationSink>) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let size = {
            let mut entries = self.entries.write();
            let mut next = Vec::with_capacity(entries.len() + 1);
            next.extend(entries.iter().cloned());
            next.push(Entry { id, sink });
            let size = next.len();
            *entries = Arc::new(next);
            size
        };

        HubMetrics::record_size(size);
        tracing::debug!(subscriber_id = %id, subscribers = size, "Subscriber registered");
        id
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn remove(&self, id: SubscriberId) -> bool {
        self.remove_all(&[id]) == 1
    }

    /// Push a notification to every registered subscriber.
    ///
    /// The notification is serialized once. Subscribers whose send fails are
    /// removed; the rest still receive it. Never fails.
    pub fn broadcast(&self, notification: &Notification) -> BroadcastReport {
        let data = match serde_json::to_string(notification) {
            Ok(json) => Arc::<str>::from(json),
            Err(e) => {
                tracing::error!(
                    flight_number = %notification.flight_number,
                    error = %e,
                    "Failed to serialize notification"
                );
                return BroadcastReport::default();
            }
        };
        self.broadcast_payload(&Payload {
            event_name: NOTIFICATION_EVENT_NAME,
            data,
        })
    }

    /// Push an already serialized payload to every registered subscriber.
    pub fn broadcast_payload(&self, payload: &Payload) -> BroadcastReport {
        let snapshot = self.snapshot();
        let mut failed = Vec::new();
        let mut delivered = 0;

        for entry in snapshot.iter() {
            match entry.sink.try_send(payload) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::debug!(subscriber_id = %entry.id, error = %e, "Pruning subscriber");
                    failed.push(entry.id);
                }
            }
        }

        let pruned = if failed.is_empty() { 0 } else { self.remove_all(&failed) };
        HubMetrics::record_broadcast(delivered, pruned);

        BroadcastReport { delivered, pruned }
    }

    /// Remove every subscriber, ending their streams. Used at shutdown.
    pub fn disconnect_all(&self) -> usize {
        let removed = {
            let mut entries = self.entries.write();
            let removed = entries.len();
            *entries = Arc::new(Vec::new());
            removed
        };

        HubMetrics::record_size(0);
        tracing::info!(removed, "Disconnected all subscribers");
        removed
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no subscribers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    fn snapshot(&self) -> Arc<Vec<Entry>> {
        Arc::clone(&self.entries.read())
    }

    fn remove_all(&self, ids: &[SubscriberId]) -> usize {
        let (removed, size) = {
            let mut entries = self.entries.write();
            let next: Vec<Entry> = entries
                .iter()
                .filter(|e| !ids.contains(&e.id))
                .cloned()
                .collect();
            let removed = entries.len() - next.len();
            if removed > 0 {
                *entries = Arc::new(next);
            }
            (removed, entries.len())
        };

        if removed > 0 {
            HubMetrics::record_size(size);
            tracing::debug!(removed, subscribers = size, "Subscribers removed");
        }
        removed
    }
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriberHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberHub")
            .field("size", &self.size())
            .field("buffer", &self.buffer)
            .finish()
    }
}

/// One open push connection.
///
/// A [`Stream`] of [`Payload`]s. The connection is released exactly once,
/// whichever comes first of [`close`](Self::close), drop, or the hub pruning
/// it after a failed send.
pub struct SubscriberHandle {
    id: SubscriberId,
    receiver: mpsc::Receiver<Payload>,
    hub: Weak<SubscriberHub>,
}

impl SubscriberHandle {
    /// This connection's id.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next payload. `None` once the connection is closed.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.receiver.recv().await
    }

    /// Take a queued payload without waiting.
    pub fn try_recv(&mut self) -> Option<Payload> {
        self.receiver.try_recv().ok()
    }

    /// Release the connection. Calling it again is a no-op.
    pub fn close(&mut self) {
        self.receiver.close();
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
    }
}

impl Stream for SubscriberHandle {
    type Item = Payload;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberHandle").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::Utc;
    use flightfeed_core::{EventType, Flight, FlightEvent, FlightStatus};
    use futures::StreamExt;
    use std::sync::atomic::AtomicUsize;
    use tokio_test::{assert_pending, assert_ready, task};

    struct CountingSink {
        received: AtomicUsize,
    }

    impl NotificationSink for CountingSink {
        fn try_send(&self, _payload: &Payload) -> Result<(), SinkError> {
            self.received.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct BrokenSink;

    impl NotificationSink for BrokenSink {
        fn try_send(&self, _payload: &Payload) -> Result<(), SinkError> {
            Err(SinkError::Failed("connection reset".to_string()))
        }
    }

    fn counting() -> Arc<CountingSink> {
        Arc::new(CountingSink {
            received: AtomicUsize::new(0),
        })
    }

    fn notification() -> Notification {
        let flight = Flight::new("FF101", "FF", "Flightfeed Air", "JFK", "LAX")
            .with_status(FlightStatus::Cancelled);
        let event = FlightEvent::new("FF101", EventType::Cancellation, Utc::now())
            .with_previous_value("BOARDING")
            .with_new_value("CANCELLED");
        Notification::from_applied(&event, &flight)
    }

    #[test]
    fn broadcast_reaches_every_subscriber() {
        let hub = SubscriberHub::new();
        let sinks: Vec<_> = (0..100).map(|_| counting()).collect();
        for sink in &sinks {
            hub.register_sink(Arc::clone(sink) as Arc<dyn NotificationSink>);
        }

        let report = hub.broadcast(&notification());

        assert_eq!(report, BroadcastReport { delivered: 100, pruned: 0 });
        assert!(sinks.iter().all(|s| s.received.load(Ordering::SeqCst) == 1));
        assert_eq!(hub.size(), 100);
    }

    #[test]
    fn one_failing_subscriber_is_pruned_alone() {
        let hub = SubscriberHub::new();
        let sinks: Vec<_> = (0..99).map(|_| counting()).collect();
        for (i, sink) in sinks.iter().enumerate() {
            if i == 42 {
                hub.register_sink(Arc::new(BrokenSink));
            }
            hub.register_sink(Arc::clone(sink) as Arc<dyn NotificationSink>);
        }
        assert_eq!(hub.size(), 100);

        let report = hub.broadcast(&notification());

        assert_eq!(report, BroadcastReport { delivered: 99, pruned: 1 });
        assert_eq!(hub.size(), 99);
        assert!(sinks.iter().all(|s| s.received.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn removal_is_idempotent() {
        let hub = SubscriberHub::new();
        let id = hub.register_sink(counting());

        assert!(hub.remove(id));
        assert!(!hub.remove(id));
        assert!(hub.is_empty());
    }

    #[tokio::test]
    async fn handle_receives_serialized_notification() {
        let hub = Arc::new(SubscriberHub::new());
        let mut handle = hub.register();

        hub.broadcast(&notification());

        let payload = handle.next().await.unwrap();
        assert_eq!(payload.event_name, "flight-update");
        let json: serde_json::Value = serde_json::from_str(&payload.data).unwrap();
        assert_eq!(json["flightNumber"], "FF101");
        assert_eq!(json["eventType"], "CANCELLATION");
    }

    #[tokio::test]
    async fn dropping_handle_releases_slot() {
        let hub = Arc::new(SubscriberHub::new());
        let first = hub.register();
        let mut second = hub.register();
        assert_eq!(hub.size(), 2);

        drop(first);
        assert_eq!(hub.size(), 1);

        second.close();
        second.close();
        assert_eq!(hub.size(), 0);
        drop(second);
        assert_eq!(hub.size(), 0);
    }

    #[test]
    fn hung_subscriber_is_pruned_without_blocking() {
        let hub = Arc::new(SubscriberHub::with_buffer(2));
        let _hung = hub.register();
        let live = counting();
        hub.register_sink(Arc::clone(&live) as Arc<dyn NotificationSink>);

        hub.broadcast(&notification());
        hub.broadcast(&notification());
        let report = hub.broadcast(&notification());

        assert_eq!(report, BroadcastReport { delivered: 1, pruned: 1 });
        assert_eq!(live.received.load(Ordering::SeqCst), 3);
        assert_eq!(hub.size(), 1);
    }

    #[test]
    fn pruned_handle_stream_ends_after_draining() {
        let hub = Arc::new(SubscriberHub::with_buffer(1));
        let mut handle = task::spawn(hub.register());

        assert_pending!(handle.poll_next());

        hub.broadcast(&notification());
        hub.broadcast(&notification());
        assert_eq!(hub.size(), 0);

        assert!(assert_ready!(handle.poll_next()).is_some());
        assert!(assert_ready!(handle.poll_next()).is_none());
    }

    #[test]
    fn disconnect_all_ends_every_stream() {
        let hub = Arc::new(SubscriberHub::new());
        let mut first = task::spawn(hub.register());
        let mut second = task::spawn(hub.register());

        assert_eq!(hub.disconnect_all(), 2);

        assert!(hub.is_empty());
        assert!(assert_ready!(first.poll_next()).is_none());
        assert!(assert_ready!(second.poll_next()).is_none());
    }

    #[test]
    fn handle_outliving_hub_closes_quietly() {
        let hub = Arc::new(SubscriberHub::new());
        let mut handle = hub.register();
        let id = handle.id();
        drop(hub);

        handle.close();
        assert_eq!(format!("{id}"), "sub-1");
    }
}
