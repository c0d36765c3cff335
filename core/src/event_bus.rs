//! Event bus abstraction for the flight event log.
//!
//! This module provides the [`EventBus`] trait: an ordered, partitioned,
//! at-least-once publish/subscribe transport in the style of an append log.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ EventGenerator  │
//! └────────┬────────┘
//!          │ publish("flight-events", key = flight number)
//!          ▼
//! ┌─────────────────┐
//! │    Event Bus    │◄─── At-least-once delivery
//! │  (partitioned)  │◄─── Ordered per key
//! └────────┬────────┘
//!          │ subscribe(["flight-events"], "flight-event-applier")
//!          ▼
//! ┌─────────────────┐
//! │  EventApplier   │
//! └─────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Ordered within partition**: every event published with the same key is
//!   delivered to a consumer group in publish order
//! - **Unordered across keys**: events for different keys may interleave and
//!   may be processed concurrently
//! - **At-least-once delivery**: events may be delivered more than once, so
//!   handlers must be idempotent
//! - **Consumer groups**: each group receives every event once (modulo
//!   redelivery); members of one group share the partitions
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (`flightfeed-testing`) - in-process, for tests and single-node runs
//! - `RedpandaEventBus` (`flightfeed-redpanda`) - Kafka-compatible, for production
//!
//! # Example
//!
//! ```rust,ignore
//! use flightfeed_core::event_bus::EventBus;
//! use flightfeed_core::event::SerializedEvent;
//! use futures::StreamExt;
//!
//! async fn example(event_bus: impl EventBus) -> Result<(), Box<dyn std::error::Error>> {
//!     let event = SerializedEvent::from_event(&flight_event)?;
//!     event_bus.publish("flight-events", "FF101", &event).await?;
//!
//!     let mut stream = event_bus.subscribe(&["flight-events"], "flight-event-applier").await?;
//!     while let Some(result) = stream.next().await {
//!         match result {
//!             Ok(event) => println!("Received: {:?}", event.event_type),
//!             Err(e) => eprintln!("Error: {}", e),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to decode a delivered record
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Stream of events from subscriptions.
///
/// Each item is a `Result`: transport errors are surfaced in-band so a
/// consumer can log them and keep reading.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SerializedEvent, EventBusError>> + Send>>;

/// Boxed future returned by [`EventBus`] methods.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// Trait for event bus implementations.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync`; a single bus is shared by the
/// generator loop and the consumer.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be used as `Arc<dyn EventBus>` and swapped at startup.
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic under a partition key.
    ///
    /// All events published with the same `key` are delivered to each
    /// consumer group in publish order.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the transport rejects or
    /// times out the write. Callers decide whether to retry.
    fn publish<'a>(&'a self, topic: &'a str, key: &'a str, event: &'a SerializedEvent)
    -> BusFuture<'a, ()>;

    /// Subscribe to one or more topics as a member of `consumer_group`.
    ///
    /// Delivered events carry their partition key in [`SerializedEvent::key`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription cannot
    /// be established.
    fn subscribe<'a>(&'a self, topics: &'a [&'a str], consumer_group: &'a str)
    -> BusFuture<'a, EventStream>;
}
