//! # Flightfeed Runtime
//!
//! The moving parts of the flight event pipeline.
//!
//! ## Core Components
//!
//! - **[`EventGenerator`]** / **[`GeneratorLoop`]**: pick a non-terminal flight
//!   on a timer, describe one legal change, publish it keyed by flight number
//! - **[`EventConsumer`]**: subscribe to the bus and dispatch records to
//!   per-key workers, reconnecting when the stream drops
//! - **[`EventApplier`]**: apply each event to its flight, persist, broadcast
//! - **[`SubscriberHub`]**: copy-on-write registry of live viewers with
//!   bounded-effort fan-out
//!
//! ## Data flow
//!
//! ```text
//! GeneratorLoop ──publish(key = flight)──► EventBus ──► EventConsumer
//!                                                          │ per-key worker
//!                                                          ▼
//!                      SubscriberHub ◄──broadcast── EventApplier ──► FlightRepository
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let hub = Arc::new(SubscriberHub::new());
//! let applier = Arc::new(EventApplier::new(repository.clone(), hub.clone(), clock.clone()));
//!
//! let consumer = EventConsumer::builder()
//!     .name("flight-event-applier")
//!     .topics(vec![FLIGHT_EVENTS_TOPIC.to_string()])
//!     .event_bus(bus.clone())
//!     .handler(applier)
//!     .build()?
//!     .start();
//!
//! let generator = Arc::new(EventGenerator::new(repository, clock));
//! GeneratorLoop::new(generator, bus, FLIGHT_EVENTS_TOPIC, Duration::from_secs(5))
//!     .spawn(shutdown_rx);
//! ```

pub mod applier;
pub mod consumer;
pub mod error;
pub mod generator;
pub mod handler;
pub mod hub;
pub mod metrics;
pub mod retry;

pub use applier::{Consumed, EventApplier};
pub use consumer::{ConsumerHandle, EventConsumer, EventConsumerBuilder};
pub use error::PipelineError;
pub use generator::{EventGenerator, GeneratorLoop};
pub use handler::{EventHandler, HandlerError};
pub use hub::{
    BroadcastReport, NotificationSink, Payload, SinkError, SubscriberHandle, SubscriberHub,
    SubscriberId,
};
pub use retry::RetryPolicy;
