//! # Flightfeed Core
//!
//! Domain types and pipeline contracts for the Flightfeed live operations feed.
//!
//! This crate is the functional core of the system: it contains no I/O and
//! no runtime. Everything that touches the outside world (event transport,
//! storage, viewer connections) is described here as a trait and implemented
//! in a sibling crate.
//!
//! ## Core Concepts
//!
//! - **Flight**: the mutable record a feed viewer cares about (status, gate, delay)
//! - **`FlightEvent`**: an immutable description of one intended lifecycle change
//! - **`FlightStateMachine`**: which event types are legal in which status, and where they lead
//! - **Notification**: the denormalized projection pushed to live viewers
//! - **`EventBus`**: ordered, partitioned, at-least-once transport
//! - **`FlightRepository`**: storage collaborator
//!
//! ## Pipeline
//!
//! ```text
//! timer ─► EventGenerator ─► EventBus("flight-events", key = flight number)
//!                                   │
//!                                   ▼
//!                             EventApplier ─► FlightRepository
//!                                   │
//!                                   ▼
//!                             SubscriberHub ─► viewers
//! ```
//!
//! ## Example
//!
//! ```
//! use flightfeed_core::flight::{Flight, FlightStatus};
//! use flightfeed_core::event::{EventType, FlightEvent};
//! use flightfeed_core::state_machine::FlightStateMachine;
//! use chrono::Utc;
//!
//! let mut flight = Flight::new("FF101", "FF", "Flightfeed Air", "JFK", "LAX");
//! assert!(FlightStateMachine::is_eligible(flight.status, EventType::Delay));
//!
//! let event = FlightEvent::new("FF101", EventType::Delay, Utc::now()).with_new_value("45");
//! flight.apply(&event, Utc::now()).unwrap();
//!
//! assert_eq!(flight.status, FlightStatus::Delayed);
//! assert_eq!(flight.delay_minutes, 45);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod error;
pub mod event;
pub mod event_bus;
pub mod flight;
pub mod notification;
pub mod repository;
pub mod state_machine;

pub use error::{ApplyError, ParseError};
pub use event::{EventType, FlightEvent, SerializedEvent};
pub use flight::{ApplyOutcome, Flight, FlightStatus};
pub use notification::Notification;
pub use state_machine::FlightStateMachine;

/// Topic carrying flight lifecycle events.
pub const FLIGHT_EVENTS_TOPIC: &str = "flight-events";

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// into the components that need them, so tests can swap in deterministic
/// implementations.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use flightfeed_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
