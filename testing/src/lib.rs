//! # Flightfeed Testing
//!
//! Testing utilities for the Flightfeed pipeline.
//!
//! This crate provides:
//! - [`FixedClock`]: deterministic time
//! - [`InMemoryEventBus`]: ordered, partitioned, at-least-once bus in process
//! - [`InMemoryFlightRepository`]: `HashMap`-backed flight storage
//! - [`fixtures`]: ready-made flights
//!
//! The in-memory bus and repository honour the same contracts as the Redpanda
//! and Postgres implementations, so the server can also run on them as a
//! single process with no infrastructure.
//!
//! ## Example
//!
//! ```ignore
//! use flightfeed_testing::{InMemoryEventBus, InMemoryFlightRepository, fixtures, test_clock};
//!
//! #[tokio::test]
//! async fn cancellation_reaches_viewers() {
//!     let repository = Arc::new(InMemoryFlightRepository::with_flights(fixtures::roster()));
//!     let bus = Arc::new(InMemoryEventBus::new());
//!     // ... wire the applier and hub, publish, assert
//! }
//! ```

use chrono::{DateTime, Utc};
use flightfeed_core::environment::Clock;

pub mod event_bus;
pub mod fixtures;
pub mod repository;

pub use event_bus::{DEFAULT_RETENTION, InMemoryEventBus};
pub use repository::InMemoryFlightRepository;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use flightfeed_testing::mocks::FixedClock;
    /// use flightfeed_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(20_089))
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, test_clock};
