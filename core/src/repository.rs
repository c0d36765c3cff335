//! Storage collaborator consumed by the pipeline.
//!
//! The pipeline is the sole writer of flight state at runtime. External
//! readers (listing endpoints, reporting) read the same table directly, so
//! implementations must only ever store flights that passed
//! [`Flight::apply`](crate::flight::Flight::apply).

use crate::event::FlightEvent;
use crate::flight::Flight;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from repository operations.
#[derive(Error, Debug, Clone)]
pub enum RepositoryError {
    /// The backing store failed
    #[error("Database error: {0}")]
    Database(String),

    /// A stored row could not be mapped back into a domain value
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Boxed future returned by [`FlightRepository`] methods.
pub type RepositoryFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Flight storage.
///
/// Uses boxed futures for the same reason as
/// [`EventBus`](crate::event_bus::EventBus): the pipeline holds it as
/// `Arc<dyn FlightRepository>`.
pub trait FlightRepository: Send + Sync {
    /// Look up a flight by number.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the store cannot be read.
    fn find_by_number<'a>(&'a self, flight_number: &'a str) -> RepositoryFuture<'a, Option<Flight>>;

    /// Insert or update a flight.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the write fails.
    fn save<'a>(&'a self, flight: &'a Flight) -> RepositoryFuture<'a, ()>;

    /// Flights whose status is neither `ARRIVED` nor `CANCELLED`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the store cannot be read.
    fn find_active(&self) -> RepositoryFuture<'_, Vec<Flight>>;

    /// Every flight.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the store cannot be read.
    fn find_all(&self) -> RepositoryFuture<'_, Vec<Flight>>;

    /// Store `flight` as changed by `event` and append `event` to the
    /// immutable history, as one unit.
    ///
    /// Either both writes land or neither does. A flight must never be
    /// stored in a state whose event is missing from the history, since a
    /// redelivered event is recognised as already applied and would not be
    /// recorded again.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the write fails; nothing is stored.
    fn save_applied<'a>(
        &'a self,
        flight: &'a Flight,
        event: &'a FlightEvent,
    ) -> RepositoryFuture<'a, ()>;
}
