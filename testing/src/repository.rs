//! `HashMap`-backed [`FlightRepository`].

use flightfeed_core::event::FlightEvent;
use flightfeed_core::flight::Flight;
use flightfeed_core::repository::{FlightRepository, RepositoryError, RepositoryFuture};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory flight storage for fast, deterministic testing.
///
/// Writes can be made to fail with [`fail_writes`](Self::fail_writes) to
/// exercise the pipeline's storage-error paths.
///
/// # Example
///
/// ```
/// use flightfeed_testing::InMemoryFlightRepository;
/// use flightfeed_core::flight::Flight;
/// use flightfeed_core::repository::FlightRepository;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let repository = InMemoryFlightRepository::new();
/// repository.save(&Flight::new("FF101", "FF", "Flightfeed Air", "JFK", "LAX")).await?;
///
/// assert!(repository.find_by_number("FF101").await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryFlightRepository {
    flights: Arc<RwLock<HashMap<String, Flight>>>,
    events: Arc<RwLock<Vec<FlightEvent>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryFlightRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository pre-loaded with `flights`.
    #[must_use]
    pub fn with_flights(flights: impl IntoIterator<Item = Flight>) -> Self {
        let repository = Self::new();
        {
            let mut map = repository.flights.write();
            for flight in flights {
                map.insert(flight.flight_number.clone(), flight);
            }
        }
        repository
    }

    /// Make every subsequent write fail until switched back off.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Current state of one flight, synchronously.
    #[must_use]
    pub fn get(&self, flight_number: &str) -> Option<Flight> {
        self.flights.read().get(flight_number).cloned()
    }

    /// Every event recorded so far, in recording order.
    #[must_use]
    pub fn events(&self) -> Vec<FlightEvent> {
        self.events.read().clone()
    }

    /// Number of stored flights.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flights.read().len()
    }

    /// Whether no flights are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flights.read().is_empty()
    }

    fn check_writable(&self) -> Result<(), RepositoryError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database("writes disabled".to_string()));
        }
        Ok(())
    }

    fn sorted(&self, keep: impl Fn(&Flight) -> bool) -> Vec<Flight> {
        let mut flights: Vec<Flight> = self
            .flights
            .read()
            .values()
            .filter(|f| keep(f))
            .cloned()
            .collect();
        flights.sort_by(|a, b| a.flight_number.cmp(&b.flight_number));
        flights
    }
}

impl FlightRepository for InMemoryFlightRepository {
    fn find_by_number<'a>(
        &'a self,
        flight_number: &'a str,
    ) -> RepositoryFuture<'a, Option<Flight>> {
        Box::pin(async move { Ok(self.get(flight_number)) })
    }

    fn save<'a>(&'a self, flight: &'a Flight) -> RepositoryFuture<'a, ()> {
        Box::pin(async move {
            self.check_writable()?;
            self.flights
                .write()
                .insert(flight.flight_number.clone(), flight.clone());
            Ok(())
        })
    }

    fn find_active(&self) -> RepositoryFuture<'_, Vec<Flight>> {
        Box::pin(async move { Ok(self.sorted(|f| f.status.is_active())) })
    }

    fn find_all(&self) -> RepositoryFuture<'_, Vec<Flight>> {
        Box::pin(async move { Ok(self.sorted(|_| true)) })
    }

    fn save_applied<'a>(
        &'a self,
        flight: &'a Flight,
        event: &'a FlightEvent,
    ) -> RepositoryFuture<'a, ()> {
        Box::pin(async move {
            self.check_writable()?;
            let mut flights = self.flights.write();
            let mut events = self.events.write();
            flights.insert(flight.flight_number.clone(), flight.clone());
            events.push(event.clone());
            Ok(())
        })
    }
}
