//! Synthetic lifecycle events.
//!
//! [`EventGenerator`] picks a random non-terminal flight and describes one
//! legal change to it. It only reads flights; the change takes effect when
//! the [`EventApplier`](crate::applier::EventApplier) consumes the event.
//! [`GeneratorLoop`] runs it on a timer and publishes the result.

use crate::error::PipelineError;
use crate::metrics::GeneratorMetrics;
use crate::retry::{RetryPolicy, retry_with_backoff};
use flightfeed_core::environment::Clock;
use flightfeed_core::event::{EventType, FlightEvent, SerializedEvent};
use flightfeed_core::event_bus::EventBus;
use flightfeed_core::flight::{Flight, FlightStatus};
use flightfeed_core::repository::FlightRepository;
use flightfeed_core::state_machine::FlightStateMachine;
use flightfeed_core::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Inclusive range of generated delays, in minutes.
pub const DELAY_MINUTES: std::ops::RangeInclusive<u32> = 15..=75;

const GATE_LETTERS: &[u8] = b"ABCDEF";
const GATE_NUMBERS: std::ops::RangeInclusive<u32> = 1..=40;

/// Produces random, legal flight events.
pub struct EventGenerator {
    repository: Arc<dyn FlightRepository>,
    clock: Arc<dyn Clock>,
    rng: Mutex<StdRng>,
}

impl EventGenerator {
    /// Create a generator seeded from system entropy.
    #[must_use]
    pub fn new(repository: Arc<dyn FlightRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            clock,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a generator with a fixed seed, for reproducible runs.
    #[must_use]
    pub fn with_seed(
        repository: Arc<dyn FlightRepository>,
        clock: Arc<dyn Clock>,
        seed: u64,
    ) -> Self {
        Self {
            repository,
            clock,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Sample a non-terminal flight uniformly and describe one legal event
    /// for it.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::NoEligibleFlights`] if every flight is terminal or
    ///   the sampled flight has no legal event
    /// - [`PipelineError::Repository`] if flights cannot be read
    pub async fn generate_random_event(&self) -> Result<FlightEvent, PipelineError> {
        let candidates: Vec<Flight> = self
            .repository
            .find_all()
            .await?
            .into_iter()
            .filter(|f| !f.status.is_terminal())
            .collect();

        let now = self.clock.now();
        let mut rng = self.rng.lock();
        let flight = candidates.choose(&mut *rng).ok_or(PipelineError::NoEligibleFlights)?;
        let event = synthesize(flight, &mut *rng, now).ok_or(PipelineError::NoEligibleFlights)?;
        drop(rng);

        GeneratorMetrics::record_generated(event.event_type.as_str());
        tracing::debug!(
            flight_number = %event.flight_number,
            event_type = %event.event_type,
            "Generated event"
        );
        Ok(event)
    }
}

impl std::fmt::Debug for EventGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventGenerator").finish_non_exhaustive()
    }
}

/// Describe one legal event for `flight`, or `None` if its status allows none.
///
/// `previous_value` records the current value of whatever the event changes
/// (delay minutes, gate, or status), and `new_value` the intended value.
#[must_use]
pub fn synthesize<R: Rng>(flight: &Flight, rng: &mut R, now: DateTime<Utc>) -> Option<FlightEvent> {
    let event_type = *FlightStateMachine::eligible_event_types(flight.status).choose(rng)?;
    let number = flight.flight_number.as_str();
    let event = FlightEvent::new(number, event_type, now);

    let event = match event_type {
        EventType::Delay => {
            let minutes = rng.gen_range(DELAY_MINUTES);
            event
                .with_previous_value(flight.delay_minutes.to_string())
                .with_new_value(minutes.to_string())
                .with_description(format!("Flight {number} delayed by {minutes} minutes"))
        }
        EventType::GateChange => {
            let gate = random_gate(rng, flight.gate.as_deref());
            let description = match &flight.gate {
                Some(current) => format!("Gate changed from {current} to {gate}"),
                None => format!("Gate {gate} assigned"),
            };
            let event = match &flight.gate {
                Some(current) => event.with_previous_value(current.as_str()),
                None => event,
            };
            event.with_new_value(gate).with_description(description)
        }
        _ => {
            let to = FlightStateMachine::next_status(flight.status, event_type)?;
            event
                .with_previous_value(flight.status.as_str())
                .with_new_value(to.as_str())
                .with_description(status_description(flight, event_type, to))
        }
    };
    Some(event)
}

fn random_gate<R: Rng>(rng: &mut R, current: Option<&str>) -> String {
    loop {
        let letter = char::from(GATE_LETTERS[rng.gen_range(0..GATE_LETTERS.len())]);
        let gate = format!("{letter}{}", rng.gen_range(GATE_NUMBERS));
        if current != Some(gate.as_str()) {
            return gate;
        }
    }
}

fn status_description(flight: &Flight, event_type: EventType, to: FlightStatus) -> String {
    let number = &flight.flight_number;
    match (event_type, to) {
        (EventType::BoardingStarted, _) => match &flight.gate {
            Some(gate) => format!("Boarding started for flight {number} at gate {gate}"),
            None => format!("Boarding started for flight {number}"),
        },
        (EventType::Departed, _) => format!("Flight {number} departed from {}", flight.origin),
        (EventType::Arrival, FlightStatus::Arrived) => {
            format!("Flight {number} arrived at the gate in {}", flight.destination)
        }
        (EventType::Arrival, _) => format!("Flight {number} landed at {}", flight.destination),
        (EventType::Cancellation, _) => format!("Flight {number} has been cancelled"),
        (EventType::Reinstatement, _) => format!("Flight {number} reinstated and back on time"),
        _ => format!("Flight {number} is now {to}"),
    }
}

/// Periodic generate-and-publish task.
///
/// Each tick generates one event and publishes it keyed by flight number.
/// Generation never waits on consumption; a failed tick is logged and the
/// next tick proceeds as usual.
pub struct GeneratorLoop {
    generator: Arc<EventGenerator>,
    event_bus: Arc<dyn EventBus>,
    topic: String,
    interval: Duration,
    retry: RetryPolicy,
}

impl GeneratorLoop {
    /// Create a loop publishing to `topic` every `interval`.
    #[must_use]
    pub fn new(
        generator: Arc<EventGenerator>,
        event_bus: Arc<dyn EventBus>,
        topic: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            generator,
            event_bus,
            topic: topic.into(),
            interval,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the publish retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Generate one event and publish it, retrying the publish per the
    /// retry policy.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::NoEligibleFlights`] if nothing can be generated
    /// - [`PipelineError::MalformedEvent`] if the event cannot be encoded
    /// - [`PipelineError::Publish`] once publish retries are exhausted
    pub async fn tick(&self) -> Result<FlightEvent, PipelineError> {
        let event = self.generator.generate_random_event().await?;
        let serialized = SerializedEvent::from_event(&event)
            .map_err(|e| PipelineError::MalformedEvent(e.to_string()))?;

        retry_with_backoff(&self.retry, || {
            self.event_bus
                .publish(&self.topic, &event.flight_number, &serialized)
        })
        .await?;

        GeneratorMetrics::record_published();
        Ok(event)
    }

    /// Run until `shutdown` fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            topic = %self.topic,
            interval_ms = self.interval.as_millis(),
            "Event generator started"
        );

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = ticker.tick() => self.log_tick(self.tick().await),
            }
        }

        tracing::info!(topic = %self.topic, "Event generator stopped");
    }

    /// Spawn [`run`](Self::run) as a background task.
    #[must_use]
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    fn log_tick(&self, result: Result<FlightEvent, PipelineError>) {
        match result {
            Ok(event) => tracing::info!(
                flight_number = %event.flight_number,
                event_type = %event.event_type,
                topic = %self.topic,
                "Published event"
            ),
            Err(PipelineError::NoEligibleFlights) => {
                tracing::debug!("No eligible flights, skipping cycle");
            }
            Err(PipelineError::Publish(e)) => {
                GeneratorMetrics::record_publish_failure();
                tracing::error!(
                    topic = %self.topic,
                    error = %e,
                    "Dropping event after publish retries"
                );
            }
            Err(e) => tracing::warn!(error = %e, "Event generation failed"),
        }
    }
}

impl std::fmt::Debug for GeneratorLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorLoop")
            .field("topic", &self.topic)
            .field("interval", &self.interval)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use flightfeed_core::event::Event;
    use flightfeed_testing::{InMemoryEventBus, InMemoryFlightRepository, fixtures, test_clock};
    use std::collections::HashSet;

    fn generator(flights: Vec<Flight>) -> EventGenerator {
        EventGenerator::with_seed(
            Arc::new(InMemoryFlightRepository::with_flights(flights)),
            Arc::new(test_clock()),
            7,
        )
    }

    #[tokio::test]
    async fn never_selects_arrived_flights() {
        let generator = generator(fixtures::roster());
        let mut seen = HashSet::new();

        for _ in 0..10_000 {
            let event = generator.generate_random_event().await.unwrap();
            assert_ne!(event.flight_number, "FF106", "FF106 is ARRIVED");
            seen.insert(event.flight_number);
        }

        assert_eq!(seen.len(), fixtures::roster().len() - 1);
    }

    #[tokio::test]
    async fn only_terminal_flights_means_no_eligible_flights() {
        let generator = generator(vec![fixtures::flight("FF1", FlightStatus::Arrived)]);
        let result = generator.generate_random_event().await;
        assert!(matches!(result, Err(PipelineError::NoEligibleFlights)));

        let empty = self::generator(Vec::new());
        assert!(matches!(
            empty.generate_random_event().await,
            Err(PipelineError::NoEligibleFlights)
        ));
    }

    #[tokio::test]
    async fn generated_events_are_eligible_and_stamped() {
        let generator = generator(fixtures::roster());
        let roster = fixtures::roster();

        for _ in 0..500 {
            let event = generator.generate_random_event().await.unwrap();
            let flight = roster.iter().find(|f| f.flight_number == event.flight_number).unwrap();
            assert!(FlightStateMachine::is_eligible(flight.status, event.event_type));
            assert_eq!(event.timestamp, test_clock().now());
            event.validate().unwrap();
        }
    }

    #[tokio::test]
    async fn generator_does_not_mutate_flights() {
        let repository = Arc::new(InMemoryFlightRepository::with_flights(fixtures::roster()));
        let generator = EventGenerator::with_seed(repository.clone(), Arc::new(test_clock()), 1);

        for _ in 0..100 {
            generator.generate_random_event().await.unwrap();
        }

        assert_eq!(repository.find_all().await.unwrap(), fixtures::roster());
        assert!(repository.events().is_empty());
    }

    #[test]
    fn delay_values_are_in_range() {
        let flight = fixtures::flight("FF1", FlightStatus::Scheduled);
        let mut rng = StdRng::seed_from_u64(3);

        let delays: Vec<u32> =
            std::iter::repeat_with(|| synthesize(&flight, &mut rng, Utc::now()).unwrap())
                .filter(|e| e.event_type == EventType::Delay)
                .take(200)
                .map(|e| e.delay_minutes().unwrap())
                .collect();

        assert!(delays.iter().all(|m| DELAY_MINUTES.contains(m)));
    }

    #[test]
    fn gate_changes_pick_a_different_gate() {
        let flight = fixtures::flight("FF1", FlightStatus::Boarding);
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..500 {
            let event = synthesize(&flight, &mut rng, Utc::now()).unwrap();
            if event.event_type == EventType::GateChange {
                let gate = event.gate().unwrap();
                assert_ne!(gate, "B12");
                assert_eq!(event.previous_value.as_deref(), Some("B12"));
                let (letter, number) = gate.split_at(1);
                assert!("ABCDEF".contains(letter));
                assert!(GATE_NUMBERS.contains(&number.parse().unwrap()));
            }
        }
    }

    #[test]
    fn status_events_record_current_and_next_status() {
        let flight = fixtures::flight("FF1", FlightStatus::Landed);
        let event = synthesize(&flight, &mut StdRng::seed_from_u64(0), Utc::now()).unwrap();

        assert_eq!(event.event_type, EventType::Arrival);
        assert_eq!(event.previous_value.as_deref(), Some("LANDED"));
        assert_eq!(event.new_value.as_deref(), Some("ARRIVED"));
        assert!(event.description.contains("arrived"));
    }

    #[test]
    fn arrived_flight_synthesizes_nothing() {
        let flight = fixtures::flight("FF1", FlightStatus::Arrived);
        assert!(synthesize(&flight, &mut StdRng::seed_from_u64(0), Utc::now()).is_none());
    }

    #[tokio::test]
    async fn tick_publishes_keyed_by_flight_number() {
        let bus = Arc::new(InMemoryEventBus::new());
        let generator = Arc::new(generator(vec![fixtures::flight("FF1", FlightStatus::Boarding)]));
        let generator_loop =
            GeneratorLoop::new(generator, bus.clone(), "flight-events", Duration::from_secs(1));

        let event = generator_loop.tick().await.unwrap();

        let published = bus.published("flight-events");
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key.as_deref(), Some("FF1"));
        assert_eq!(FlightEvent::from_bytes(&published[0].data).unwrap(), event);
    }

    #[tokio::test]
    async fn tick_gives_up_after_retries() {
        let bus = Arc::new(InMemoryEventBus::new());
        bus.fail_publishes(true);
        let generator = Arc::new(generator(vec![fixtures::flight("FF1", FlightStatus::Boarding)]));
        let generator_loop =
            GeneratorLoop::new(generator, bus.clone(), "flight-events", Duration::from_secs(1))
                .with_retry_policy(
                    RetryPolicy::builder()
                        .max_retries(2)
                        .initial_delay(Duration::from_millis(1))
                        .build(),
                );

        let result = generator_loop.tick().await;

        assert!(matches!(result, Err(PipelineError::Publish(_))));
        assert_eq!(bus.published_count("flight-events"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_publishes_each_interval_until_shutdown() {
        let bus = Arc::new(InMemoryEventBus::new());
        let generator = Arc::new(generator(vec![fixtures::flight("FF1", FlightStatus::Scheduled)]));
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle =
            GeneratorLoop::new(generator, bus.clone(), "flight-events", Duration::from_secs(5))
                .spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(15_500)).await;
        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();

        assert_eq!(bus.published_count("flight-events"), 3);
    }
}
