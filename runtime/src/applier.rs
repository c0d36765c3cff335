//! Applies consumed events to flight state and notifies viewers.
//!
//! For each event: load the flight, apply the event, persist the flight
//! together with its history entry, then broadcast a notification.
//! Persistence completes before broadcast, so viewers never see a change
//! that was not stored.
//!
//! Per-flight ordering comes from the bus partition key, which is what makes
//! the load-apply-save sequence safe without a lock per flight.

use crate::error::PipelineError;
use crate::handler::{EventHandler, HandlerError};
use crate::hub::{BroadcastReport, SubscriberHub};
use crate::metrics::ApplierMetrics;
use async_trait::async_trait;
use flightfeed_core::environment::Clock;
use flightfeed_core::event::{Event, FlightEvent};
use flightfeed_core::flight::ApplyOutcome;
use flightfeed_core::notification::Notification;
use flightfeed_core::repository::FlightRepository;
use std::sync::Arc;
use std::time::Instant;

/// What [`EventApplier::consume`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Consumed {
    /// The event changed the flight and was broadcast.
    Applied {
        /// The notification that was broadcast
        notification: Notification,
        /// How the broadcast went
        report: BroadcastReport,
    },
    /// The flight already reflected the event; nothing was written or sent.
    Duplicate,
}

/// Consumer side of the pipeline.
pub struct EventApplier {
    repository: Arc<dyn FlightRepository>,
    hub: Arc<SubscriberHub>,
    clock: Arc<dyn Clock>,
}

impl EventApplier {
    /// Create an applier writing to `repository` and notifying `hub`.
    #[must_use]
    pub fn new(
        repository: Arc<dyn FlightRepository>,
        hub: Arc<SubscriberHub>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            hub,
            clock,
        }
    }

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::FlightNotFound`] if the flight does not exist
    /// - [`PipelineError::Rejected`] if the event is malformed or not legal in
    ///   the flight's current status; nothing is written
    /// - [`PipelineError::Repository`] if the flight or event cannot be
    ///   stored; nothing is broadcast
    pub async fn consume(&self, event: &FlightEvent) -> Result<Consumed, PipelineError> {
        let started = Instant::now();

        let mut flight = self
            .repository
            .find_by_number(&event.flight_number)
            .await?
            .ok_or_else(|| PipelineError::FlightNotFound(event.flight_number.clone()))?;

        let (from, to) = match flight.apply(event, self.clock.now())? {
            ApplyOutcome::Applied { from, to } => (from, to),
            ApplyOutcome::Duplicate => {
                ApplierMetrics::record_dropped("duplicate");
                tracing::debug!(
                    flight_number = %event.flight_number,
                    event_type = %event.event_type,
                    "Flight already reflects event, skipping"
                );
                return Ok(Consumed::Duplicate);
            }
        };

        self.repository.save_applied(&flight, event).await?;

        let notification = Notification::from_applied(event, &flight);
        let report = self.hub.broadcast(&notification);

        ApplierMetrics::record_applied(event.event_type.as_str(), started.elapsed());
        tracing::debug!(
            flight_number = %event.flight_number,
            event_type = %event.event_type,
            %from,
            %to,
            delivered = report.delivered,
            pruned = report.pruned,
            "Applied event"
        );

        Ok(Consumed::Applied { notification, report })
    }
}

impl std::fmt::Debug for EventApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventApplier").field("hub", &self.hub).finish_non_exhaustive()
    }
}

#[async_trait]
impl EventHandler for EventApplier {
    async fn handle(&self, data: &[u8]) -> Result<(), HandlerError> {
        let result = match FlightEvent::from_bytes(data) {
            Ok(event) => self.consume(&event).await.map(|_| ()),
            Err(e) => Err(PipelineError::MalformedEvent(e.to_string())),
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_droppable() => {
                ApplierMetrics::record_dropped(e.reason());
                tracing::warn!(reason = e.reason(), error = %e, "Dropping event");
                Ok(())
            }
            Err(e) => Err(Box::new(e)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use flightfeed_core::event::{EventType, SerializedEvent};
    use flightfeed_core::flight::FlightStatus;
    use flightfeed_testing::{InMemoryFlightRepository, fixtures, test_clock};
    use futures::StreamExt;

    struct Setup {
        repository: Arc<InMemoryFlightRepository>,
        hub: Arc<SubscriberHub>,
        applier: EventApplier,
    }

    fn setup(flights: Vec<flightfeed_core::Flight>) -> Setup {
        let repository = Arc::new(InMemoryFlightRepository::with_flights(flights));
        let hub = Arc::new(SubscriberHub::new());
        let applier =
            EventApplier::new(repository.clone(), Arc::clone(&hub), Arc::new(test_clock()));
        Setup {
            repository,
            hub,
            applier,
        }
    }

    fn now() -> flightfeed_core::DateTime<flightfeed_core::Utc> {
        test_clock().now()
    }

    #[tokio::test]
    async fn cancellation_reaches_subscriber() {
        let s = setup(vec![fixtures::flight("FF101", FlightStatus::Boarding)]);
        let mut viewer = s.hub.register();
        let event = fixtures::status_event(
            "FF101",
            EventType::Cancellation,
            FlightStatus::Boarding,
            FlightStatus::Cancelled,
            now(),
        );

        let consumed = s.applier.consume(&event).await.unwrap();

        assert!(matches!(consumed, Consumed::Applied { report, .. } if report.delivered == 1));
        assert_eq!(s.repository.get("FF101").unwrap().status, FlightStatus::Cancelled);
        assert_eq!(s.repository.events(), vec![event]);

        let payload = viewer.next().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload.data).unwrap();
        assert_eq!(json["eventType"], "CANCELLATION");
        assert_eq!(json["flightNumber"], "FF101");
        assert_eq!(json["status"], "CANCELLED");
        assert_eq!(json["origin"], "JFK");
    }

    #[tokio::test]
    async fn departed_stamps_clock_time() {
        let s = setup(vec![fixtures::flight("FF101", FlightStatus::Boarding)]);
        let event = FlightEvent::new("FF101", EventType::Departed, now());

        s.applier.consume(&event).await.unwrap();

        let flight = s.repository.get("FF101").unwrap();
        assert_eq!(flight.status, FlightStatus::Departed);
        assert_eq!(flight.actual_departure, Some(now()));
    }

    #[tokio::test]
    async fn redelivery_is_not_rebroadcast() {
        let s = setup(vec![fixtures::flight("FF101", FlightStatus::Scheduled)]);
        let mut viewer = s.hub.register();
        let delay = FlightEvent::new("FF101", EventType::Delay, now())
            .with_previous_value("0")
            .with_new_value("45");

        s.applier.consume(&delay).await.unwrap();
        let second = s.applier.consume(&delay).await.unwrap();

        assert_eq!(second, Consumed::Duplicate);
        assert_eq!(s.repository.events().len(), 1);
        let flight = s.repository.get("FF101").unwrap();
        assert_eq!(flight.delay_minutes, 45);
        assert_eq!(flight.status, FlightStatus::Delayed);

        assert!(viewer.next().await.is_some());
        assert!(viewer.try_recv().is_none());
    }

    #[tokio::test]
    async fn unknown_flight_is_reported() {
        let s = setup(Vec::new());
        let event = FlightEvent::new("XX999", EventType::Cancellation, now());

        let result = s.applier.consume(&event).await;

        assert!(matches!(result, Err(PipelineError::FlightNotFound(n)) if n == "XX999"));
    }

    #[tokio::test]
    async fn illegal_event_is_not_written_or_sent() {
        let s = setup(vec![fixtures::flight("FF101", FlightStatus::Arrived)]);
        let mut viewer = s.hub.register();
        let event = FlightEvent::new("FF101", EventType::Delay, now()).with_new_value("30");

        let result = s.applier.consume(&event).await;

        assert!(matches!(result, Err(PipelineError::Rejected(_))));
        assert_eq!(s.repository.get("FF101").unwrap().status, FlightStatus::Arrived);
        assert!(s.repository.events().is_empty());
        assert!(viewer.try_recv().is_none());
    }

    #[tokio::test]
    async fn storage_failure_suppresses_broadcast() {
        let s = setup(vec![fixtures::flight("FF101", FlightStatus::Boarding)]);
        let mut viewer = s.hub.register();
        s.repository.fail_writes(true);
        let event = FlightEvent::new("FF101", EventType::Departed, now());

        let result = s.applier.consume(&event).await;

        assert!(matches!(result, Err(PipelineError::Repository(_))));
        assert!(viewer.try_recv().is_none());
    }

    #[tokio::test]
    async fn failed_write_is_applied_on_redelivery() {
        let s = setup(vec![fixtures::flight("FF101", FlightStatus::Scheduled)]);
        let mut viewer = s.hub.register();
        let delay = FlightEvent::new("FF101", EventType::Delay, now())
            .with_previous_value("0")
            .with_new_value("45");

        s.repository.fail_writes(true);
        let first = s.applier.consume(&delay).await;

        assert!(matches!(first, Err(PipelineError::Repository(_))));
        let stored = s.repository.get("FF101").unwrap();
        assert_eq!(stored.status, FlightStatus::Scheduled);
        assert_eq!(stored.delay_minutes, 0);
        assert!(s.repository.events().is_empty());
        assert!(viewer.try_recv().is_none());

        s.repository.fail_writes(false);
        let redelivered = s.applier.consume(&delay).await.unwrap();

        assert!(matches!(redelivered, Consumed::Applied { .. }));
        assert_eq!(s.repository.events(), vec![delay]);
        assert_eq!(s.repository.get("FF101").unwrap().status, FlightStatus::Delayed);
        let payload = viewer.next().await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&payload.data).unwrap();
        assert_eq!(json["eventType"], "DELAY");
    }

    #[tokio::test]
    async fn handler_drops_bad_payloads_quietly() {
        let s = setup(vec![fixtures::flight("FF101", FlightStatus::Boarding)]);

        assert!(s.applier.handle(b"not json").await.is_ok());

        let missing =
            SerializedEvent::from_event(&FlightEvent::new("XX1", EventType::Departed, now()))
                .unwrap();
        assert!(s.applier.handle(&missing.data).await.is_ok());
    }

    #[tokio::test]
    async fn handler_surfaces_storage_failures() {
        let s = setup(vec![fixtures::flight("FF101", FlightStatus::Boarding)]);
        s.repository.fail_writes(true);
        let event =
            SerializedEvent::from_event(&FlightEvent::new("FF101", EventType::Departed, now()))
                .unwrap();

        assert!(s.applier.handle(&event.data).await.is_err());
    }
}
