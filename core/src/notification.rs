//! Outward projection pushed to live viewers.

use crate::event::{EventType, FlightEvent};
use crate::flight::{Flight, FlightStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the server-sent event carrying a [`Notification`].
pub const NOTIFICATION_EVENT_NAME: &str = "flight-update";

/// A flight event denormalized with enough flight context for a viewer to
/// render it without a follow-up read.
///
/// Built fresh for every applied event and discarded after broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Flight the event refers to
    pub flight_number: String,
    /// Kind of change
    pub event_type: EventType,
    /// Value before the change
    pub previous_value: Option<String>,
    /// Value after the change
    pub new_value: Option<String>,
    /// Human-readable summary
    pub description: String,
    /// When the event was generated
    pub timestamp: DateTime<Utc>,
    /// Airline IATA code
    pub airline: String,
    /// Airline display name
    pub airline_name: String,
    /// Origin airport code
    pub origin: String,
    /// Destination airport code
    pub destination: String,
    /// Flight status after the event was applied
    pub status: FlightStatus,
}

impl Notification {
    /// Project an applied event together with the flight it was applied to.
    #[must_use]
    pub fn from_applied(event: &FlightEvent, flight: &Flight) -> Self {
        Self {
            flight_number: event.flight_number.clone(),
            event_type: event.event_type,
            previous_value: event.previous_value.clone(),
            new_value: event.new_value.clone(),
            description: event.description.clone(),
            timestamp: event.timestamp,
            airline: flight.airline.clone(),
            airline_name: flight.airline_name.clone(),
            origin: flight.origin.clone(),
            destination: flight.destination.clone(),
            status: flight.status,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn carries_event_and_flight_context() {
        let flight = Flight::new("FF101", "FF", "Flightfeed Air", "JFK", "LAX")
            .with_status(FlightStatus::Cancelled);
        let event = FlightEvent::new("FF101", EventType::Cancellation, Utc::now())
            .with_previous_value("BOARDING")
            .with_new_value("CANCELLED");

        let notification = Notification::from_applied(&event, &flight);
        let json = serde_json::to_value(&notification).unwrap();

        assert_eq!(json["flightNumber"], "FF101");
        assert_eq!(json["eventType"], "CANCELLATION");
        assert_eq!(json["previousValue"], "BOARDING");
        assert_eq!(json["newValue"], "CANCELLED");
        assert_eq!(json["airline"], "FF");
        assert_eq!(json["airlineName"], "Flightfeed Air");
        assert_eq!(json["origin"], "JFK");
        assert_eq!(json["destination"], "LAX");
        assert_eq!(json["status"], "CANCELLED");
    }
}
