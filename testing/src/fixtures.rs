//! Ready-made flights for tests.

use chrono::{DateTime, Utc};
use flightfeed_core::event::{EventType, FlightEvent};
use flightfeed_core::flight::{Flight, FlightStatus};

/// A flight from JFK to LAX in `status`, at gate B12 in terminal 4.
#[must_use]
pub fn flight(flight_number: &str, status: FlightStatus) -> Flight {
    Flight::new(flight_number, "FF", "Flightfeed Air", "JFK", "LAX")
        .with_status(status)
        .with_gate("B12", "4")
}

/// One flight in each status, numbered `FF100` upwards in
/// [`FlightStatus::ALL`] order.
#[must_use]
pub fn roster() -> Vec<Flight> {
    FlightStatus::ALL
        .into_iter()
        .zip(100..)
        .map(|(status, n)| flight(&format!("FF{n}"), status))
        .collect()
}

/// A status event generated against `from` and leading to `to`.
#[must_use]
pub fn status_event(
    flight_number: &str,
    event_type: EventType,
    from: FlightStatus,
    to: FlightStatus,
    timestamp: DateTime<Utc>,
) -> FlightEvent {
    FlightEvent::new(flight_number, event_type, timestamp)
        .with_previous_value(from.as_str())
        .with_new_value(to.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_covers_every_status() {
        let roster = roster();
        assert_eq!(roster.len(), FlightStatus::ALL.len());
        assert_eq!(roster[0].flight_number, "FF100");
        assert_eq!(roster[0].status, FlightStatus::Scheduled);
        assert_eq!(roster[8].status, FlightStatus::Cancelled);
    }
}
