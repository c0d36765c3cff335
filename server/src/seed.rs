//! Startup flight roster.

use chrono::{DateTime, Duration, Utc};
use flightfeed_core::flight::{Flight, FlightStatus};
use flightfeed_core::repository::{FlightRepository, RepositoryError};

struct Entry {
    number: &'static str,
    airline: &'static str,
    airline_name: &'static str,
    origin: &'static str,
    destination: &'static str,
    status: FlightStatus,
    gate: &'static str,
    terminal: &'static str,
    departs_in_minutes: i64,
    block_minutes: i64,
    delay_minutes: u32,
}

const ROSTER: &[Entry] = &[
    Entry {
        number: "AA100",
        airline: "AA",
        airline_name: "American Airlines",
        origin: "JFK",
        destination: "LAX",
        status: FlightStatus::Scheduled,
        gate: "B12",
        terminal: "8",
        departs_in_minutes: 180,
        block_minutes: 375,
        delay_minutes: 0,
    },
    Entry {
        number: "AA245",
        airline: "AA",
        airline_name: "American Airlines",
        origin: "DFW",
        destination: "ORD",
        status: FlightStatus::OnTime,
        gate: "C21",
        terminal: "C",
        departs_in_minutes: 55,
        block_minutes: 150,
        delay_minutes: 0,
    },
    Entry {
        number: "UA302",
        airline: "UA",
        airline_name: "United Airlines",
        origin: "SFO",
        destination: "EWR",
        status: FlightStatus::Boarding,
        gate: "F7",
        terminal: "3",
        departs_in_minutes: 20,
        block_minutes: 330,
        delay_minutes: 0,
    },
    Entry {
        number: "UA418",
        airline: "UA",
        airline_name: "United Airlines",
        origin: "ORD",
        destination: "DEN",
        status: FlightStatus::Delayed,
        gate: "B9",
        terminal: "1",
        departs_in_minutes: 40,
        block_minutes: 165,
        delay_minutes: 35,
    },
    Entry {
        number: "DL520",
        airline: "DL",
        airline_name: "Delta Air Lines",
        origin: "ATL",
        destination: "SEA",
        status: FlightStatus::OnTime,
        gate: "A14",
        terminal: "S",
        departs_in_minutes: 90,
        block_minutes: 330,
        delay_minutes: 0,
    },
    Entry {
        number: "DL733",
        airline: "DL",
        airline_name: "Delta Air Lines",
        origin: "LAX",
        destination: "ATL",
        status: FlightStatus::Scheduled,
        gate: "D3",
        terminal: "3",
        departs_in_minutes: 240,
        block_minutes: 285,
        delay_minutes: 0,
    },
    Entry {
        number: "BA117",
        airline: "BA",
        airline_name: "British Airways",
        origin: "LHR",
        destination: "JFK",
        status: FlightStatus::Boarding,
        gate: "B35",
        terminal: "5",
        departs_in_minutes: 25,
        block_minutes: 480,
        delay_minutes: 0,
    },
    Entry {
        number: "BA286",
        airline: "BA",
        airline_name: "British Airways",
        origin: "SFO",
        destination: "LHR",
        status: FlightStatus::Delayed,
        gate: "A2",
        terminal: "I",
        departs_in_minutes: 70,
        block_minutes: 630,
        delay_minutes: 50,
    },
    Entry {
        number: "LH400",
        airline: "LH",
        airline_name: "Lufthansa",
        origin: "FRA",
        destination: "JFK",
        status: FlightStatus::Scheduled,
        gate: "Z25",
        terminal: "1",
        departs_in_minutes: 150,
        block_minutes: 525,
        delay_minutes: 0,
    },
    Entry {
        number: "AF1680",
        airline: "AF",
        airline_name: "Air France",
        origin: "CDG",
        destination: "AMS",
        status: FlightStatus::OnTime,
        gate: "F22",
        terminal: "2F",
        departs_in_minutes: 65,
        block_minutes: 80,
        delay_minutes: 0,
    },
    Entry {
        number: "EK202",
        airline: "EK",
        airline_name: "Emirates",
        origin: "DXB",
        destination: "JFK",
        status: FlightStatus::Delayed,
        gate: "B18",
        terminal: "3",
        departs_in_minutes: 100,
        block_minutes: 840,
        delay_minutes: 20,
    },
    Entry {
        number: "SQ25",
        airline: "SQ",
        airline_name: "Singapore Airlines",
        origin: "SIN",
        destination: "FRA",
        status: FlightStatus::Scheduled,
        gate: "B6",
        terminal: "3",
        departs_in_minutes: 300,
        block_minutes: 780,
        delay_minutes: 0,
    },
];

/// The startup roster, scheduled relative to `now`.
///
/// Every flight starts in `SCHEDULED`, `ON_TIME`, `BOARDING` or `DELAYED`
/// with a gate assigned, so the generator has something to work on from the
/// first tick.
#[must_use]
pub fn roster(now: DateTime<Utc>) -> Vec<Flight> {
    ROSTER
        .iter()
        .map(|entry| {
            let departure = now + Duration::minutes(entry.departs_in_minutes);
            Flight::new(
                entry.number,
                entry.airline,
                entry.airline_name,
                entry.origin,
                entry.destination,
            )
                .with_status(entry.status)
                .with_gate(entry.gate, entry.terminal)
                .with_schedule(departure, departure + Duration::minutes(entry.block_minutes))
                .with_delay(entry.delay_minutes)
        })
        .collect()
}

/// Save the roster when the repository holds no flights.
///
/// Returns the number of flights written, zero when flights already exist.
///
/// # Errors
///
/// Returns [`RepositoryError`] if the repository cannot be read or written.
pub async fn seed_if_empty(
    repository: &dyn FlightRepository,
    now: DateTime<Utc>,
) -> Result<usize, RepositoryError> {
    let existing = repository.find_all().await?;
    if !existing.is_empty() {
        tracing::info!(flights = existing.len(), "Repository already populated, skipping seed");
        return Ok(0);
    }

    let flights = roster(now);
    for flight in &flights {
        repository.save(flight).await?;
    }

    tracing::info!(flights = flights.len(), "Seeded flight roster");
    Ok(flights.len())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use flightfeed_core::environment::Clock;
    use flightfeed_testing::{InMemoryFlightRepository, fixtures, test_clock};
    use std::collections::HashSet;

    #[test]
    fn roster_starts_in_pre_departure_states() {
        let flights = roster(test_clock().now());

        assert_eq!(flights.len(), 12);
        for flight in &flights {
            assert!(
                matches!(
                    flight.status,
                    FlightStatus::Scheduled
                        | FlightStatus::OnTime
                        | FlightStatus::Boarding
                        | FlightStatus::Delayed
                ),
                "{} starts in {}",
                flight.flight_number,
                flight.status
            );
            assert!(flight.gate.is_some());
            assert!(flight.actual_departure.is_none());
            assert!(flight.scheduled_arrival > flight.scheduled_departure);
            assert_eq!(flight.status == FlightStatus::Delayed, flight.delay_minutes > 0);
        }
    }

    #[test]
    fn roster_has_unique_numbers_and_several_airlines() {
        let flights = roster(test_clock().now());

        let numbers: HashSet<_> = flights.iter().map(|f| f.flight_number.as_str()).collect();
        assert_eq!(numbers.len(), flights.len());

        let airlines: HashSet<_> = flights.iter().map(|f| f.airline.as_str()).collect();
        assert!(airlines.len() >= 5);
    }

    #[tokio::test]
    async fn seeds_empty_repository() {
        let repository = InMemoryFlightRepository::new();

        let written = seed_if_empty(&repository, test_clock().now()).await.unwrap();

        assert_eq!(written, 12);
        assert_eq!(repository.len(), 12);
        assert_eq!(repository.get("UA418").unwrap().delay_minutes, 35);
    }

    #[tokio::test]
    async fn leaves_populated_repository_alone() {
        let departed = fixtures::flight("FF101", FlightStatus::Departed);
        let repository = InMemoryFlightRepository::with_flights([departed]);

        let written = seed_if_empty(&repository, test_clock().now()).await.unwrap();

        assert_eq!(written, 0);
        assert_eq!(repository.len(), 1);
        assert!(repository.get("AA100").is_none());
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let repository = InMemoryFlightRepository::new();
        repository.fail_writes(true);

        let result = seed_if_empty(&repository, test_clock().now()).await;

        assert!(matches!(result, Err(RepositoryError::Database(_))));
    }
}
