//! The flight record and the event-effect table.
//!
//! [`Flight::apply`] is the single place where a [`FlightEvent`] turns into
//! field mutations. It is deliberately pure: the caller supplies the current
//! time, and persistence and fan-out happen elsewhere.
//!
//! # Effect table
//!
//! | Event type         | Fields mutated                                              |
//! |--------------------|-------------------------------------------------------------|
//! | `DELAY`            | `delay_minutes = new_value`; status `DELAYED` if minutes > 0 |
//! | `GATE_CHANGE`      | `gate = new_value`                                          |
//! | `BOARDING_STARTED` | status `BOARDING`                                           |
//! | `DEPARTED`         | status `DEPARTED`; `actual_departure = now`                 |
//! | `ARRIVAL`          | status `LANDED` or `ARRIVED`; `actual_arrival = now` on `ARRIVED` |
//! | `CANCELLATION`     | status `CANCELLED`                                          |
//! | `REINSTATEMENT`    | status `ON_TIME`; `delay_minutes = 0`                       |
//!
//! # Redelivery
//!
//! The transport is at-least-once, so the same event can reach `apply` twice.
//! Before touching anything, `apply` checks whether the flight already
//! reflects the event and reports [`ApplyOutcome::Duplicate`] if so. Status
//! events carry the status they were generated against in `previous_value`;
//! when the flight has moved on, the event is stale and treated the same way.

use crate::error::{ApplyError, ParseError};
use crate::event::{EventType, FlightEvent};
use crate::state_machine::FlightStateMachine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a flight.
///
/// A flight has exactly one status at any instant. Transitions are governed
/// by [`FlightStateMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightStatus {
    /// Published in the schedule, nothing has happened yet
    Scheduled,
    /// Confirmed on time (also the state a reinstated flight returns to)
    OnTime,
    /// Passengers are boarding
    Boarding,
    /// Left the gate
    Departed,
    /// Airborne
    InFlight,
    /// Touched down, not yet at the gate
    Landed,
    /// At the arrival gate. Terminal.
    Arrived,
    /// Running late
    Delayed,
    /// Cancelled. Only reinstatement leaves this state.
    Cancelled,
}

impl FlightStatus {
    /// Every status, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Scheduled,
        Self::OnTime,
        Self::Boarding,
        Self::Departed,
        Self::InFlight,
        Self::Landed,
        Self::Arrived,
        Self::Delayed,
        Self::Cancelled,
    ];

    /// Wire name of the status (e.g. `"ON_TIME"`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::OnTime => "ON_TIME",
            Self::Boarding => "BOARDING",
            Self::Departed => "DEPARTED",
            Self::InFlight => "IN_FLIGHT",
            Self::Landed => "LANDED",
            Self::Arrived => "ARRIVED",
            Self::Delayed => "DELAYED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// `ARRIVED` is the only status with no way out.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Arrived)
    }

    /// Active flights are those still expected to change: not arrived and not
    /// cancelled. This is the filter behind `FlightRepository::find_active`.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Arrived | Self::Cancelled)
    }
}

impl fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlightStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseError::new("flight status", s))
    }
}

/// What [`Flight::apply`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Fields were mutated.
    Applied {
        /// Status before the event
        from: FlightStatus,
        /// Status after the event
        to: FlightStatus,
    },
    /// The flight already reflects this event (redelivery or stale event).
    /// Nothing was mutated.
    Duplicate,
}

/// A flight in the live feed.
///
/// Identity is the flight number, which never changes. Airline and route
/// are display context carried into every notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flight {
    /// Unique, immutable flight number (e.g. `"FF101"`)
    pub flight_number: String,
    /// Airline IATA code
    pub airline: String,
    /// Airline display name
    pub airline_name: String,
    /// Origin airport code
    pub origin: String,
    /// Destination airport code
    pub destination: String,
    /// Current lifecycle status
    pub status: FlightStatus,
    /// Departure gate, once assigned
    pub gate: Option<String>,
    /// Departure terminal, once assigned
    pub terminal: Option<String>,
    /// Current delay in minutes
    pub delay_minutes: u32,
    /// Planned departure time
    pub scheduled_departure: Option<DateTime<Utc>>,
    /// Planned arrival time
    pub scheduled_arrival: Option<DateTime<Utc>>,
    /// When the flight actually left the gate
    pub actual_departure: Option<DateTime<Utc>>,
    /// When the flight actually reached the arrival gate
    pub actual_arrival: Option<DateTime<Utc>>,
}

impl Flight {
    /// Create a scheduled flight with no gate assigned.
    #[must_use]
    pub fn new(
        flight_number: impl Into<String>,
        airline: impl Into<String>,
        airline_name: impl Into<String>,
        origin: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            flight_number: flight_number.into(),
            airline: airline.into(),
            airline_name: airline_name.into(),
            origin: origin.into(),
            destination: destination.into(),
            status: FlightStatus::Scheduled,
            gate: None,
            terminal: None,
            delay_minutes: 0,
            scheduled_departure: None,
            scheduled_arrival: None,
            actual_departure: None,
            actual_arrival: None,
        }
    }

    /// Set the initial status (seeding and tests).
    #[must_use]
    pub const fn with_status(mut self, status: FlightStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the initial gate and terminal.
    #[must_use]
    pub fn with_gate(mut self, gate: impl Into<String>, terminal: impl Into<String>) -> Self {
        self.gate = Some(gate.into());
        self.terminal = Some(terminal.into());
        self
    }

    /// Set the planned departure and arrival times.
    #[must_use]
    pub const fn with_schedule(mut self, departure: DateTime<Utc>, arrival: DateTime<Utc>) -> Self {
        self.scheduled_departure = Some(departure);
        self.scheduled_arrival = Some(arrival);
        self
    }

    /// Set the initial delay.
    #[must_use]
    pub const fn with_delay(mut self, minutes: u32) -> Self {
        self.delay_minutes = minutes;
        self
    }

    /// Apply an event to this flight.
    ///
    /// Validation happens first, then the redelivery check, then the state
    /// machine. Fields are only touched once all three pass.
    ///
    /// # Errors
    ///
    /// - [`ApplyError::MalformedEvent`] if the event targets another flight or
    ///   its `new_value` cannot be interpreted for its type
    /// - [`ApplyError::IllegalTransition`] if the event type is not eligible in
    ///   the current status
    /// - [`ApplyError::MalformedEvent`] if a status event announces a status
    ///   other than the one the state machine leads to
    pub fn apply(
        &mut self,
        event: &FlightEvent,
        now: DateTime<Utc>,
    ) -> Result<ApplyOutcome, ApplyError> {
        event.validate()?;
        if event.flight_number != self.flight_number {
            return Err(ApplyError::MalformedEvent(format!(
                "event for {} applied to {}",
                event.flight_number, self.flight_number
            )));
        }

        if self.already_reflects(event)? {
            return Ok(ApplyOutcome::Duplicate);
        }

        let from = self.status;
        let to = FlightStateMachine::next_status(from, event.event_type).ok_or(
            ApplyError::IllegalTransition {
                status: from,
                event_type: event.event_type,
            },
        )?;
        if let Some(announced) = event.announced_status()?.filter(|announced| *announced != to) {
            return Err(ApplyError::MalformedEvent(format!(
                "{} from {from} leads to {to}, not {announced}",
                event.event_type
            )));
        }

        match event.event_type {
            EventType::Delay => {
                let minutes = event.delay_minutes()?;
                self.delay_minutes = minutes;
                if minutes > 0 {
                    self.status = to;
                }
            }
            EventType::GateChange => {
                self.gate = Some(event.gate()?.to_string());
            }
            EventType::BoardingStarted | EventType::Cancellation => {
                self.status = to;
            }
            EventType::Departed => {
                self.status = to;
                self.actual_departure = Some(now);
            }
            EventType::Arrival => {
                self.status = to;
                if to == FlightStatus::Arrived {
                    self.actual_arrival = Some(now);
                }
            }
            EventType::Reinstatement => {
                self.status = to;
                self.delay_minutes = 0;
            }
        }

        Ok(ApplyOutcome::Applied {
            from,
            to: self.status,
        })
    }

    fn already_reflects(&self, event: &FlightEvent) -> Result<bool, ApplyError> {
        let reflected = match event.event_type {
            EventType::Delay => {
                let minutes = event.delay_minutes()?;
                self.delay_minutes == minutes
                    && (minutes == 0 || self.status == FlightStatus::Delayed)
            }
            EventType::GateChange => self.gate.as_deref() == Some(event.gate()?),
            EventType::Reinstatement
                if self.status == FlightStatus::OnTime && self.delay_minutes == 0 =>
            {
                true
            }
            _ => event
                .previous_status()
                .is_some_and(|expected| expected != self.status),
        };
        Ok(reflected)
    }
}
