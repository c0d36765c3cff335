//! Flight lifecycle transition table.
//!
//! ```text
//!            DELAY                 BOARDING_STARTED            DEPARTED
//! SCHEDULED ───────► DELAYED ─────────────────────► BOARDING ──────────► DEPARTED
//! ON_TIME   ◄─────── (REINSTATEMENT)                   │                    │ ARRIVAL
//!     │                  │                             │                    ▼
//!     │ CANCELLATION     │ CANCELLATION   CANCELLATION │                 LANDED
//!     ▼                  ▼                             ▼                    │ ARRIVAL
//! CANCELLED ◄─────────────────────────────────────────┘                    ▼
//!     │ REINSTATEMENT                                                    ARRIVED
//!     ▼
//!  ON_TIME
//! ```
//!
//! `GATE_CHANGE` is legal wherever the flight is still at a gate and leaves
//! the status alone. `ARRIVED` is terminal; `CANCELLED` has exactly one exit.

use crate::event::EventType;
use crate::flight::FlightStatus;

/// Table-driven lifecycle rules. Deterministic, no I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlightStateMachine;

impl FlightStateMachine {
    /// Event types that may be applied to a flight in `status`.
    ///
    /// # Examples
    ///
    /// ```
    /// use flightfeed_core::{EventType, FlightStateMachine, FlightStatus};
    ///
    /// assert_eq!(
    ///     FlightStateMachine::eligible_event_types(FlightStatus::Cancelled),
    ///     &[EventType::Reinstatement]
    /// );
    /// assert!(FlightStateMachine::eligible_event_types(FlightStatus::Arrived).is_empty());
    /// ```
    #[must_use]
    pub const fn eligible_event_types(status: FlightStatus) -> &'static [EventType] {
        use EventType::{
            Arrival, BoardingStarted, Cancellation, Delay, Departed, GateChange, Reinstatement,
        };

        match status {
            FlightStatus::Scheduled | FlightStatus::OnTime => {
                &[Delay, GateChange, BoardingStarted, Cancellation]
            }
            FlightStatus::Boarding => &[GateChange, Departed, Cancellation],
            FlightStatus::Departed | FlightStatus::InFlight | FlightStatus::Landed => &[Arrival],
            FlightStatus::Delayed => &[GateChange, BoardingStarted, Cancellation, Reinstatement],
            FlightStatus::Cancelled => &[Reinstatement],
            FlightStatus::Arrived => &[],
        }
    }

    /// Whether `event_type` is legal in `status`.
    #[must_use]
    pub fn is_eligible(status: FlightStatus, event_type: EventType) -> bool {
        Self::eligible_event_types(status).contains(&event_type)
    }

    /// Status reached by applying `event_type` in `status`, or `None` if the
    /// event is not eligible.
    ///
    /// `DELAY` maps to `DELAYED`; the effect table keeps the old status when
    /// the announced delay is zero minutes.
    #[must_use]
    pub fn next_status(status: FlightStatus, event_type: EventType) -> Option<FlightStatus> {
        if !Self::is_eligible(status, event_type) {
            return None;
        }

        let next = match event_type {
            EventType::Delay => FlightStatus::Delayed,
            EventType::GateChange => status,
            EventType::BoardingStarted => FlightStatus::Boarding,
            EventType::Departed => FlightStatus::Departed,
            EventType::Arrival if status == FlightStatus::Landed => FlightStatus::Arrived,
            EventType::Arrival => FlightStatus::Landed,
            EventType::Cancellation => FlightStatus::Cancelled,
            EventType::Reinstatement => FlightStatus::OnTime,
        };
        Some(next)
    }
}
