//! Errors raised by the pure domain layer.

use crate::event::EventType;
use crate::flight::FlightStatus;
use thiserror::Error;

/// Reasons an event cannot be applied to a flight.
///
/// Both variants are raised before any field is mutated, so a rejected
/// event never leaves a flight half-updated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplyError {
    /// The event type is not legal in the flight's current status.
    #[error("{event_type} is not allowed while flight is {status}")]
    IllegalTransition {
        /// Status the flight was in
        status: FlightStatus,
        /// Event type that was rejected
        event_type: EventType,
    },

    /// The event is structurally invalid (missing or unparseable values,
    /// wrong flight).
    #[error("Malformed event: {0}")]
    MalformedEvent(String),
}

/// Failure to parse one of the closed domain enums from its wire name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind}: {value}")]
pub struct ParseError {
    /// Which enum was being parsed
    pub kind: &'static str,
    /// The offending input
    pub value: String,
}

impl ParseError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
