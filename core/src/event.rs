//! Flight events and their wire representation.
//!
//! A [`FlightEvent`] describes one intended lifecycle change to one flight.
//! It is produced by the generator, published on the event bus, and applied
//! by the consumer. It is never mutated after construction.
//!
//! # Wire format
//!
//! Events travel as JSON with camelCase field names, the same DTO the push
//! stream uses for its event fields:
//!
//! ```json
//! {
//!   "flightNumber": "FF101",
//!   "eventType": "GATE_CHANGE",
//!   "previousValue": "B12",
//!   "newValue": "C7",
//!   "description": "Gate changed from B12 to C7",
//!   "timestamp": "2025-01-01T00:00:00Z"
//! }
//! ```
//!
//! The [`Event`] trait provides the byte encoding, and [`SerializedEvent`] is
//! the envelope handed to an [`EventBus`](crate::event_bus::EventBus).

use crate::error::{ApplyError, ParseError};
use crate::flight::FlightStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error types for event encoding.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),
}

/// An event that can be put on the wire.
///
/// The default methods encode with `serde_json`, which keeps the event log
/// readable by the non-Rust collaborators that share it.
pub trait Event: Send + Sync + 'static {
    /// Stable name of this event's type, used as a transport header.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are not a valid
    /// encoding of this event type.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// Closed set of lifecycle event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Delay announced; `new_value` is the delay in minutes
    Delay,
    /// Gate reassigned; `new_value` is the new gate
    GateChange,
    /// Boarding opened
    BoardingStarted,
    /// Pushed back from the gate
    Departed,
    /// Landed, or reached the arrival gate if already landed
    Arrival,
    /// Flight cancelled
    Cancellation,
    /// Cancelled or delayed flight put back on time
    Reinstatement,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Delay,
        Self::GateChange,
        Self::BoardingStarted,
        Self::Departed,
        Self::Arrival,
        Self::Cancellation,
        Self::Reinstatement,
    ];

    /// Wire name (e.g. `"GATE_CHANGE"`).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Delay => "DELAY",
            Self::GateChange => "GATE_CHANGE",
            Self::BoardingStarted => "BOARDING_STARTED",
            Self::Departed => "DEPARTED",
            Self::Arrival => "ARRIVAL",
            Self::Cancellation => "CANCELLATION",
            Self::Reinstatement => "REINSTATEMENT",
        }
    }

    /// Whether the event's meaning is a status change rather than a field
    /// update. For these, `new_value` is the resulting status name.
    #[must_use]
    pub const fn is_status_change(&self) -> bool {
        !matches!(self, Self::Delay | Self::GateChange)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| ParseError::new("event type", s))
    }
}

/// One intended lifecycle change to one flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightEvent {
    /// Flight the event refers to (also the partition key)
    pub flight_number: String,
    /// What kind of change this is
    pub event_type: EventType,
    /// Value of the changed field when the event was generated
    pub previous_value: Option<String>,
    /// Value the field changes to
    pub new_value: Option<String>,
    /// Human-readable summary for viewers
    pub description: String,
    /// When the event was generated
    pub timestamp: DateTime<Utc>,
}

impl FlightEvent {
    /// Create an event with no values and a default description.
    #[must_use]
    pub fn new(
        flight_number: impl Into<String>,
        event_type: EventType,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let flight_number = flight_number.into();
        let description = format!("{event_type} for flight {flight_number}");
        Self {
            flight_number,
            event_type,
            previous_value: None,
            new_value: None,
            description,
            timestamp,
        }
    }

    /// Set the previous value.
    #[must_use]
    pub fn with_previous_value(mut self, value: impl Into<String>) -> Self {
        self.previous_value = Some(value.into());
        self
    }

    /// Set the new value.
    #[must_use]
    pub fn with_new_value(mut self, value: impl Into<String>) -> Self {
        self.new_value = Some(value.into());
        self
    }

    /// Replace the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Check the event is well-formed for its type.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::MalformedEvent`] when the flight number is blank,
    /// a `DELAY` has no integer `new_value`, a `GATE_CHANGE` has no gate, or a
    /// status event names an unknown status.
    pub fn validate(&self) -> Result<(), ApplyError> {
        if self.flight_number.trim().is_empty() {
            return Err(ApplyError::MalformedEvent("blank flight number".to_string()));
        }
        match self.event_type {
            EventType::Delay => self.delay_minutes().map(|_| ()),
            EventType::GateChange => self.gate().map(|_| ()),
            _ => self.announced_status().map(|_| ()),
        }
    }

    /// Delay carried by a `DELAY` event.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::MalformedEvent`] if `new_value` is missing or not
    /// a non-negative integer.
    pub fn delay_minutes(&self) -> Result<u32, ApplyError> {
        let raw = self.required_value()?;
        raw.trim().parse().map_err(|_| {
            ApplyError::MalformedEvent(format!(
                "DELAY minutes must be a non-negative integer, got {raw:?}"
            ))
        })
    }

    /// Gate carried by a `GATE_CHANGE` event.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::MalformedEvent`] if `new_value` is missing or blank.
    pub fn gate(&self) -> Result<&str, ApplyError> {
        let raw = self.required_value()?.trim();
        if raw.is_empty() {
            return Err(ApplyError::MalformedEvent("GATE_CHANGE without a gate".to_string()));
        }
        Ok(raw)
    }

    /// Status the event was generated against, for status-change events that
    /// recorded one.
    #[must_use]
    pub fn previous_status(&self) -> Option<FlightStatus> {
        if !self.event_type.is_status_change() {
            return None;
        }
        self.previous_value.as_deref()?.parse().ok()
    }

    /// Status a status-change event says the flight will reach, when it
    /// carries one.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::MalformedEvent`] if `new_value` is not a status.
    pub fn announced_status(&self) -> Result<Option<FlightStatus>, ApplyError> {
        if !self.event_type.is_status_change() {
            return Ok(None);
        }
        self.new_value
            .as_deref()
            .map(|value| {
                value
                    .parse::<FlightStatus>()
                    .map_err(|e| ApplyError::MalformedEvent(format!("{}: {e}", self.event_type)))
            })
            .transpose()
    }

    fn required_value(&self) -> Result<&str, ApplyError> {
        self.new_value.as_deref().ok_or_else(|| {
            ApplyError::MalformedEvent(format!("{} requires a new value", self.event_type))
        })
    }
}

impl Event for FlightEvent {
    fn event_type(&self) -> &'static str {
        self.event_type.as_str()
    }
}

/// A serialized event ready for transport.
///
/// `key` is the partition key. It is attached by the transport on delivery;
/// publishers pass the key to [`EventBus::publish`](crate::event_bus::EventBus::publish)
/// instead of setting it here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerializedEvent {
    /// The event type identifier (e.g. `"GATE_CHANGE"`).
    pub event_type: String,

    /// The JSON-encoded event.
    pub data: Vec<u8>,

    /// Partition key the event was published under, when known.
    pub key: Option<String>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    #[must_use]
    pub const fn new(event_type: String, data: Vec<u8>) -> Self {
        Self {
            event_type,
            data,
            key: None,
        }
    }

    /// Attach the partition key (used by transports on delivery).
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Create a serialized event from an `Event`.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    pub fn from_event<E: Event + Serialize>(event: &E) -> Result<Self, EventError> {
        Ok(Self::new(event.event_type().to_string(), event.to_bytes()?))
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, key: {}, size: {} bytes }}",
            self.event_type,
            self.key.as_deref().unwrap_or("-"),
            self.data.len()
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    fn timestamp() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn event_uses_camel_case_wire_names() {
        let event = FlightEvent::new("FF101", EventType::GateChange, timestamp())
            .with_previous_value("B12")
            .with_new_value("C7")
            .with_description("Gate changed from B12 to C7");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "flightNumber": "FF101",
                "eventType": "GATE_CHANGE",
                "previousValue": "B12",
                "newValue": "C7",
                "description": "Gate changed from B12 to C7",
                "timestamp": "2025-01-01T00:00:00Z"
            })
        );
    }

    #[test]
    fn serialized_event_carries_type_name() {
        let event = FlightEvent::new("FF101", EventType::Cancellation, timestamp());
        let serialized = SerializedEvent::from_event(&event).unwrap();

        assert_eq!(serialized.event_type, "CANCELLATION");
        assert!(serialized.key.is_none());
        assert_eq!(FlightEvent::from_bytes(&serialized.data).unwrap(), event);
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let result = FlightEvent::from_bytes(b"{\"flightNumber\": 7}");
        assert!(matches!(result, Err(EventError::DeserializationError(_))));
    }

    #[test]
    fn validate_rejects_missing_values() {
        let delay = FlightEvent::new("FF101", EventType::Delay, timestamp());
        assert!(delay.validate().is_err());

        let gate =
            FlightEvent::new("FF101", EventType::GateChange, timestamp()).with_new_value("  ");
        assert!(gate.validate().is_err());

        let blank = FlightEvent::new(" ", EventType::Departed, timestamp());
        assert!(blank.validate().is_err());

        let bad_status =
            FlightEvent::new("FF101", EventType::Departed, timestamp()).with_new_value("AIRBORNE");
        assert!(bad_status.validate().is_err());
    }

    #[test]
    fn previous_status_only_for_status_events() {
        let departed = FlightEvent::new("FF101", EventType::Departed, timestamp())
            .with_previous_value("BOARDING");
        assert_eq!(departed.previous_status(), Some(FlightStatus::Boarding));

        let delay = FlightEvent::new("FF101", EventType::Delay, timestamp())
            .with_previous_value("BOARDING")
            .with_new_value("15");
        assert_eq!(delay.previous_status(), None);
    }

    #[test]
    fn serialized_event_display() {
        let serialized =
            SerializedEvent::new("DELAY".to_string(), vec![1, 2, 3, 4, 5]).with_key("FF101");

        let display = format!("{serialized}");
        assert!(display.contains("DELAY"));
        assert!(display.contains("FF101"));
        assert!(display.contains("5 bytes"));
    }
}
