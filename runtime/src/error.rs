//! Errors raised while generating and consuming flight events.

use flightfeed_core::error::ApplyError;
use flightfeed_core::event_bus::EventBusError;
use flightfeed_core::repository::RepositoryError;
use thiserror::Error;

/// Errors from the event pipeline.
///
/// None of these terminate the process. The generator loop and the consumer
/// log them and carry on; [`PipelineError::is_droppable`] separates the ones
/// that mean "skip this event" from infrastructure failures.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Every flight is terminal (or there are none), so nothing can be generated
    #[error("No eligible flights")]
    NoEligibleFlights,

    /// The event refers to a flight the repository does not know
    #[error("Flight not found: {0}")]
    FlightNotFound(String),

    /// The event could not be decoded or encoded
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// The event was rejected by the flight (illegal transition or bad value)
    #[error(transparent)]
    Rejected(#[from] ApplyError),

    /// Flight storage failed
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// The event bus refused the event
    #[error("Publish error: {0}")]
    Publish(#[from] EventBusError),

    /// A component was built without a required setting
    #[error("Configuration error: {0}")]
    Configuration(&'static str),
}

impl PipelineError {
    /// Whether this error means the event should be dropped rather than
    /// treated as an infrastructure failure.
    #[must_use]
    pub const fn is_droppable(&self) -> bool {
        matches!(
            self,
            Self::NoEligibleFlights
                | Self::FlightNotFound(_)
                | Self::MalformedEvent(_)
                | Self::Rejected(_)
        )
    }

    /// Short label used as the `reason` metric label.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::NoEligibleFlights => "no_eligible_flights",
            Self::FlightNotFound(_) => "flight_not_found",
            Self::MalformedEvent(_) => "malformed",
            Self::Rejected(ApplyError::IllegalTransition { .. }) => "illegal_transition",
            Self::Rejected(ApplyError::MalformedEvent(_)) => "malformed",
            Self::Repository(_) => "repository",
            Self::Publish(_) => "publish",
            Self::Configuration(_) => "configuration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flightfeed_core::{EventType, FlightStatus};

    #[test]
    fn event_level_errors_are_droppable() {
        assert!(PipelineError::FlightNotFound("FF1".into()).is_droppable());
        assert!(PipelineError::MalformedEvent("bad".into()).is_droppable());
        assert!(
            PipelineError::from(ApplyError::IllegalTransition {
                status: FlightStatus::Arrived,
                event_type: EventType::Delay,
            })
            .is_droppable()
        );
    }

    #[test]
    fn infrastructure_errors_are_not_droppable() {
        let error = PipelineError::from(RepositoryError::Database("down".into()));
        assert!(!error.is_droppable());
        assert_eq!(error.reason(), "repository");
    }
}
