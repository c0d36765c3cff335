//! Shared state for the HTTP handlers.

use flightfeed_core::repository::FlightRepository;
use flightfeed_runtime::SubscriberHub;
use std::sync::Arc;
use std::time::Duration;

/// How push streams behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSettings {
    /// Interval between keep-alive comments on an idle stream
    pub keep_alive: Duration,
    /// Maximum lifetime of one stream; `None` keeps it open until the
    /// client leaves
    pub timeout: Option<Duration>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(15),
            timeout: None,
        }
    }
}

/// State cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    /// Live viewer registry
    pub hub: Arc<SubscriberHub>,
    /// Flight storage, read by the health endpoint
    pub repository: Arc<dyn FlightRepository>,
    /// Push stream settings
    pub stream: StreamSettings,
}

impl AppState {
    /// Create state with default stream settings.
    #[must_use]
    pub fn new(hub: Arc<SubscriberHub>, repository: Arc<dyn FlightRepository>) -> Self {
        Self {
            hub,
            repository,
            stream: StreamSettings::default(),
        }
    }

    /// Replace the stream settings.
    #[must_use]
    pub const fn with_stream_settings(mut self, stream: StreamSettings) -> Self {
        self.stream = stream;
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("hub", &self.hub)
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}
