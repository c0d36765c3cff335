//! Event handler trait.
//!
//! The [`EventConsumer`](crate::consumer::EventConsumer) knows nothing about
//! flights. It hands the raw payload of each delivered record to an
//! [`EventHandler`], which decodes and processes it.

use async_trait::async_trait;

/// Failure reported by an [`EventHandler`].
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes one delivered record.
///
/// Handlers must be idempotent: the bus delivers at least once, so the same
/// payload can arrive again after a rebalance or reconnect.
///
/// # Error Handling
///
/// Errors are logged by the consumer and never stop consumption. Handlers
/// should return `Ok(())` for events they deliberately drop, and reserve
/// `Err` for failures worth an `error` log line.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle the JSON payload of one record.
    ///
    /// # Errors
    ///
    /// Returns an error when processing fails for a reason outside the event
    /// itself (storage unavailable and the like).
    async fn handle(&self, data: &[u8]) -> Result<(), HandlerError>;
}
