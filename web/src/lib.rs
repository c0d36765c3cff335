//! HTTP push surface for the flightfeed pipeline.
//!
//! The pipeline itself never talks HTTP. This crate exposes the
//! [`SubscriberHub`](flightfeed_runtime::SubscriberHub) to browsers as a
//! server-sent event stream and reports basic health.
//!
//! # Routes
//!
//! | Method | Path                  | Handler                          |
//! |--------|-----------------------|----------------------------------|
//! | GET    | `/api/flights/stream` | [`handlers::flight_stream`]      |
//! | GET    | `/health`             | [`handlers::health`]             |
//!
//! # Example
//!
//! ```ignore
//! use flightfeed_web::{AppState, router};
//!
//! let state = AppState::new(hub, repository);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router(state)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;
pub mod state;

pub use error::AppError;
pub use state::{AppState, StreamSettings};

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Path of the push stream.
pub const STREAM_PATH: &str = "/api/flights/stream";

/// Build the application router.
///
/// CORS is permissive: the stream is read-only and carries no credentials.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(STREAM_PATH, get(handlers::flight_stream))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
