//! Health endpoint for load balancers and dashboards.

use crate::error::AppError;
use crate::state::AppState;
use axum::{Json, extract::State};
use serde::Serialize;

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `"ok"` when the response is 200
    pub status: &'static str,
    /// Open push connections
    pub subscribers: usize,
    /// Flights neither arrived nor cancelled
    pub active_flights: usize,
}

/// Report liveness plus a little pipeline state.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// { "status": "ok", "subscribers": 3, "activeFlights": 12 }
/// ```
///
/// # Errors
///
/// Returns 503 if flight storage cannot be read.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    let active_flights = state.repository.find_active().await?.len();

    Ok(Json(HealthResponse {
        status: "ok",
        subscribers: state.hub.size(),
        active_flights,
    }))
}
