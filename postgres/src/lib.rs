//! `PostgreSQL` flight repository for the flightfeed pipeline.
//!
//! Implements [`FlightRepository`] from `flightfeed-core` with sqlx:
//!
//! - `flights`: one row per flight, upserted by the applier
//! - `flight_events`: append-only history of every applied event
//!
//! An applied event and the flight it changed are written in one transaction.
//!
//! Queries are checked at runtime so the crate builds without a database.
//! The schema ships as sqlx migrations and is applied by
//! [`PostgresFlightRepository::ensure_schema`].
//!
//! # Example
//!
//! ```ignore
//! use flightfeed_postgres::PostgresFlightRepository;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let url = "postgres://localhost/flightfeed";
//!     let repository = PostgresFlightRepository::connect(url, 10).await?;
//!     repository.ensure_schema().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use flightfeed_core::event::{EventType, FlightEvent};
use flightfeed_core::flight::{Flight, FlightStatus};
use flightfeed_core::repository::{FlightRepository, RepositoryError, RepositoryFuture};
use sqlx::PgExecutor;
use sqlx::postgres::{PgPool, PgPoolOptions};

const FLIGHT_COLUMNS: &str = "flight_number, airline, airline_name, origin, destination, status, \
     gate, terminal, delay_minutes, scheduled_departure, scheduled_arrival, actual_departure, \
     actual_arrival";

/// sqlx-backed [`FlightRepository`].
#[derive(Clone, Debug)]
pub struct PostgresFlightRepository {
    pool: PgPool,
}

impl PostgresFlightRepository {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if the connection fails.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| RepositoryError::Database(format!("Failed to connect: {e}")))?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    /// Create the `flights` and `flight_events` tables if missing.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Database`] if a migration fails.
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Applied events for one flight, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError`] if the query fails or a row is corrupt.
    pub async fn find_events(
        &self,
        flight_number: &str,
    ) -> Result<Vec<FlightEvent>, RepositoryError> {
        let rows: Vec<EventRow> = sqlx::query_as(
            "SELECT flight_number, event_type, previous_value, new_value, description, \
             event_timestamp FROM flight_events WHERE flight_number = $1 ORDER BY id",
        )
        .bind(flight_number)
        .fetch_all(&self.pool)
        .await
        .map_err(database_error)?;

        rows.into_iter().map(FlightEvent::try_from).collect()
    }

    async fn select_flights(&self, filter: &str) -> Result<Vec<Flight>, RepositoryError> {
        let query = format!("SELECT {FLIGHT_COLUMNS} FROM flights {filter} ORDER BY flight_number");
        let rows: Vec<FlightRow> = sqlx::query_as(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(database_error)?;

        rows.into_iter().map(Flight::try_from).collect()
    }
}

#[allow(clippy::needless_pass_by_value)] // Used as a map_err function
fn database_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Database(e.to_string())
}

impl FlightRepository for PostgresFlightRepository {
    fn find_by_number<'a>(
        &'a self,
        flight_number: &'a str,
    ) -> RepositoryFuture<'a, Option<Flight>> {
        Box::pin(async move {
            let query = format!("SELECT {FLIGHT_COLUMNS} FROM flights WHERE flight_number = $1");
            let row: Option<FlightRow> = sqlx::query_as(&query)
                .bind(flight_number)
                .fetch_optional(&self.pool)
                .await
                .map_err(database_error)?;

            row.map(Flight::try_from).transpose()
        })
    }

    fn save<'a>(&'a self, flight: &'a Flight) -> RepositoryFuture<'a, ()> {
        Box::pin(async move {
            upsert_flight(&self.pool, flight).await?;
            tracing::trace!(
                flight_number = %flight.flight_number,
                status = %flight.status,
                "Saved flight"
            );
            Ok(())
        })
    }

    fn find_active(&self) -> RepositoryFuture<'_, Vec<Flight>> {
        Box::pin(self.select_flights("WHERE status NOT IN ('ARRIVED', 'CANCELLED')"))
    }

    fn find_all(&self) -> RepositoryFuture<'_, Vec<Flight>> {
        Box::pin(self.select_flights(""))
    }

    fn save_applied<'a>(
        &'a self,
        flight: &'a Flight,
        event: &'a FlightEvent,
    ) -> RepositoryFuture<'a, ()> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(database_error)?;
            upsert_flight(&mut *tx, flight).await?;
            insert_event(&mut *tx, event).await?;
            tx.commit().await.map_err(database_error)?;

            tracing::trace!(
                flight_number = %flight.flight_number,
                event_type = %event.event_type,
                "Saved applied event"
            );
            Ok(())
        })
    }
}

async fn upsert_flight<'e>(
    executor: impl PgExecutor<'e>,
    flight: &Flight,
) -> Result<(), RepositoryError> {
    let delay = i32::try_from(flight.delay_minutes).map_err(|_| {
        RepositoryError::Corrupt(format!("delay {} out of range", flight.delay_minutes))
    })?;

    sqlx::query(
        r"
        INSERT INTO flights (
            flight_number, airline, airline_name, origin, destination, status, gate, terminal,
            delay_minutes, scheduled_departure, scheduled_arrival, actual_departure, actual_arrival
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (flight_number) DO UPDATE SET
            airline = EXCLUDED.airline,
            airline_name = EXCLUDED.airline_name,
            origin = EXCLUDED.origin,
            destination = EXCLUDED.destination,
            status = EXCLUDED.status,
            gate = EXCLUDED.gate,
            terminal = EXCLUDED.terminal,
            delay_minutes = EXCLUDED.delay_minutes,
            scheduled_departure = EXCLUDED.scheduled_departure,
            scheduled_arrival = EXCLUDED.scheduled_arrival,
            actual_departure = EXCLUDED.actual_departure,
            actual_arrival = EXCLUDED.actual_arrival,
            updated_at = now()
        ",
    )
    .bind(&flight.flight_number)
    .bind(&flight.airline)
    .bind(&flight.airline_name)
    .bind(&flight.origin)
    .bind(&flight.destination)
    .bind(flight.status.as_str())
    .bind(flight.gate.as_deref())
    .bind(flight.terminal.as_deref())
    .bind(delay)
    .bind(flight.scheduled_departure)
    .bind(flight.scheduled_arrival)
    .bind(flight.actual_departure)
    .bind(flight.actual_arrival)
    .execute(executor)
    .await
    .map_err(database_error)?;
    Ok(())
}

async fn insert_event<'e>(
    executor: impl PgExecutor<'e>,
    event: &FlightEvent,
) -> Result<(), RepositoryError> {
    sqlx::query(
        r"
        INSERT INTO flight_events (
            flight_number, event_type, previous_value, new_value, description, event_timestamp
        ) VALUES ($1, $2, $3, $4, $5, $6)
        ",
    )
    .bind(&event.flight_number)
    .bind(event.event_type.as_str())
    .bind(event.previous_value.as_deref())
    .bind(event.new_value.as_deref())
    .bind(&event.description)
    .bind(event.timestamp)
    .execute(executor)
    .await
    .map_err(database_error)?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct FlightRow {
    flight_number: String,
    airline: String,
    airline_name: String,
    origin: String,
    destination: String,
    status: String,
    gate: Option<String>,
    terminal: Option<String>,
    delay_minutes: i32,
    scheduled_departure: Option<DateTime<Utc>>,
    scheduled_arrival: Option<DateTime<Utc>>,
    actual_departure: Option<DateTime<Utc>>,
    actual_arrival: Option<DateTime<Utc>>,
}

impl TryFrom<FlightRow> for Flight {
    type Error = RepositoryError;

    fn try_from(row: FlightRow) -> Result<Self, Self::Error> {
        let status: FlightStatus = row
            .status
            .parse()
            .map_err(|e| RepositoryError::Corrupt(format!("flight {}: {e}", row.flight_number)))?;
        let delay_minutes = u32::try_from(row.delay_minutes).map_err(|_| {
            RepositoryError::Corrupt(format!(
                "flight {}: negative delay {}",
                row.flight_number, row.delay_minutes
            ))
        })?;

        Ok(Self {
            flight_number: row.flight_number,
            airline: row.airline,
            airline_name: row.airline_name,
            origin: row.origin,
            destination: row.destination,
            status,
            gate: row.gate,
            terminal: row.terminal,
            delay_minutes,
            scheduled_departure: row.scheduled_departure,
            scheduled_arrival: row.scheduled_arrival,
            actual_departure: row.actual_departure,
            actual_arrival: row.actual_arrival,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    flight_number: String,
    event_type: String,
    previous_value: Option<String>,
    new_value: Option<String>,
    description: String,
    event_timestamp: DateTime<Utc>,
}

impl TryFrom<EventRow> for FlightEvent {
    type Error = RepositoryError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let event_type: EventType = row
            .event_type
            .parse()
            .map_err(|e| {
                RepositoryError::Corrupt(format!("event for {}: {e}", row.flight_number))
            })?;

        Ok(Self {
            flight_number: row.flight_number,
            event_type,
            previous_value: row.previous_value,
            new_value: row.new_value,
            description: row.description,
            timestamp: row.event_timestamp,
        })
    }
}
