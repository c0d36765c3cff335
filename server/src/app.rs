//! Component wiring and process lifecycle.
//!
//! [`Application::build`] turns a [`Config`] into live collaborators (bus,
//! repository, hub). [`Application::run`] then owns the running pipeline:
//!
//! 1. **Startup**: seed the roster if storage is empty, start the consumer,
//!    spawn the generator loop, serve HTTP
//! 2. **Runtime**: runs until the shutdown future resolves or the HTTP server
//!    exits on its own
//! 3. **Shutdown**: stop HTTP (ending every push stream), stop the generator,
//!    stop the consumer, each bounded by `SHUTDOWN_TIMEOUT`

use crate::config::{BusConfig, BusKind, Config, ConfigError, StorageKind};
use crate::seed;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use flightfeed_core::environment::{Clock, SystemClock};
use flightfeed_core::event_bus::{EventBus, EventBusError};
use flightfeed_core::repository::{FlightRepository, RepositoryError};
use flightfeed_postgres::PostgresFlightRepository;
use flightfeed_runtime::metrics::{MetricsError, MetricsRecorder};
use flightfeed_runtime::{
    EventApplier, EventConsumer, EventGenerator, GeneratorLoop, PipelineError, SubscriberHub,
};
use flightfeed_testing::{InMemoryEventBus, InMemoryFlightRepository};
use flightfeed_web::{AppState, StreamSettings};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Errors that stop the process from starting or running.
#[derive(Error, Debug)]
pub enum StartupError {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Storage could not be reached or seeded
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// The event bus could not be created
    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    /// The metrics exporter could not be installed
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// A listener could not be bound or the server failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A pipeline component was misconfigured
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// The configuration asks for a transport this build does not include
    #[error("{0} support is not compiled in; rebuild with --features {0}")]
    FeatureDisabled(&'static str),

    /// The HTTP server task ended abnormally
    #[error("Server task failed: {0}")]
    Server(String),
}

/// The assembled pipeline, ready to run.
pub struct Application {
    config: Config,
    repository: Arc<dyn FlightRepository>,
    event_bus: Arc<dyn EventBus>,
    hub: Arc<SubscriberHub>,
    clock: Arc<dyn Clock>,
}

impl Application {
    /// Connect the configured bus and storage.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] if storage or the bus cannot be reached, or
    /// the configured bus is not compiled into this build.
    pub async fn build(config: Config) -> Result<Self, StartupError> {
        let repository: Arc<dyn FlightRepository> = match config.storage.kind {
            StorageKind::Memory => {
                info!("Using in-memory flight storage");
                Arc::new(InMemoryFlightRepository::new())
            }
            StorageKind::Postgres => {
                let url = config
                    .storage
                    .database_url
                    .as_deref()
                    .ok_or(ConfigError::Missing("DATABASE_URL"))?;
                let repository =
                    PostgresFlightRepository::connect(url, config.storage.max_connections).await?;
                repository.ensure_schema().await?;
                Arc::new(repository)
            }
        };

        let event_bus: Arc<dyn EventBus> = match config.bus.kind {
            BusKind::Memory => {
                info!(retention = config.bus.memory_retention, "Using in-memory event bus");
                Arc::new(InMemoryEventBus::new().with_retention(config.bus.memory_retention))
            }
            BusKind::Redpanda => redpanda_bus(&config.bus)?,
        };

        Ok(Self::from_parts(config, repository, event_bus, Arc::new(SystemClock)))
    }

    /// Assemble from existing collaborators.
    #[must_use]
    pub fn from_parts(
        config: Config,
        repository: Arc<dyn FlightRepository>,
        event_bus: Arc<dyn EventBus>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let hub = Arc::new(SubscriberHub::with_buffer(config.hub.subscriber_buffer));
        Self {
            config,
            repository,
            event_bus,
            hub,
            clock,
        }
    }

    /// The live viewer registry.
    #[must_use]
    pub fn hub(&self) -> Arc<SubscriberHub> {
        Arc::clone(&self.hub)
    }

    /// The push and health routes, bound to this application's hub.
    #[must_use]
    pub fn router(&self) -> Router {
        let settings = StreamSettings {
            keep_alive: self.config.hub.keep_alive,
            timeout: self.config.hub.subscriber_timeout,
        };
        let state =
            AppState::new(self.hub(), Arc::clone(&self.repository)).with_stream_settings(settings);
        flightfeed_web::router(state)
    }

    /// Bind `HOST:PORT` and run until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// See [`run_with_listener`](Self::run_with_listener).
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send) -> Result<(), StartupError> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        self.run_with_listener(listener, shutdown).await
    }

    /// Run on an already bound listener until `shutdown` resolves or the
    /// HTTP server stops by itself.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] if seeding fails, the consumer cannot be
    /// built, or the HTTP server fails.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), StartupError> {
        seed::seed_if_empty(self.repository.as_ref(), self.clock.now()).await?;

        let applier = Arc::new(EventApplier::new(
            Arc::clone(&self.repository),
            self.hub(),
            Arc::clone(&self.clock),
        ));
        let consumer = EventConsumer::builder()
            .name(self.config.bus.consumer_group.clone())
            .topics(vec![self.config.bus.topic.clone()])
            .consumer_group(self.config.bus.consumer_group.clone())
            .event_bus(Arc::clone(&self.event_bus))
            .handler(applier)
            .workers(self.config.consumer.workers)
            .retry_delay(self.config.consumer.retry_delay)
            .build()?
            .start();

        let (shutdown_tx, _) = broadcast::channel(1);
        let generator = if self.config.generator.enabled {
            let generator = Arc::new(EventGenerator::new(
                Arc::clone(&self.repository),
                Arc::clone(&self.clock),
            ));
            let generator_loop = GeneratorLoop::new(
                generator,
                Arc::clone(&self.event_bus),
                self.config.bus.topic.clone(),
                self.config.generator.interval,
            );
            Some(generator_loop.spawn(shutdown_tx.subscribe()))
        } else {
            info!("Event generator disabled");
            None
        };

        let (stop_http_tx, stop_http_rx) = oneshot::channel::<()>();
        let serve = axum::serve(listener, self.router()).with_graceful_shutdown(async move {
            stop_http_rx.await.ok();
        });
        info!(address = %serve_address(&self.config), "HTTP server listening");
        let mut server = tokio::spawn(async move { serve.await });

        let mut outcome = Ok(());
        let mut server_done = false;
        tokio::select! {
            () = shutdown => info!("Shutdown requested"),
            result = &mut server => {
                warn!("HTTP server stopped unexpectedly");
                server_done = true;
                outcome = server_outcome(result);
            }
        }

        let timeout = self.config.server.shutdown_timeout;

        // Push streams never end by themselves; close them so the server can drain.
        stop_http_tx.send(()).ok();
        let disconnected = self.hub.disconnect_all();
        info!(subscribers = disconnected, "Stopping HTTP server");
        if !server_done {
            match tokio::time::timeout(timeout, &mut server).await {
                Ok(result) => outcome = server_outcome(result),
                Err(_) => {
                    warn!("HTTP server shutdown timed out");
                    server.abort();
                }
            }
        }

        shutdown_tx.send(()).ok();
        if let Some(generator) = generator {
            await_task("generator", generator, timeout).await;
        }

        if tokio::time::timeout(timeout, consumer.stop()).await.is_err() {
            warn!("Consumer shutdown timed out");
        } else {
            info!("Consumer stopped");
        }

        info!("Shutdown complete");
        outcome
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("config", &self.config)
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}

fn serve_address(config: &Config) -> String {
    format!("{}:{}", config.server.host, config.server.port)
}

fn server_outcome(
    result: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<(), StartupError> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(StartupError::Io(e)),
        Err(e) => Err(StartupError::Server(e.to_string())),
    }
}

async fn await_task(name: &'static str, mut handle: JoinHandle<()>, timeout: Duration) {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(())) => info!(task = name, "Task stopped"),
        Ok(Err(e)) => warn!(task = name, error = %e, "Task failed"),
        Err(_) => {
            warn!(task = name, "Task shutdown timed out");
            handle.abort();
        }
    }
}

#[cfg(feature = "redpanda")]
fn redpanda_bus(config: &BusConfig) -> Result<Arc<dyn EventBus>, StartupError> {
    let bus = flightfeed_redpanda::RedpandaEventBus::builder()
        .brokers(config.brokers.as_str())
        .auto_offset_reset(config.auto_offset_reset.as_str())
        .buffer_size(config.buffer_size)
        .build()?;
    info!(brokers = %config.brokers, "Using Redpanda event bus");
    Ok(Arc::new(bus))
}

#[cfg(not(feature = "redpanda"))]
fn redpanda_bus(_config: &BusConfig) -> Result<Arc<dyn EventBus>, StartupError> {
    Err(StartupError::FeatureDisabled("redpanda"))
}

/// Router serving the Prometheus scrape endpoint at `/metrics`.
#[must_use]
pub fn metrics_router(recorder: MetricsRecorder) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(recorder)
}

async fn render_metrics(State(recorder): State<MetricsRecorder>) -> String {
    recorder.render()
}
