//! Configuration loaded from environment variables.
//!
//! Every setting has a default, so an empty environment runs a complete
//! single-process pipeline (in-memory bus and storage). A `.env` file in the
//! working directory is read first when present.

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// A setting that could not be used.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The value could not be parsed
    #[error("Invalid value for {key}: {value:?}")]
    Invalid {
        /// Environment variable name
        key: &'static str,
        /// The rejected value
        value: String,
    },

    /// A setting required by another one is absent
    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Which transport carries flight events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    /// In-process bus, single node only
    Memory,
    /// Kafka-compatible broker
    Redpanda,
}

impl FromStr for BusKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redpanda" | "kafka" => Ok(Self::Redpanda),
            _ => Err(()),
        }
    }
}

/// Where flights are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// In-process map, lost on restart
    Memory,
    /// `PostgreSQL` via `DATABASE_URL`
    Postgres,
}

impl FromStr for StorageKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            _ => Err(()),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// HTTP listeners and shutdown
    pub server: ServerConfig,
    /// Event transport
    pub bus: BusConfig,
    /// Flight storage
    pub storage: StorageConfig,
    /// Event generator loop
    pub generator: GeneratorConfig,
    /// Event consumer
    pub consumer: ConsumerConfig,
    /// Push connections
    pub hub: HubConfig,
}

/// HTTP listeners and shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host for the push and health endpoints
    pub host: String,
    /// Port for the push and health endpoints
    pub port: u16,
    /// Host for Prometheus scraping
    pub metrics_host: String,
    /// Port for Prometheus scraping
    pub metrics_port: u16,
    /// Bound on each shutdown step
    pub shutdown_timeout: Duration,
}

/// Event transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Transport to use
    pub kind: BusKind,
    /// Comma-separated bootstrap servers
    pub brokers: String,
    /// Topic flight events are published to
    pub topic: String,
    /// Consumer group of the applier
    pub consumer_group: String,
    /// Where a new consumer group starts reading
    pub auto_offset_reset: String,
    /// Records buffered per subscription
    pub buffer_size: usize,
    /// Records the in-memory bus keeps per partition
    pub memory_retention: usize,
}

/// Flight storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Storage to use
    pub kind: StorageKind,
    /// Connection string, required for `postgres`
    pub database_url: Option<String>,
    /// Pool size
    pub max_connections: u32,
}

/// Event generator loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Whether this process generates events
    pub enabled: bool,
    /// Time between generated events
    pub interval: Duration,
}

/// Event consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerConfig {
    /// Parallel per-key workers
    pub workers: usize,
    /// Pause before resubscribing after the stream fails
    pub retry_delay: Duration,
}

/// Push connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    /// Notifications queued per viewer before it is pruned
    pub subscriber_buffer: usize,
    /// Maximum lifetime of a push connection; `None` is unbounded
    pub subscriber_timeout: Option<Duration>,
    /// Keep-alive interval on idle push connections
    pub keep_alive: Duration,
}

impl Config {
    /// Load from the process environment, after reading `.env` if present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a value cannot be parsed or `DATABASE_URL`
    /// is missing with postgres storage.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(lookup);

        let storage = StorageConfig {
            kind: env.parse("FLIGHTFEED_STORAGE", StorageKind::Memory)?,
            database_url: env.get("DATABASE_URL"),
            max_connections: env.parse("DATABASE_MAX_CONNECTIONS", 10)?,
        };
        if storage.kind == StorageKind::Postgres && storage.database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let subscriber_timeout = env.parse("SUBSCRIBER_TIMEOUT_SECS", 0)?;

        Ok(Self {
            server: ServerConfig {
                host: env.string("HOST", "0.0.0.0"),
                port: env.parse("PORT", 8080)?,
                metrics_host: env.string("METRICS_HOST", "0.0.0.0"),
                metrics_port: env.parse("METRICS_PORT", 9090)?,
                shutdown_timeout: Duration::from_secs(env.parse("SHUTDOWN_TIMEOUT", 10)?),
            },
            bus: BusConfig {
                kind: env.parse("FLIGHTFEED_BUS", BusKind::Memory)?,
                brokers: env.string("REDPANDA_BROKERS", "localhost:9092"),
                topic: env.string("FLIGHT_EVENTS_TOPIC", flightfeed_core::FLIGHT_EVENTS_TOPIC),
                consumer_group: env.string("CONSUMER_GROUP", "flight-event-applier"),
                auto_offset_reset: env.string("REDPANDA_AUTO_OFFSET_RESET", "latest"),
                buffer_size: env.parse("REDPANDA_BUFFER_SIZE", 1000)?,
                memory_retention: env
                    .parse("MEMORY_BUS_RETENTION", flightfeed_testing::DEFAULT_RETENTION)?,
            },
            storage,
            generator: GeneratorConfig {
                enabled: env.parse("GENERATOR_ENABLED", true)?,
                interval: Duration::from_millis(env.parse("GENERATOR_INTERVAL_MS", 5000)?),
            },
            consumer: ConsumerConfig {
                workers: env.parse("CONSUMER_WORKERS", 4)?,
                retry_delay: Duration::from_millis(env.parse("CONSUMER_RETRY_DELAY_MS", 5000)?),
            },
            hub: HubConfig {
                subscriber_buffer: env.parse("SUBSCRIBER_BUFFER", 64)?,
                subscriber_timeout: (subscriber_timeout > 0)
                    .then(|| Duration::from_secs(subscriber_timeout)),
                keep_alive: Duration::from_secs(env.parse("SSE_KEEP_ALIVE_SECS", 15)?),
            },
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { key, value }),
        }
    }
}
