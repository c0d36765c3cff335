//! The flightfeed server process.
//!
//! Wires the pipeline together from environment configuration:
//!
//! - [`config`]: settings and their defaults
//! - [`seed`]: the startup flight roster
//! - [`app`]: component construction, run loop and graceful shutdown
//!
//! The `flightfeed` binary is a thin wrapper over [`Application`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod seed;

pub use app::{Application, StartupError, metrics_router};
pub use config::{Config, ConfigError};
