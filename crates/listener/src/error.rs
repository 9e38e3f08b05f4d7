use thiserror::Error;

use transfer_feed_domain::{
    config::ConfigError, services::telemetry::TelemetryError, storage::StorageError,
};

use crate::sink::SinkError;
use crate::supervisor::SupervisorError;

/// Errors that stop the listener binary during bootstrap or shutdown.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("handler registration failed: {0}")]
    Sink(#[from] SinkError),
    #[error("supervisor error: {0}")]
    Supervisor(#[from] SupervisorError),
    #[error("failed to listen for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
}
