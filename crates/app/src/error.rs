//! Application error types.

use dispatch::DispatchError;
use event_store::EventStoreError;
use thiserror::Error;

/// Errors raised while starting or running the service.
#[derive(Debug, Error)]
pub enum AppError {
    /// The event store could not be opened or migrated.
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Handler registration or dispatch failed.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// The log subscriber could not be installed.
    #[error("telemetry setup failed: {0}")]
    Telemetry(String),

    /// The Prometheus exporter could not be installed.
    #[error("metrics exporter setup failed: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

/// Convenience type alias for application results.
pub type Result<T> = std::result::Result<T, AppError>;
