//! Log subscriber and metrics exporter setup.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, LogFormat};
use crate::error::{AppError, Result};

/// Installs the global tracing subscriber.
///
/// The filter comes from `config.log_level`; an invalid directive falls back
/// to `info`.
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let json = config.log_format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .try_init()
        .map_err(|e| AppError::Telemetry(e.to_string()))
}

/// Starts the Prometheus exporter when `METRICS_ADDR` is configured.
///
/// Returns whether an exporter was installed. Without one, the `metrics`
/// facade discards everything it records.
pub fn init_metrics(config: &Config) -> Result<bool> {
    let Some(addr) = config.metrics_addr else {
        return Ok(false);
    };

    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_disabled_without_address() {
        let config = Config::default();
        assert!(!init_metrics(&config).unwrap());
    }
}
