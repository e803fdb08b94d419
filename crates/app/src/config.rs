//! Application configuration loaded from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: Postgres event store; in-memory when unset
/// - `METRICS_ADDR`: Prometheus listener address; no exporter when unset
/// - `QUERY_CACHE_TTL_SECS`: query cache lifetime (default: `30`)
/// - `QUERY_CACHE_SWEEP_SECS`: cache eviction interval (default: `60`)
/// - `COMMAND_VALIDATION_LAYER`: install the validation middleware (default: `true`)
/// - `CONFLICT_RETRY_ATTEMPTS`: attempts for conflicting commands (default: `3`)
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub metrics_addr: Option<SocketAddr>,
    pub query_cache_ttl: Duration,
    pub query_cache_sweep: Duration,
    pub command_validation: bool,
    pub conflict_retry_attempts: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |key: &str, fallback: Duration| {
            parsed::<u64, _>(&lookup, key)
                .filter(|s| *s > 0)
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };

        Self {
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parsed(&lookup, "LOG_FORMAT").unwrap_or(defaults.log_format),
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            metrics_addr: parsed(&lookup, "METRICS_ADDR"),
            query_cache_ttl: secs("QUERY_CACHE_TTL_SECS", defaults.query_cache_ttl),
            query_cache_sweep: secs("QUERY_CACHE_SWEEP_SECS", defaults.query_cache_sweep),
            command_validation: parsed(&lookup, "COMMAND_VALIDATION_LAYER")
                .unwrap_or(defaults.command_validation),
            conflict_retry_attempts: parsed::<u32, _>(&lookup, "CONFLICT_RETRY_ATTEMPTS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.conflict_retry_attempts),
        }
    }
}

fn parsed<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key).and_then(|value| value.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            metrics_addr: None,
            query_cache_ttl: Duration::from_secs(30),
            query_cache_sweep: Duration::from_secs(60),
            command_validation: true,
            conflict_retry_attempts: 3,
        }
    }
}
