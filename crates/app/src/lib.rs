//! Quoting service wiring.
//!
//! Builds the command and query buses with their middleware, opens the event
//! store selected by configuration and registers the quote handlers. Query
//! results are cached for the configured TTL, so a read may trail a command
//! by up to that long.

pub mod config;
pub mod error;
pub mod telemetry;

use std::sync::Arc;

use common::{Clock, SystemClock};
use dispatch::{
    CachingMiddleware, Command, CommandBus, DispatchError, LoggingMiddleware, MetricsMiddleware,
    QueryBus, ValidationMiddleware,
};
use event_store::{EventStore, EventStoreError, InMemoryEventStore, PostgresEventStore};
use tokio::task::JoinHandle;

pub use config::{Config, LogFormat};
pub use error::{AppError, Result};

/// A running quoting core: buses, store and the cache sweeper.
pub struct Application {
    config: Config,
    commands: CommandBus,
    queries: QueryBus,
    cache: CachingMiddleware,
    store: Arc<dyn EventStore>,
    sweeper: JoinHandle<()>,
}

impl Application {
    /// Opens the configured event store and wires everything against the
    /// system clock.
    pub async fn build(config: Config) -> Result<Self> {
        let store: Arc<dyn EventStore> = match &config.database_url {
            Some(url) => {
                let store = PostgresEventStore::connect(url).await?;
                tracing::info!("using postgres event store");
                Arc::new(store)
            }
            None => {
                tracing::info!("using in-memory event store");
                Arc::new(InMemoryEventStore::new())
            }
        };

        Self::with_store(config, store, Arc::new(SystemClock)).await
    }

    /// Wires the buses over an existing store and clock.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn with_store(
        config: Config,
        store: Arc<dyn EventStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let mut commands = CommandBus::builder()
            .layer(LoggingMiddleware)
            .layer(MetricsMiddleware::default());
        if config.command_validation {
            commands = commands.layer(ValidationMiddleware);
        }
        let commands = commands.build();

        let cache = CachingMiddleware::new(config.query_cache_ttl);
        let queries = QueryBus::builder()
            .layer(LoggingMiddleware)
            .layer(MetricsMiddleware::default())
            .layer(cache.clone())
            .build();

        domain::register_quote_handlers(&commands, &queries, Arc::clone(&store), clock).await?;

        let sweeper = cache.spawn_sweeper(config.query_cache_sweep);
        tracing::info!(
            validation = config.command_validation,
            cache_ttl_secs = config.query_cache_ttl.as_secs(),
            "application ready"
        );

        Ok(Self {
            config,
            commands,
            queries,
            cache,
            store,
            sweeper,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn commands(&self) -> &CommandBus {
        &self.commands
    }

    pub fn queries(&self) -> &QueryBus {
        &self.queries
    }

    pub fn cache(&self) -> &CachingMiddleware {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    /// Sends a command, retrying on version conflicts up to the configured
    /// number of attempts.
    pub async fn send<C: Command + Clone>(&self, command: C) -> std::result::Result<(), DispatchError> {
        send_with_retry(&self.commands, command, self.config.conflict_retry_attempts).await
    }

    /// Stops the cache sweeper.
    pub fn shutdown(self) {
        self.sweeper.abort();
        tracing::info!("application stopped");
    }
}

/// Sends `command`, resending it while the handler fails with a concurrency
/// conflict.
///
/// Each attempt reloads the aggregate inside the handler, so a retry runs the
/// command against the state that won the race. Any other failure, or a
/// conflict on the last of `attempts`, is returned as is.
pub async fn send_with_retry<C: Command + Clone>(
    bus: &CommandBus,
    command: C,
    attempts: u32,
) -> std::result::Result<(), DispatchError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match bus.send(command.clone()).await {
            Err(err) if attempt < attempts && is_conflict(&err) => {
                tracing::warn!(
                    type_tag = C::TYPE,
                    attempt,
                    attempts,
                    "concurrency conflict, retrying"
                );
                metrics::counter!("dispatch_conflict_retries_total", "type_tag" => C::TYPE)
                    .increment(1);
                attempt += 1;
                tokio::task::yield_now().await;
            }
            result => return result,
        }
    }
}

fn is_conflict(err: &DispatchError) -> bool {
    err.handler_source::<EventStoreError>()
        .is_some_and(EventStoreError::is_concurrency_conflict)
}
