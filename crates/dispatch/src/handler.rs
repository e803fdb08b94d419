use async_trait::async_trait;

use crate::{Command, Query};

/// Handles one command type.
///
/// The error type is boxed into [`crate::DispatchError::Handler`] by the bus,
/// so callers can still recover it with `handler_source`.
#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn handle(&self, command: C) -> Result<(), Self::Error>;
}

/// Handles one query type.
#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn handle(&self, query: Q) -> Result<Q::Output, Self::Error>;
}
