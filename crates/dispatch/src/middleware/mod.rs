//! The dispatch pipeline.
//!
//! Each bus runs its middleware in registration order, outermost first. A
//! middleware receives the message in erased form plus a `Next` continuation
//! that runs the remaining stages and finally the handler. Middleware may
//! short-circuit (validation failure, cache hit) but must forward the result it
//! gets from `Next` unchanged.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::{Command, DispatchError, Message, MessageMeta, Query, ValidationError};

mod cache;
mod logging;
mod metrics;
mod validation;

pub use cache::CachingMiddleware;
pub use logging::LoggingMiddleware;
pub use self::metrics::{MetricsMiddleware, MetricsSink, RecorderSink};
pub use validation::ValidationMiddleware;

/// A query result with its concrete type erased.
pub type QueryOutput = Arc<dyn Any + Send + Sync>;

pub(crate) type CommandEndpoint =
    Arc<dyn Fn(Box<dyn Any + Send>) -> BoxFuture<'static, Result<(), DispatchError>> + Send + Sync>;

pub(crate) type QueryEndpoint = Arc<
    dyn Fn(Box<dyn Any + Send>) -> BoxFuture<'static, Result<QueryOutput, DispatchError>>
        + Send
        + Sync,
>;

/// A command as middleware sees it.
pub trait AnyCommand: Send + Sync {
    fn type_tag(&self) -> &'static str;
    fn meta(&self) -> &MessageMeta;
    fn validate(&self) -> Result<(), ValidationError>;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<C: Command> AnyCommand for C {
    fn type_tag(&self) -> &'static str {
        C::TYPE
    }

    fn meta(&self) -> &MessageMeta {
        Message::meta(self)
    }

    fn validate(&self) -> Result<(), ValidationError> {
        Command::validate(self)
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

/// A query as middleware sees it.
pub trait AnyQuery: Send + Sync {
    fn type_tag(&self) -> &'static str;
    fn meta(&self) -> &MessageMeta;
    /// Type tag plus serialized payload.
    fn cache_key(&self) -> Result<String, serde_json::Error>;
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<Q: Query> AnyQuery for Q {
    fn type_tag(&self) -> &'static str {
        Q::TYPE
    }

    fn meta(&self) -> &MessageMeta {
        Message::meta(self)
    }

    fn cache_key(&self) -> Result<String, serde_json::Error> {
        Ok(format!("{}:{}", Q::TYPE, serde_json::to_string(self)?))
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

#[async_trait]
pub trait CommandMiddleware: Send + Sync + 'static {
    async fn handle(
        &self,
        command: Box<dyn AnyCommand>,
        next: CommandNext<'_>,
    ) -> Result<(), DispatchError>;
}

#[async_trait]
pub trait QueryMiddleware: Send + Sync + 'static {
    async fn handle(
        &self,
        query: Box<dyn AnyQuery>,
        next: QueryNext<'_>,
    ) -> Result<QueryOutput, DispatchError>;
}

/// The rest of a command pipeline.
pub struct CommandNext<'a> {
    rest: &'a [Arc<dyn CommandMiddleware>],
    endpoint: &'a CommandEndpoint,
}

impl<'a> CommandNext<'a> {
    pub(crate) fn new(
        middleware: &'a [Arc<dyn CommandMiddleware>],
        endpoint: &'a CommandEndpoint,
    ) -> Self {
        Self {
            rest: middleware,
            endpoint,
        }
    }

    pub fn run(self, command: Box<dyn AnyCommand>) -> BoxFuture<'a, Result<(), DispatchError>> {
        match self.rest.split_first() {
            Some((head, tail)) => {
                let next = CommandNext {
                    rest: tail,
                    endpoint: self.endpoint,
                };
                head.handle(command, next)
            }
            None => (self.endpoint)(command.into_any()),
        }
    }
}

/// The rest of a query pipeline.
pub struct QueryNext<'a> {
    rest: &'a [Arc<dyn QueryMiddleware>],
    endpoint: &'a QueryEndpoint,
}

impl<'a> QueryNext<'a> {
    pub(crate) fn new(
        middleware: &'a [Arc<dyn QueryMiddleware>],
        endpoint: &'a QueryEndpoint,
    ) -> Self {
        Self {
            rest: middleware,
            endpoint,
        }
    }

    pub fn run(self, query: Box<dyn AnyQuery>) -> BoxFuture<'a, Result<QueryOutput, DispatchError>> {
        match self.rest.split_first() {
            Some((head, tail)) => {
                let next = QueryNext {
                    rest: tail,
                    endpoint: self.endpoint,
                };
                head.handle(query, next)
            }
            None => (self.endpoint)(query.into_any()),
        }
    }
}
