//! Command and query dispatch.
//!
//! Each bus maps a message type tag to exactly one handler. Handlers are
//! registered with their concrete types and wrapped in an erased adapter once,
//! at registration; dispatch looks the adapter up under a shared lock and runs
//! it through the bus's middleware pipeline without holding that lock.

pub mod command_bus;
pub mod error;
pub mod handler;
pub mod message;
pub mod middleware;
pub mod pending;
pub mod query_bus;

pub use command_bus::{CommandBus, CommandBusBuilder};
pub use error::{DispatchError, HandlerError, ValidationError};
pub use handler::{CommandHandler, QueryHandler};
pub use message::{Command, Message, MessageId, MessageKind, MessageMeta, Query};
pub use middleware::{
    AnyCommand, AnyQuery, CachingMiddleware, CommandMiddleware, CommandNext, LoggingMiddleware,
    MetricsMiddleware, MetricsSink, QueryMiddleware, QueryNext, QueryOutput, RecorderSink,
    ValidationMiddleware,
};
pub use pending::PendingDispatch;
pub use query_bus::{QueryBus, QueryBusBuilder};
