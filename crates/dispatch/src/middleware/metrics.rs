use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{
    AnyCommand, AnyQuery, CommandMiddleware, CommandNext, QueryMiddleware, QueryNext, QueryOutput,
};
use crate::{DispatchError, MessageKind};

/// Destination for per-dispatch measurements.
///
/// Implementations must not block; a sink that cannot record drops the sample.
pub trait MetricsSink: Send + Sync + 'static {
    fn record(&self, kind: MessageKind, type_tag: &'static str, success: bool, duration: Duration);
}

/// Forwards measurements to the `metrics` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecorderSink;

impl MetricsSink for RecorderSink {
    fn record(&self, kind: MessageKind, type_tag: &'static str, success: bool, duration: Duration) {
        let outcome = if success { "ok" } else { "error" };
        ::metrics::counter!(
            "dispatch_messages_total",
            "kind" => kind.as_str(),
            "type_tag" => type_tag,
            "outcome" => outcome
        )
        .increment(1);
        ::metrics::histogram!(
            "dispatch_duration_seconds",
            "kind" => kind.as_str(),
            "type_tag" => type_tag
        )
        .record(duration.as_secs_f64());
    }
}

/// Records (type tag, success, duration) for every dispatch.
#[derive(Clone)]
pub struct MetricsMiddleware {
    sink: Arc<dyn MetricsSink>,
}

impl MetricsMiddleware {
    pub fn new(sink: Arc<dyn MetricsSink>) -> Self {
        Self { sink }
    }
}

impl Default for MetricsMiddleware {
    fn default() -> Self {
        Self::new(Arc::new(RecorderSink))
    }
}

#[async_trait]
impl CommandMiddleware for MetricsMiddleware {
    async fn handle(
        &self,
        command: Box<dyn AnyCommand>,
        next: CommandNext<'_>,
    ) -> Result<(), DispatchError> {
        let type_tag = command.type_tag();
        let started = Instant::now();
        let result = next.run(command).await;
        self.sink.record(
            MessageKind::Command,
            type_tag,
            result.is_ok(),
            started.elapsed(),
        );
        result
    }
}

#[async_trait]
impl QueryMiddleware for MetricsMiddleware {
    async fn handle(
        &self,
        query: Box<dyn AnyQuery>,
        next: QueryNext<'_>,
    ) -> Result<QueryOutput, DispatchError> {
        let type_tag = query.type_tag();
        let started = Instant::now();
        let result = next.run(query).await;
        self.sink
            .record(MessageKind::Query, type_tag, result.is_ok(), started.elapsed());
        result
    }
}
