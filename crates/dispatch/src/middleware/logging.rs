use std::time::Instant;

use async_trait::async_trait;

use super::{
    AnyCommand, AnyQuery, CommandMiddleware, CommandNext, QueryMiddleware, QueryNext, QueryOutput,
};
use crate::{DispatchError, MessageId, MessageKind};

/// Logs start, duration and outcome of every dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

fn log_outcome<T>(
    kind: MessageKind,
    type_tag: &'static str,
    message_id: MessageId,
    started: Instant,
    result: &Result<T, DispatchError>,
) {
    let duration_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(_) => tracing::info!(
            %kind,
            type_tag,
            %message_id,
            duration_ms,
            outcome = "ok",
            "dispatch completed"
        ),
        Err(error) => tracing::warn!(
            %kind,
            type_tag,
            %message_id,
            duration_ms,
            outcome = "error",
            %error,
            "dispatch failed"
        ),
    }
}

#[async_trait]
impl CommandMiddleware for LoggingMiddleware {
    async fn handle(
        &self,
        command: Box<dyn AnyCommand>,
        next: CommandNext<'_>,
    ) -> Result<(), DispatchError> {
        let type_tag = command.type_tag();
        let message_id = command.meta().id;
        tracing::debug!(kind = "command", type_tag, %message_id, "dispatch started");

        let started = Instant::now();
        let result = next.run(command).await;
        log_outcome(MessageKind::Command, type_tag, message_id, started, &result);
        result
    }
}

#[async_trait]
impl QueryMiddleware for LoggingMiddleware {
    async fn handle(
        &self,
        query: Box<dyn AnyQuery>,
        next: QueryNext<'_>,
    ) -> Result<QueryOutput, DispatchError> {
        let type_tag = query.type_tag();
        let message_id = query.meta().id;
        tracing::debug!(kind = "query", type_tag, %message_id, "dispatch started");

        let started = Instant::now();
        let result = next.run(query).await;
        log_outcome(MessageKind::Query, type_tag, message_id, started, &result);
        result
    }
}
