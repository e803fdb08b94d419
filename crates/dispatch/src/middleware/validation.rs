use async_trait::async_trait;

use super::{AnyCommand, CommandMiddleware, CommandNext};
use crate::DispatchError;

/// Re-runs a command's own validation right before the handler.
///
/// `CommandBus::send` already validates on entry; this layer is for
/// pipelines that want the check next to the handler as well.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationMiddleware;

#[async_trait]
impl CommandMiddleware for ValidationMiddleware {
    async fn handle(
        &self,
        command: Box<dyn AnyCommand>,
        next: CommandNext<'_>,
    ) -> Result<(), DispatchError> {
        if let Err(source) = command.validate() {
            tracing::debug!(type_tag = command.type_tag(), %source, "command rejected");
            return Err(DispatchError::ValidationFailed {
                type_tag: command.type_tag(),
                source,
            });
        }
        next.run(command).await
    }
}
