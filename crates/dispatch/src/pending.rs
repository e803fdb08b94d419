use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::DispatchError;

/// The eventual result of a spawned dispatch.
///
/// Resolves exactly once. Dropping it abandons the result, never the work.
#[must_use = "dropping a PendingDispatch discards the handler's result"]
pub struct PendingDispatch<T> {
    rx: oneshot::Receiver<Result<T, DispatchError>>,
}

impl<T> PendingDispatch<T> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<T, DispatchError>>) -> Self {
        Self { rx }
    }

    /// Waits at most `deadline` for the result.
    ///
    /// On timeout the handler keeps running; only the caller stops waiting.
    pub async fn wait_timeout(self, deadline: Duration) -> Result<T, DispatchError> {
        match tokio::time::timeout(deadline, self).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::DeadlineExceeded(deadline)),
        }
    }
}

impl<T> Future for PendingDispatch<T> {
    type Output = Result<T, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // The task panicked or was aborted before sending.
            Poll::Ready(Err(_)) => Poll::Ready(Err(DispatchError::TaskFailed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
