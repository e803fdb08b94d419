use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::{RwLock, oneshot};

use crate::middleware::{CommandEndpoint, CommandMiddleware, CommandNext};
use crate::{Command, CommandHandler, DispatchError, Message, PendingDispatch};

struct Registration {
    type_id: TypeId,
    endpoint: CommandEndpoint,
}

struct Inner {
    handlers: RwLock<HashMap<&'static str, Registration>>,
    middleware: Vec<Arc<dyn CommandMiddleware>>,
}

/// Routes each command to the single handler registered for its type tag.
///
/// Cloning is cheap and clones share the registry. There is no global bus:
/// build one per application and pass it to whoever needs it.
#[derive(Clone)]
pub struct CommandBus {
    inner: Arc<Inner>,
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBus {
    /// A bus with no middleware.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> CommandBusBuilder {
        CommandBusBuilder::default()
    }

    /// Binds `handler` to `C::TYPE`.
    ///
    /// Fails with `RegistrationConflict` if the tag is taken; the existing
    /// handler is kept.
    pub async fn register<C, H>(&self, handler: H) -> Result<(), DispatchError>
    where
        C: Command,
        H: CommandHandler<C>,
    {
        let handler = Arc::new(handler);
        let endpoint: CommandEndpoint = Arc::new(
            move |message: Box<dyn Any + Send>| -> BoxFuture<'static, Result<(), DispatchError>> {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let command = message
                        .downcast::<C>()
                        .map_err(|_| DispatchError::TypeMismatch { type_tag: C::TYPE })?;
                    let message_id = command.message_id();
                    handler
                        .handle(*command)
                        .await
                        .map_err(|source| DispatchError::Handler {
                            type_tag: C::TYPE,
                            message_id,
                            source: Box::new(source),
                        })
                })
            },
        );

        let mut handlers = self.inner.handlers.write().await;
        match handlers.entry(C::TYPE) {
            Entry::Occupied(_) => {
                tracing::warn!(type_tag = C::TYPE, "duplicate command handler registration");
                Err(DispatchError::RegistrationConflict { type_tag: C::TYPE })
            }
            Entry::Vacant(slot) => {
                slot.insert(Registration {
                    type_id: TypeId::of::<C>(),
                    endpoint,
                });
                tracing::debug!(type_tag = C::TYPE, "command handler registered");
                Ok(())
            }
        }
    }

    /// Returns true if a handler is bound to `type_tag`.
    pub async fn is_registered(&self, type_tag: &str) -> bool {
        self.inner.handlers.read().await.contains_key(type_tag)
    }

    /// Validates the command, then runs it through the pipeline.
    ///
    /// A validation failure returns before the registry is touched.
    pub async fn send<C: Command>(&self, command: C) -> Result<(), DispatchError> {
        command
            .validate()
            .map_err(|source| DispatchError::ValidationFailed {
                type_tag: C::TYPE,
                source,
            })?;

        let endpoint = {
            let handlers = self.inner.handlers.read().await;
            let registration = handlers
                .get(C::TYPE)
                .ok_or(DispatchError::HandlerNotFound { type_tag: C::TYPE })?;
            if registration.type_id != TypeId::of::<C>() {
                return Err(DispatchError::TypeMismatch { type_tag: C::TYPE });
            }
            Arc::clone(&registration.endpoint)
        };

        CommandNext::new(&self.inner.middleware, &endpoint)
            .run(Box::new(command))
            .await
    }

    /// Runs [`CommandBus::send`] on a spawned task.
    ///
    /// The returned future yields the single result. Dropping it, or giving
    /// up via `wait_timeout`, does not stop the handler.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn send_async<C: Command>(&self, command: C) -> PendingDispatch<()> {
        let bus = self.clone();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = bus.send(command).await;
            // The caller may have stopped waiting.
            let _ = tx.send(result);
        });
        PendingDispatch::new(rx)
    }
}

/// Collects middleware for a [`CommandBus`], outermost first.
#[derive(Default)]
pub struct CommandBusBuilder {
    middleware: Vec<Arc<dyn CommandMiddleware>>,
}

impl CommandBusBuilder {
    pub fn layer<M: CommandMiddleware>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn layer_arc(mut self, middleware: Arc<dyn CommandMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn build(self) -> CommandBus {
        CommandBus {
            inner: Arc::new(Inner {
                handlers: RwLock::new(HashMap::new()),
                middleware: self.middleware,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use thiserror::Error;

    use super::*;
    use crate::{MessageMeta, ValidationError, ValidationMiddleware};

    struct Rename {
        meta: MessageMeta,
        name: String,
    }

    impl Rename {
        fn new(name: &str) -> Self {
            Self {
                meta: MessageMeta::new(),
                name: name.to_string(),
            }
        }
    }

    impl Message for Rename {
        const TYPE: &'static str = "Rename";

        fn meta(&self) -> &MessageMeta {
            &self.meta
        }
    }

    impl Command for Rename {
        fn validate(&self) -> Result<(), ValidationError> {
            ValidationError::ensure(!self.name.is_empty(), "name", "must not be empty")
        }
    }

    #[derive(Debug, Error)]
    #[error("name taken: {0}")]
    struct NameTaken(String);

    #[derive(Clone, Default)]
    struct Spy {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CommandHandler<Rename> for Spy {
        type Error = NameTaken;

        async fn handle(&self, command: Rename) -> Result<(), NameTaken> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if command.name == "taken" {
                return Err(NameTaken(command.name));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn send_invokes_handler_once() {
        let bus = CommandBus::new();
        let spy = Spy::default();
        bus.register::<Rename, _>(spy.clone()).await.unwrap();

        bus.send(Rename::new("acme")).await.unwrap();
        assert_eq!(spy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_error_is_forwarded_with_context() {
        let bus = CommandBus::new();
        bus.register::<Rename, _>(Spy::default()).await.unwrap();

        let command = Rename::new("taken");
        let id = command.message_id();
        let err = bus.send(command).await.unwrap_err();

        match &err {
            DispatchError::Handler {
                type_tag,
                message_id,
                ..
            } => {
                assert_eq!(*type_tag, "Rename");
                assert_eq!(*message_id, id);
            }
            other => panic!("expected handler error, got {other:?}"),
        }
        assert_eq!(err.handler_source::<NameTaken>().unwrap().0, "taken");
    }

    #[tokio::test]
    async fn invalid_command_never_reaches_handler() {
        let bus = CommandBus::builder().layer(ValidationMiddleware).build();
        let spy = Spy::default();
        bus.register::<Rename, _>(spy.clone()).await.unwrap();

        let err = bus.send(Rename::new("")).await.unwrap_err();
        assert!(matches!(err, DispatchError::ValidationFailed { .. }));
        assert_eq!(spy.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn validation_runs_before_lookup() {
        let bus = CommandBus::new();
        let err = bus.send(Rename::new("")).await.unwrap_err();
        assert!(matches!(err, DispatchError::ValidationFailed { .. }));
    }

    #[tokio::test]
    async fn unknown_type_is_not_found() {
        let bus = CommandBus::new();
        let err = bus.send(Rename::new("acme")).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::HandlerNotFound { type_tag: "Rename" }
        ));
    }

    #[tokio::test]
    async fn duplicate_registration_keeps_first_handler() {
        let bus = CommandBus::new();
        let first = Spy::default();
        let second = Spy::default();
        bus.register::<Rename, _>(first.clone()).await.unwrap();

        let err = bus.register::<Rename, _>(second.clone()).await.unwrap_err();
        assert!(matches!(err, DispatchError::RegistrationConflict { .. }));

        bus.send(Rename::new("acme")).await.unwrap();
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn send_async_delivers_result() {
        let bus = CommandBus::new();
        bus.register::<Rename, _>(Spy::default()).await.unwrap();

        bus.send_async(Rename::new("acme")).await.unwrap();
        let err = bus.send_async(Rename::new("taken")).await.unwrap_err();
        assert!(err.handler_source::<NameTaken>().is_some());
    }

    struct Slow {
        finished: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CommandHandler<Rename> for Slow {
        type Error = NameTaken;

        async fn handle(&self, _command: Rename) -> Result<(), NameTaken> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn deadline_does_not_cancel_handler() {
        let bus = CommandBus::new();
        let finished = Arc::new(AtomicUsize::new(0));
        bus.register::<Rename, _>(Slow {
            finished: Arc::clone(&finished),
        })
        .await
        .unwrap();

        let err = bus
            .send_async(Rename::new("acme"))
            .wait_timeout(Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::DeadlineExceeded(_)));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sends_each_run_once() {
        let bus = CommandBus::new();
        let spy = Spy::default();
        bus.register::<Rename, _>(spy.clone()).await.unwrap();

        let pending: Vec<_> = (0..32)
            .map(|i| bus.send_async(Rename::new(&format!("n{i}"))))
            .collect();
        for p in pending {
            p.await.unwrap();
        }
        assert_eq!(spy.calls.load(Ordering::SeqCst), 32);
    }
}
