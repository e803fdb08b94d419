use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::RwLock;

use crate::middleware::{QueryEndpoint, QueryMiddleware, QueryNext, QueryOutput};
use crate::{DispatchError, Message, Query, QueryHandler};

struct Registration {
    type_id: TypeId,
    endpoint: QueryEndpoint,
}

struct Inner {
    handlers: RwLock<HashMap<&'static str, Registration>>,
    middleware: Vec<Arc<dyn QueryMiddleware>>,
}

/// Routes each query to the single handler registered for its type tag.
///
/// Queries carry no self-validation; a query that type-checks is askable.
#[derive(Clone)]
pub struct QueryBus {
    inner: Arc<Inner>,
}

impl Default for QueryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryBus {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> QueryBusBuilder {
        QueryBusBuilder::default()
    }

    /// Binds `handler` to `Q::TYPE`.
    pub async fn register<Q, H>(&self, handler: H) -> Result<(), DispatchError>
    where
        Q: Query,
        H: QueryHandler<Q>,
    {
        let handler = Arc::new(handler);
        let endpoint: QueryEndpoint = Arc::new(
            move |message: Box<dyn Any + Send>| -> BoxFuture<'static, Result<QueryOutput, DispatchError>> {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    let query = message
                        .downcast::<Q>()
                        .map_err(|_| DispatchError::TypeMismatch { type_tag: Q::TYPE })?;
                    let message_id = query.message_id();
                    let output = handler.handle(*query).await.map_err(|source| {
                        DispatchError::Handler {
                            type_tag: Q::TYPE,
                            message_id,
                            source: Box::new(source),
                        }
                    })?;
                    Ok(Arc::new(output) as QueryOutput)
                })
            },
        );

        let mut handlers = self.inner.handlers.write().await;
        match handlers.entry(Q::TYPE) {
            Entry::Occupied(_) => {
                tracing::warn!(type_tag = Q::TYPE, "duplicate query handler registration");
                Err(DispatchError::RegistrationConflict { type_tag: Q::TYPE })
            }
            Entry::Vacant(slot) => {
                slot.insert(Registration {
                    type_id: TypeId::of::<Q>(),
                    endpoint,
                });
                tracing::debug!(type_tag = Q::TYPE, "query handler registered");
                Ok(())
            }
        }
    }

    pub async fn is_registered(&self, type_tag: &str) -> bool {
        self.inner.handlers.read().await.contains_key(type_tag)
    }

    /// Runs the query through the pipeline and returns the handler's output.
    pub async fn send<Q: Query>(&self, query: Q) -> Result<Q::Output, DispatchError> {
        let endpoint = {
            let handlers = self.inner.handlers.read().await;
            let registration = handlers
                .get(Q::TYPE)
                .ok_or(DispatchError::HandlerNotFound { type_tag: Q::TYPE })?;
            if registration.type_id != TypeId::of::<Q>() {
                return Err(DispatchError::TypeMismatch { type_tag: Q::TYPE });
            }
            Arc::clone(&registration.endpoint)
        };

        let output = QueryNext::new(&self.inner.middleware, &endpoint)
            .run(Box::new(query))
            .await?;

        output
            .downcast_ref::<Q::Output>()
            .cloned()
            .ok_or(DispatchError::TypeMismatch { type_tag: Q::TYPE })
    }
}

/// Collects middleware for a [`QueryBus`], outermost first.
#[derive(Default)]
pub struct QueryBusBuilder {
    middleware: Vec<Arc<dyn QueryMiddleware>>,
}

impl QueryBusBuilder {
    pub fn layer<M: QueryMiddleware>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn layer_arc(mut self, middleware: Arc<dyn QueryMiddleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn build(self) -> QueryBus {
        QueryBus {
            inner: Arc::new(Inner {
                handlers: RwLock::new(HashMap::new()),
                middleware: self.middleware,
            }),
        }
    }
}
