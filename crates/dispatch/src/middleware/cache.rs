use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OnceCell, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{AnyQuery, QueryMiddleware, QueryNext, QueryOutput};
use crate::DispatchError;

struct Cached {
    value: QueryOutput,
    expires_at: Instant,
}

/// Empty while the first dispatch for its key is still running.
type Slot = Arc<OnceCell<Cached>>;

type Entries = RwLock<HashMap<String, Slot>>;

fn is_live(slot: &Slot, now: Instant) -> bool {
    slot.get().is_none_or(|cached| cached.expires_at > now)
}

/// Caches successful query results for a fixed TTL.
///
/// The key is the query's type tag plus its serialized payload. Identical
/// queries that miss at the same time share one dispatch: the first caller
/// runs the handler and the others wait for its result. Failed dispatches
/// are never cached; a waiter whose leader failed runs the handler itself.
/// The cache is local to this process.
#[derive(Clone)]
pub struct CachingMiddleware {
    entries: Arc<Entries>,
    ttl: Duration,
}

impl CachingMiddleware {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of entries, expired and in-flight ones included until the
    /// next sweep.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drops every cached result.
    pub async fn invalidate_all(&self) {
        self.entries.write().await.clear();
    }

    /// Removes expired entries, and empty slots nobody is waiting on, and
    /// returns how many were dropped.
    pub async fn sweep(&self) -> usize {
        sweep_entries(&self.entries).await
    }

    /// Starts a background task that sweeps every `every`.
    ///
    /// The task holds only a weak reference and stops once the last clone of
    /// this middleware is dropped.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let entries: Weak<Entries> = Arc::downgrade(&self.entries);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                let evicted = sweep_entries(&entries).await;
                if evicted > 0 {
                    tracing::debug!(evicted, "query cache swept");
                }
            }
        })
    }
}

impl CachingMiddleware {
    /// Returns the live slot for `key`, replacing an expired one.
    async fn slot(&self, key: String) -> Slot {
        let now = Instant::now();
        if let Some(slot) = self.entries.read().await.get(&key)
            && is_live(slot, now)
        {
            return Arc::clone(slot);
        }

        let mut entries = self.entries.write().await;
        let slot = entries.entry(key).or_default();
        if !is_live(slot, now) {
            *slot = Slot::default();
        }
        Arc::clone(slot)
    }
}

async fn sweep_entries(entries: &Entries) -> usize {
    let now = Instant::now();
    let mut entries = entries.write().await;
    let before = entries.len();
    entries.retain(|_, slot| {
        let abandoned = !slot.initialized() && Arc::strong_count(slot) == 1;
        is_live(slot, now) && !abandoned
    });
    before - entries.len()
}

#[async_trait]
impl QueryMiddleware for CachingMiddleware {
    async fn handle(
        &self,
        query: Box<dyn AnyQuery>,
        next: QueryNext<'_>,
    ) -> Result<QueryOutput, DispatchError> {
        let key = match query.cache_key() {
            Ok(key) => key,
            Err(error) => {
                tracing::warn!(type_tag = query.type_tag(), %error, "query not cacheable");
                return next.run(query).await;
            }
        };

        let slot = self.slot(key).await;
        if let Some(cached) = slot.get() {
            tracing::trace!(type_tag = query.type_tag(), "query cache hit");
            return Ok(Arc::clone(&cached.value));
        }

        let ttl = self.ttl;
        let cached = slot
            .get_or_try_init(|| async move {
                let value = next.run(query).await?;
                Ok::<_, DispatchError>(Cached {
                    value,
                    expires_at: Instant::now() + ttl,
                })
            })
            .await?;
        Ok(Arc::clone(&cached.value))
    }
}
