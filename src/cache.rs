use crate::domain::{AggregateId, AggregateRoot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Thread-safe in-memory aggregate snapshot cache. Best-effort: every
/// caller in this crate logs and swallows refresh failures (§4.5, §7) —
/// the event is already durable, the cache just repopulates on next load.
#[async_trait]
pub trait MemoryCache<A: AggregateRoot>: Send + Sync {
    async fn get(&self, aggregate_id: &AggregateId) -> Option<A>;
    async fn set(&self, aggregate: A);
}

pub type DynMemoryCache<A> = Arc<dyn MemoryCache<A>>;

/// Grounded in the teacher's `InMemoryPersist` snapshot map
/// (`src/es/inmemory.rs`) — an `Arc<Mutex<HashMap>>` keyed by aggregate id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache<A: AggregateRoot> {
    snapshots: Arc<Mutex<HashMap<AggregateId, A>>>,
}

impl<A: AggregateRoot> InMemoryCache<A> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<A: AggregateRoot> MemoryCache<A> for InMemoryCache<A> {
    async fn get(&self, aggregate_id: &AggregateId) -> Option<A> {
        self.snapshots.lock().await.get(aggregate_id).cloned()
    }

    async fn set(&self, aggregate: A) {
        self.snapshots
            .lock()
            .await
            .insert(aggregate.unique_id(), aggregate);
    }
}
