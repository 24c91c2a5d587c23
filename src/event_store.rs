use crate::domain::{AggregateId, AggregateRoot, CommandId, DomainEventStream};
use crate::retry::CommitIoError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The three outcomes `EventStore::append` may report. These are not
/// errors — they are first-class transitions the commit state machine
/// branches on (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Success,
    /// Another stream already occupies `(aggregate_id, version)`.
    DuplicateEvent,
    /// A stream already exists for `(aggregate_id, command_id)`.
    DuplicateCommand,
}

/// Durable, append-only log of event streams keyed by
/// `(aggregate_id, version)` with a secondary uniqueness constraint on
/// `(aggregate_id, command_id)`. Transient I/O problems are reported via
/// `CommitIoError::Transient` and retried by the caller (§4.4); anything
/// the implementation considers unrecoverable is `CommitIoError::Terminal`.
#[async_trait]
pub trait EventStore<A>: Debug + Send + Sync
where
    A: AggregateRoot,
{
    async fn append(&self, stream: DomainEventStream<A>) -> Result<AppendOutcome, CommitIoError>;

    async fn find_by_command(
        &self,
        aggregate_id: &AggregateId,
        command_id: &CommandId,
    ) -> Result<Option<DomainEventStream<A>>, CommitIoError>;

    async fn find_by_version(
        &self,
        aggregate_id: &AggregateId,
        version: usize,
    ) -> Result<Option<DomainEventStream<A>>, CommitIoError>;

    /// All streams for `aggregate_id`, ordered by version. Backs the
    /// concurrency-conflict recovery path's `UpdateAggregateToLatestVersion`
    /// (§4.3): the state machine replays this into a fresh aggregate to
    /// refresh the cache ahead of the retried command.
    async fn load_all(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Vec<DomainEventStream<A>>, CommitIoError>;
}

pub type DynEventStore<A> = Arc<dyn EventStore<A>>;

/// In-memory `EventStore`, enforcing both uniqueness invariants from
/// spec §3. Grounded in the teacher's `InMemoryPersist`
/// (`src/es/inmemory.rs`): an `Arc<Mutex<HashMap<...>>>` journal guarded
/// by a single lock per aggregate bucket, swapped here for a single
/// global lock since the commit core already serializes per-aggregate
/// access upstream (§5) — this store only needs to be safe under
/// cross-partition concurrent writers to distinct aggregates.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore<A>
where
    A: AggregateRoot,
{
    journal: Arc<Mutex<HashMap<AggregateId, Vec<DomainEventStream<A>>>>>,
    fail_next: Arc<std::sync::atomic::AtomicU32>,
}

impl<A: AggregateRoot> InMemoryEventStore<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test hook: the next `n` calls to `append` fail with a transient
    /// error before the real append logic runs.
    pub fn fail_next_appends(&self, n: u32) {
        self.fail_next.store(n, std::sync::atomic::Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        let mut remaining = self.fail_next.load(std::sync::atomic::Ordering::SeqCst);
        if remaining == 0 {
            return false;
        }
        remaining -= 1;
        self.fail_next
            .store(remaining, std::sync::atomic::Ordering::SeqCst);
        true
    }
}

#[async_trait]
impl<A> EventStore<A> for InMemoryEventStore<A>
where
    A: AggregateRoot,
{
    async fn append(&self, stream: DomainEventStream<A>) -> Result<AppendOutcome, CommitIoError> {
        if self.take_injected_failure() {
            return Err(CommitIoError::Transient(
                "simulated event store fault".to_string(),
            ));
        }
        let mut journal = self.journal.lock().await;
        let bucket = journal.entry(stream.aggregate_id.clone()).or_default();

        if bucket.iter().any(|s| s.command_id == stream.command_id) {
            return Ok(AppendOutcome::DuplicateCommand);
        }
        if bucket.iter().any(|s| s.version == stream.version) {
            return Ok(AppendOutcome::DuplicateEvent);
        }
        bucket.push(stream);
        Ok(AppendOutcome::Success)
    }

    async fn find_by_command(
        &self,
        aggregate_id: &AggregateId,
        command_id: &CommandId,
    ) -> Result<Option<DomainEventStream<A>>, CommitIoError> {
        let journal = self.journal.lock().await;
        Ok(journal
            .get(aggregate_id)
            .and_then(|bucket| bucket.iter().find(|s| &s.command_id == command_id))
            .cloned())
    }

    async fn find_by_version(
        &self,
        aggregate_id: &AggregateId,
        version: usize,
    ) -> Result<Option<DomainEventStream<A>>, CommitIoError> {
        let journal = self.journal.lock().await;
        Ok(journal
            .get(aggregate_id)
            .and_then(|bucket| bucket.iter().find(|s| s.version == version))
            .cloned())
    }

    async fn load_all(
        &self,
        aggregate_id: &AggregateId,
    ) -> Result<Vec<DomainEventStream<A>>, CommitIoError> {
        let journal = self.journal.lock().await;
        let mut streams = journal.get(aggregate_id).cloned().unwrap_or_default();
        streams.sort_by_key(|s| s.version);
        Ok(streams)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_stream, TestAggregate, TestEvent};

    #[tokio::test]
    async fn second_append_at_same_version_is_reported_as_duplicate_event() {
        let store: InMemoryEventStore<TestAggregate> = InMemoryEventStore::new();
        let first = test_stream("a1", "c1", 1, vec![TestEvent::Created]);
        let second = test_stream("a1", "c2", 1, vec![TestEvent::Created]);

        assert_eq!(store.append(first).await.unwrap(), AppendOutcome::Success);
        assert_eq!(store.append(second).await.unwrap(), AppendOutcome::DuplicateEvent);
    }

    #[tokio::test]
    async fn replaying_same_command_is_reported_as_duplicate_command() {
        let store: InMemoryEventStore<TestAggregate> = InMemoryEventStore::new();
        let stream = test_stream("a1", "c1", 1, vec![TestEvent::Created]);

        assert_eq!(store.append(stream.clone()).await.unwrap(), AppendOutcome::Success);
        assert_eq!(store.append(stream).await.unwrap(), AppendOutcome::DuplicateCommand);
    }

    #[tokio::test]
    async fn load_all_returns_streams_ordered_by_version() {
        let store: InMemoryEventStore<TestAggregate> = InMemoryEventStore::new();
        store
            .append(test_stream("a1", "c2", 2, vec![TestEvent::Renamed("x".to_string())]))
            .await
            .unwrap();
        store
            .append(test_stream("a1", "c1", 1, vec![TestEvent::Created]))
            .await
            .unwrap();

        let streams = store.load_all(&"a1".to_string()).await.unwrap();
        assert_eq!(streams.iter().map(|s| s.version).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn injected_failure_is_reported_as_transient() {
        let store: InMemoryEventStore<TestAggregate> = InMemoryEventStore::new();
        store.fail_next_appends(1);
        let result = store
            .append(test_stream("a1", "c1", 1, vec![TestEvent::Created]))
            .await;
        assert!(matches!(result, Err(CommitIoError::Transient(_))));

        let result = store
            .append(test_stream("a1", "c1", 1, vec![TestEvent::Created]))
            .await;
        assert_eq!(result.unwrap(), AppendOutcome::Success);
    }
}
