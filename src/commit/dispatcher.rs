use crate::commit::hash::partition_for;
use crate::commit::worker::{ContextDriver, PersistEventWorker};
use crate::domain::AggregateRoot;
use crate::processing::EventCommittingContext;
use std::sync::Arc;
use tracing::debug;

/// Hash-routes committing contexts to one of `N` serial worker lanes
/// (§4.1). Construction-fixed partition count; the worker pool never
/// resizes at runtime.
pub struct CommitDispatcher<A: AggregateRoot> {
    workers: Vec<Arc<PersistEventWorker<A>>>,
}

impl<A: AggregateRoot> CommitDispatcher<A> {
    pub fn new(partition_count: usize, driver: Arc<dyn ContextDriver<A>>) -> Self {
        assert!(partition_count > 0, "event_persist_queue_count must be positive");
        let workers = (0..partition_count)
            .map(|p| PersistEventWorker::new(p, Arc::clone(&driver)))
            .collect();
        Self { workers }
    }

    pub fn partition_count(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_for(&self, aggregate_id: &str) -> Arc<PersistEventWorker<A>> {
        let partition = partition_for(aggregate_id, self.workers.len());
        Arc::clone(&self.workers[partition])
    }

    /// Enqueues `ctx` into its partition's lane and kicks admission.
    pub async fn commit(&self, ctx: EventCommittingContext<A>) {
        let worker = self.worker_for(&ctx.event_stream.aggregate_id);
        debug!(
            aggregate_id = %ctx.event_stream.aggregate_id,
            partition = worker.partition(),
            "routed committing context"
        );
        worker.enqueue(ctx).await;
        worker.try_commit_next().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestAggregate, TestEvent};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct RecordingDriver {
        partitions_seen: Mutex<Vec<usize>>,
        count: AtomicUsize,
    }

    #[async_trait]
    impl ContextDriver<TestAggregate> for RecordingDriver {
        async fn drive(
            &self,
            worker: Arc<PersistEventWorker<TestAggregate>>,
            _ctx: EventCommittingContext<TestAggregate>,
        ) {
            self.count.fetch_add(1, Ordering::SeqCst);
            self.partitions_seen.lock().await.push(worker.partition());
            worker.release_handling();
        }
    }

    fn ctx(aggregate_id: &str) -> EventCommittingContext<TestAggregate> {
        let (pc, _rx) = crate::processing::ProcessingCommand::new(
            "cmd".to_string(),
            aggregate_id.to_string(),
            Default::default(),
        );
        let stream = crate::domain::DomainEventStream {
            command_id: "cmd".to_string(),
            aggregate_id: aggregate_id.to_string(),
            aggregate_type: TestAggregate::TYPE.to_string(),
            version: 1,
            events: vec![TestEvent::Created],
            items: Default::default(),
        };
        EventCommittingContext::new(pc, TestAggregate::default(), stream)
    }

    #[tokio::test]
    async fn same_aggregate_always_routes_to_same_partition() {
        let driver = Arc::new(RecordingDriver {
            partitions_seen: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        });
        let dispatcher = CommitDispatcher::new(4, driver.clone());

        dispatcher.commit(ctx("order-99")).await;
        dispatcher.commit(ctx("order-99")).await;

        let seen = driver.partitions_seen.lock().await;
        assert_eq!(seen[0], seen[1]);
        assert_eq!(driver.count.load(Ordering::SeqCst), 2);
    }
}
