use crate::domain::AggregateRoot;
use crate::processing::EventCommittingContext;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Drives one dequeued context to a terminal state. Implemented by
/// `CommitStateMachine` (C3); split out as a trait so the worker doesn't
/// need to know about event stores, caches or publishers.
#[async_trait]
pub trait ContextDriver<A: AggregateRoot>: Send + Sync {
    async fn drive(&self, worker: Arc<PersistEventWorker<A>>, ctx: EventCommittingContext<A>);
}

/// Per-partition structure (§3, C2): a FIFO queue plus a single-bit
/// admission latch. The latch is not a lock around a critical section —
/// it models "this lane is currently busy" (§9) — so it is released
/// explicitly by the driver on terminal completion, not by a guard
/// dropping at the end of a scope.
pub struct PersistEventWorker<A: AggregateRoot> {
    partition: usize,
    queue: Mutex<VecDeque<EventCommittingContext<A>>>,
    is_handling: AtomicBool,
    driver: Arc<dyn ContextDriver<A>>,
}

impl<A: AggregateRoot> PersistEventWorker<A> {
    pub fn new(partition: usize, driver: Arc<dyn ContextDriver<A>>) -> Arc<Self> {
        Arc::new(Self {
            partition,
            queue: Mutex::new(VecDeque::new()),
            is_handling: AtomicBool::new(false),
            driver,
        })
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    pub async fn enqueue(self: &Arc<Self>, ctx: EventCommittingContext<A>) {
        self.queue.lock().await.push_back(ctx);
    }

    /// Admission protocol from §4.2. Loop-bound rather than recursive
    /// (§9 MUST) for the "queue became non-empty while releasing" race.
    pub async fn try_commit_next(self: &Arc<Self>) {
        loop {
            if self
                .is_handling
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }

            let dequeued = self.queue.lock().await.pop_front();
            match dequeued {
                Some(ctx) => {
                    debug!(partition = self.partition, "admitted context for processing");
                    self.driver.drive(Arc::clone(self), ctx).await;
                    return;
                }
                None => {
                    self.is_handling.store(false, Ordering::SeqCst);
                    if self.queue.lock().await.is_empty() {
                        return;
                    }
                    // Another enqueue raced us between the dequeue check and
                    // the release above; loop to re-attempt admission
                    // instead of leaving the new item stranded.
                }
            }
        }
    }

    /// Releases the admission latch without re-checking the queue;
    /// used on the concurrency-retry path where the lane intentionally
    /// stays "handling" until the retried attempt completes (§4.5).
    pub fn release_handling(&self) {
        self.is_handling.store(false, Ordering::SeqCst);
    }

    pub fn is_handling(&self) -> bool {
        self.is_handling.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{TestAggregate, TestEvent};
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    struct CountingDriver {
        started: AtomicU32,
        max_concurrent: AtomicU32,
        in_flight: AtomicU32,
        release_gate: Notify,
    }

    #[async_trait]
    impl ContextDriver<TestAggregate> for CountingDriver {
        async fn drive(
            &self,
            worker: Arc<PersistEventWorker<TestAggregate>>,
            _ctx: EventCommittingContext<TestAggregate>,
        ) {
            self.started.fetch_add(1, Ordering::SeqCst);
            let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now_in_flight, Ordering::SeqCst);
            self.release_gate.notified().await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            worker.release_handling();
            worker.try_commit_next().await;
        }
    }

    fn ctx(aggregate_id: &str, version: usize, command_id: &str) -> EventCommittingContext<TestAggregate> {
        let (pc, _rx) = crate::processing::ProcessingCommand::new(
            command_id.to_string(),
            aggregate_id.to_string(),
            Default::default(),
        );
        let stream = crate::domain::DomainEventStream {
            command_id: command_id.to_string(),
            aggregate_id: aggregate_id.to_string(),
            aggregate_type: TestAggregate::TYPE.to_string(),
            version,
            events: vec![TestEvent::Created],
            items: Default::default(),
        };
        EventCommittingContext::new(pc, TestAggregate::default(), stream)
    }

    #[tokio::test]
    async fn only_one_context_in_flight_per_partition() {
        let driver = Arc::new(CountingDriver {
            started: AtomicU32::new(0),
            max_concurrent: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            release_gate: Notify::new(),
        });
        let worker = PersistEventWorker::new(0, driver.clone());

        worker.enqueue(ctx("A1", 1, "C1")).await;
        worker.enqueue(ctx("A1", 2, "C2")).await;

        let w = Arc::clone(&worker);
        let handle = tokio::spawn(async move { w.try_commit_next().await });

        tokio::task::yield_now().await;
        assert_eq!(driver.max_concurrent.load(Ordering::SeqCst), 1);
        driver.release_gate.notify_one();
        driver.release_gate.notify_one();
        handle.await.unwrap();

        assert_eq!(driver.started.load(Ordering::SeqCst), 2);
        assert!(!worker.is_handling());
    }

    #[tokio::test]
    async fn try_commit_next_on_empty_queue_is_a_noop() {
        let driver = Arc::new(CountingDriver {
            started: AtomicU32::new(0),
            max_concurrent: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            release_gate: Notify::new(),
        });
        let worker = PersistEventWorker::new(1, driver.clone());
        worker.try_commit_next().await;
        assert_eq!(driver.started.load(Ordering::SeqCst), 0);
        assert!(!worker.is_handling());
    }
}
