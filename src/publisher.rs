use crate::domain::AggregateRoot;
use crate::domain::DomainEventStream;
use crate::retry::CommitIoError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Downstream event bus. Must tolerate duplicate `publish_async` calls —
/// the commit core republishes on crash recovery (§4.3, §6).
#[async_trait]
pub trait Publisher<A: AggregateRoot>: Send + Sync {
    async fn publish_async(&self, message: DomainEventStream<A>) -> Result<(), CommitIoError>;
}

pub type DynPublisher<A> = Arc<dyn Publisher<A>>;

/// In-memory publisher for tests, grounded in the teacher's
/// `InMemoryDispatcher` (`src/dispatchers/memory.rs`): an
/// `Arc<Mutex<Vec<_>>>` of everything published, plus failure injection
/// so the retry/terminal-failure paths (S6) are directly testable.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPublisher<A: AggregateRoot> {
    published: Arc<Mutex<Vec<DomainEventStream<A>>>>,
    fail_next: Arc<std::sync::atomic::AtomicU32>,
    always_fail: Arc<std::sync::atomic::AtomicBool>,
}

impl<A: AggregateRoot> InMemoryPublisher<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn always_fail(&self, fail: bool) {
        self.always_fail
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<DomainEventStream<A>> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl<A: AggregateRoot> Publisher<A> for InMemoryPublisher<A> {
    async fn publish_async(&self, message: DomainEventStream<A>) -> Result<(), CommitIoError> {
        if self.always_fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CommitIoError::Transient(
                "simulated publisher outage".to_string(),
            ));
        }
        let mut remaining = self.fail_next.load(std::sync::atomic::Ordering::SeqCst);
        if remaining > 0 {
            remaining -= 1;
            self.fail_next
                .store(remaining, std::sync::atomic::Ordering::SeqCst);
            return Err(CommitIoError::Transient(
                "simulated transient publish fault".to_string(),
            ));
        }
        self.published.lock().await.push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_stream, TestAggregate, TestEvent};

    #[tokio::test]
    async fn publishes_are_recorded() {
        let publisher: InMemoryPublisher<TestAggregate> = InMemoryPublisher::new();
        let stream = test_stream("a1", "c1", 1, vec![TestEvent::Created]);
        publisher.publish_async(stream.clone()).await.unwrap();
        assert_eq!(publisher.published().await, vec![stream]);
    }

    #[tokio::test]
    async fn fail_next_fails_exactly_that_many_times() {
        let publisher: InMemoryPublisher<TestAggregate> = InMemoryPublisher::new();
        publisher.fail_next(2);
        let stream = test_stream("a1", "c1", 1, vec![TestEvent::Created]);
        assert!(publisher.publish_async(stream.clone()).await.is_err());
        assert!(publisher.publish_async(stream.clone()).await.is_err());
        assert!(publisher.publish_async(stream).await.is_ok());
    }

    #[tokio::test]
    async fn always_fail_never_recovers() {
        let publisher: InMemoryPublisher<TestAggregate> = InMemoryPublisher::new();
        publisher.always_fail(true);
        let stream = test_stream("a1", "c1", 1, vec![TestEvent::Created]);
        assert!(publisher.publish_async(stream.clone()).await.is_err());
        assert!(publisher.publish_async(stream).await.is_err());
    }
}
