use crate::cache::{DynMemoryCache, InMemoryCache};
use crate::commit::{CommitDispatcher, CommitStateMachine};
use crate::domain::{AggregateRoot, AggregateRootFactory, DefaultAggregateRootFactory, DomainEventStream};
use crate::event_store::{DynEventStore, InMemoryEventStore};
use crate::processing::{CommandHandler, EventCommittingContext, ProcessingCommand};
use crate::publisher::{DynPublisher, InMemoryPublisher};
use crate::retry::{DynScheduler, RetryPolicy, TokioScheduler};
use std::sync::Arc;

/// Core-owned externalized configuration (§6): everything the dispatcher
/// and state machine need that isn't itself a collaborator contract.
#[derive(Clone)]
pub struct CommitCoreConfig {
    pub event_persist_queue_count: usize,
    pub append_retry_policy: RetryPolicy,
    pub publish_retry_policy: RetryPolicy,
}

impl Default for CommitCoreConfig {
    fn default() -> Self {
        Self {
            event_persist_queue_count: 4,
            append_retry_policy: RetryPolicy::default(),
            publish_retry_policy: RetryPolicy::default(),
        }
    }
}

/// Builder for wiring C1-C5 together (§2 data flow). Every collaborator
/// has an in-memory default so a core can be stood up in tests with one
/// line, but production callers are expected to supply their own event
/// store and publisher.
pub struct CommitCoreBuilder<A: AggregateRoot> {
    config: CommitCoreConfig,
    event_store: DynEventStore<A>,
    cache: DynMemoryCache<A>,
    publisher: DynPublisher<A>,
    factory: Arc<dyn AggregateRootFactory<A>>,
    scheduler: DynScheduler,
}

impl<A: AggregateRoot> Default for CommitCoreBuilder<A> {
    fn default() -> Self {
        Self {
            config: CommitCoreConfig::default(),
            event_store: Arc::new(InMemoryEventStore::new()),
            cache: Arc::new(InMemoryCache::new()),
            publisher: Arc::new(InMemoryPublisher::new()),
            factory: Arc::new(DefaultAggregateRootFactory::default()),
            scheduler: Arc::new(TokioScheduler),
        }
    }
}

impl<A: AggregateRoot> CommitCoreBuilder<A> {
    pub fn new(config: CommitCoreConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn event_store(mut self, event_store: DynEventStore<A>) -> Self {
        self.event_store = event_store;
        self
    }

    pub fn cache(mut self, cache: DynMemoryCache<A>) -> Self {
        self.cache = cache;
        self
    }

    pub fn publisher(mut self, publisher: DynPublisher<A>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn factory(mut self, factory: Arc<dyn AggregateRootFactory<A>>) -> Self {
        self.factory = factory;
        self
    }

    pub fn scheduler(mut self, scheduler: DynScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn build(self) -> CommitCore<A> {
        let state_machine = CommitStateMachine::new(
            self.event_store,
            self.cache,
            self.publisher,
            self.factory,
            self.scheduler,
            self.config.append_retry_policy.clone(),
            self.config.publish_retry_policy.clone(),
        );
        let dispatcher = CommitDispatcher::new(self.config.event_persist_queue_count, state_machine.clone());
        CommitCore {
            dispatcher,
            state_machine,
        }
    }
}

/// Top-level facade (§6): `set_command_handler`, `commit_domain_event_async`,
/// `publish_domain_event_async`. Owns the dispatcher (C1) and the shared
/// state machine (C3+C5) that every lane's worker drives into.
pub struct CommitCore<A: AggregateRoot> {
    dispatcher: CommitDispatcher<A>,
    state_machine: Arc<CommitStateMachine<A>>,
}

impl<A: AggregateRoot> CommitCore<A> {
    pub fn builder() -> CommitCoreBuilder<A> {
        CommitCoreBuilder::default()
    }

    pub async fn set_command_handler(&self, handler: Arc<dyn CommandHandler<A>>) {
        self.state_machine.set_command_handler(handler).await;
    }

    /// Routes `ctx` to its partition and kicks admission (§4.1).
    pub async fn commit_domain_event_async(&self, ctx: EventCommittingContext<A>) {
        self.dispatcher.commit(ctx).await;
    }

    /// Publishes `stream` directly, bypassing the append path, then
    /// optionally admits the next queued context for this aggregate's
    /// lane. `try_commit_next=false` is used on the concurrency-retry
    /// path, where the lane must stay held until the retried attempt
    /// completes (§4.5).
    pub async fn publish_domain_event_async(
        &self,
        pc: ProcessingCommand,
        stream: DomainEventStream<A>,
        try_commit_next: bool,
    ) {
        let worker = self.dispatcher.worker_for(&pc.aggregate_root_id);
        self.state_machine.publish(pc, stream).await;
        if try_commit_next {
            worker.release_handling();
            worker.try_commit_next().await;
        }
    }

    pub fn partition_count(&self) -> usize {
        self.dispatcher.partition_count()
    }
}
