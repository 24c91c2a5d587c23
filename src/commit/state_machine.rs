use crate::cache::DynMemoryCache;
use crate::commit::errors::ErrorCode;
use crate::commit::worker::{ContextDriver, PersistEventWorker};
use crate::domain::{AggregateRoot, AggregateRootFactory};
use crate::errors::CqrsErrorCode;
use crate::event_store::{AppendOutcome, DynEventStore};
use crate::processing::{CommandHandler, CommandResult, EventCommittingContext};
use crate::publisher::DynPublisher;
use crate::retry::{retry_async, DynScheduler, RetryPolicy};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, warn};

/// C3 + C5: drives one context through append, classifies the outcome,
/// and branches into cache refresh + publish, crash recovery, or a
/// concurrency-conflict retry (§4.3). Installed as the `ContextDriver`
/// the worker pool (C2) hands dequeued contexts to.
pub struct CommitStateMachine<A: AggregateRoot> {
    event_store: DynEventStore<A>,
    cache: DynMemoryCache<A>,
    publisher: DynPublisher<A>,
    factory: Arc<dyn AggregateRootFactory<A>>,
    scheduler: DynScheduler,
    append_retry_policy: RetryPolicy,
    publish_retry_policy: RetryPolicy,
    command_handler: RwLock<Option<Arc<dyn CommandHandler<A>>>>,
}

/// Outcome of one pass through the state machine: either the attempt
/// reached a terminal state (a `CommandResult` was or will be delivered
/// by this call) or the command must be retried against a freshened
/// aggregate, producing a new context to drive immediately without
/// releasing the lane (§4.3 row 4, §4.5 `try_commit_next=false`).
enum StepOutcome<A: AggregateRoot> {
    Terminal,
    Retry(EventCommittingContext<A>),
}

impl<A: AggregateRoot> CommitStateMachine<A> {
    pub fn new(
        event_store: DynEventStore<A>,
        cache: DynMemoryCache<A>,
        publisher: DynPublisher<A>,
        factory: Arc<dyn AggregateRootFactory<A>>,
        scheduler: DynScheduler,
        append_retry_policy: RetryPolicy,
        publish_retry_policy: RetryPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            event_store,
            cache,
            publisher,
            factory,
            scheduler,
            append_retry_policy,
            publish_retry_policy,
            command_handler: RwLock::new(None),
        })
    }

    pub async fn set_command_handler(&self, handler: Arc<dyn CommandHandler<A>>) {
        *self.command_handler.write().await = Some(handler);
    }

    async fn step(&self, mut ctx: EventCommittingContext<A>) -> StepOutcome<A> {
        let aggregate_id = ctx.event_stream.aggregate_id.clone();
        let command_id = ctx.event_stream.command_id.clone();

        let append_result = retry_async(
            "event_store.append",
            || self.event_store.append(ctx.event_stream.clone()),
            || format!("aggregate_id={aggregate_id} command_id={command_id}"),
            &self.append_retry_policy,
            self.scheduler.as_ref(),
        )
        .await;

        let outcome = match append_result {
            Ok(outcome) => outcome,
            Err(message) => {
                let error_message = ErrorCode::AppendFailed.error(message).to_string();
                self.complete(&ctx, CommandResult::failed(command_id, aggregate_id, error_message));
                return StepOutcome::Terminal;
            }
        };

        match outcome {
            AppendOutcome::Success => {
                self.refresh_cache_after_commit(&mut ctx).await;
                self.publish(ctx.processing_command.clone(), ctx.event_stream.clone())
                    .await;
                StepOutcome::Terminal
            }
            AppendOutcome::DuplicateCommand => self.recover_duplicate_command(ctx).await,
            AppendOutcome::DuplicateEvent if ctx.event_stream.version == 1 => {
                self.recover_first_event_duplicate(ctx).await
            }
            AppendOutcome::DuplicateEvent => self.retry_concurrency_conflict(ctx).await,
        }
    }

    /// Crash-recovery for a command already durably appended on a prior
    /// attempt (§4.3 row 2). Shared by the `DuplicateCommand` branch and
    /// the same-command case of first-version duplication.
    async fn recover_duplicate_command(&self, ctx: EventCommittingContext<A>) -> StepOutcome<A> {
        let aggregate_id = ctx.event_stream.aggregate_id.clone();
        let command_id = ctx.event_stream.command_id.clone();

        let found = self
            .find_by_command(&aggregate_id, &command_id)
            .await
            .unwrap_or_else(|message| {
                error!(
                    aggregate_id = %aggregate_id,
                    command_id = %command_id,
                    error = %message,
                    "find_by_command failed while recovering a duplicate command"
                );
                None
            });

        match found {
            Some(stream) => {
                self.refresh_cache_from_stream(&stream).await;
                self.publish(ctx.processing_command, stream).await;
            }
            None => {
                let error_message = ErrorCode::DuplicateCommand
                    .error("Duplicate command execution.")
                    .to_string();
                self.complete(
                    &ctx,
                    CommandResult::failed(command_id, aggregate_id, error_message),
                );
            }
        }
        StepOutcome::Terminal
    }

    /// First-version duplication (§4.3 row 3): another stream already
    /// occupies `(aggregate_id, 1)`. Same command id means this is the
    /// crash-recovery case above; a different command id means two
    /// concurrent creations raced and this one lost.
    async fn recover_first_event_duplicate(&self, ctx: EventCommittingContext<A>) -> StepOutcome<A> {
        let aggregate_id = ctx.event_stream.aggregate_id.clone();
        let command_id = ctx.event_stream.command_id.clone();

        let existing = self.find_by_version(&aggregate_id, 1).await;
        match existing {
            Ok(Some(stream)) if stream.command_id == command_id => {
                self.recover_duplicate_command(ctx).await
            }
            Ok(Some(_)) => {
                let error_message = ErrorCode::DuplicateAggregateCreation
                    .error("Duplicate aggregate creation.")
                    .to_string();
                self.complete(
                    &ctx,
                    CommandResult::failed(command_id, aggregate_id, error_message),
                );
                StepOutcome::Terminal
            }
            Ok(None) => {
                let error_message = ErrorCode::RecoveryStreamMissing
                    .error("Duplicate event reported but the existing stream could not be located.")
                    .to_string();
                self.complete(
                    &ctx,
                    CommandResult::failed(command_id, aggregate_id, error_message),
                );
                StepOutcome::Terminal
            }
            Err(message) => {
                let error_message = ErrorCode::LookupFailed.error(message).to_string();
                self.complete(&ctx, CommandResult::failed(command_id, aggregate_id, error_message));
                StepOutcome::Terminal
            }
        }
    }

    /// Optimistic concurrency conflict (§4.3 row 4): refresh the cached
    /// aggregate to the latest durable version, then hand the command
    /// back to the handler for re-execution. No `CommandResult` is
    /// delivered here — the retried attempt delivers one, or, if the
    /// handler declines to produce a new context, this attempt does
    /// (see DESIGN.md for that fallback decision).
    async fn retry_concurrency_conflict(&self, ctx: EventCommittingContext<A>) -> StepOutcome<A> {
        let aggregate_id = ctx.event_stream.aggregate_id.clone();
        let command_id = ctx.event_stream.command_id.clone();

        self.refresh_aggregate_from_event_store(&aggregate_id).await;

        ctx.processing_command.increment_retry();
        ctx.processing_command.clear_execute_context().await;

        let handler = self.command_handler.read().await.clone();
        let handler = match handler {
            Some(handler) => handler,
            None => {
                error!(
                    aggregate_id = %aggregate_id,
                    command_id = %command_id,
                    "concurrency conflict with no command handler installed"
                );
                let error_message = ErrorCode::HandlerNotInstalled
                    .error("No command handler installed.")
                    .to_string();
                self.complete(
                    &ctx,
                    CommandResult::failed(command_id, aggregate_id, error_message),
                );
                return StepOutcome::Terminal;
            }
        };

        match handler.handle_async(ctx.processing_command.clone()).await {
            Some(next_ctx) => StepOutcome::Retry(next_ctx),
            None => {
                warn!(
                    aggregate_id = %aggregate_id,
                    command_id = %command_id,
                    "command handler produced no retry context after concurrency conflict"
                );
                let error_message = ErrorCode::RetryNotProduced
                    .error("Concurrency conflict retry did not produce a new commit attempt.")
                    .to_string();
                self.complete(
                    &ctx,
                    CommandResult::failed(command_id, aggregate_id, error_message),
                );
                StepOutcome::Terminal
            }
        }
    }

    async fn refresh_cache_after_commit(&self, ctx: &mut EventCommittingContext<A>) {
        ctx.aggregate_root.accept_changes(ctx.event_stream.version);
        self.cache.set(ctx.aggregate_root.clone()).await;
    }

    async fn refresh_cache_from_stream(&self, stream: &crate::domain::DomainEventStream<A>) {
        if self.cache.get(&stream.aggregate_id).await.is_some() {
            return;
        }
        let mut aggregate = self.factory.create();
        aggregate = aggregate.with_unique_id(stream.aggregate_id.clone());
        aggregate.replay_events(std::slice::from_ref(stream));
        self.cache.set(aggregate).await;
    }

    /// Recovery-path refresh ahead of a retried command (§4.3 row 4,
    /// `UpdateAggregateToLatestVersion` in the source). Best-effort like
    /// every cache refresh (§4.5): a failure is logged and swallowed —
    /// the retried handler will simply see a stale cache entry.
    async fn refresh_aggregate_from_event_store(&self, aggregate_id: &crate::domain::AggregateId) {
        let streams = retry_async(
            "event_store.load_all",
            || self.event_store.load_all(aggregate_id),
            || format!("aggregate_id={aggregate_id}"),
            &self.append_retry_policy,
            self.scheduler.as_ref(),
        )
        .await;

        let streams = match streams {
            Ok(streams) => streams,
            Err(message) => {
                warn!(
                    aggregate_id = %aggregate_id,
                    error = %message,
                    "failed to refresh aggregate from event store after concurrency conflict"
                );
                return;
            }
        };

        if streams.is_empty() {
            return;
        }
        let mut aggregate = self.factory.create();
        aggregate = aggregate.with_unique_id(aggregate_id.clone());
        aggregate.replay_events(&streams);
        self.cache.set(aggregate).await;
    }

    /// Drives `publisher.publish_async` through the retry executor (C4)
    /// and delivers the resulting terminal `CommandResult`. Exposed at
    /// crate level as `CommitCore::publish_domain_event_async` (§6) so a
    /// collaborator can republish an already-committed stream without
    /// re-running the append path.
    pub async fn publish(&self, pc: crate::processing::ProcessingCommand, message: crate::domain::DomainEventStream<A>) {
        let command_id = message.command_id.clone();
        let aggregate_id = message.aggregate_id.clone();
        let payload = serde_json::to_value(&message.events).ok();

        let result = retry_async(
            "publisher.publish_async",
            || self.publisher.publish_async(message.clone()),
            || format!("aggregate_id={aggregate_id} command_id={command_id}"),
            &self.publish_retry_policy,
            self.scheduler.as_ref(),
        )
        .await;

        let command_result = match result {
            Ok(()) => CommandResult::success(
                message.command_id.clone(),
                message.aggregate_id.clone(),
                payload,
                None,
            ),
            Err(error_message) => CommandResult::failed(
                message.command_id.clone(),
                message.aggregate_id.clone(),
                ErrorCode::PublishFailed.error(error_message).to_string(),
            ),
        };
        pc.complete(command_result);
    }

    fn complete(&self, ctx: &EventCommittingContext<A>, result: CommandResult) {
        if !result.is_success() {
            if let CommandResult::Failed { error_message, .. } = &result {
                error!(
                    aggregate_id = %ctx.event_stream.aggregate_id,
                    command_id = %ctx.event_stream.command_id,
                    error = %error_message,
                    "command failed terminally"
                );
            }
        }
        ctx.processing_command.complete(result);
    }

    async fn find_by_command(
        &self,
        aggregate_id: &crate::domain::AggregateId,
        command_id: &crate::domain::CommandId,
    ) -> Result<Option<crate::domain::DomainEventStream<A>>, String> {
        retry_async(
            "event_store.find_by_command",
            || self.event_store.find_by_command(aggregate_id, command_id),
            || format!("aggregate_id={aggregate_id} command_id={command_id}"),
            &self.append_retry_policy,
            self.scheduler.as_ref(),
        )
        .await
    }

    async fn find_by_version(
        &self,
        aggregate_id: &crate::domain::AggregateId,
        version: usize,
    ) -> Result<Option<crate::domain::DomainEventStream<A>>, String> {
        retry_async(
            "event_store.find_by_version",
            || self.event_store.find_by_version(aggregate_id, version),
            || format!("aggregate_id={aggregate_id} version={version}"),
            &self.append_retry_policy,
            self.scheduler.as_ref(),
        )
        .await
    }
}

#[async_trait]
impl<A: AggregateRoot> ContextDriver<A> for CommitStateMachine<A> {
    async fn drive(&self, worker: Arc<PersistEventWorker<A>>, ctx: EventCommittingContext<A>) {
        let mut current = ctx;
        loop {
            match self.step(current).await {
                StepOutcome::Terminal => break,
                StepOutcome::Retry(next_ctx) => {
                    current = next_ctx;
                    continue;
                }
            }
        }
        worker.release_handling();
        worker.try_commit_next().await;
    }
}
