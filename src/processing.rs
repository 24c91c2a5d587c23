use crate::domain::{AggregateId, AggregateRoot, AggregateTypeName, CommandId, DomainEventStream};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::warn;

/// Clearable execute-context carried alongside a `ProcessingCommand`. The
/// command dispatcher (external collaborator) stashes whatever it needs to
/// re-run a command here; the commit core only ever clears it before a
/// concurrency retry.
#[derive(Debug, Default, Clone)]
pub struct CommandExecuteContext {
    result: Option<serde_json::Value>,
}

impl CommandExecuteContext {
    pub fn clear(&mut self) {
        self.result = None;
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    pub fn set_result(&mut self, value: serde_json::Value) {
        self.result = Some(value);
    }
}

/// Terminal outcome of one processing attempt, delivered exactly once to
/// the upstream command pipeline via `ProcessingCommand::complete`.
#[derive(Debug, Clone)]
pub enum CommandResult {
    Success {
        command_id: CommandId,
        aggregate_id: AggregateId,
        payload: Option<serde_json::Value>,
        result_type_name: Option<String>,
    },
    Failed {
        command_id: CommandId,
        aggregate_id: AggregateId,
        error_message: String,
    },
}

impl CommandResult {
    pub fn success(
        command_id: impl Into<CommandId>,
        aggregate_id: impl Into<AggregateId>,
        payload: Option<serde_json::Value>,
        result_type_name: Option<String>,
    ) -> Self {
        Self::Success {
            command_id: command_id.into(),
            aggregate_id: aggregate_id.into(),
            payload,
            result_type_name,
        }
    }

    pub fn failed(
        command_id: impl Into<CommandId>,
        aggregate_id: impl Into<AggregateId>,
        error_message: impl Into<String>,
    ) -> Self {
        Self::Failed {
            command_id: command_id.into(),
            aggregate_id: aggregate_id.into(),
            error_message: error_message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// The caller's in-flight command: references the originating message,
/// its execute-context, and a completion sink invoked exactly once per
/// processing attempt. Cheaply cloneable — the clone shares the same
/// retry counter, execute-context, and completion sink, which is what
/// lets the concurrency-conflict retry path (§4.3) hand the same logical
/// command to a freshly re-executed attempt.
#[derive(Clone)]
pub struct ProcessingCommand {
    pub message_id: CommandId,
    pub aggregate_root_id: AggregateId,
    pub items: HashMap<String, String>,
    pub command_execute_context: Arc<Mutex<CommandExecuteContext>>,
    pub concurrent_retried_count: Arc<AtomicU32>,
    complete_sink: Arc<std::sync::Mutex<Option<oneshot::Sender<CommandResult>>>>,
}

impl ProcessingCommand {
    pub fn new(
        message_id: impl Into<CommandId>,
        aggregate_root_id: impl Into<AggregateId>,
        items: HashMap<String, String>,
    ) -> (Self, oneshot::Receiver<CommandResult>) {
        let (tx, rx) = oneshot::channel();
        let pc = Self {
            message_id: message_id.into(),
            aggregate_root_id: aggregate_root_id.into(),
            items,
            command_execute_context: Arc::new(Mutex::new(CommandExecuteContext::default())),
            concurrent_retried_count: Arc::new(AtomicU32::new(0)),
            complete_sink: Arc::new(std::sync::Mutex::new(Some(tx))),
        };
        (pc, rx)
    }

    /// Delivers the terminal result to the upstream pipeline. Calling this
    /// more than once for the same processing attempt is a bug upstream;
    /// the duplicate is logged and dropped rather than panicking, since a
    /// panic here would take down the lane.
    pub fn complete(&self, result: CommandResult) {
        let mut guard = self
            .complete_sink
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match guard.take() {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => {
                warn!(
                    command_id = %self.message_id,
                    "complete() called more than once for this processing attempt; dropping"
                );
            }
        }
    }

    pub async fn clear_execute_context(&self) {
        self.command_execute_context.lock().await.clear();
    }

    /// Increments the retry counter and returns the new value.
    pub fn increment_retry(&self) -> u32 {
        self.concurrent_retried_count.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// The command dispatcher's own handler, invoked by the core on the
/// concurrency-retry path (§4.3). Out of scope beyond this contract: how
/// the handler re-validates the command against freshened state. Rather
/// than fire-and-forget re-entering the public commit entry point, the
/// handler hands the freshly produced committing context straight back —
/// see DESIGN.md for why this crate resolves the retry hand-off this way.
#[async_trait]
pub trait CommandHandler<A: AggregateRoot>: Send + Sync {
    async fn handle_async(&self, pc: ProcessingCommand) -> Option<EventCommittingContext<A>>;
}

/// Owned, in-flight record for one commit attempt: the caller's command,
/// the in-memory aggregate that produced the proposal, and the proposal
/// itself. Owned exclusively by the lane from dequeue to terminal
/// completion.
pub struct EventCommittingContext<A: AggregateRoot> {
    pub processing_command: ProcessingCommand,
    pub aggregate_root: A,
    pub event_stream: DomainEventStream<A>,
}

impl<A: AggregateRoot> EventCommittingContext<A> {
    pub fn new(
        processing_command: ProcessingCommand,
        aggregate_root: A,
        event_stream: DomainEventStream<A>,
    ) -> Self {
        Self {
            processing_command,
            aggregate_root,
            event_stream,
        }
    }

    pub fn aggregate_type(&self) -> &AggregateTypeName {
        &self.event_stream.aggregate_type
    }
}
