mod dispatcher;
mod errors;
mod hash;
mod state_machine;
mod worker;

pub use dispatcher::CommitDispatcher;
pub use errors::ErrorCode;
pub use hash::{partition_for, stable_hash};
pub use state_machine::CommitStateMachine;
pub use worker::{ContextDriver, PersistEventWorker};
