//! Ambient transaction capability and an in-process host implementing it.

mod context;
mod manager;

pub use context::{
    CompletionStatus, Resource, ResourceKey, Synchronization, TransactionContext,
};
pub use manager::{LocalTransactionManager, Propagation, TransactionStatus};
