//! Deferred commit/rollback actions bound to the ambient transaction.

mod deferred;
mod registry;

pub use deferred::{CompensationFailure, DeferredAction, DrainReport, Phase};
pub use registry::{
    ActionRegistry, CONNECTION_SYNCHRONIZATION_ORDER, DrainObserver, FILE_SYSTEM_OPERATION_ORDER,
    RegistryConfig, UnknownOutcomePolicy,
};
