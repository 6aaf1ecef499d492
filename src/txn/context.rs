//! Narrow capability interface of an ambient transaction host.
//!
//! The filesystem layer never owns a transaction. It only asks the host
//! whether one is active, stashes per-transaction state in a keyed slot and
//! registers a completion callback that fires once the outcome is known.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Result, TxfsError};

/// Value stored in a transaction's keyed resource slot.
pub type Resource = Arc<dyn Any + Send + Sync>;

/// Opaque identity used to address a transaction-scoped resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(u64);

impl ResourceKey {
    /// Returns a key that no other call in this process will return.
    pub fn unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource#{}", self.0)
    }
}

/// Terminal outcome of a transaction, delivered exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionStatus {
    Committed,
    RolledBack,
    /// Heuristic or mixed outcome; the host could not confirm either way.
    Unknown,
}

impl CompletionStatus {
    pub const COMMITTED_CODE: i32 = 0;
    pub const ROLLED_BACK_CODE: i32 = 1;
    pub const UNKNOWN_CODE: i32 = 2;

    /// Raw status code as reported by hosts that speak integers.
    pub fn code(self) -> i32 {
        match self {
            CompletionStatus::Committed => Self::COMMITTED_CODE,
            CompletionStatus::RolledBack => Self::ROLLED_BACK_CODE,
            CompletionStatus::Unknown => Self::UNKNOWN_CODE,
        }
    }
}

impl TryFrom<i32> for CompletionStatus {
    type Error = TxfsError;

    fn try_from(code: i32) -> Result<Self> {
        match code {
            Self::COMMITTED_CODE => Ok(CompletionStatus::Committed),
            Self::ROLLED_BACK_CODE => Ok(CompletionStatus::RolledBack),
            Self::UNKNOWN_CODE => Ok(CompletionStatus::Unknown),
            other => Err(TxfsError::UnrecognizedCompletionStatus(other)),
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompletionStatus::Committed => "committed",
            CompletionStatus::RolledBack => "rolled back",
            CompletionStatus::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Completion callback registered against a transaction.
///
/// Taking `self: Box<Self>` means a callback can only ever be invoked once.
pub trait Synchronization: Send {
    fn after_completion(self: Box<Self>, status: CompletionStatus);
}

impl<F> Synchronization for F
where
    F: FnOnce(CompletionStatus) + Send,
{
    fn after_completion(self: Box<Self>, status: CompletionStatus) {
        (*self)(status)
    }
}

/// What the core needs from the ambient transaction manager.
///
/// Implementations own the synchronization of their slot storage and
/// callback list; callers treat each method as a single atomic step.
pub trait TransactionContext: Send + Sync {
    /// Returns true while a transaction is open on this context.
    fn is_transaction_active(&self) -> bool;

    /// Looks up the value bound to `key` in the current transaction.
    fn resource(&self, key: ResourceKey) -> Option<Resource>;

    /// Binds `value` to `key` for the lifetime of the current transaction.
    ///
    /// Fails if no transaction is active or the key is already bound.
    fn bind_resource(&self, key: ResourceKey, value: Resource) -> Result<()>;

    /// Registers a completion callback.
    ///
    /// Callbacks with a lower `order` run first.
    fn register_synchronization(&self, sync: Box<dyn Synchronization>, order: i32) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_decode() {
        for status in [
            CompletionStatus::Committed,
            CompletionStatus::RolledBack,
            CompletionStatus::Unknown,
        ] {
            assert_eq!(CompletionStatus::try_from(status.code()).unwrap(), status);
        }
    }

    #[test]
    fn test_unrecognized_status_code_fails() {
        let err = CompletionStatus::try_from(7).unwrap_err();
        assert!(matches!(err, TxfsError::UnrecognizedCompletionStatus(7)));
    }

    #[test]
    fn test_resource_keys_are_unique() {
        let a = ResourceKey::unique();
        let b = ResourceKey::unique();
        assert_ne!(a, b);
    }

    #[test]
    fn test_closure_synchronization_runs_once() {
        use std::sync::Mutex;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sync: Box<dyn Synchronization> = Box::new(move |status: CompletionStatus| {
            sink.lock().unwrap().push(status);
        });

        sync.after_completion(CompletionStatus::RolledBack);
        assert_eq!(*seen.lock().unwrap(), vec![CompletionStatus::RolledBack]);
    }
}
