//! In-process transaction host.
//!
//! `LocalTransactionManager` keeps a stack of open transactions. The top of
//! the stack is the ambient transaction seen through [`TransactionContext`].
//! It supports the three propagation behaviours file operations are usually
//! called under:
//!
//! - [`Propagation::Required`] joins the ambient transaction or starts one
//! - [`Propagation::RequiresNew`] suspends the ambient transaction and starts
//!   an independent one that completes on its own
//! - [`Propagation::Nested`] opens a savepoint; rolling it back does not
//!   complete the enclosing transaction and fires no callbacks
//!
//! ## Example
//!
//! ```
//! # use txfs::txn::{LocalTransactionManager, Propagation};
//! # fn example() -> txfs::Result<()> {
//! let manager = LocalTransactionManager::new();
//!
//! let value = manager.execute(Propagation::Required, |_status| {
//!     // transactional work
//!     Ok(42)
//! })?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::context::{
    CompletionStatus, Resource, ResourceKey, Synchronization, TransactionContext,
};
use crate::error::{Result, TxfsError};

/// How a new scope relates to an already active transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    /// Join the active transaction, or begin a new one.
    #[default]
    Required,
    /// Always begin an independent transaction.
    RequiresNew,
    /// Open a savepoint in the active transaction, or begin a new one.
    Nested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeKind {
    /// This scope began the transaction and completes it.
    New,
    /// This scope joined a transaction begun further out.
    Participating,
    /// This scope is a savepoint at the given depth.
    Savepoint(usize),
}

/// Handle for one transactional scope returned by [`LocalTransactionManager::begin`].
///
/// Must be passed back to `commit`, `rollback` or `complete_with_code`.
#[must_use = "TransactionStatus must be committed or rolled back"]
#[derive(Debug)]
pub struct TransactionStatus {
    transaction_id: u64,
    kind: ScopeKind,
    rollback_only: Cell<bool>,
}

impl TransactionStatus {
    /// Returns true if this scope began a new transaction.
    pub fn is_new_transaction(&self) -> bool {
        self.kind == ScopeKind::New
    }

    /// Returns true if this scope is a savepoint.
    pub fn is_savepoint(&self) -> bool {
        matches!(self.kind, ScopeKind::Savepoint(_))
    }

    /// Marks the scope so that `commit` rolls it back instead.
    pub fn set_rollback_only(&self) {
        self.rollback_only.set(true);
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only.get()
    }
}

struct TransactionFrame {
    id: u64,
    resources: HashMap<ResourceKey, Resource>,
    synchronizations: Vec<(i32, Box<dyn Synchronization>)>,
    rollback_only: bool,
    savepoints: usize,
}

impl TransactionFrame {
    fn new(id: u64) -> Self {
        Self {
            id,
            resources: HashMap::new(),
            synchronizations: Vec::new(),
            rollback_only: false,
            savepoints: 0,
        }
    }
}

#[derive(Default)]
struct ManagerState {
    frames: Vec<TransactionFrame>,
    next_id: u64,
}

/// Stack-based transaction manager for a single process.
#[derive(Default)]
pub struct LocalTransactionManager {
    state: Mutex<ManagerState>,
}

impl LocalTransactionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of open (active or suspended) transactions.
    pub fn depth(&self) -> usize {
        self.state().frames.len()
    }

    /// Number of completion callbacks registered on the ambient transaction.
    pub fn synchronization_count(&self) -> usize {
        self.state()
            .frames
            .last()
            .map_or(0, |frame| frame.synchronizations.len())
    }

    /// Opens a scope with the given propagation behaviour.
    pub fn begin(&self, propagation: Propagation) -> Result<TransactionStatus> {
        let mut state = self.state();

        let kind = match (propagation, state.frames.last_mut()) {
            (Propagation::Required, Some(_)) => ScopeKind::Participating,
            (Propagation::Nested, Some(frame)) => {
                frame.savepoints += 1;
                ScopeKind::Savepoint(frame.savepoints)
            }
            _ => ScopeKind::New,
        };

        let transaction_id = if kind == ScopeKind::New {
            state.next_id += 1;
            let id = state.next_id;
            state.frames.push(TransactionFrame::new(id));
            log::debug!("Began transaction {} ({:?})", id, propagation);
            id
        } else {
            // Participating and savepoint scopes only exist with an open frame.
            state.frames.last().map(|frame| frame.id).unwrap_or_default()
        };

        Ok(TransactionStatus {
            transaction_id,
            kind,
            rollback_only: Cell::new(false),
        })
    }

    /// Finishes a scope successfully.
    ///
    /// A new transaction completes with [`CompletionStatus::Committed`] unless
    /// it was marked rollback-only. When a participating scope marked it,
    /// the transaction rolls back and `UnexpectedRollback` is returned.
    pub fn commit(&self, status: TransactionStatus) -> Result<()> {
        if status.is_rollback_only() {
            log::debug!("Scope marked rollback-only, rolling back instead of committing");
            return self.rollback(status);
        }

        match status.kind {
            ScopeKind::Participating => {
                self.ensure_innermost(&status)?;
                Ok(())
            }
            ScopeKind::Savepoint(depth) => self.release_savepoint(&status, depth),
            ScopeKind::New => {
                let globally_rollback_only = {
                    let state = self.state();
                    Self::innermost_frame(&state, &status)?.rollback_only
                };

                if globally_rollback_only {
                    self.complete(&status, CompletionStatus::RolledBack)?;
                    Err(TxfsError::UnexpectedRollback)
                } else {
                    self.complete(&status, CompletionStatus::Committed)
                }
            }
        }
    }

    /// Finishes a scope unsuccessfully.
    ///
    /// Savepoints roll back locally; participating scopes mark the enclosing
    /// transaction rollback-only.
    pub fn rollback(&self, status: TransactionStatus) -> Result<()> {
        match status.kind {
            ScopeKind::Participating => {
                let mut state = self.state();
                let frame = Self::innermost_frame_mut(&mut state, &status)?;
                frame.rollback_only = true;
                log::debug!("Transaction {} marked rollback-only", frame.id);
                Ok(())
            }
            ScopeKind::Savepoint(depth) => {
                log::debug!("Rolling back to savepoint {}", depth);
                self.release_savepoint(&status, depth)
            }
            ScopeKind::New => self.complete(&status, CompletionStatus::RolledBack),
        }
    }

    /// Completes a new transaction with a status reported as a raw code.
    ///
    /// An unrecognized code ends the transaction without invoking any
    /// completion callback and is returned as an error.
    pub fn complete_with_code(&self, status: TransactionStatus, code: i32) -> Result<()> {
        if status.kind != ScopeKind::New {
            return Err(TxfsError::IllegalTransactionState(
                "only the scope that began a transaction can complete it".into(),
            ));
        }

        match CompletionStatus::try_from(code) {
            Ok(outcome) => self.complete(&status, outcome),
            Err(e) => {
                let frame = {
                    let mut state = self.state();
                    Self::innermost_frame(&state, &status)?;
                    state.frames.pop()
                };
                let dropped = frame.map_or(0, |f| f.synchronizations.len());
                log::error!(
                    "Transaction {} completed with unrecognized status {}; {} callback(s) not run",
                    status.transaction_id,
                    code,
                    dropped
                );
                Err(e)
            }
        }
    }

    /// Runs `work` in a scope, committing on `Ok` and rolling back on `Err`.
    pub fn execute<T, F>(&self, propagation: Propagation, work: F) -> Result<T>
    where
        F: FnOnce(&TransactionStatus) -> Result<T>,
    {
        let status = self.begin(propagation)?;

        match work(&status) {
            Ok(value) => {
                self.commit(status)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback(status) {
                    log::error!("Rollback after error failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    fn innermost_frame<'a>(
        state: &'a ManagerState,
        status: &TransactionStatus,
    ) -> Result<&'a TransactionFrame> {
        match state.frames.last() {
            Some(frame) if frame.id == status.transaction_id => Ok(frame),
            _ => Err(Self::not_innermost(status)),
        }
    }

    fn innermost_frame_mut<'a>(
        state: &'a mut ManagerState,
        status: &TransactionStatus,
    ) -> Result<&'a mut TransactionFrame> {
        match state.frames.last_mut() {
            Some(frame) if frame.id == status.transaction_id => Ok(frame),
            _ => Err(Self::not_innermost(status)),
        }
    }

    fn not_innermost(status: &TransactionStatus) -> TxfsError {
        TxfsError::IllegalTransactionState(format!(
            "transaction {} is not the innermost open transaction",
            status.transaction_id
        ))
    }

    fn ensure_innermost(&self, status: &TransactionStatus) -> Result<()> {
        let state = self.state();
        Self::innermost_frame(&state, status).map(|_| ())
    }

    fn release_savepoint(&self, status: &TransactionStatus, depth: usize) -> Result<()> {
        let mut state = self.state();
        let frame = Self::innermost_frame_mut(&mut state, status)?;
        if frame.savepoints != depth {
            return Err(TxfsError::IllegalTransactionState(format!(
                "savepoint {} is not the innermost savepoint",
                depth
            )));
        }
        frame.savepoints -= 1;
        Ok(())
    }

    /// Detaches the frame and runs its callbacks outside the lock.
    fn complete(&self, status: &TransactionStatus, outcome: CompletionStatus) -> Result<()> {
        let frame = {
            let mut state = self.state();
            Self::innermost_frame(&state, status)?;
            state.frames.pop()
        };

        let Some(TransactionFrame {
            id,
            resources,
            mut synchronizations,
            ..
        }) = frame
        else {
            return Err(Self::not_innermost(status));
        };

        // Stable: equal orders keep registration order.
        synchronizations.sort_by_key(|(order, _)| *order);
        drop(resources);

        log::debug!(
            "Transaction {} {}; running {} callback(s)",
            id,
            outcome,
            synchronizations.len()
        );

        for (_, sync) in synchronizations {
            sync.after_completion(outcome);
        }

        Ok(())
    }
}

impl TransactionContext for LocalTransactionManager {
    fn is_transaction_active(&self) -> bool {
        !self.state().frames.is_empty()
    }

    fn resource(&self, key: ResourceKey) -> Option<Resource> {
        self.state()
            .frames
            .last()
            .and_then(|frame| frame.resources.get(&key).cloned())
    }

    fn bind_resource(&self, key: ResourceKey, value: Resource) -> Result<()> {
        let mut state = self.state();
        let frame = state
            .frames
            .last_mut()
            .ok_or(TxfsError::NoActiveTransaction)?;

        if frame.resources.contains_key(&key) {
            return Err(TxfsError::IllegalTransactionState(format!(
                "{} is already bound to transaction {}",
                key, frame.id
            )));
        }

        frame.resources.insert(key, value);
        Ok(())
    }

    fn register_synchronization(&self, sync: Box<dyn Synchronization>, order: i32) -> Result<()> {
        let mut state = self.state();
        let frame = state
            .frames
            .last_mut()
            .ok_or(TxfsError::NoActiveTransaction)?;
        frame.synchronizations.push((order, sync));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> (
        Arc<Mutex<Vec<(&'static str, CompletionStatus)>>>,
        impl Fn(&'static str) -> Box<dyn Synchronization>,
    ) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let make = move |name: &'static str| -> Box<dyn Synchronization> {
            let sink = sink.clone();
            Box::new(move |status: CompletionStatus| {
                sink.lock().unwrap().push((name, status))
            })
        };
        (log, make)
    }

    #[test]
    fn test_no_transaction_initially() {
        let manager = LocalTransactionManager::new();
        assert!(!manager.is_transaction_active());
        assert_eq!(manager.depth(), 0);
    }

    #[test]
    fn test_begin_and_commit() {
        let manager = LocalTransactionManager::new();
        let (log, make) = recorder();

        let status = manager.begin(Propagation::Required).unwrap();
        assert!(status.is_new_transaction());
        assert!(manager.is_transaction_active());

        manager.register_synchronization(make("a"), 0).unwrap();
        manager.commit(status).unwrap();

        assert!(!manager.is_transaction_active());
        assert_eq!(
            *log.lock().unwrap(),
            vec![("a", CompletionStatus::Committed)]
        );
    }

    #[test]
    fn test_callbacks_run_by_order_then_registration() {
        let manager = LocalTransactionManager::new();
        let (log, make) = recorder();

        let status = manager.begin(Propagation::Required).unwrap();
        manager.register_synchronization(make("late"), 2000).unwrap();
        manager.register_synchronization(make("early"), 1000).unwrap();
        manager.register_synchronization(make("late-2"), 2000).unwrap();
        manager.rollback(status).unwrap();

        let names: Vec<_> = log.lock().unwrap().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["early", "late", "late-2"]);
    }

    #[test]
    fn test_resources_are_scoped_to_transaction() {
        let manager = LocalTransactionManager::new();
        let key = ResourceKey::unique();

        assert!(manager.bind_resource(key, Arc::new(1u32)).is_err());

        let status = manager.begin(Propagation::Required).unwrap();
        manager.bind_resource(key, Arc::new(1u32)).unwrap();
        assert!(manager.resource(key).is_some());
        assert!(manager.bind_resource(key, Arc::new(2u32)).is_err());
        manager.commit(status).unwrap();

        let status = manager.begin(Propagation::Required).unwrap();
        assert!(manager.resource(key).is_none());
        manager.commit(status).unwrap();
    }

    #[test]
    fn test_participating_rollback_marks_outer_rollback_only() {
        let manager = LocalTransactionManager::new();
        let (log, make) = recorder();

        let outer = manager.begin(Propagation::Required).unwrap();
        manager.register_synchronization(make("outer"), 0).unwrap();

        let inner = manager.begin(Propagation::Required).unwrap();
        assert!(!inner.is_new_transaction());
        manager.rollback(inner).unwrap();

        let err = manager.commit(outer).unwrap_err();
        assert!(matches!(err, TxfsError::UnexpectedRollback));
        assert_eq!(
            *log.lock().unwrap(),
            vec![("outer", CompletionStatus::RolledBack)]
        );
    }

    #[test]
    fn test_requires_new_suspends_outer() {
        let manager = LocalTransactionManager::new();
        let key = ResourceKey::unique();

        let outer = manager.begin(Propagation::Required).unwrap();
        manager.bind_resource(key, Arc::new("outer")).unwrap();

        let inner = manager.begin(Propagation::RequiresNew).unwrap();
        assert!(inner.is_new_transaction());
        assert_eq!(manager.depth(), 2);
        assert!(manager.resource(key).is_none());
        manager.commit(inner).unwrap();

        assert!(manager.resource(key).is_some());
        manager.commit(outer).unwrap();
    }

    #[test]
    fn test_savepoint_rollback_fires_no_callbacks() {
        let manager = LocalTransactionManager::new();
        let (log, make) = recorder();

        let outer = manager.begin(Propagation::Required).unwrap();
        let nested = manager.begin(Propagation::Nested).unwrap();
        assert!(nested.is_savepoint());
        manager.register_synchronization(make("nested"), 0).unwrap();
        manager.rollback(nested).unwrap();
        assert!(log.lock().unwrap().is_empty());

        manager.commit(outer).unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec![("nested", CompletionStatus::Committed)]
        );
    }

    #[test]
    fn test_commit_out_of_order_fails() {
        let manager = LocalTransactionManager::new();
        let outer = manager.begin(Propagation::Required).unwrap();
        let inner = manager.begin(Propagation::RequiresNew).unwrap();

        let err = manager.commit(outer).unwrap_err();
        assert!(matches!(err, TxfsError::IllegalTransactionState(_)));

        manager.commit(inner).unwrap();
        assert_eq!(manager.depth(), 1);
    }

    #[test]
    fn test_complete_with_unknown_code() {
        let manager = LocalTransactionManager::new();
        let (log, make) = recorder();

        let status = manager.begin(Propagation::Required).unwrap();
        manager.register_synchronization(make("a"), 0).unwrap();
        manager
            .complete_with_code(status, CompletionStatus::UNKNOWN_CODE)
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec![("a", CompletionStatus::Unknown)]);
    }

    #[test]
    fn test_complete_with_unrecognized_code_runs_nothing() {
        let manager = LocalTransactionManager::new();
        let (log, make) = recorder();

        let status = manager.begin(Propagation::Required).unwrap();
        manager.register_synchronization(make("a"), 0).unwrap();
        let err = manager.complete_with_code(status, 42).unwrap_err();

        assert!(matches!(err, TxfsError::UnrecognizedCompletionStatus(42)));
        assert!(log.lock().unwrap().is_empty());
        assert!(!manager.is_transaction_active());
    }

    #[test]
    fn test_execute_rolls_back_on_error() {
        let manager = LocalTransactionManager::new();
        let (log, make) = recorder();

        let result: Result<()> = manager.execute(Propagation::Required, |_| {
            manager.register_synchronization(make("a"), 0)?;
            Err(TxfsError::Other(anyhow::anyhow!("boom")))
        });

        assert!(result.is_err());
        assert_eq!(
            *log.lock().unwrap(),
            vec![("a", CompletionStatus::RolledBack)]
        );
    }

    #[test]
    fn test_execute_honours_rollback_only() {
        let manager = LocalTransactionManager::new();
        let (log, make) = recorder();

        manager
            .execute(Propagation::Required, |status| {
                manager.register_synchronization(make("a"), 0)?;
                status.set_rollback_only();
                Ok(())
            })
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![("a", CompletionStatus::RolledBack)]
        );
    }

    #[test]
    fn test_callbacks_see_no_active_transaction() {
        let manager = Arc::new(LocalTransactionManager::new());
        let seen = Arc::new(Mutex::new(None));

        let status = manager.begin(Propagation::Required).unwrap();
        let probe = manager.clone();
        let sink = seen.clone();
        manager
            .register_synchronization(
                Box::new(move |_: CompletionStatus| {
                    *sink.lock().unwrap() = Some(probe.is_transaction_active());
                }),
                0,
            )
            .unwrap();
        manager.commit(status).unwrap();

        assert_eq!(*seen.lock().unwrap(), Some(false));
    }
}
