//! Per-transaction commit and rollback queues.
//!
//! An [`ActionRegistry`] lets code that runs inside an ambient transaction
//! queue work for after the outcome is known:
//!
//! - **Commit queue**: FIFO, runs when the transaction commits
//! - **Rollback queue**: LIFO (an undo stack), runs when it rolls back
//!
//! The queues live in an `ActionHolder` bound to the transaction's resource
//! slot under the registry's own key. The holder is created on first use and
//! hooks a completion callback into the transaction at that moment, so each
//! (registry, transaction) pair gets exactly one holder and one callback.
//!
//! Every queued action runs inside its own failure boundary. A failing action
//! is logged and reported; the rest of the queue still runs and the host
//! still gets its completion notification back.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::deferred::{DeferredAction, DrainReport, Phase, panic_message};
use crate::error::{Result, TxfsError};
use crate::txn::{CompletionStatus, ResourceKey, Synchronization, TransactionContext};

/// Order of a database-connection resource's own completion callback.
pub const CONNECTION_SYNCHRONIZATION_ORDER: i32 = 1000;

/// Default order for filesystem cleanup: strictly after the connection.
pub const FILE_SYSTEM_OPERATION_ORDER: i32 = CONNECTION_SYNCHRONIZATION_ORDER + 1000;

/// What to do with the queues when the outcome is [`CompletionStatus::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownOutcomePolicy {
    /// Run the rollback queue; undo file effects that may not have committed.
    #[default]
    Rollback,
    /// Run the commit queue.
    Commit,
    /// Run neither queue and leave staged files in place.
    Discard,
}

/// Registry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Priority of the completion callback relative to other resources.
    pub order: i32,
    pub unknown_outcome: UnknownOutcomePolicy,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            order: FILE_SYSTEM_OPERATION_ORDER,
            unknown_outcome: UnknownOutcomePolicy::default(),
        }
    }
}

impl RegistryConfig {
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_unknown_outcome(mut self, policy: UnknownOutcomePolicy) -> Self {
        self.unknown_outcome = policy;
        self
    }
}

/// Receives the report of every drained holder.
pub trait DrainObserver: Send + Sync {
    fn on_drain(&self, report: &DrainReport);
}

impl<F> DrainObserver for F
where
    F: Fn(&DrainReport) + Send + Sync,
{
    fn on_drain(&self, report: &DrainReport) {
        self(report)
    }
}

/// Queues deferred actions against the ambient transaction.
pub struct ActionRegistry {
    key: ResourceKey,
    context: Arc<dyn TransactionContext>,
    config: RegistryConfig,
    observer: Option<Arc<dyn DrainObserver>>,
    creation_lock: Mutex<()>,
}

impl ActionRegistry {
    pub fn new(context: Arc<dyn TransactionContext>, config: RegistryConfig) -> Self {
        Self {
            key: ResourceKey::unique(),
            context,
            config,
            observer: None,
            creation_lock: Mutex::new(()),
        }
    }

    /// Installs a hook that sees every [`DrainReport`] this registry produces.
    pub fn with_observer(mut self, observer: impl DrainObserver + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Key under which this registry's holder is bound.
    pub fn key(&self) -> ResourceKey {
        self.key
    }

    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    pub fn is_transaction_active(&self) -> bool {
        self.context.is_transaction_active()
    }

    /// Queues `action` to run if the ambient transaction commits.
    ///
    /// Commit actions run in registration order.
    pub fn run_after_commit(&self, action: DeferredAction) -> Result<()> {
        self.check_transaction_state()?;
        log::debug!("Queued commit action: {}", action.label());
        self.obtain_or_create_holder()?.push_commit(action);
        Ok(())
    }

    /// Queues `action` to run if the ambient transaction rolls back.
    ///
    /// Rollback actions run in reverse registration order.
    pub fn run_after_rollback(&self, action: DeferredAction) -> Result<()> {
        self.check_transaction_state()?;
        log::debug!("Queued rollback action: {}", action.label());
        self.obtain_or_create_holder()?.push_rollback(action);
        Ok(())
    }

    fn check_transaction_state(&self) -> Result<()> {
        if self.context.is_transaction_active() {
            Ok(())
        } else {
            Err(TxfsError::NoActiveTransaction)
        }
    }

    /// Looks up the holder bound to the ambient transaction, creating and
    /// binding it on first use.
    ///
    /// The lookup and the insert happen under one lock so concurrent first
    /// callers end up sharing a single holder.
    fn obtain_or_create_holder(&self) -> Result<Arc<ActionHolder>> {
        let _guard = self
            .creation_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(resource) = self.context.resource(self.key) {
            return resource
                .downcast::<ActionHolder>()
                .map_err(|_| TxfsError::ResourceTypeMismatch(self.key));
        }

        let holder = Arc::new(ActionHolder::default());

        let sync = HolderSynchronization {
            key: self.key,
            holder: holder.clone(),
            policy: self.config.unknown_outcome,
            observer: self.observer.clone(),
        };
        self.context
            .register_synchronization(Box::new(sync), self.config.order)?;
        self.context.bind_resource(self.key, holder.clone())?;

        log::debug!(
            "Bound action holder {} to transaction (order {})",
            self.key,
            self.config.order
        );
        Ok(holder)
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("key", &self.key)
            .field("config", &self.config)
            .field("observer", &self.observer.is_some())
            .finish_non_exhaustive()
    }
}

/// Queues for one (registry, transaction) pair.
#[derive(Default)]
struct ActionHolder {
    commit_actions: Mutex<VecDeque<DeferredAction>>,
    rollback_actions: Mutex<Vec<DeferredAction>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ActionHolder {
    fn push_commit(&self, action: DeferredAction) {
        locked(&self.commit_actions).push_back(action);
    }

    fn push_rollback(&self, action: DeferredAction) {
        locked(&self.rollback_actions).push(action);
    }

    fn take_commit(&self) -> VecDeque<DeferredAction> {
        std::mem::take(&mut *locked(&self.commit_actions))
    }

    fn take_rollback(&self) -> Vec<DeferredAction> {
        std::mem::take(&mut *locked(&self.rollback_actions))
    }
}

/// Completion callback that drains a holder.
struct HolderSynchronization {
    key: ResourceKey,
    holder: Arc<ActionHolder>,
    policy: UnknownOutcomePolicy,
    observer: Option<Arc<dyn DrainObserver>>,
}

impl HolderSynchronization {
    fn phase_for(&self, status: CompletionStatus) -> Option<Phase> {
        match status {
            CompletionStatus::Committed => Some(Phase::Commit),
            CompletionStatus::RolledBack => Some(Phase::Rollback),
            CompletionStatus::Unknown => match self.policy {
                UnknownOutcomePolicy::Rollback => Some(Phase::Rollback),
                UnknownOutcomePolicy::Commit => Some(Phase::Commit),
                UnknownOutcomePolicy::Discard => None,
            },
        }
    }
}

impl Synchronization for HolderSynchronization {
    fn after_completion(self: Box<Self>, status: CompletionStatus) {
        let phase = self.phase_for(status);
        let mut report = DrainReport::new(status, phase);

        let commit = self.holder.take_commit();
        let rollback = self.holder.take_rollback();

        match phase {
            Some(Phase::Commit) => {
                report.discard(rollback.len());
                drain(&mut report, Phase::Commit, commit);
            }
            Some(Phase::Rollback) => {
                report.discard(commit.len());
                drain(&mut report, Phase::Rollback, rollback.into_iter().rev());
            }
            None => {
                report.discard(commit.len() + rollback.len());
                log::warn!(
                    "Transaction outcome unknown; discarding {} queued action(s) of {}",
                    report.discarded(),
                    self.key
                );
            }
        }

        if report.is_clean() {
            log::info!(
                "Drained {} after {} transaction: {} action(s)",
                self.key,
                status,
                report.executed()
            );
        } else {
            log::warn!(
                "Drained {} after {} transaction: {} of {} action(s) failed",
                self.key,
                status,
                report.failures().len(),
                report.executed()
            );
        }

        if let Some(observer) = &self.observer {
            if let Err(payload) =
                panic::catch_unwind(AssertUnwindSafe(|| observer.on_drain(&report)))
            {
                log::error!(
                    "Drain observer for {} panicked: {}",
                    self.key,
                    panic_message(payload.as_ref())
                );
            }
        }
    }
}

fn drain(
    report: &mut DrainReport,
    phase: Phase,
    actions: impl IntoIterator<Item = DeferredAction>,
) {
    for action in actions {
        let outcome = action.run(phase);
        if let Err(failure) = &outcome {
            log::error!("{}", failure);
        }
        report.record(outcome);
    }
}
