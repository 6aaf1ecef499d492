//! Deferred actions and the reports produced when they are drained.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use thiserror::Error;

use crate::txn::CompletionStatus;

/// Which queue an action was drained from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Commit,
    Rollback,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Commit => f.write_str("commit"),
            Phase::Rollback => f.write_str("rollback"),
        }
    }
}

/// Zero-argument side effect queued now and run once the transaction ends.
///
/// Wraps an `FnOnce`, so it cannot run more than once. The label is used in
/// logs and failure reports.
pub struct DeferredAction {
    label: String,
    task: Box<dyn FnOnce() -> anyhow::Result<()> + Send>,
}

impl DeferredAction {
    pub fn new<F>(label: impl Into<String>, task: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            label: label.into(),
            task: Box::new(task),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Runs the action inside its own failure boundary.
    ///
    /// Errors and panics are both turned into a [`CompensationFailure`].
    pub(crate) fn run(self, phase: Phase) -> Result<(), CompensationFailure> {
        let DeferredAction { label, task } = self;

        let error = match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(Ok(())) => {
                log::debug!("Ran {} action: {}", phase, label);
                return Ok(());
            }
            Ok(Err(e)) => e,
            Err(payload) => anyhow::anyhow!("action panicked: {}", panic_message(payload.as_ref())),
        };

        Err(CompensationFailure {
            phase,
            label,
            error,
        })
    }
}

impl fmt::Debug for DeferredAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredAction")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A queued action that failed while being drained.
///
/// Never propagated to the transaction host; collected into a [`DrainReport`].
#[derive(Debug, Error)]
#[error("{phase} action '{label}' failed: {error:#}")]
pub struct CompensationFailure {
    pub phase: Phase,
    pub label: String,
    pub error: anyhow::Error,
}

/// Outcome of draining one holder's queue at transaction completion.
#[derive(Debug)]
pub struct DrainReport {
    status: CompletionStatus,
    phase: Option<Phase>,
    executed: usize,
    discarded: usize,
    failures: Vec<CompensationFailure>,
}

impl DrainReport {
    pub(crate) fn new(status: CompletionStatus, phase: Option<Phase>) -> Self {
        Self {
            status,
            phase,
            executed: 0,
            discarded: 0,
            failures: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, outcome: Result<(), CompensationFailure>) {
        self.executed += 1;
        if let Err(failure) = outcome {
            self.failures.push(failure);
        }
    }

    pub(crate) fn discard(&mut self, count: usize) {
        self.discarded += count;
    }

    /// Status the transaction completed with.
    pub fn status(&self) -> CompletionStatus {
        self.status
    }

    /// Queue that was drained, or `None` if both were discarded.
    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    /// Number of actions invoked, including failed ones.
    pub fn executed(&self) -> usize {
        self.executed
    }

    /// Number of actions dropped without running.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn failures(&self) -> &[CompensationFailure] {
        &self.failures
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}
