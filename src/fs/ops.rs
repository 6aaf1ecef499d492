//! Filesystem operations that follow the ambient transaction's outcome.
//!
//! Each operation applies its effect to disk immediately. When a transaction
//! is active it also queues the actions that finalize or undo that effect:
//!
//! | Operation         | Commit action         | Rollback action                    |
//! |-------------------|-----------------------|------------------------------------|
//! | `create`          | -                     | delete the new file                |
//! | `replace_content` | delete staged original| restore staged original            |
//! | `delete`          | delete staged original| move staged original back          |
//! | `move_file`       | -                     | move destination back to source    |
//! | `copy_file`       | -                     | delete destination                 |
//!
//! Operations that destroy content first rename the original into a staging
//! file beside it (see [`staging`](super::staging)). `move_file` and
//! `copy_file` stage an already existing destination the same way.
//!
//! Without a transaction the operations behave like plain filesystem calls.
//!
//! ## Example
//!
//! ```no_run
//! # use std::path::Path;
//! # use std::sync::Arc;
//! # use txfs::fs::TransactionalFileOps;
//! # use txfs::txn::{LocalTransactionManager, Propagation};
//! # fn example() -> txfs::Result<()> {
//! let manager = Arc::new(LocalTransactionManager::new());
//! let files = TransactionalFileOps::new(manager.clone());
//!
//! manager.execute(Propagation::Required, |_| {
//!     files.create(Path::new("out/report.txt"), b"draft")?;
//!     files.delete(Path::new("out/stale.txt"))
//! })?; // both effects stay; an error would have undone both
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::staging;
use crate::action::{ActionRegistry, DeferredAction, RegistryConfig};
use crate::error::{Result, TxfsError};
use crate::txn::TransactionContext;

/// Create, replace, delete, move and copy with commit/rollback compensation.
#[derive(Debug)]
pub struct TransactionalFileOps {
    registry: ActionRegistry,
}

impl TransactionalFileOps {
    /// Creates operations bound to `context` with the default configuration.
    pub fn new(context: Arc<dyn TransactionContext>) -> Self {
        Self::with_config(context, RegistryConfig::default())
    }

    pub fn with_config(context: Arc<dyn TransactionContext>, config: RegistryConfig) -> Self {
        Self::from_registry(ActionRegistry::new(context, config))
    }

    /// Uses an existing registry, e.g. one with a drain observer installed.
    pub fn from_registry(registry: ActionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Writes `data` to a new file at `path`.
    ///
    /// Fails with `AlreadyExists` if `path` is present.
    pub fn create(&self, path: &Path, data: &[u8]) -> Result<()> {
        if path.exists() {
            return Err(TxfsError::AlreadyExists(path.to_path_buf()));
        }

        staging::write_file(path, data)?;

        if self.registry.is_transaction_active() {
            self.registry.run_after_rollback(delete_action(path))?;
        }

        Ok(())
    }

    /// Replaces the content of the existing file at `path`.
    pub fn replace_content(&self, path: &Path, data: &[u8]) -> Result<()> {
        if !self.registry.is_transaction_active() {
            staging::remove_if_exists(path)?;
            return staging::write_file(path, data);
        }

        let staged = staging::staging_path_for(path)?;
        staging::move_file(path, &staged)?;

        if let Err(e) = staging::write_file(path, data) {
            log::warn!(
                "Writing {} failed, restoring original content",
                path.display()
            );
            if let Err(restore_err) = restore(&staged, path) {
                log::error!(
                    "Original content of {} left in {}: {}",
                    path.display(),
                    staged.display(),
                    restore_err
                );
            }
            return Err(e);
        }

        self.registry.run_after_commit(delete_action(&staged))?;
        self.registry
            .run_after_rollback(restore_action(&staged, path))?;
        Ok(())
    }

    /// Deletes the file at `path`.
    ///
    /// Inside a transaction the file is staged rather than removed, so it
    /// must exist. Outside one a missing file is not an error.
    pub fn delete(&self, path: &Path) -> Result<()> {
        if !self.registry.is_transaction_active() {
            staging::remove_if_exists(path)?;
            return Ok(());
        }

        let staged = staging::staging_path_for(path)?;
        staging::move_file(path, &staged)?;

        self.registry.run_after_commit(delete_action(&staged))?;
        self.registry
            .run_after_rollback(move_back_action(&staged, path))?;
        Ok(())
    }

    /// Moves `src` to `dst`, creating `dst`'s parent directories if missing.
    ///
    /// Moving a file onto itself leaves it untouched and queues nothing.
    pub fn move_file(&self, src: &Path, dst: &Path) -> Result<()> {
        if staging::same_file(src, dst) {
            log::debug!("Move of {} onto itself skipped", src.display());
            return Ok(());
        }

        if !self.registry.is_transaction_active() {
            return staging::move_file(src, dst);
        }

        let displaced = self.displace(dst)?;
        if let Err(e) = staging::move_file(src, dst) {
            self.put_back(displaced, dst);
            return Err(e);
        }

        self.settle(displaced, dst)?;
        self.registry
            .run_after_rollback(move_back_action(dst, src))?;
        Ok(())
    }

    /// Copies the bytes of `src` to `dst`.
    ///
    /// Fails with `SameFile` if both paths resolve to the same file.
    pub fn copy_file(&self, src: &Path, dst: &Path) -> Result<()> {
        if staging::same_file(src, dst) {
            return Err(TxfsError::SameFile(src.to_path_buf()));
        }

        if !self.registry.is_transaction_active() {
            return staging::copy_file(src, dst);
        }

        let displaced = self.displace(dst)?;
        if let Err(e) = staging::copy_file(src, dst) {
            self.put_back(displaced, dst);
            return Err(e);
        }

        self.settle(displaced, dst)?;
        self.registry.run_after_rollback(delete_action(dst))?;
        Ok(())
    }

    /// Stages an existing `target` out of the way.
    fn displace(&self, target: &Path) -> Result<Option<PathBuf>> {
        if !target.is_file() {
            return Ok(None);
        }

        let staged = staging::staging_path_for(target)?;
        staging::move_file(target, &staged)?;
        log::debug!(
            "Staged existing destination {} as {}",
            target.display(),
            staged.display()
        );
        Ok(Some(staged))
    }

    /// Undoes [`displace`](Self::displace) after the operation itself failed.
    fn put_back(&self, displaced: Option<PathBuf>, target: &Path) {
        if let Some(staged) = displaced {
            if let Err(e) = staging::move_file(&staged, target) {
                log::error!(
                    "Original content of {} left in {}: {}",
                    target.display(),
                    staged.display(),
                    e
                );
            }
        }
    }

    /// Queues cleanup and restore of a displaced destination.
    ///
    /// Registered before the operation's own undo so that, run as a stack,
    /// the restore happens after the undo has cleared the destination.
    fn settle(&self, displaced: Option<PathBuf>, target: &Path) -> Result<()> {
        if let Some(staged) = displaced {
            self.registry.run_after_commit(delete_action(&staged))?;
            self.registry
                .run_after_rollback(restore_action(&staged, target))?;
        }
        Ok(())
    }
}

fn restore(staged: &Path, target: &Path) -> Result<()> {
    staging::remove_if_exists(target)?;
    staging::move_file(staged, target)
}

fn delete_action(path: &Path) -> DeferredAction {
    let path = path.to_path_buf();
    DeferredAction::new(format!("delete {}", path.display()), move || {
        staging::remove_if_exists(&path)?;
        Ok(())
    })
}

fn restore_action(staged: &Path, target: &Path) -> DeferredAction {
    let staged = staged.to_path_buf();
    let target = target.to_path_buf();
    DeferredAction::new(
        format!("restore {} from {}", target.display(), staged.display()),
        move || {
            restore(&staged, &target)?;
            Ok(())
        },
    )
}

fn move_back_action(from: &Path, to: &Path) -> DeferredAction {
    let from = from.to_path_buf();
    let to = to.to_path_buf();
    DeferredAction::new(
        format!("move {} back to {}", from.display(), to.display()),
        move || {
            staging::move_file(&from, &to)?;
            Ok(())
        },
    )
}
