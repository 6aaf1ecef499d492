//! Shared helpers for txfs integration tests.

use assert_cmd::cargo::cargo_bin_cmd;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use txfs::action::DeferredAction;
use txfs::fs::{TransactionalFileOps, find_staging_files};
use txfs::txn::LocalTransactionManager;

/// Scratch directory plus a transaction host and file operations bound to it.
#[allow(unused)]
pub struct Fixture {
    pub temp: TempDir,
    pub manager: Arc<LocalTransactionManager>,
    pub ops: TransactionalFileOps,
}

#[allow(unused)]
impl Fixture {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let manager = Arc::new(LocalTransactionManager::new());
        let ops = TransactionalFileOps::new(manager.clone());
        Self { temp, manager, ops }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp.path().join(name)
    }

    pub fn write(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// Staging files left anywhere directly under the scratch directory.
    pub fn staging_files(&self) -> Vec<PathBuf> {
        find_staging_files(self.temp.path()).unwrap()
    }
}

#[allow(unused)]
pub fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

/// Shared execution log and a factory for actions that append to it.
#[allow(unused)]
pub fn recorder() -> (
    Arc<Mutex<Vec<&'static str>>>,
    impl Fn(&'static str) -> DeferredAction,
) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let make = move |name: &'static str| {
        let sink = sink.clone();
        DeferredAction::new(name, move || {
            sink.lock().unwrap().push(name);
            Ok(())
        })
    };
    (log, make)
}

/// Action that increments `counter`.
#[allow(unused)]
pub fn counting(counter: &Arc<Mutex<usize>>) -> DeferredAction {
    let counter = counter.clone();
    DeferredAction::new("count", move || {
        *counter.lock().unwrap() += 1;
        Ok(())
    })
}

#[allow(unused)]
pub fn count(counter: &Arc<Mutex<usize>>) -> usize {
    *counter.lock().unwrap()
}

/// Runs the txfs binary in `dir`.
#[allow(unused)]
pub fn run_txfs(dir: &Path, args: &[&str]) -> assert_cmd::assert::Assert {
    let mut cmd = cargo_bin_cmd!("txfs");
    cmd.args(args).current_dir(dir).env("NO_COLOR", "1");
    cmd.assert()
}
