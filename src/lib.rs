//! Filesystem operations that take part in an ambient transaction.
//!
//! Files have no native transactions. `txfs` applies each create, replace,
//! delete, move or copy immediately and queues the actions that either
//! finalize it (on commit) or undo it (on rollback). The queues are bound to
//! the ambient transaction through the narrow [`txn::TransactionContext`]
//! capability, so any host that can report "active?", store a keyed resource
//! and call back once with the outcome can drive them.
//!
//! - [`txn`]: the capability and [`txn::LocalTransactionManager`], an
//!   in-process host
//! - [`action`]: the commit/rollback queues ([`action::ActionRegistry`])
//! - [`fs`]: the file operations ([`fs::TransactionalFileOps`])
//! - [`plan`]: a small text format for batches of operations

pub mod action;
pub mod cli;
pub mod command;
pub mod error;
pub mod fs;
pub mod plan;
pub mod txn;

pub use error::*;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn run() -> Result<()> {
    use clap::Parser;
    use command::TxfsCommand;

    let cli = cli::TxfsCli::parse();

    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level()),
    )
    .try_init();

    match cli.command {
        TxfsCommand::Apply(args) => command::apply::execute(args),
    }
}
