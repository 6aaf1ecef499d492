//! File system operations with transaction support.
//!
//! Provides create, replace, delete, move and copy operations whose effects
//! are committed or undone together with the ambient transaction.

mod ops;
pub mod staging;

pub use ops::TransactionalFileOps;
pub use staging::{find_staging_files, is_staging_file, staging_path_for};
