pub mod apply;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum TxfsCommand {
    /// Apply file operations inside one transaction and finish it
    Apply(apply::ApplyArgs),
}
