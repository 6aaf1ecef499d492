use clap::{ArgAction, Parser};

use crate::command::TxfsCommand;

#[derive(Parser)]
#[command(name = "txfs", version, about)]
pub struct TxfsCli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: TxfsCommand,
}

impl TxfsCli {
    /// Log filter implied by `-v` flags; `RUST_LOG` still takes precedence.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
