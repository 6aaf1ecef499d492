use crate::action::{
    ActionRegistry, DrainReport, FILE_SYSTEM_OPERATION_ORDER, Phase, RegistryConfig,
    UnknownOutcomePolicy,
};
use crate::error::{Result, TxfsError};
use crate::fs::TransactionalFileOps;
use crate::plan::{Step, parse_plan};
use crate::txn::{CompletionStatus, LocalTransactionManager, Propagation};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// How the transaction is finished after all steps were applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Outcome {
    Commit,
    Rollback,
    /// Report a heuristic outcome the host could not confirm
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum UnknownAs {
    Rollback,
    Commit,
    Discard,
}

impl From<UnknownAs> for UnknownOutcomePolicy {
    fn from(value: UnknownAs) -> Self {
        match value {
            UnknownAs::Rollback => UnknownOutcomePolicy::Rollback,
            UnknownAs::Commit => UnknownOutcomePolicy::Commit,
            UnknownAs::Discard => UnknownOutcomePolicy::Discard,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[clap(verbatim_doc_comment)]
pub struct ApplyArgs {
    /// Plan file with one operation per line
    ///
    /// Operations:
    ///   create  <PATH> <TEXT>
    ///   replace <PATH> <TEXT>
    ///   delete  <PATH>
    ///   move    <SRC> <DST>
    ///   copy    <SRC> <DST>
    ///
    /// Paths containing whitespace go in double quotes.
    /// Blank lines and lines starting with '#' are ignored.
    #[arg(value_name = "PLAN", verbatim_doc_comment)]
    pub plan: Option<PathBuf>,

    /// Inline step using plan syntax, applied after the plan file (repeatable)
    #[arg(long = "step", short = 'e', value_name = "STEP")]
    pub steps: Vec<String>,

    /// How to finish the transaction once every step succeeded
    ///
    /// A failing step always rolls the transaction back.
    #[arg(long, value_enum, default_value_t = Outcome::Commit)]
    pub outcome: Outcome,

    /// Which queue to run when the outcome is unknown
    #[arg(long, value_enum, default_value_t = UnknownAs::Rollback)]
    pub unknown_as: UnknownAs,

    /// Completion-callback priority of the file actions
    #[arg(long, default_value_t = FILE_SYSTEM_OPERATION_ORDER, allow_hyphen_values = true)]
    pub order: i32,
}

/// Owned copy of a [`DrainReport`] kept for the summary.
#[derive(Debug)]
struct DrainSummary {
    phase: Option<Phase>,
    executed: usize,
    discarded: usize,
    failures: Vec<String>,
}

impl From<&DrainReport> for DrainSummary {
    fn from(report: &DrainReport) -> Self {
        Self {
            phase: report.phase(),
            executed: report.executed(),
            discarded: report.discarded(),
            failures: report.failures().iter().map(ToString::to_string).collect(),
        }
    }
}

fn collect_steps(args: &ApplyArgs) -> Result<Vec<Step>> {
    let mut steps = Vec::new();

    if let Some(plan) = &args.plan {
        let text = fs::read_to_string(plan).map_err(|e| {
            TxfsError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read plan {}: {}", plan.display(), e),
            ))
        })?;
        steps.extend(parse_plan(&text)?);
    }

    for (idx, raw) in args.steps.iter().enumerate() {
        if let Some(step) = Step::parse(idx + 1, raw)? {
            steps.push(step);
        }
    }

    Ok(steps)
}

pub fn execute(args: ApplyArgs) -> Result<()> {
    let steps = collect_steps(&args)?;

    if steps.is_empty() {
        println!("\n{}", "No steps to apply".yellow());
        return Ok(());
    }

    let config = RegistryConfig::default()
        .with_order(args.order)
        .with_unknown_outcome(args.unknown_as.into());

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();

    let manager = Arc::new(LocalTransactionManager::new());
    let registry = ActionRegistry::new(manager.clone(), config).with_observer(
        move |report: &DrainReport| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(DrainSummary::from(report));
        },
    );
    let ops = TransactionalFileOps::from_registry(registry);

    let status = manager.begin(Propagation::Required)?;

    let mut applied = Vec::new();
    let mut failure = None;

    for step in &steps {
        log::info!("Applying: {}", step);
        match step.apply(&ops) {
            Ok(()) => applied.push(step),
            Err(e) => {
                failure = Some((step, e));
                break;
            }
        }
    }

    let outcome = if failure.is_some() {
        Outcome::Rollback
    } else {
        args.outcome
    };

    match outcome {
        Outcome::Commit => manager.commit(status)?,
        Outcome::Rollback => manager.rollback(status)?,
        Outcome::Unknown => manager.complete_with_code(status, CompletionStatus::UNKNOWN_CODE)?,
    }

    let reports = std::mem::take(&mut *reports.lock().unwrap_or_else(PoisonError::into_inner));
    let cwd = std::env::current_dir()?;
    print_summary(&applied, outcome, &reports, &cwd);

    if let Some((step, e)) = failure {
        eprintln!("{} {}: {}", "Error:".red().bold(), step, e);
        eprintln!("{}", "Transaction rolled back.".yellow().bold());
        return Err(e);
    }

    Ok(())
}

fn print_summary(applied: &[&Step], outcome: Outcome, reports: &[DrainSummary], root: &Path) {
    let display_path = |path: &Path| -> String {
        let relative = pathdiff::diff_paths(path, root).unwrap_or_else(|| path.to_path_buf());
        relative.to_string_lossy().replace('\\', "/")
    };

    match outcome {
        Outcome::Commit => println!("\n{}", "Committed:".green().bold()),
        Outcome::Rollback => println!("\n{}", "Rolled back:".yellow().bold()),
        Outcome::Unknown => println!("\n{}", "Outcome unknown:".magenta().bold()),
    }

    for step in applied {
        let line = match step.paths() {
            (path, None) => format!("{:<8} {}", step.verb(), display_path(path)),
            (from, Some(to)) => format!(
                "{:<8} {} → {}",
                step.verb(),
                display_path(from),
                display_path(to)
            ),
        };

        match outcome {
            Outcome::Commit => println!("   {} {}", "✓".green(), line),
            _ => println!("   {} {}", "•".yellow(), line.dimmed()),
        }
    }

    for report in reports {
        match report.phase {
            Some(phase) => println!(
                "\n{} Ran {} {} action{}",
                "↺".bold(),
                report.executed.to_string().cyan().bold(),
                phase,
                if report.executed == 1 { "" } else { "s" }
            ),
            None => println!(
                "\n{} Discarded {} queued action{}; staged files left in place",
                "!".yellow().bold(),
                report.discarded,
                if report.discarded == 1 { "" } else { "s" }
            ),
        }

        for failure in &report.failures {
            println!("   {} {}", "✗".red(), failure);
        }
    }

    println!();
    let failed: usize = reports.iter().map(|r| r.failures.len()).sum();
    if failed > 0 {
        println!(
            "{} {} compensation action{} failed",
            "✗".red().bold(),
            failed,
            if failed == 1 { "" } else { "s" }
        );
    } else if outcome == Outcome::Commit {
        println!(
            "{} Successfully committed {} operation{}",
            "✓".green().bold(),
            applied.len(),
            if applied.len() == 1 { "" } else { "s" }
        );
    } else {
        println!(
            "{} {} operation{} not kept",
            "↺".yellow().bold(),
            applied.len(),
            if applied.len() == 1 { "" } else { "s" }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: ApplyArgs,
    }

    #[test]
    fn test_defaults() {
        let harness = Harness::parse_from(["txfs", "-e", "delete a.txt"]);
        assert_eq!(harness.args.outcome, Outcome::Commit);
        assert_eq!(harness.args.unknown_as, UnknownAs::Rollback);
        assert_eq!(harness.args.order, FILE_SYSTEM_OPERATION_ORDER);
        assert_eq!(harness.args.steps, vec!["delete a.txt".to_string()]);
    }

    #[test]
    fn test_negative_order() {
        let harness = Harness::parse_from(["txfs", "--order", "-5"]);
        assert_eq!(harness.args.order, -5);
    }

    #[test]
    fn test_collect_steps_reports_inline_position() {
        let harness = Harness::parse_from(["txfs", "-e", "delete a", "-e", "bogus"]);
        let err = collect_steps(&harness.args).unwrap_err();
        assert!(matches!(err, TxfsError::Plan { line: 2, .. }));
    }
}
