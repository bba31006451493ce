//! `billflow run` — one incremental pass over a session.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tracing::debug;

use billflow_core::Stage;
use billflow_pipeline::{pipeline, ModelSelection, RunOptions, RunSummary};

use super::ScopeArgs;
use crate::ModelFamily;

/// Arguments for `billflow run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Model provider for the amend and QA stages.
    #[arg(long, default_value_t = ModelFamily::Gemini)]
    pub model_family: ModelFamily,

    /// Model name passed to the amend and QA stages.
    #[arg(long, default_value = "gemini-3-flash-preview")]
    pub model: String,

    /// Move an unreadable state file aside and start from empty state.
    #[arg(long)]
    pub reset_corrupt_state: bool,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let config = self.scope.load_config()?;
        let scope = self.scope.scope();
        let options = RunOptions {
            scope,
            model: ModelSelection {
                family: self.model_family.to_string(),
                model: self.model,
            },
            reset_corrupt_state: self.reset_corrupt_state,
        };
        debug!(%scope, model = %options.model, data_dir = %config.data_dir.display(), "starting run");

        let outcome = pipeline::run(&config, &options)
            .with_context(|| format!("pipeline run failed for {scope}"))?;

        if let Some(moved) = &outcome.quarantined {
            println!(
                "{} corrupt state moved to {}",
                "!".yellow().bold(),
                moved.display()
            );
        }
        print_summary(&outcome.summary);
        println!("  report: {}", outcome.report.csv.display());
        Ok(())
    }
}

fn print_summary(summary: &RunSummary) {
    let executed: usize = summary.executed.values().sum();
    let mark = if summary.is_clean() {
        "✓".green().bold()
    } else {
        "!".yellow().bold()
    };
    println!(
        "{mark} {} items ({} new, {} purged), {} stages run, {} failed",
        summary.items,
        summary.registered,
        summary.purged,
        executed,
        summary.failures.len()
    );
    for stage in Stage::ALL {
        let (ran, skipped) = (summary.executed(stage), summary.unchanged(stage));
        if ran > 0 || skipped > 0 {
            println!("  {stage:<8} {ran} run, {skipped} unchanged");
        }
    }
    for failure in &summary.failures {
        println!(
            "  {} {} {}: {}",
            "✗".red().bold(),
            failure.item,
            failure.stage,
            failure.message
        );
    }
}
