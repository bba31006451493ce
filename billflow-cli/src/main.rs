//! billflow — incremental legislative document pipeline.
//!
//! # Usage
//!
//! ```text
//! billflow run [--year 2026] [--config billflow.yaml] [--model-family gemini|gpt|ollama] [--model NAME] [--reset-corrupt-state]
//! billflow status [--json]
//! billflow export
//! billflow mark-dirty <ITEM> --stage download|convert|amend|qa
//! billflow clean
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    clean::CleanArgs, export::ExportArgs, mark_dirty::MarkDirtyArgs, run::RunArgs,
    status::StatusArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "billflow",
    version,
    about = "Download, convert, amend and QA legislative bills incrementally",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every pending stage for every current item, then export the report.
    Run(RunArgs),

    /// Show per-item stage flags and what the next run would do.
    Status(StatusArgs),

    /// Rewrite the CSV/JSON report from the current state.
    Export(ExportArgs),

    /// Force a stage (and every later stage) to re-run for one item.
    MarkDirty(MarkDirtyArgs),

    /// Drop records no longer in the item list, without running stages.
    Clean(CleanArgs),
}

// ---------------------------------------------------------------------------
// Shared model-family argument
// ---------------------------------------------------------------------------

/// Model provider handed to the amend and QA collaborators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelFamily {
    #[default]
    Gemini,
    Gpt,
    Ollama,
}

impl FromStr for ModelFamily {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "gpt" => Ok(Self::Gpt),
            "ollama" => Ok(Self::Ollama),
            other => Err(format!(
                "unknown model family '{other}'; expected: gemini, gpt, ollama"
            )),
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::Gpt => write!(f, "gpt"),
            Self::Ollama => write!(f, "ollama"),
        }
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stderr keeps `status --json` output parseable.
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Export(args) => args.run(),
        Commands::MarkDirty(args) => args.run(),
        Commands::Clean(args) => args.run(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn model_family_parses_case_insensitively() {
        assert_eq!("GPT".parse::<ModelFamily>().unwrap(), ModelFamily::Gpt);
        assert_eq!(ModelFamily::Ollama.to_string(), "ollama");
        let err = "claude".parse::<ModelFamily>().unwrap_err();
        assert!(err.contains("expected: gemini, gpt, ollama"));
    }
}
