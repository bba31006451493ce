//! `billflow clean` — cleanup pass only.

use anyhow::{Context, Result};
use clap::Args;

use billflow_pipeline::pipeline;

use super::ScopeArgs;

/// Arguments for `billflow clean`.
#[derive(Args, Debug)]
pub struct CleanArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,
}

impl CleanArgs {
    pub fn run(self) -> Result<()> {
        let config = self.scope.load_config()?;
        let scope = self.scope.scope();
        let purged = pipeline::clean(&config, scope)
            .with_context(|| format!("cleanup failed for {scope}"))?;
        match purged {
            0 => println!("✓ {scope}: no orphaned records"),
            n => println!("✓ {scope}: purged {n} orphaned records"),
        }
        Ok(())
    }
}
