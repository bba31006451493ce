//! `billflow export` — regenerate the report without running stages.

use anyhow::{Context, Result};
use clap::Args;

use billflow_pipeline::pipeline;

use super::ScopeArgs;

/// Arguments for `billflow export`.
#[derive(Args, Debug)]
pub struct ExportArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,
}

impl ExportArgs {
    pub fn run(self) -> Result<()> {
        let config = self.scope.load_config()?;
        let scope = self.scope.scope();
        let paths = pipeline::export(&config, scope)
            .with_context(|| format!("export failed for {scope}"))?;
        println!("✓ wrote {}", paths.csv.display());
        println!("✓ wrote {}", paths.json.display());
        Ok(())
    }
}
