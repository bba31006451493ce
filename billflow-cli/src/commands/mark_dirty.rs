//! `billflow mark-dirty` — force a stage to re-run for one item.

use anyhow::{bail, Context, Result};
use clap::Args;

use billflow_core::{ItemId, Stage, StateStore};

use super::ScopeArgs;

/// Arguments for `billflow mark-dirty`.
#[derive(Args, Debug)]
pub struct MarkDirtyArgs {
    /// Item identifier, e.g. HB0001.
    pub item: String,

    /// First stage to re-run; every later stage re-runs too.
    #[arg(long)]
    pub stage: Stage,

    #[command(flatten)]
    pub scope: ScopeArgs,
}

impl MarkDirtyArgs {
    pub fn run(self) -> Result<()> {
        let config = self.scope.load_config()?;
        let scope = self.scope.scope();
        let mut store = StateStore::open(config.state_path(scope))
            .with_context(|| format!("failed to load state for {scope}"))?;

        let item = ItemId::from(self.item);
        if !store.contains(&item) {
            bail!("item '{item}' is not tracked in {scope}");
        }
        let record = store
            .mark_dirty(&item, self.stage)
            .with_context(|| format!("failed to mark '{item}' dirty"))?;

        let pending: Vec<&str> = record.pending_stages().into_iter().map(Stage::name).collect();
        println!("✓ '{item}' pending: {}", pending.join(", "));
        Ok(())
    }
}
