pub mod clean;
pub mod export;
pub mod mark_dirty;
pub mod run;
pub mod status;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use billflow_core::{config::DEFAULT_CONFIG_FILE, PipelineConfig, SessionScope};

pub const DEFAULT_YEAR: u16 = 2026;

/// Session and config selection shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct ScopeArgs {
    /// Legislative session year.
    #[arg(long, default_value_t = DEFAULT_YEAR)]
    pub year: u16,

    /// Pipeline configuration file.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
}

impl ScopeArgs {
    pub fn scope(&self) -> SessionScope {
        SessionScope::new(self.year)
    }

    pub fn load_config(&self) -> Result<PipelineConfig> {
        PipelineConfig::load_or_default(&self.config)
            .with_context(|| format!("failed to load config {}", self.config.display()))
    }
}
