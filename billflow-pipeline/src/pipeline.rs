//! Config-driven entrypoints shared by every CLI subcommand.

use std::path::PathBuf;

use billflow_core::{ItemSourceConfig, PipelineConfig, SessionScope, StateStore, StoreError};

use crate::command::{CommandItemSource, CommandStage};
use crate::error::PipelineError;
use crate::export::{write_reports, ReportPaths};
use crate::orchestrator::{Orchestrator, ReportWriter, RunSummary};
use crate::source::{FileItemSource, ItemSource};
use crate::stage::{ModelSelection, StageSet};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub scope: SessionScope,
    pub model: ModelSelection,
    /// Move an unparseable state document aside and start empty instead of
    /// aborting.
    pub reset_corrupt_state: bool,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: RunSummary,
    pub report: ReportPaths,
    /// Where a corrupt state document was moved, if it was.
    pub quarantined: Option<PathBuf>,
}

/// Build the configured item source.
pub fn item_source(config: &PipelineConfig) -> Result<Box<dyn ItemSource>, PipelineError> {
    Ok(match config.require_items()? {
        ItemSourceConfig::File { path } => Box::new(FileItemSource::new(path.clone())),
        ItemSourceConfig::Command(spec) => Box::new(CommandItemSource::new(spec.clone())),
    })
}

/// One [`CommandStage`] per configured stage program.
pub fn stage_set(config: &PipelineConfig) -> StageSet {
    let mut stages = StageSet::new();
    for stage in billflow_core::Stage::ALL {
        if let Some(spec) = config.stages.get(stage) {
            stages.insert(stage, Box::new(CommandStage::new(spec.clone())));
        }
    }
    stages
}

/// Open the session's state store, optionally quarantining a corrupt one.
pub fn open_store(
    config: &PipelineConfig,
    scope: SessionScope,
    reset_corrupt_state: bool,
) -> Result<(StateStore, Option<PathBuf>), StoreError> {
    let path = config.state_path(scope);
    if reset_corrupt_state {
        let (store, quarantined) = StateStore::open_or_quarantine(&path)?;
        if let Some(moved) = &quarantined {
            tracing::warn!(
                path = %path.display(),
                moved_to = %moved.display(),
                "state document was corrupt; starting from empty state"
            );
        }
        Ok((store, quarantined))
    } else {
        Ok((StateStore::open(path)?, None))
    }
}

/// Run the full pipeline for one session.
pub fn run(config: &PipelineConfig, options: &RunOptions) -> Result<RunOutcome, PipelineError> {
    let scope_dir = config.scope_dir(options.scope);
    let source = item_source(config)?;
    let stages = stage_set(config);
    let (mut store, quarantined) = open_store(config, options.scope, options.reset_corrupt_state)?;
    tracing::info!(
        scope = %options.scope,
        state = %store.path().display(),
        records = store.len(),
        model = %options.model,
        "starting pipeline run"
    );

    let exporter = ReportWriter::new(&scope_dir);
    let summary = Orchestrator::new(options.scope, &scope_dir, source.as_ref(), &stages)
        .with_model(options.model.clone())
        .with_exporter(&exporter)
        .run(&mut store)?;

    Ok(RunOutcome {
        summary,
        report: ReportPaths::in_dir(&scope_dir),
        quarantined,
    })
}

/// Remove records absent from the current item list without running stages.
pub fn clean(config: &PipelineConfig, scope: SessionScope) -> Result<usize, PipelineError> {
    let items = item_source(config)?.list_current_items(scope)?;
    let mut store = StateStore::open(config.state_path(scope))?;
    let purged = store.purge_orphans(&items)?;
    tracing::info!(scope = %scope, purged, "cleanup finished");
    Ok(purged)
}

/// Regenerate the report from the state on disk.
pub fn export(config: &PipelineConfig, scope: SessionScope) -> Result<ReportPaths, PipelineError> {
    let store = StateStore::open(config.state_path(scope))?;
    Ok(write_reports(&store, &config.scope_dir(scope))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use billflow_core::{CommandSpec, Stage};
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> PipelineConfig {
        let list = dir.path().join("bills-{year}.txt");
        PipelineConfig {
            data_dir: dir.path().join("data"),
            items: Some(ItemSourceConfig::File {
                path: list.display().to_string(),
            }),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn stage_set_mirrors_configured_programs() {
        let mut config = PipelineConfig::default();
        config.stages.convert = Some(CommandSpec {
            program: "convert.sh".to_string(),
            args: vec![],
            env: Default::default(),
            working_dir: None,
        });
        assert_eq!(stage_set(&config).configured(), vec![Stage::Convert]);
    }

    #[test]
    fn run_without_item_source_is_a_config_error() {
        let err = run(
            &PipelineConfig::default(),
            &RunOptions {
                scope: SessionScope::new(2026),
                model: ModelSelection::default(),
                reset_corrupt_state: false,
            },
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)), "got: {err}");
    }

    #[test]
    fn run_registers_items_and_writes_reports() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bills-2026.txt"), "HB1\nSB1\n").unwrap();
        let config = config(&dir);

        let outcome = run(
            &config,
            &RunOptions {
                scope: SessionScope::new(2026),
                model: ModelSelection::default(),
                reset_corrupt_state: false,
            },
        )
        .unwrap();

        assert_eq!(outcome.summary.registered, 2);
        // No download program configured: both items fail at download.
        assert_eq!(outcome.summary.failures.len(), 2);
        assert!(outcome.report.csv.exists());
        assert!(config.state_path(SessionScope::new(2026)).exists());
    }

    #[test]
    fn clean_purges_items_dropped_from_the_list() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let scope = SessionScope::new(2026);
        let mut store = StateStore::open(config.state_path(scope)).unwrap();
        let ids = ["HB1", "HB2"].map(billflow_core::ItemId::from);
        store.register_all(ids.iter()).unwrap();
        std::fs::write(dir.path().join("bills-2026.txt"), "HB2\n").unwrap();

        assert_eq!(clean(&config, scope).unwrap(), 1);
        let store = StateStore::open(config.state_path(scope)).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn corrupt_state_aborts_unless_reset_requested() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("bills-2026.txt"), "HB1\n").unwrap();
        let config = config(&dir);
        let scope = SessionScope::new(2026);
        let state = config.state_path(scope);
        std::fs::create_dir_all(state.parent().unwrap()).unwrap();
        std::fs::write(&state, "{ not json").unwrap();

        let mut options = RunOptions {
            scope,
            model: ModelSelection::default(),
            reset_corrupt_state: false,
        };
        let err = run(&config, &options).unwrap_err();
        assert!(matches!(err, PipelineError::Store(StoreError::Corruption { .. })));
        assert_eq!(std::fs::read_to_string(&state).unwrap(), "{ not json");

        options.reset_corrupt_state = true;
        let outcome = run(&config, &options).unwrap();
        let moved = outcome.quarantined.expect("quarantined path");
        assert_eq!(std::fs::read_to_string(moved).unwrap(), "{ not json");
        assert_eq!(outcome.summary.registered, 1);
    }
}
