//! One pipeline pass over a session.
//!
//! ## Run order
//!
//! 1. Ask the item source for the authoritative item list.
//! 2. Register new items (one write for the whole batch).
//! 3. Purge records no longer in the list.
//! 4. For each item, in id order, gate and run every stage in order,
//!    re-reading the record before each stage.
//! 5. Export the report.
//!
//! A stage failure is logged, recorded in the [`RunSummary`] and the item's
//! later stages are skipped; the flag stays set so the next run retries.
//! A failure to persist state aborts the run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use billflow_core::{ItemId, RecordPatch, SessionScope, Stage, StateStore};

use crate::error::{ExportError, PipelineError, StageError};
use crate::export::write_reports;
use crate::gate::{self, GateDecision};
use crate::source::ItemSource;
use crate::stage::{ModelSelection, StageContext, StageSet};

// ---------------------------------------------------------------------------
// Exporter
// ---------------------------------------------------------------------------

/// Runs after every item has been processed.
pub trait Exporter {
    fn export(&self, store: &StateStore) -> Result<(), ExportError>;
}

/// Writes the CSV/JSON report into a directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Exporter for ReportWriter {
    fn export(&self, store: &StateStore) -> Result<(), ExportError> {
        write_reports(store, &self.dir).map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub item: ItemId,
    pub stage: Stage,
    pub message: String,
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Size of the authoritative item list.
    pub items: usize,
    pub registered: usize,
    pub purged: usize,
    /// Collaborator invocations that succeeded, per stage.
    pub executed: BTreeMap<Stage, usize>,
    /// Flags cleared by the change detector without running the stage.
    pub unchanged: BTreeMap<Stage, usize>,
    pub failures: Vec<StageFailure>,
}

impl RunSummary {
    pub fn executed(&self, stage: Stage) -> usize {
        self.executed.get(&stage).copied().unwrap_or(0)
    }

    pub fn unchanged(&self, stage: Stage) -> usize {
        self.unchanged.get(&stage).copied().unwrap_or(0)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator<'a> {
    scope: SessionScope,
    scope_dir: &'a Path,
    source: &'a dyn ItemSource,
    stages: &'a StageSet,
    exporter: Option<&'a dyn Exporter>,
    model: ModelSelection,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        scope: SessionScope,
        scope_dir: &'a Path,
        source: &'a dyn ItemSource,
        stages: &'a StageSet,
    ) -> Self {
        Self {
            scope,
            scope_dir,
            source,
            stages,
            exporter: None,
            model: ModelSelection::default(),
        }
    }

    pub fn with_model(mut self, model: ModelSelection) -> Self {
        self.model = model;
        self
    }

    pub fn with_exporter(mut self, exporter: &'a dyn Exporter) -> Self {
        self.exporter = Some(exporter);
        self
    }

    /// Run one pass. The store is left consistent with every completed
    /// transition even when this returns an error.
    pub fn run(&self, store: &mut StateStore) -> Result<RunSummary, PipelineError> {
        let items: BTreeSet<ItemId> = self.source.list_current_items(self.scope)?;
        tracing::info!(scope = %self.scope, items = items.len(), "resolved item list");

        let mut summary = RunSummary {
            items: items.len(),
            ..RunSummary::default()
        };
        summary.registered = store.register_all(items.iter())?;
        if summary.registered > 0 {
            tracing::info!(count = summary.registered, "registered new items");
        }
        summary.purged = store.purge_orphans(&items)?;
        if summary.purged > 0 {
            tracing::info!(count = summary.purged, "purged orphaned records");
        }

        for item in &items {
            self.process_item(item, store, &mut summary)?;
        }

        if let Some(exporter) = self.exporter {
            exporter.export(store)?;
        }

        tracing::info!(
            scope = %self.scope,
            executed = summary.executed.values().sum::<usize>(),
            unchanged = summary.unchanged.values().sum::<usize>(),
            failures = summary.failures.len(),
            "pipeline run finished"
        );
        Ok(summary)
    }

    fn process_item(
        &self,
        item: &ItemId,
        store: &mut StateStore,
        summary: &mut RunSummary,
    ) -> Result<(), PipelineError> {
        for stage in Stage::ALL {
            // Re-read: the previous stage may have raised or cleared flags.
            let Some(record) = store.get(item) else {
                return Ok(());
            };
            let input_hash = match gate::evaluate(record, stage) {
                GateDecision::NotNeeded => continue,
                GateDecision::Unchanged { input_hash } => {
                    tracing::info!(
                        item = %item,
                        stage = %stage,
                        hash = %input_hash,
                        "input unchanged; skipping stage"
                    );
                    store.update(item, RecordPatch::new().needs(stage, false))?;
                    *summary.unchanged.entry(stage).or_default() += 1;
                    continue;
                }
                GateDecision::Run { input_hash } => input_hash,
            };

            let Some(runner) = self.stages.get(stage) else {
                record_failure(summary, item, stage, &StageError::NotConfigured(stage));
                return Ok(());
            };

            let ctx = StageContext {
                scope: self.scope,
                scope_dir: self.scope_dir,
                item,
                stage,
                model: &self.model,
                input_hash,
            };
            tracing::info!(item = %item, stage = %stage, "running stage");
            match runner.run(&ctx, store) {
                Ok(()) => {
                    *summary.executed.entry(stage).or_default() += 1;
                    if store.get(item).is_some_and(|r| r.needs(stage)) {
                        tracing::warn!(
                            item = %item,
                            stage = %stage,
                            "stage succeeded but left its flag set; it will run again"
                        );
                    }
                }
                Err(err) if err.is_fatal() => {
                    return Err(PipelineError::FatalStage {
                        item: item.clone(),
                        stage,
                        source: err,
                    });
                }
                Err(err) => {
                    record_failure(summary, item, stage, &err);
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

fn record_failure(summary: &mut RunSummary, item: &ItemId, stage: Stage, err: &StageError) {
    tracing::warn!(
        item = %item,
        stage = %stage,
        error = %err,
        "stage failed; will retry on next run"
    );
    summary.failures.push(StageFailure {
        item: item.clone(),
        stage,
        message: err.to_string(),
    });
}
