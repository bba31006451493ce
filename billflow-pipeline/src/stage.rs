//! Stage collaborator contract.
//!
//! A [`StageRunner`] does the work of one stage for one item and reports the
//! outcome back through [`complete`], which applies the whole transition in a
//! single atomic update:
//!
//! 1. merge the collaborator's record updates (artifact paths, statuses, ...)
//! 2. clear the stage's own readiness flag
//! 3. record the input hash the gate computed for content-gated stages, or
//!    clear it when the gate had none
//! 4. if the output changed, raise every downstream flag

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use billflow_core::{ItemId, RecordPatch, SessionScope, Stage, StateStore, StoreError};

use crate::error::StageError;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Model used by the content stages (amend, QA).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub family: String,
    pub model: String,
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            family: "gemini".to_string(),
            model: "gemini-3-flash-preview".to_string(),
        }
    }
}

impl fmt::Display for ModelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.model)
    }
}

/// Everything a collaborator needs to process one item through one stage.
#[derive(Debug, Clone)]
pub struct StageContext<'a> {
    pub scope: SessionScope,
    /// `<data_dir>/<year>rs`; collaborators place artifacts beneath it.
    pub scope_dir: &'a Path,
    pub item: &'a ItemId,
    pub stage: Stage,
    pub model: &'a ModelSelection,
    /// Hash of the stage input, computed by the gate. `None` for ungated
    /// stages and for gated stages whose input could not be located.
    pub input_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Performs one stage for one item.
///
/// On success the runner must have cleared its own flag, normally by calling
/// [`complete`]. On failure it returns an error and leaves the flag set.
pub trait StageRunner {
    fn run(&self, ctx: &StageContext<'_>, store: &mut StateStore) -> Result<(), StageError>;
}

/// Result of a successful stage, as reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StageReport {
    /// Whether the stage produced output different from its previous output.
    #[serde(default = "default_changed")]
    pub changed: bool,
    /// Record fields to merge, e.g. `{"files": {"raw": ["HB1.pdf"]}}`.
    #[serde(default)]
    pub updates: Map<String, Value>,
}

fn default_changed() -> bool {
    true
}

impl StageReport {
    /// New output; downstream stages must re-run.
    pub fn changed() -> Self {
        Self {
            changed: true,
            updates: Map::new(),
        }
    }

    /// Output identical to last time; downstream stages stay as they are.
    pub fn unchanged() -> Self {
        Self {
            changed: false,
            updates: Map::new(),
        }
    }

    pub fn with_update(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.updates.insert(key.into(), value.into());
        self
    }
}

/// Apply a successful stage outcome to the item record in one write.
pub fn complete(
    store: &mut StateStore,
    ctx: &StageContext<'_>,
    report: StageReport,
) -> Result<(), StageError> {
    let mut patch = RecordPatch::from(report.updates).needs(ctx.stage, false);
    // No hash means this run consumed an input the gate could not read; an
    // older hash must not survive to skip the next run.
    patch = match &ctx.input_hash {
        Some(hash) => patch.input_hash(ctx.stage, hash.clone()),
        None => patch.clear_input_hash(ctx.stage),
    };
    if report.changed {
        if let Some(next) = ctx.stage.next() {
            patch = patch.mark_dirty_from(next);
        }
    }
    // An ill-typed update is the collaborator's fault, not the store's.
    store.update(ctx.item, patch).map_err(|err| match err {
        StoreError::InvalidUpdate { .. } => StageError::Failed(err.to_string()),
        other => StageError::Store(other),
    })?;
    Ok(())
}

// ---------------------------------------------------------------------------
// StageSet
// ---------------------------------------------------------------------------

/// At most one collaborator per stage.
#[derive(Default)]
pub struct StageSet {
    runners: BTreeMap<Stage, Box<dyn StageRunner>>,
}

impl StageSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, stage: Stage, runner: impl StageRunner + 'static) -> Self {
        self.insert(stage, Box::new(runner));
        self
    }

    /// Install `runner` for `stage`, replacing any previous one.
    pub fn insert(&mut self, stage: Stage, runner: Box<dyn StageRunner>) {
        self.runners.insert(stage, runner);
    }

    pub fn get(&self, stage: Stage) -> Option<&dyn StageRunner> {
        self.runners.get(&stage).map(|runner| runner.as_ref())
    }

    /// Stages with a collaborator, in execution order.
    pub fn configured(&self) -> Vec<Stage> {
        self.runners.keys().copied().collect()
    }
}

impl fmt::Debug for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSet")
            .field("configured", &self.configured())
            .finish()
    }
}
