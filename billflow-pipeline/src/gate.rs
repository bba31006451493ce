//! Change-detector gate.
//!
//! Decides, from the current record and the bytes on disk, whether a stage
//! has work to do for an item. Amend and QA are gated on the content hash of
//! their input artifact; download and convert run whenever their flag is set.

use billflow_core::{artifact, AmendedStatus, ItemRecord, Stage};

use crate::error::StageError;
use crate::hash::{hash_artifact, input_changed};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// The stage's flag is clear.
    NotNeeded,
    /// Flag set, input identical to what the stage last consumed. The
    /// flag may be cleared without invoking the collaborator.
    Unchanged { input_hash: String },
    /// The collaborator must run.
    Run { input_hash: Option<String> },
}

impl GateDecision {
    pub fn should_run(&self) -> bool {
        matches!(self, GateDecision::Run { .. })
    }
}

/// Gate `stage` for one item.
///
/// An unreadable input never skips: the collaborator runs and reports the
/// real failure.
pub fn evaluate(record: &ItemRecord, stage: Stage) -> GateDecision {
    if !record.needs(stage) {
        return GateDecision::NotNeeded;
    }
    if stage.input_hash_key().is_none() {
        return GateDecision::Run { input_hash: None };
    }
    match current_input_hash(record, stage) {
        Ok(Some(current)) if !input_changed(&current, record.input_hash(stage)) => {
            GateDecision::Unchanged { input_hash: current }
        }
        Ok(current) => GateDecision::Run { input_hash: current },
        Err(err) => {
            tracing::warn!(stage = %stage, error = %err, "could not hash stage input");
            GateDecision::Run { input_hash: None }
        }
    }
}

/// Hash of the first input artifact kind the record lists for `stage`.
///
/// QA prefers the amended text and falls back to the converted text. An
/// amended artifact only counts while the latest amend outcome is
/// `amended`; a leftover file from an earlier amend is ignored.
pub fn current_input_hash(record: &ItemRecord, stage: Stage) -> Result<Option<String>, StageError> {
    for kind in stage.input_artifacts() {
        if *kind == artifact::AMENDED && record.amended_status != AmendedStatus::Amended {
            continue;
        }
        if let Some(paths) = record.artifact(kind) {
            return hash_artifact(paths).map(Some);
        }
    }
    Ok(None)
}

/// Gate decision for every stage, in execution order, against the record as
/// it is now. Used for status reporting; the orchestrator re-evaluates each
/// stage after the previous one has run.
pub fn plan(record: &ItemRecord) -> Vec<(Stage, GateDecision)> {
    Stage::ALL
        .into_iter()
        .map(|stage| (stage, evaluate(record, stage)))
        .collect()
}
