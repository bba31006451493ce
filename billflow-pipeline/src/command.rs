//! External-program adapters for the item source and stage collaborators.
//!
//! A stage program is launched once per item with the context in its
//! environment:
//!
//! | Variable               | Value                                    |
//! |------------------------|------------------------------------------|
//! | `BILLFLOW_YEAR`        | session year                             |
//! | `BILLFLOW_SCOPE_DIR`   | `<data_dir>/<year>rs`                    |
//! | `BILLFLOW_ITEM`        | item identifier                          |
//! | `BILLFLOW_STAGE`       | stage name                               |
//! | `BILLFLOW_MODEL_FAMILY`| model family (amend / QA)                |
//! | `BILLFLOW_MODEL`       | model name                               |
//! | `BILLFLOW_INPUT_HASH`  | gate's input hash, if any                |
//! | `BILLFLOW_RECORD`      | current item record as JSON              |
//!
//! It reports success with exit status 0 and a JSON [`StageReport`] on
//! stdout (empty stdout means "changed, nothing to merge").

use std::collections::BTreeSet;
use std::process::{Command, Output, Stdio};

use billflow_core::{CommandSpec, ItemId, SessionScope, StateStore};

use crate::error::{SourceError, StageError};
use crate::source::{parse_item_list, ItemSource};
use crate::stage::{complete, StageContext, StageReport, StageRunner};

/// Longest stderr excerpt carried in an error message.
const STDERR_TAIL: usize = 2000;

/// Build a [`Command`] from `spec`, substituting `{year}` and `{item}` in
/// its arguments.
fn build_command(spec: &CommandSpec, year: u16, item: Option<&ItemId>) -> Command {
    let year = year.to_string();
    let mut cmd = Command::new(&spec.program);
    for arg in &spec.args {
        let mut arg = arg.replace("{year}", &year);
        if let Some(item) = item {
            arg = arg.replace("{item}", &item.0);
        }
        cmd.arg(arg);
    }
    cmd.envs(&spec.env);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }
    cmd.stdin(Stdio::null());
    cmd
}

fn stderr_tail(output: &Output) -> String {
    let text = String::from_utf8_lossy(&output.stderr);
    let text = text.trim();
    match text.char_indices().rev().nth(STDERR_TAIL) {
        Some((cut, _)) => format!("...{}", &text[cut..]),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Item source
// ---------------------------------------------------------------------------

/// Runs a program whose stdout is the item list (JSON array or one id per
/// line).
#[derive(Debug, Clone)]
pub struct CommandItemSource {
    spec: CommandSpec,
}

impl CommandItemSource {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

impl ItemSource for CommandItemSource {
    fn list_current_items(&self, scope: SessionScope) -> Result<BTreeSet<ItemId>, SourceError> {
        let output = build_command(&self.spec, scope.year, None)
            .env("BILLFLOW_YEAR", scope.year.to_string())
            .output()
            .map_err(|source| SourceError::Spawn {
                program: self.spec.program.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(SourceError::Command {
                program: self.spec.program.clone(),
                status: output.status.to_string(),
                stderr: stderr_tail(&output),
            });
        }
        parse_item_list(&String::from_utf8_lossy(&output.stdout))
    }
}

// ---------------------------------------------------------------------------
// Stage runner
// ---------------------------------------------------------------------------

/// A stage collaborator backed by an external program.
#[derive(Debug, Clone)]
pub struct CommandStage {
    spec: CommandSpec,
}

impl CommandStage {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

impl StageRunner for CommandStage {
    fn run(&self, ctx: &StageContext<'_>, store: &mut StateStore) -> Result<(), StageError> {
        let record = serde_json::to_string(&store.get(ctx.item))?;

        let mut cmd = build_command(&self.spec, ctx.scope.year, Some(ctx.item));
        cmd.env("BILLFLOW_YEAR", ctx.scope.year.to_string())
            .env("BILLFLOW_SCOPE_DIR", ctx.scope_dir)
            .env("BILLFLOW_ITEM", &ctx.item.0)
            .env("BILLFLOW_STAGE", ctx.stage.name())
            .env("BILLFLOW_MODEL_FAMILY", &ctx.model.family)
            .env("BILLFLOW_MODEL", &ctx.model.model)
            .env("BILLFLOW_RECORD", record);
        match &ctx.input_hash {
            Some(hash) => cmd.env("BILLFLOW_INPUT_HASH", hash),
            None => cmd.env_remove("BILLFLOW_INPUT_HASH"),
        };

        let output = cmd.output().map_err(|source| StageError::Spawn {
            program: self.spec.program.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(StageError::Command {
                program: self.spec.program.clone(),
                status: output.status.to_string(),
                stderr: stderr_tail(&output),
            });
        }
        if !output.stderr.is_empty() {
            tracing::debug!(
                item = %ctx.item,
                stage = %ctx.stage,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "stage program stderr"
            );
        }

        let report = parse_report(&output.stdout).map_err(|source| StageError::Report {
            program: self.spec.program.clone(),
            source,
        })?;
        complete(store, ctx, report)
    }
}

fn parse_report(stdout: &[u8]) -> Result<StageReport, serde_json::Error> {
    let text = String::from_utf8_lossy(stdout);
    if text.trim().is_empty() {
        return Ok(StageReport::changed());
    }
    serde_json::from_str(text.trim())
}
