//! # billflow-pipeline
//!
//! Gated, resumable stage orchestration over the billflow state store.
//!
//! Call [`pipeline::run`] to drive one session from its config, or build an
//! [`Orchestrator`] directly with your own [`ItemSource`] and [`StageSet`].

pub mod command;
pub mod error;
pub mod export;
pub mod gate;
pub mod hash;
pub mod orchestrator;
pub mod pipeline;
pub mod source;
pub mod stage;

pub use command::{CommandItemSource, CommandStage};
pub use error::{ExportError, PipelineError, SourceError, StageError};
pub use export::{write_reports, Report, ReportPaths};
pub use gate::GateDecision;
pub use orchestrator::{Exporter, Orchestrator, ReportWriter, RunSummary, StageFailure};
pub use pipeline::{RunOptions, RunOutcome};
pub use source::{FileItemSource, ItemSource};
pub use stage::{complete, ModelSelection, StageContext, StageReport, StageRunner, StageSet};
