//! billflow core library — domain types, state store, configuration, errors.
//!
//! Public API surface:
//! - [`types`] — newtypes, the ordered [`Stage`] enum and [`ItemRecord`]
//! - [`patch`] — [`RecordPatch`], the partial-update document
//! - [`store`] — [`StateStore`]: load / update / mark_dirty / purge
//! - [`config`] — `billflow.yaml` parsing
//! - [`error`] — [`StoreError`], [`ConfigError`]

pub mod config;
pub mod error;
pub mod patch;
pub mod store;
pub mod types;

pub use config::{CommandSpec, ItemSourceConfig, PipelineConfig, StageCommands};
pub use error::{ConfigError, StoreError};
pub use patch::RecordPatch;
pub use store::{write_atomic, StateStore};
pub use types::{artifact, AmendedStatus, ItemId, ItemRecord, SessionScope, Stage};
