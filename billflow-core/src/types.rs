//! Domain types for the pipeline state document.
//!
//! [`ItemRecord`] serializes to the flat JSON layout of the state document.
//! Deserialization goes through a lenient compat shape so that records
//! written by older schemas are backfilled instead of rejected.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable identifier of a tracked document (e.g. a bill number like `HB0001`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A legislative session scope. All state for one scope lives under
/// `<data_dir>/<year>rs/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionScope {
    pub year: u16,
}

impl SessionScope {
    pub fn new(year: u16) -> Self {
        Self { year }
    }

    /// Directory name for the scope, e.g. `2026rs`.
    pub fn dir_name(&self) -> String {
        format!("{}rs", self.year)
    }

    /// `<data_dir>/<year>rs`. Pure, no I/O.
    pub fn dir_at(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(self.dir_name())
    }
}

impl fmt::Display for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}rs", self.year)
    }
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// A pipeline stage. Declaration order is the execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Download,
    Convert,
    Amend,
    Qa,
}

static STAGE_ORDER: [Stage; 4] = Stage::ALL;

impl Stage {
    /// Every stage in execution order.
    pub const ALL: [Stage; 4] = [Stage::Download, Stage::Convert, Stage::Amend, Stage::Qa];

    pub fn index(self) -> usize {
        self as usize
    }

    /// `self` followed by every stage after it. This is the set of flags
    /// that [`crate::StateStore::mark_dirty`] raises.
    pub fn downstream(self) -> &'static [Stage] {
        &STAGE_ORDER[self.index()..]
    }

    pub fn next(self) -> Option<Stage> {
        STAGE_ORDER.get(self.index() + 1).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Convert => "convert",
            Stage::Amend => "amend",
            Stage::Qa => "qa",
        }
    }

    /// Record key of this stage's readiness flag.
    pub fn flag_key(self) -> &'static str {
        match self {
            Stage::Download => "needs_download",
            Stage::Convert => "needs_convert",
            Stage::Amend => "needs_amend",
            Stage::Qa => "needs_qa",
        }
    }

    /// Record key of the input hash, for stages gated on input content.
    pub fn input_hash_key(self) -> Option<&'static str> {
        match self {
            Stage::Amend => Some("amend_input_hash"),
            Stage::Qa => Some("qa_input_hash"),
            Stage::Download | Stage::Convert => None,
        }
    }

    /// Artifact kinds this stage consumes, in order of preference.
    pub fn input_artifacts(self) -> &'static [&'static str] {
        match self {
            Stage::Amend => &[artifact::CONVERTED],
            Stage::Qa => &[artifact::AMENDED, artifact::CONVERTED],
            Stage::Download | Stage::Convert => &[],
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "download" => Ok(Stage::Download),
            "convert" => Ok(Stage::Convert),
            "amend" => Ok(Stage::Amend),
            "qa" => Ok(Stage::Qa),
            other => Err(format!(
                "unknown stage '{other}'; expected: download, convert, amend, qa"
            )),
        }
    }
}

/// Well-known artifact kinds written into [`ItemRecord::files`].
pub mod artifact {
    /// The downloaded source document (PDF).
    pub const RAW: &str = "raw";
    /// Text produced by the convert stage.
    pub const CONVERTED: &str = "converted";
    /// Text produced by the amend stage.
    pub const AMENDED: &str = "amended";
}

/// Outcome of the amend stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AmendedStatus {
    #[default]
    Original,
    Amended,
    Failed,
}

impl fmt::Display for AmendedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmendedStatus::Original => write!(f, "original"),
            AmendedStatus::Amended => write!(f, "amended"),
            AmendedStatus::Failed => write!(f, "failed"),
        }
    }
}

impl From<AmendedStatus> for Value {
    fn from(status: AmendedStatus) -> Self {
        Value::String(status.to_string())
    }
}

// ---------------------------------------------------------------------------
// Item record
// ---------------------------------------------------------------------------

/// Pipeline progress for a single tracked document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ItemRecordCompat")]
pub struct ItemRecord {
    pub first_seen: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
    pub needs_download: bool,
    pub needs_convert: bool,
    pub needs_amend: bool,
    pub needs_qa: bool,
    /// Artifact kind → storage locations.
    pub files: BTreeMap<String, Vec<PathBuf>>,
    pub amended_status: AmendedStatus,
    pub amend_input_hash: Option<String>,
    pub qa_input_hash: Option<String>,
    pub qa_results: Option<Value>,
    /// Keys written by stage collaborators that this schema does not model.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ItemRecord {
    /// A freshly discovered item: only the download stage is pending.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            first_seen: now,
            last_seen: None,
            last_updated: now,
            needs_download: true,
            needs_convert: false,
            needs_amend: false,
            needs_qa: false,
            files: BTreeMap::new(),
            amended_status: AmendedStatus::Original,
            amend_input_hash: None,
            qa_input_hash: None,
            qa_results: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn needs(&self, stage: Stage) -> bool {
        match stage {
            Stage::Download => self.needs_download,
            Stage::Convert => self.needs_convert,
            Stage::Amend => self.needs_amend,
            Stage::Qa => self.needs_qa,
        }
    }

    /// Recorded input hash for `stage`; always `None` for ungated stages.
    pub fn input_hash(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Amend => self.amend_input_hash.as_deref(),
            Stage::Qa => self.qa_input_hash.as_deref(),
            Stage::Download | Stage::Convert => None,
        }
    }

    /// Stages whose needs-flag is set, in execution order.
    pub fn pending_stages(&self) -> Vec<Stage> {
        Stage::ALL.into_iter().filter(|s| self.needs(*s)).collect()
    }

    pub fn artifact(&self, kind: &str) -> Option<&[PathBuf]> {
        self.files
            .get(kind)
            .map(Vec::as_slice)
            .filter(|paths| !paths.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Compat deserialization
// ---------------------------------------------------------------------------

/// Artifact locations as found on disk: a single path, a list, or a map of
/// named paths (taken in key order).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum LocationsCompat {
    One(PathBuf),
    Many(Vec<PathBuf>),
    Named(BTreeMap<String, PathBuf>),
}

impl From<LocationsCompat> for Vec<PathBuf> {
    fn from(locations: LocationsCompat) -> Self {
        match locations {
            LocationsCompat::One(path) => vec![path],
            LocationsCompat::Many(paths) => paths,
            LocationsCompat::Named(named) => named.into_values().collect(),
        }
    }
}

/// Timestamp accepting RFC 3339 as well as the offset-less ISO form written
/// by early versions of the state document (read as UTC).
#[derive(Debug, Clone, Copy)]
struct LenientTimestamp(DateTime<Utc>);

impl<'de> Deserialize<'de> for LenientTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timestamp(&raw)
            .map(LenientTimestamp)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'")))
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Deserialize)]
struct ItemRecordCompat {
    first_seen: Option<LenientTimestamp>,
    last_seen: Option<LenientTimestamp>,
    last_updated: Option<LenientTimestamp>,
    last_updated_local: Option<LenientTimestamp>,
    needs_download: Option<bool>,
    needs_convert: Option<bool>,
    needs_amend: Option<bool>,
    needs_qa: Option<bool>,
    #[serde(default)]
    files: Option<BTreeMap<String, LocationsCompat>>,
    amended_status: Option<AmendedStatus>,
    amend_input_hash: Option<String>,
    qa_input_hash: Option<String>,
    qa_results: Option<Value>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl From<ItemRecordCompat> for ItemRecord {
    fn from(compat: ItemRecordCompat) -> Self {
        let last_seen = compat.last_seen.map(|ts| ts.0);
        let first_seen = compat
            .first_seen
            .map(|ts| ts.0)
            .or(last_seen)
            .unwrap_or_else(Utc::now);
        let last_updated = compat
            .last_updated
            .or(compat.last_updated_local)
            .map(|ts| ts.0)
            .unwrap_or(first_seen);

        Self {
            first_seen,
            last_seen,
            last_updated,
            needs_download: compat.needs_download.unwrap_or(true),
            needs_convert: compat.needs_convert.unwrap_or(false),
            needs_amend: compat.needs_amend.unwrap_or(false),
            needs_qa: compat.needs_qa.unwrap_or(false),
            files: compat
                .files
                .unwrap_or_default()
                .into_iter()
                .map(|(kind, locations)| (kind, locations.into()))
                .collect(),
            amended_status: compat.amended_status.unwrap_or_default(),
            amend_input_hash: compat.amend_input_hash,
            qa_input_hash: compat.qa_input_hash,
            qa_results: compat.qa_results.filter(|v| !v.is_null()),
            extra: compat.extra,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
