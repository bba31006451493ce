//! Flat pipeline report: one row per item, written as CSV with a JSON mirror.
//!
//! Columns are the fixed record fields followed by dynamic columns for
//! artifact kinds (`files.<kind>`), QA results (`qa.<dotted.path>`) and
//! collaborator extras (`extra.<key>`), each group sorted. A `.` or `\` inside
//! a key is backslash-escaped. Rows are sorted by item id, and nothing
//! time-dependent is added, so an unchanged state exports byte-identical
//! reports.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use billflow_core::{write_atomic, ItemId, ItemRecord, Stage, StateStore};

use crate::error::ExportError;

pub const REPORT_CSV: &str = "pipeline_report.csv";
pub const REPORT_JSON: &str = "pipeline_report.json";

const FIXED_COLUMNS: [&str; 11] = [
    "item_id",
    "first_seen",
    "last_seen",
    "last_updated",
    "needs_download",
    "needs_convert",
    "needs_amend",
    "needs_qa",
    "amended_status",
    "amend_input_hash",
    "qa_input_hash",
];

/// Flattened view of the whole state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
}

impl Report {
    pub fn cell<'a>(&'a self, row: usize, column: &str) -> &'a str {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Where [`write_reports`] put the two report files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportPaths {
    pub csv: PathBuf,
    pub json: PathBuf,
}

impl ReportPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            csv: dir.join(REPORT_CSV),
            json: dir.join(REPORT_JSON),
        }
    }
}

// ---------------------------------------------------------------------------
// Flattening
// ---------------------------------------------------------------------------

pub fn flatten(store: &StateStore) -> Report {
    let rows: Vec<BTreeMap<String, String>> = store
        .items()
        .iter()
        .map(|(id, record)| flatten_record(id, record))
        .collect();

    let mut files = BTreeSet::new();
    let mut qa = BTreeSet::new();
    let mut extra = BTreeSet::new();
    for key in rows.iter().flat_map(BTreeMap::keys) {
        if FIXED_COLUMNS.contains(&key.as_str()) {
            continue;
        }
        let group = if key.starts_with("files.") {
            &mut files
        } else if key == "qa" || key.starts_with("qa.") {
            &mut qa
        } else {
            &mut extra
        };
        group.insert(key.clone());
    }

    let columns = FIXED_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(files)
        .chain(qa)
        .chain(extra)
        .collect();
    Report { columns, rows }
}

fn flatten_record(id: &ItemId, record: &ItemRecord) -> BTreeMap<String, String> {
    let mut row = BTreeMap::new();
    row.insert("item_id".to_string(), id.0.clone());
    row.insert("first_seen".to_string(), timestamp(&record.first_seen));
    row.insert(
        "last_seen".to_string(),
        record.last_seen.as_ref().map(timestamp).unwrap_or_default(),
    );
    row.insert("last_updated".to_string(), timestamp(&record.last_updated));
    for stage in Stage::ALL {
        row.insert(stage.flag_key().to_string(), record.needs(stage).to_string());
    }
    row.insert("amended_status".to_string(), record.amended_status.to_string());
    row.insert(
        "amend_input_hash".to_string(),
        record.amend_input_hash.clone().unwrap_or_default(),
    );
    row.insert(
        "qa_input_hash".to_string(),
        record.qa_input_hash.clone().unwrap_or_default(),
    );

    for (kind, paths) in &record.files {
        let joined = paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(";");
        row.insert(format!("files.{kind}"), joined);
    }
    if let Some(results) = &record.qa_results {
        flatten_value("qa".to_string(), results, &mut row);
    }
    for (key, value) in &record.extra {
        flatten_value(format!("extra.{}", column_segment(key)), value, &mut row);
    }
    row
}

/// Nested objects become dotted column names; arrays stay as compact JSON.
fn flatten_value(prefix: String, value: &Value, row: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, nested) in map {
                flatten_value(format!("{prefix}.{}", column_segment(key)), nested, row);
            }
        }
        Value::Null => {
            row.insert(prefix, String::new());
        }
        Value::String(s) => {
            row.insert(prefix, s.clone());
        }
        other => {
            row.insert(prefix, other.to_string());
        }
    }
}

/// A key as one column-name segment: `\` and `.` are backslash-escaped so a
/// dotted key never lands on the same column as a nested path.
fn column_segment(key: &str) -> Cow<'_, str> {
    if key.contains(['.', '\\']) {
        Cow::Owned(key.replace('\\', "\\\\").replace('.', "\\."))
    } else {
        Cow::Borrowed(key)
    }
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

pub fn to_csv(report: &Report) -> Result<Vec<u8>, ExportError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&report.columns)?;
    for row in 0..report.rows.len() {
        writer.write_record(report.columns.iter().map(|c| report.cell(row, c)))?;
    }
    writer
        .into_inner()
        .map_err(|err| ExportError::Csv(csv::Error::from(err.into_error())))
}

/// `{ "<item_id>": { "<column>": "<value>", ... }, ... }`
pub fn to_json(report: &Report) -> Result<String, ExportError> {
    let keyed: BTreeMap<&str, &BTreeMap<String, String>> = report
        .rows
        .iter()
        .map(|row| (row.get("item_id").map(String::as_str).unwrap_or(""), row))
        .collect();
    let mut text = serde_json::to_string_pretty(&keyed)?;
    text.push('\n');
    Ok(text)
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write `pipeline_report.csv` and `pipeline_report.json` into `dir`.
pub fn write_reports(store: &StateStore, dir: &Path) -> Result<ReportPaths, ExportError> {
    let report = flatten(store);
    let paths = ReportPaths::in_dir(dir);
    std::fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    atomic_write(&paths.csv, &to_csv(&report)?)?;
    atomic_write(&paths.json, to_json(&report)?.as_bytes())?;
    tracing::info!(
        rows = report.rows.len(),
        columns = report.columns.len(),
        csv = %paths.csv.display(),
        "wrote pipeline report"
    );
    Ok(paths)
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    write_atomic(path, bytes).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })
}
