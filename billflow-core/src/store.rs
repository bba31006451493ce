//! Per-session JSON state store.
//!
//! # Storage layout
//!
//! ```text
//! <data_dir>/
//!   <year>rs/
//!     pipeline_state.json        (full item-record mapping, pretty JSON)
//!     pipeline_state.json.tmp    (transient; renamed over the live file)
//! ```
//!
//! # Write discipline
//!
//! Every mutating method stages the new state, rewrites the whole document
//! (`.tmp` sibling, fsync, `rename`, directory fsync) and only then returns.
//! If the write fails the in-memory state is rolled back, so memory never
//! runs ahead of disk.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;

use crate::error::{io_err, StoreError};
use crate::patch::{merge_into, RecordPatch};
use crate::types::{ItemId, ItemRecord, SessionScope, Stage};

/// File name of the state document inside a scope directory.
pub const STATE_FILE: &str = "pipeline_state.json";

/// The persisted mapping, ordered by item id.
pub type ItemMap = BTreeMap<ItemId, ItemRecord>;

/// `<data_dir>/<year>rs/pipeline_state.json`. Pure, no I/O.
pub fn state_path_at(data_dir: &Path, scope: SessionScope) -> PathBuf {
    scope.dir_at(data_dir).join(STATE_FILE)
}

/// Durable item-record mapping for one session scope.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    items: ItemMap,
}

impl StateStore {
    /// Load the store for `scope` under `data_dir`.
    pub fn load_at(data_dir: &Path, scope: SessionScope) -> Result<Self, StoreError> {
        Self::open(state_path_at(data_dir, scope))
    }

    /// Load the store persisted at `path`.
    ///
    /// A missing file is a first run and yields an empty store. A file that
    /// cannot be parsed is `StoreError::Corruption`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let items = read_items(&path)?;
        Ok(Self { path, items })
    }

    /// Like [`StateStore::open`], but a corrupt document is moved aside to
    /// `<path>.corrupt-<timestamp>` and an empty store is returned together
    /// with the quarantine path.
    pub fn open_or_quarantine(
        path: impl Into<PathBuf>,
    ) -> Result<(Self, Option<PathBuf>), StoreError> {
        let path = path.into();
        match read_items(&path) {
            Ok(items) => Ok((Self { path, items }, None)),
            Err(StoreError::Corruption { .. }) => {
                let quarantine = PathBuf::from(format!(
                    "{}.corrupt-{}",
                    path.display(),
                    Utc::now().format("%Y%m%dT%H%M%S")
                ));
                std::fs::rename(&path, &quarantine).map_err(|e| io_err(&path, e))?;
                let store = Self {
                    path,
                    items: ItemMap::new(),
                };
                Ok((store, Some(quarantine)))
            }
            Err(err) => Err(err),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    pub fn get(&self, id: &ItemId) -> Option<&ItemRecord> {
        self.items.get(id)
    }

    /// All records, ordered by item id.
    pub fn items(&self) -> &ItemMap {
        &self.items
    }

    pub fn ids(&self) -> impl Iterator<Item = &ItemId> + '_ {
        self.items.keys()
    }

    /// Return the record for `id`, creating (and persisting) a fresh one if
    /// it is absent.
    ///
    /// Records written by older schemas were already backfilled when the
    /// document was loaded, so every returned record is complete.
    pub fn get_or_create(&mut self, id: &ItemId) -> Result<&ItemRecord, StoreError> {
        if !self.items.contains_key(id) {
            self.items.insert(id.clone(), ItemRecord::new(Utc::now()));
            if let Err(err) = self.persist() {
                self.items.remove(id);
                return Err(err);
            }
        }
        Ok(&self.items[id])
    }

    /// Create a fresh record for every id not yet tracked, persisting once.
    ///
    /// Returns the number of records created.
    pub fn register_all<'a>(
        &mut self,
        ids: impl IntoIterator<Item = &'a ItemId>,
    ) -> Result<usize, StoreError> {
        let now = Utc::now();
        let mut created = Vec::new();
        for id in ids {
            if !self.items.contains_key(id) {
                self.items.insert(id.clone(), ItemRecord::new(now));
                created.push(id.clone());
            }
        }
        if created.is_empty() {
            return Ok(0);
        }
        if let Err(err) = self.persist() {
            for id in &created {
                self.items.remove(id);
            }
            return Err(err);
        }
        Ok(created.len())
    }

    /// Merge `patch` into the record for `id` (creating it if absent), stamp
    /// `last_updated`, and persist the whole store before returning.
    ///
    /// `first_seen` is never changed by an update.
    pub fn update(&mut self, id: &ItemId, patch: RecordPatch) -> Result<&ItemRecord, StoreError> {
        let previous = self.items.get(id).cloned();
        let base = previous
            .clone()
            .unwrap_or_else(|| ItemRecord::new(Utc::now()));
        let staged = apply_patch(id, &base, patch)?;

        self.items.insert(id.clone(), staged);
        if let Err(err) = self.persist() {
            match previous {
                Some(record) => {
                    self.items.insert(id.clone(), record);
                }
                None => {
                    self.items.remove(id);
                }
            }
            return Err(err);
        }
        Ok(&self.items[id])
    }

    /// Raise the needs-flag of `stage` and of every downstream stage.
    /// Flags of earlier stages are left untouched.
    pub fn mark_dirty(&mut self, id: &ItemId, stage: Stage) -> Result<&ItemRecord, StoreError> {
        self.update(id, RecordPatch::new().mark_dirty_from(stage))
    }

    /// Remove every record whose id is not in `current`.
    ///
    /// Persists only when something was removed; returns the removed count.
    pub fn purge_orphans(&mut self, current: &BTreeSet<ItemId>) -> Result<usize, StoreError> {
        let retained: ItemMap = self
            .items
            .iter()
            .filter(|(id, _)| current.contains(*id))
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect();
        let removed = self.items.len() - retained.len();
        if removed == 0 {
            return Ok(0);
        }
        write_items(&self.path, &retained)?;
        self.items = retained;
        Ok(removed)
    }

    fn persist(&self) -> Result<(), StoreError> {
        write_items(&self.path, &self.items)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn apply_patch(id: &ItemId, base: &ItemRecord, patch: RecordPatch) -> Result<ItemRecord, StoreError> {
    let mut fields = match serde_json::to_value(base)? {
        Value::Object(map) => map,
        other => return Err(invalid_update(id, format!("record is not an object: {other}"))),
    };
    merge_into(&mut fields, patch.into_map());

    // Deserialization would quietly turn a null flag back into its default.
    for stage in Stage::ALL {
        let key = stage.flag_key();
        if !matches!(fields.get(key), Some(Value::Bool(_))) {
            return Err(invalid_update(id, format!("`{key}` must be true or false")));
        }
    }

    let mut record: ItemRecord = serde_json::from_value(Value::Object(fields))
        .map_err(|source| StoreError::InvalidUpdate {
            id: id.clone(),
            source,
        })?;
    record.first_seen = base.first_seen;
    record.last_updated = Utc::now();
    Ok(record)
}

fn invalid_update(id: &ItemId, message: String) -> StoreError {
    StoreError::InvalidUpdate {
        id: id.clone(),
        source: serde::de::Error::custom(message),
    }
}

fn read_items(path: &Path) -> Result<ItemMap, StoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ItemMap::new()),
        Err(err) => return Err(io_err(path, err)),
    };
    serde_json::from_str(&contents).map_err(|source| StoreError::Corruption {
        path: path.to_path_buf(),
        source,
    })
}

/// Write flow: serialize → `<path>.tmp` sibling → `rename`. The `.tmp` is in
/// the same directory as the target so the rename never crosses filesystems.
fn write_items(path: &Path, items: &ItemMap) -> Result<(), StoreError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid state path")));
    };
    if !dir.as_os_str().is_empty() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }

    let mut json = serde_json::to_string_pretty(items)?;
    json.push('\n');
    write_atomic(path, json.as_bytes()).map_err(|e| io_err(path, e))
}

/// Replace `path` with `bytes` so that a crash at any point leaves either the
/// old or the new contents in place.
///
/// The `.tmp` sibling is flushed to disk before the rename, and on unix the
/// parent directory is flushed after it so the rename itself survives power
/// loss. The parent directory must already exist.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    let written = File::create(&tmp).and_then(|mut file| {
        file.write_all(bytes)?;
        file.sync_all()
    });
    if let Err(err) = written.and_then(|()| std::fs::rename(&tmp, path)) {
        let _ = std::fs::remove_file(&tmp);
        return Err(err);
    }
    sync_parent(path)
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
