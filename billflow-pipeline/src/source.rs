//! Item sources: the authoritative list of identifiers for a session.
//!
//! The list drives both registration of new items and the cleanup of
//! orphaned ones, so a source that cannot produce it must fail loudly rather
//! than return a partial or empty list.

use std::collections::BTreeSet;
use std::path::PathBuf;

use billflow_core::{ItemId, SessionScope};

use crate::error::SourceError;

pub trait ItemSource {
    fn list_current_items(&self, scope: SessionScope) -> Result<BTreeSet<ItemId>, SourceError>;
}

/// Reads identifiers from a text file, one per line. Blank lines and `#`
/// comments are ignored. `{year}` in the path is replaced with the session
/// year.
#[derive(Debug, Clone)]
pub struct FileItemSource {
    path: String,
}

impl FileItemSource {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path_for(&self, scope: SessionScope) -> PathBuf {
        PathBuf::from(self.path.replace("{year}", &scope.year.to_string()))
    }
}

impl ItemSource for FileItemSource {
    fn list_current_items(&self, scope: SessionScope) -> Result<BTreeSet<ItemId>, SourceError> {
        let path = self.path_for(scope);
        let text = std::fs::read_to_string(&path)
            .map_err(|source| SourceError::Io { path: path.clone(), source })?;
        let items = parse_item_list(&text)?;
        tracing::debug!(path = %path.display(), items = items.len(), "read item list");
        Ok(items)
    }
}

/// Parse an item list: either a JSON array of strings or one identifier per
/// line. Surrounding whitespace is trimmed and duplicates collapse.
pub fn parse_item_list(text: &str) -> Result<BTreeSet<ItemId>, SourceError> {
    let trimmed = text.trim_start();
    let items: BTreeSet<ItemId> = if trimmed.starts_with('[') {
        serde_json::from_str::<Vec<String>>(trimmed)?
            .into_iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .map(ItemId::from)
            .collect()
    } else {
        text.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(ItemId::from)
            .collect()
    };
    if items.is_empty() {
        return Err(SourceError::Empty);
    }
    Ok(items)
}
