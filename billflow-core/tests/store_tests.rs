//! State document compatibility and crash-safety integration tests.

use std::collections::BTreeSet;
use std::fs;

use assert_fs::prelude::*;
use billflow_core::{
    store::{self, STATE_FILE},
    ItemId, RecordPatch, SessionScope, Stage, StateStore, StoreError,
};
use chrono::{DateTime, Utc};
use predicates::prelude::*;

fn scope() -> SessionScope {
    SessionScope::new(2026)
}

fn id(s: &str) -> ItemId {
    ItemId::from(s)
}

// ---------------------------------------------------------------------------
// 1. Schema backfill
// ---------------------------------------------------------------------------

#[test]
fn record_without_first_seen_backfills_from_last_seen() {
    let data = assert_fs::TempDir::new().unwrap();
    data.child("2026rs").child(STATE_FILE).write_str(
        r#"{
  "HB0001": {
    "last_seen": "2026-01-20T08:00:00+00:00",
    "needs_download": false,
    "needs_convert": true,
    "files": {}
  }
}"#,
    )
    .unwrap();

    let mut store = StateStore::load_at(data.path(), scope()).expect("load");
    let record = store.get_or_create(&id("HB0001")).expect("get");
    let last_seen: DateTime<Utc> = "2026-01-20T08:00:00Z".parse().unwrap();
    assert_eq!(record.first_seen, last_seen);
    assert_eq!(record.last_seen, Some(last_seen), "last_seen must not change");
    assert_eq!(record.last_updated, last_seen);
    assert!(record.needs_convert);
    assert!(!record.needs_amend);
}

#[test]
fn record_without_any_timestamp_backfills_from_now() {
    let data = assert_fs::TempDir::new().unwrap();
    data.child("2026rs")
        .child(STATE_FILE)
        .write_str(r#"{"SB0002": {"needs_qa": true}}"#)
        .unwrap();

    let before = Utc::now();
    let store = StateStore::load_at(data.path(), scope()).expect("load");
    let after = Utc::now();

    let record = store.get(&id("SB0002")).expect("record");
    assert!(record.first_seen >= before && record.first_seen <= after);
    assert_eq!(record.last_seen, None);
    assert!(record.needs_download, "missing flags take fresh-record defaults");
    assert!(record.needs_qa);
}

#[test]
fn legacy_last_updated_local_is_carried_over() {
    let data = assert_fs::TempDir::new().unwrap();
    data.child("2026rs").child(STATE_FILE).write_str(
        r#"{"HB9": {"first_seen": "2025-12-01T10:00:00", "last_seen": null,
              "last_updated_local": "2026-01-02T03:04:05.000006"}}"#,
    )
    .unwrap();

    let store = StateStore::load_at(data.path(), scope()).expect("load");
    let record = store.get(&id("HB9")).unwrap();
    assert_eq!(
        record.last_updated.to_rfc3339(),
        "2026-01-02T03:04:05.000006+00:00"
    );
    assert!(!record.extra.contains_key("last_updated_local"));
}

#[test]
fn backfilled_document_is_rewritten_in_current_schema() {
    let data = assert_fs::TempDir::new().unwrap();
    let state = data.child("2026rs").child(STATE_FILE);
    state
        .write_str(r#"{"HB1": {"last_seen": "2026-01-20T08:00:00Z", "needs_download": false}}"#)
        .unwrap();

    let mut store = StateStore::load_at(data.path(), scope()).unwrap();
    store.mark_dirty(&id("HB1"), Stage::Amend).unwrap();

    state.assert(predicate::str::contains("\"first_seen\""));
    state.assert(predicate::str::contains("\"amended_status\": \"original\""));
    state.assert(predicate::str::contains("\"needs_amend\": true"));
}

// ---------------------------------------------------------------------------
// 2. Corruption
// ---------------------------------------------------------------------------

#[test]
fn wrong_shape_document_is_corruption_not_empty_state() {
    let data = assert_fs::TempDir::new().unwrap();
    data.child("2026rs")
        .child(STATE_FILE)
        .write_str(r#"["HB1", "HB2"]"#)
        .unwrap();

    let err = StateStore::load_at(data.path(), scope()).unwrap_err();
    assert!(matches!(err, StoreError::Corruption { .. }), "got: {err}");
}

#[test]
fn ill_typed_field_is_corruption() {
    let data = assert_fs::TempDir::new().unwrap();
    data.child("2026rs")
        .child(STATE_FILE)
        .write_str(r#"{"HB1": {"needs_download": "sometimes"}}"#)
        .unwrap();

    let err = StateStore::load_at(data.path(), scope()).unwrap_err();
    assert!(matches!(err, StoreError::Corruption { .. }), "got: {err}");
}

// ---------------------------------------------------------------------------
// 3. Crash safety
// ---------------------------------------------------------------------------

#[test]
fn every_write_is_visible_to_a_fresh_load() {
    let data = assert_fs::TempDir::new().unwrap();
    let mut store = StateStore::load_at(data.path(), scope()).unwrap();
    let item = id("HB0001");

    store.get_or_create(&item).unwrap();
    assert_eq!(StateStore::load_at(data.path(), scope()).unwrap().items(), store.items());

    store
        .update(
            &item,
            RecordPatch::new()
                .needs(Stage::Download, false)
                .set("files", serde_json::json!({"raw": ["HB0001.pdf"]})),
        )
        .unwrap();
    assert_eq!(StateStore::load_at(data.path(), scope()).unwrap().items(), store.items());

    store.mark_dirty(&item, Stage::Convert).unwrap();
    let resumed = StateStore::load_at(data.path(), scope()).unwrap();
    assert_eq!(resumed.items(), store.items());
    assert_eq!(
        resumed.get(&item).unwrap().pending_stages(),
        vec![Stage::Convert, Stage::Amend, Stage::Qa]
    );
}

#[test]
fn leftover_tmp_from_crash_leaves_document_intact() {
    let data = assert_fs::TempDir::new().unwrap();
    let mut store = StateStore::load_at(data.path(), scope()).unwrap();
    store.get_or_create(&id("HB1")).unwrap();

    let path = store::state_path_at(data.path(), scope());
    let original = fs::read(&path).unwrap();

    // Simulate a crash between writing the .tmp and the rename.
    let tmp = path.with_file_name(format!("{STATE_FILE}.tmp"));
    fs::write(&tmp, b"CRASH - INCOMPLETE WRITE").unwrap();

    assert_eq!(fs::read(&path).unwrap(), original);
    let reloaded = StateStore::open(&path).expect("live document still parses");
    assert!(reloaded.contains(&id("HB1")));
}

#[test]
fn next_write_after_crash_replaces_stale_tmp() {
    let data = assert_fs::TempDir::new().unwrap();
    let mut store = StateStore::load_at(data.path(), scope()).unwrap();
    store.get_or_create(&id("HB1")).unwrap();

    let scope_dir = data.child("2026rs");
    scope_dir
        .child(format!("{STATE_FILE}.tmp"))
        .write_str("CRASH - INCOMPLETE WRITE")
        .unwrap();

    let mut resumed = StateStore::load_at(data.path(), scope()).unwrap();
    resumed.mark_dirty(&id("HB1"), Stage::Amend).unwrap();

    scope_dir
        .child(format!("{STATE_FILE}.tmp"))
        .assert(predicate::path::missing());
    let reloaded = StateStore::load_at(data.path(), scope()).unwrap();
    assert!(reloaded.get(&id("HB1")).unwrap().needs_amend);
}

#[test]
fn write_atomic_replaces_contents_and_cleans_up() {
    let dir = assert_fs::TempDir::new().unwrap();
    let target = dir.child("report.csv");
    target.write_str("old contents\n").unwrap();

    store::write_atomic(target.path(), b"new contents\n").unwrap();

    target.assert("new contents\n");
    dir.child("report.csv.tmp").assert(predicate::path::missing());
}

#[test]
fn write_atomic_failure_leaves_target_untouched() {
    let dir = assert_fs::TempDir::new().unwrap();
    let target = dir.child("missing-dir").child("state.json");

    let err = store::write_atomic(target.path(), b"{}").unwrap_err();

    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    target.assert(predicate::path::missing());
}

#[test]
fn document_is_pretty_printed_and_sorted() {
    let data = assert_fs::TempDir::new().unwrap();
    let mut store = StateStore::load_at(data.path(), scope()).unwrap();
    let ids = [id("SB2"), id("HB10"), id("HB2")];
    store.register_all(ids.iter()).unwrap();

    let text = fs::read_to_string(store.path()).unwrap();
    let positions: Vec<usize> = ["\"HB10\"", "\"HB2\"", "\"SB2\""]
        .iter()
        .map(|key| text.find(key).expect("key present"))
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]));
    assert!(text.contains("\n  \"HB10\": {\n"));
}

#[test]
fn purge_reports_removed_count() {
    let data = assert_fs::TempDir::new().unwrap();
    let mut store = StateStore::load_at(data.path(), scope()).unwrap();
    let ids = [id("A"), id("B"), id("C")];
    store.register_all(ids.iter()).unwrap();

    let current: BTreeSet<ItemId> = ["A", "C"].into_iter().map(ItemId::from).collect();
    let before = store.len();
    let removed = store.purge_orphans(&current).unwrap();
    assert_eq!(before - store.len(), removed);
    assert_eq!(removed, 1);
    assert!(store.get(&id("A")).is_some());
    assert!(store.get(&id("C")).is_some());
}
