//! Partial record updates.
//!
//! A [`RecordPatch`] is merged into the JSON form of an [`crate::ItemRecord`]:
//! when both the existing value and the patch value are objects the merge
//! recurses key by key (patch wins on conflict); any other value replaces
//! the existing one outright.

use serde_json::{Map, Value};

use crate::types::Stage;

/// A partial update document for one item record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch(Map<String, Value>);

impl RecordPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, replacing any earlier value for the same key.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Set the readiness flag of a single stage.
    pub fn needs(self, stage: Stage, value: bool) -> Self {
        self.set(stage.flag_key(), value)
    }

    /// Raise the flag of `stage` and of every stage downstream of it.
    pub fn mark_dirty_from(mut self, stage: Stage) -> Self {
        for downstream in stage.downstream() {
            self = self.needs(*downstream, true);
        }
        self
    }

    /// Record the input hash for a content-gated stage. No-op for stages
    /// without an input hash.
    pub fn input_hash(self, stage: Stage, hash: impl Into<String>) -> Self {
        match stage.input_hash_key() {
            Some(key) => self.set(key, hash.into()),
            None => self,
        }
    }

    /// Forget the recorded input hash, so the next gate evaluation runs the
    /// stage. No-op for stages without an input hash.
    pub fn clear_input_hash(self, stage: Stage) -> Self {
        match stage.input_hash_key() {
            Some(key) => self.set(key, Value::Null),
            None => self,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for RecordPatch {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Merge `patch` into `target` in place.
pub(crate) fn merge_into(target: &mut Map<String, Value>, patch: Map<String, Value>) {
    for (key, value) in patch {
        if let Value::Object(nested) = value {
            if let Some(Value::Object(existing)) = target.get_mut(&key) {
                merge_into(existing, nested);
                continue;
            }
            target.insert(key, Value::Object(nested));
        } else {
            target.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn nested_objects_merge_key_wise() {
        let mut target = object(json!({
            "files": {"raw": ["a.pdf"], "converted": ["a.md"]},
            "needs_qa": false
        }));
        merge_into(
            &mut target,
            object(json!({"files": {"converted": ["b.md"], "amended": ["b.amended.md"]}})),
        );
        assert_eq!(
            Value::Object(target),
            json!({
                "files": {"raw": ["a.pdf"], "converted": ["b.md"], "amended": ["b.amended.md"]},
                "needs_qa": false
            })
        );
    }

    #[test]
    fn non_object_values_replace_outright() {
        let mut target = object(json!({"qa_results": {"score": 3}, "tags": ["a"]}));
        merge_into(&mut target, object(json!({"qa_results": null, "tags": ["b"]})));
        assert_eq!(Value::Object(target), json!({"qa_results": null, "tags": ["b"]}));
    }

    #[test]
    fn object_replaces_scalar() {
        let mut target = object(json!({"qa_results": null}));
        merge_into(&mut target, object(json!({"qa_results": {"score": 4}})));
        assert_eq!(Value::Object(target), json!({"qa_results": {"score": 4}}));
    }

    #[test]
    fn mark_dirty_from_sets_only_downstream_flags() {
        let patch = RecordPatch::new().mark_dirty_from(Stage::Convert);
        assert_eq!(patch.get("needs_download"), None);
        assert_eq!(patch.get("needs_convert"), Some(&Value::Bool(true)));
        assert_eq!(patch.get("needs_amend"), Some(&Value::Bool(true)));
        assert_eq!(patch.get("needs_qa"), Some(&Value::Bool(true)));
    }

    #[test]
    fn input_hash_ignored_for_ungated_stage() {
        assert!(RecordPatch::new().input_hash(Stage::Download, "abc").is_empty());
        let patch = RecordPatch::new().input_hash(Stage::Qa, "abc");
        assert_eq!(patch.get("qa_input_hash"), Some(&json!("abc")));
    }

    #[test]
    fn clear_input_hash_writes_null_for_gated_stage() {
        assert!(RecordPatch::new().clear_input_hash(Stage::Convert).is_empty());
        let patch = RecordPatch::new().clear_input_hash(Stage::Amend);
        assert_eq!(patch.get("amend_input_hash"), Some(&Value::Null));
    }
}
