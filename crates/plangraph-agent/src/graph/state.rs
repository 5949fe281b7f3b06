use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use plangraph_core::error::Result;

/// Accumulated state of one pipeline run.
///
/// Fields are only ever added or overwritten and notes are only ever
/// appended. The executor is the sole writer; nodes see an immutable
/// snapshot and describe their changes as a [`StateDiff`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    #[serde(default)]
    notes: Vec<String>,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initial state for the brief-to-plan pipeline.
    pub fn from_brief(brief: impl Into<String>) -> Self {
        Self::new().with_field("brief", brief.into())
    }

    /// Seed a field in the initial payload.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a field as a string, if it is one.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(|v| v.as_str())
    }

    /// Deserialize a field into `T`. Missing or mismatched fields give `None`.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.fields
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// String items of an array field; non-string items are skipped.
    pub fn get_strings(&self, key: &str) -> Vec<String> {
        match self.fields.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => vec![],
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn fields(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    /// Apply a diff: fields overwrite, notes append in order.
    ///
    /// Returns the names of fields that already had a value.
    pub fn merge(&mut self, diff: StateDiff) -> Vec<String> {
        let mut overwritten = Vec::new();
        for (key, value) in diff.fields {
            if self.fields.insert(key.clone(), value).is_some() {
                overwritten.push(key);
            }
        }
        self.notes.extend(diff.notes);
        overwritten
    }
}

/// Partial update produced by one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDiff {
    fields: BTreeMap<String, Value>,
    notes: Vec<String>,
}

impl StateDiff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Store any serializable value as a field.
    pub fn with_serialized<T: Serialize>(mut self, key: impl Into<String>, value: &T) -> Result<Self> {
        self.fields.insert(key.into(), serde_json::to_value(value)?);
        Ok(self)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.notes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notes_concatenate_in_merge_order() {
        let mut state = RunState::from_brief("todo app");
        state.merge(StateDiff::new().with_note("a").with_note("b"));
        state.merge(StateDiff::new());
        state.merge(StateDiff::new().with_note("c"));
        assert_eq!(state.notes(), &["a", "b", "c"]);
    }

    #[test]
    fn test_merge_never_removes_fields() {
        let mut state = RunState::from_brief("todo app").with_field("x", 1);
        let before: Vec<String> = state.fields().keys().cloned().collect();

        state.merge(StateDiff::new().with_field("y", 2));
        state.merge(StateDiff::new().with_field("x", json!(null)));

        for key in before {
            assert!(state.contains(&key), "field {key} disappeared");
        }
        assert!(state.contains("y"));
    }

    #[test]
    fn test_last_writer_wins_and_reports_overwrites() {
        let mut state = RunState::new();
        assert!(state.merge(StateDiff::new().with_field("plan", "first")).is_empty());
        let overwritten = state.merge(StateDiff::new().with_field("plan", "second"));
        assert_eq!(overwritten, vec!["plan".to_string()]);
        assert_eq!(state.get_str("plan"), Some("second"));
    }

    #[test]
    fn test_typed_accessors() {
        let state = RunState::new()
            .with_field("tasks", vec!["a".to_string(), "b".to_string()])
            .with_field("mixed", json!(["a", 1, "b"]));
        assert_eq!(state.get_strings("tasks"), vec!["a", "b"]);
        assert_eq!(state.get_strings("mixed"), vec!["a", "b"]);
        assert!(state.get_strings("missing").is_empty());
        assert_eq!(state.get_as::<Vec<String>>("tasks").unwrap().len(), 2);
        assert!(state.get_as::<u32>("tasks").is_none());
    }

    #[test]
    fn test_serde_preserves_state() {
        let mut state = RunState::from_brief("x");
        state.merge(StateDiff::new().with_field("n", 3).with_note("done"));
        let json = serde_json::to_string(&state).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
