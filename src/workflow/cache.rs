// flowlink — Step output cache

use serde::Serialize;
use serde_json::{json, Map, Value};

/// Insertion-ordered record of every step's output for one run.
///
/// Entries are written once, in execution order, and never changed afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StepCache {
    entries: Map<String, Value>,
}

/// A recorded step failure.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub kind: &'static str,
    pub message: String,
    pub details: String,
}

impl StepFailure {
    pub fn to_value(&self) -> Value {
        json!({
            "status": "error",
            "error_kind": self.kind,
            "error_message": self.message,
            "details": self.details,
        })
    }
}

impl StepCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the output of a step. Returns `false` (and leaves the cache
    /// untouched) if the id already has an entry.
    pub fn record(&mut self, step_id: &str, value: Value) -> bool {
        if self.entries.contains_key(step_id) {
            tracing::warn!(step = %step_id, "Ignoring second write to step cache");
            return false;
        }
        self.entries.insert(step_id.to_string(), value);
        true
    }

    pub fn record_failure(&mut self, step_id: &str, failure: &StepFailure) -> bool {
        self.record(step_id, failure.to_value())
    }

    pub fn get(&self, step_id: &str) -> Option<&Value> {
        self.entries.get(step_id)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.entries.contains_key(step_id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Step ids in execution order.
    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether a step's entry is a failure record.
    pub fn is_failure(&self, step_id: &str) -> bool {
        self.get(step_id).is_some_and(is_failure_entry)
    }

    /// `(step_id, error_message)` for every failed step, in execution order.
    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.iter()
            .filter(|(_, v)| is_failure_entry(v))
            .map(|(id, v)| {
                let msg = v
                    .get("error_message")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                (id, msg)
            })
            .collect()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.entries)
    }
}

fn is_failure_entry(value: &Value) -> bool {
    value.get("status").and_then(Value::as_str) == Some("error")
        && value.get("error_message").is_some()
}
