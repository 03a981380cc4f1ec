//! Copy-on-write state threaded through every step of a run.
//!
//! A [`State`] is never mutated after construction. Every transition returns a
//! new value whose maps are shallow copies of the previous ones with the given
//! keys overwritten. Artifacts are reference-counted so that copying a state
//! never duplicates large payloads (generated sources, parsed error lists).

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::core::keys;

/// Accumulated facts keyed by name.
pub type Data = BTreeMap<String, Value>;

/// Named large payloads, shared between successive states.
pub type Artifacts = BTreeMap<String, Arc<Value>>;

/// Immutable accumulation of facts, artifacts, and a success flag.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    data: Data,
    artifacts: Artifacts,
    success: bool,
}

impl State {
    /// Build a state with the given data, no artifacts, and `success=false`.
    pub fn new(data: Data) -> Self {
        Self {
            data,
            artifacts: Artifacts::new(),
            success: false,
        }
    }

    pub(crate) fn from_parts(data: Data, artifacts: Artifacts, success: bool) -> Self {
        Self {
            data,
            artifacts,
            success,
        }
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.data.get(key).and_then(Value::as_u64)
    }

    /// `true` when the key holds a truthy value (see [`is_truthy`]).
    pub fn flag(&self, key: &str) -> bool {
        self.data.get(key).is_some_and(is_truthy)
    }

    /// Return a new state with `partial` overlaid onto `data`.
    ///
    /// A `success` key in `partial` overrides the flag; otherwise the flag is
    /// inherited from `self`. Artifacts are carried over unchanged.
    pub fn update(&self, partial: Data) -> State {
        let success = partial
            .get(keys::SUCCESS)
            .map(is_truthy)
            .unwrap_or(self.success);
        let mut data = self.data.clone();
        data.extend(partial);
        State {
            data,
            artifacts: self.artifacts.clone(),
            success,
        }
    }

    /// Return a new state with `artifacts[name] = value`; data and flag unchanged.
    pub fn add_artifact(&self, name: &str, value: Value) -> State {
        let mut artifacts = self.artifacts.clone();
        artifacts.insert(name.to_string(), Arc::new(value));
        State {
            data: self.data.clone(),
            artifacts,
            success: self.success,
        }
    }

    /// Look up an artifact. Absence is `None`, never an error.
    pub fn get_artifact(&self, name: &str) -> Option<&Value> {
        self.artifacts.get(name).map(Arc::as_ref)
    }

    /// Shorthand for `update` with only the `success` key.
    pub fn with_success(&self, success: bool) -> State {
        self.update(data_of([(keys::SUCCESS, Value::Bool(success))]))
    }

    /// Record an error message and clear the success flag.
    pub fn with_error(&self, message: impl Into<String>) -> State {
        self.update(data_of([
            (keys::ERROR, Value::String(message.into())),
            (keys::SUCCESS, Value::Bool(false)),
        ]))
    }

    /// Render the state as a JSON document (used for run reports).
    pub fn to_json(&self) -> Value {
        let data: Map<String, Value> = self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let artifacts: Map<String, Value> = self
            .artifacts
            .iter()
            .map(|(k, v)| (k.clone(), v.as_ref().clone()))
            .collect();
        serde_json::json!({
            "success": self.success,
            "data": data,
            "artifacts": artifacts,
        })
    }
}

/// Build a partial-update map from literal pairs.
pub fn data_of<const N: usize>(pairs: [(&str, Value); N]) -> Data {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Loose truthiness: `null`, `false`, zero, and empty strings/arrays/objects are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
