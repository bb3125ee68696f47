//! Provider request body under construction.
//!
//! A thin wrapper over a JSON object that `apply_options`, `apply_tools`
//! and `apply_tool_choice` project onto. Key order is insertion order, so
//! serialized requests stay stable across runs.

use serde_json::{Map, Value};

/// A provider-specific request body being assembled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestBody {
    fields: Map<String, Value>,
}

impl RequestBody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, replacing any existing value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Set a field only when it is not already present.
    pub fn set_if_absent(&mut self, key: impl Into<String>, value: Value) {
        self.fields.entry(key.into()).or_insert(value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Copy provider-specific extra keys onto the request verbatim.
    pub fn extend_extra(&mut self, extra: &Map<String, Value>) {
        for (k, v) in extra {
            self.fields.insert(k.clone(), v.clone());
        }
    }

    /// Finish building and hand the body to the transport.
    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}
