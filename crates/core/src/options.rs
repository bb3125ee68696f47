//! Generic generation options projected onto provider requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Provider-agnostic sampling and generation parameters.
///
/// Every field is optional. A formatter resolves a final value per field by
/// falling back from the per-call options to the configured defaults; a field
/// unset in both stays off the wire unless the target dialect mandates one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    /// Escape hatch for provider-specific keys, copied onto the request verbatim.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, Value>,
}

impl GenerateOptions {
    /// Field-wise fallback: any field unset here takes the value from `defaults`.
    pub fn merged(&self, defaults: &GenerateOptions) -> GenerateOptions {
        let mut extra = defaults.extra.clone();
        for (k, v) in &self.extra {
            extra.insert(k.clone(), v.clone());
        }
        GenerateOptions {
            temperature: self.temperature.or(defaults.temperature),
            top_p: self.top_p.or(defaults.top_p),
            max_tokens: self.max_tokens.or(defaults.max_tokens),
            stop: if self.stop.is_empty() {
                defaults.stop.clone()
            } else {
                self.stop.clone()
            },
            seed: self.seed.or(defaults.seed),
            extra,
        }
    }
}
