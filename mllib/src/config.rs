use std::path::PathBuf;

use serde_json::Value;

/// What a backend is built from at service creation.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Directory holding the model's files.
    pub repository: PathBuf,
    /// The service's default `{input, mllib, output}` parameters.
    pub parameters: Value,
}

impl ModelConfig {
    /// Creates a new `ModelConfig`.
    ///
    /// # Arguments
    /// * `repository` - Directory holding the model's files.
    /// * `parameters` - The service's default parameters.
    pub fn new<P: Into<PathBuf>>(repository: P, parameters: Value) -> Self {
        Self {
            repository: repository.into(),
            parameters,
        }
    }

    /// Returns the `section` object of the default parameters, or `Value::Null`.
    pub fn section(&self, section: &str) -> &Value {
        self.parameters.get(section).unwrap_or(&Value::Null)
    }
}

/// Overlays the call's `section` object on top of the service defaults.
///
/// Keys present in the call win, missing keys fall back to `defaults`.
pub fn merge_section(defaults: &Value, call: &Value, section: &str) -> Value {
    let mut merged = match defaults.get(section) {
        Some(Value::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    };

    if let Some(Value::Object(over)) = call.get(section) {
        for (k, v) in over {
            merged.insert(k.clone(), v.clone());
        }
    }

    Value::Object(merged)
}
