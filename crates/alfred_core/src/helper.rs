//! Helper records
//!
//! A helper is a named value that mock responses can reference. Function
//! files may rewrite the helper list through `updateHelpers`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Helper {
    pub name: String,
    #[serde(default)]
    pub value: Value,
}

impl Helper {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}
