use crate::core::identifiers::PhaseId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonKind {
    Mapping,
    List,
    String,
    Number,
    Bool,
    Any,
}

impl JsonKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            JsonKind::Mapping => value.is_object(),
            JsonKind::List => value.is_array(),
            JsonKind::String => value.is_string(),
            JsonKind::Number => value.is_number(),
            JsonKind::Bool => value.is_boolean(),
            JsonKind::Any => true,
        }
    }

    pub fn of(value: &Value) -> &'static str {
        match value {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "list",
            Value::Object(_) => "mapping",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JsonKind::Mapping => "mapping",
            JsonKind::List => "list",
            JsonKind::String => "string",
            JsonKind::Number => "number",
            JsonKind::Bool => "bool",
            JsonKind::Any => "any",
        }
    }
}

impl fmt::Display for JsonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_blocking() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequiredKey {
    pub key: String,
    pub kind: JsonKind,
    /// Non-blocking keys only produce advisories.
    #[serde(default = "default_blocking")]
    pub blocking: bool,
}

impl RequiredKey {
    pub fn blocking(key: impl Into<String>, kind: JsonKind) -> Self {
        Self {
            key: key.into(),
            kind,
            blocking: true,
        }
    }

    pub fn advisory(key: impl Into<String>, kind: JsonKind) -> Self {
        Self {
            key: key.into(),
            kind,
            blocking: false,
        }
    }
}

/// Declared top-level requirements on a phase's canonical payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageContract {
    pub phase: PhaseId,
    #[serde(default)]
    pub required: Vec<RequiredKey>,
}

impl StageContract {
    pub fn new(phase: impl Into<PhaseId>, required: Vec<RequiredKey>) -> Self {
        Self {
            phase: phase.into(),
            required,
        }
    }
}
