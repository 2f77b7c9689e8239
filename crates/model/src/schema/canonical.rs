use crate::core::identifiers::PhaseId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Current canonical schema version. Version 1 was the un-normalized era.
pub const SCHEMA_VERSION: u32 = 2;

/// Key under which non-metadata, non-category keys are preserved.
pub const EXTRA_KEY: &str = "_extra";

/// Top-level keys kept verbatim in every canonical payload.
pub const METADATA_KEYS: [&str; 6] = [
    "session_id",
    "generated_at",
    "generator",
    "source_files",
    "phase",
    "extraction_method",
];

/// Legacy spellings of metadata keys, renamed on normalization.
pub const METADATA_RENAMES: [(&str, &str); 1] = [("generated_by", "generator")];

/// Structural shapes a phase's output has historically come in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeVariant {
    /// Category key holds `{name: {...}}`.
    CanonicalMapping,
    /// Category key holds a flat list of items each naming its category.
    FlatList,
    /// Category key holds a list of groups.
    ListOfLists,
    /// Category key absent.
    MissingCategory,
}

impl ShapeVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShapeVariant::CanonicalMapping => "canonical_mapping",
            ShapeVariant::FlatList => "flat_list",
            ShapeVariant::ListOfLists => "list_of_lists",
            ShapeVariant::MissingCategory => "missing_category",
        }
    }
}

impl fmt::Display for ShapeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub detected_variant: ShapeVariant,
    pub normalized_at: DateTime<Utc>,
    #[serde(default)]
    pub log: Vec<String>,
}

/// Normalized phase output; the only shape downstream phases read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub schema_version: u32,
    pub phase: PhaseId,
    pub payload: Map<String, Value>,
    pub provenance: Provenance,
}

impl CanonicalRecord {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Recognizes a serialized record among arbitrary phase output.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if !(obj.contains_key("schema_version")
            && obj.contains_key("payload")
            && obj.contains_key("provenance"))
        {
            return None;
        }
        serde_json::from_value(value.clone()).ok()
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
