use crate::error::NormalizeError;
use chrono::Utc;
use engine_config::settings::phase::PhaseConfig;
use model::schema::{
    canonical::{
        CanonicalRecord, EXTRA_KEY, METADATA_KEYS, METADATA_RENAMES, Provenance, SCHEMA_VERSION,
        ShapeVariant,
    },
    contract::JsonKind,
};
use serde_json::{Map, Value};
use tracing::debug;

pub mod variant;

/// Keys from earlier output formats that provenance now covers.
const LEGACY_KEYS: [&str; 3] = ["schema_version", "_normalization_log", "_normalized_at"];

/// Rewrites phase output of any supported shape into a [`CanonicalRecord`].
///
/// Input is never modified; every call builds a fresh record at the current
/// schema version. Feeding a canonical record back in returns it unchanged,
/// provenance included.
pub struct Normalizer<'a> {
    phase: &'a PhaseConfig,
}

impl<'a> Normalizer<'a> {
    pub fn new(phase: &'a PhaseConfig) -> Self {
        Self { phase }
    }

    pub fn normalize(&self, raw: &Value) -> Result<CanonicalRecord, NormalizeError> {
        if let Some(found) = raw.get("schema_version").and_then(Value::as_u64)
            && found > u64::from(SCHEMA_VERSION)
        {
            return Err(NormalizeError::FutureSchemaVersion {
                found: found as u32,
                current: SCHEMA_VERSION,
            });
        }

        if let Some(record) = CanonicalRecord::from_value(raw) {
            return self.renormalize(record);
        }

        let obj = match raw {
            Value::Object(obj) => obj.clone(),
            Value::Array(items) => {
                let mut obj = Map::new();
                obj.insert(self.phase.shape.category_key.clone(), Value::Array(items.clone()));
                obj
            }
            other => return Err(NormalizeError::NotAnObject(JsonKind::of(other))),
        };

        let (payload, detected_variant, log) = self.normalize_payload(obj)?;
        debug!(
            phase = %self.phase.name,
            variant = %detected_variant,
            "Normalized phase output"
        );
        Ok(CanonicalRecord {
            schema_version: SCHEMA_VERSION,
            phase: self.phase.name.clone(),
            payload,
            provenance: Provenance {
                detected_variant,
                normalized_at: Utc::now(),
                log,
            },
        })
    }

    fn renormalize(&self, record: CanonicalRecord) -> Result<CanonicalRecord, NormalizeError> {
        if record.phase != self.phase.name {
            return Err(NormalizeError::PhaseMismatch {
                expected: self.phase.name.to_string(),
                found: record.phase.to_string(),
            });
        }

        let (payload, _, log) = self.normalize_payload(record.payload)?;
        let mut provenance = record.provenance;
        if record.schema_version < SCHEMA_VERSION {
            provenance.log.push(format!(
                "upgraded from schema version {}",
                record.schema_version
            ));
            provenance.log.extend(log);
        }

        Ok(CanonicalRecord {
            schema_version: SCHEMA_VERSION,
            phase: record.phase,
            payload,
            provenance,
        })
    }

    fn normalize_payload(
        &self,
        mut obj: Map<String, Value>,
    ) -> Result<(Map<String, Value>, ShapeVariant, Vec<String>), NormalizeError> {
        let shape = &self.phase.shape;
        let mut log = Vec::new();

        let matched_key = shape
            .keys()
            .find(|k| obj.get(*k).is_some_and(|v| !v.is_null()))
            .map(str::to_string);
        let category_value = matched_key.as_ref().and_then(|k| obj.remove(k));
        if let Some(key) = matched_key.as_ref().filter(|k| **k != shape.category_key) {
            log.push(format!("read categories from legacy key `{key}`"));
        }
        // A null category key is the same as an absent one.
        if obj.get(&shape.category_key).is_some_and(Value::is_null) {
            obj.remove(&shape.category_key);
        }

        let variant = variant::detect(category_value.as_ref(), shape)?;
        if variant != ShapeVariant::CanonicalMapping {
            log.push(format!("detected {variant}"));
        }
        let mapping = variant::to_mapping(variant, category_value, shape, &mut log)?;

        let mut payload = Map::new();
        for key in METADATA_KEYS {
            if let Some(value) = obj.remove(key) {
                payload.insert(key.to_string(), value);
            }
        }
        for (legacy, canonical) in METADATA_RENAMES {
            if !payload.contains_key(canonical)
                && let Some(value) = obj.remove(legacy)
            {
                log.push(format!("renamed `{legacy}` to `{canonical}`"));
                payload.insert(canonical.to_string(), value);
            }
        }
        for legacy in LEGACY_KEYS {
            if obj.remove(legacy).is_some() {
                log.push(format!("dropped legacy `{legacy}`"));
            }
        }
        payload.insert(shape.category_key.clone(), Value::Object(mapping));

        let mut extra = match obj.remove(EXTRA_KEY) {
            Some(Value::Object(existing)) => existing,
            Some(other) => {
                let mut wrapped = Map::new();
                wrapped.insert(EXTRA_KEY.to_string(), other);
                wrapped
            }
            None => Map::new(),
        };
        if !obj.is_empty() {
            let moved: Vec<&str> = obj.keys().map(String::as_str).collect();
            log.push(format!("moved to `{EXTRA_KEY}`: {}", moved.join(", ")));
        }
        for (key, value) in obj {
            match extra.get(&key) {
                None => {
                    extra.insert(key, value);
                }
                Some(existing) if *existing == value => {}
                Some(_) => {
                    let renamed = free_key(&extra, &key);
                    log.push(format!(
                        "`{key}` already present in `{EXTRA_KEY}`; kept as `{renamed}`"
                    ));
                    extra.insert(renamed, value);
                }
            }
        }
        if !extra.is_empty() {
            payload.insert(EXTRA_KEY.to_string(), Value::Object(extra));
        }

        Ok((payload, variant, log))
    }
}

/// First `key__N` not yet taken in `map`.
fn free_key(map: &Map<String, Value>, key: &str) -> String {
    (1..)
        .map(|n| format!("{key}__{n}"))
        .find(|candidate| !map.contains_key(candidate))
        .unwrap_or_else(|| key.to_string())
}

pub fn normalize(raw: &Value, phase: &PhaseConfig) -> Result<CanonicalRecord, NormalizeError> {
    Normalizer::new(phase).normalize(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_config::settings::phase::ShapeConfig;
    use serde_json::json;

    fn phase() -> PhaseConfig {
        let mut shape = ShapeConfig::new("threads").with_aliases(&["extractions"]);
        shape.categories = vec!["ideas".into(), "software".into()];
        PhaseConfig::new("thread_extractions", "", shape)
    }

    fn assert_idempotent(raw: Value) -> CanonicalRecord {
        let phase = phase();
        let once = normalize(&raw, &phase).unwrap();
        let twice = normalize(&once.to_value().unwrap(), &phase).unwrap();
        assert_eq!(once, twice);
        once
    }

    #[test]
    fn canonical_mapping_passes_through() {
        let record = assert_idempotent(json!({
            "session_id": "0012ebed",
            "threads": {
                "ideas": {"description": "Ideas", "entries": [{"msg_index": 1, "content": "idea1"}]},
                "software": ["created main.rs"],
                "notes": "free text"
            }
        }));

        assert_eq!(record.provenance.detected_variant, ShapeVariant::CanonicalMapping);
        assert_eq!(record.get("session_id"), Some(&json!("0012ebed")));
        let threads = &record.payload["threads"];
        assert_eq!(threads["ideas"]["entries"].as_array().unwrap().len(), 1);
        assert_eq!(threads["software"], json!({"description": null, "entries": ["created main.rs"]}));
        assert_eq!(threads["notes"], json!({"description": "free text", "entries": []}));
    }

    #[test]
    fn flat_list_is_grouped_by_category_field() {
        let record = assert_idempotent(json!({
            "extractions": [
                {"thread": "ideas", "content": "Build CLI", "msg_index": 0},
                {"category": "software", "content": "Created main.py", "msg_index": 10},
                {"thread": "ideas", "content": "Add tests", "msg_index": 5},
                {"content": "stray", "msg_index": 7}
            ]
        }));

        assert_eq!(record.provenance.detected_variant, ShapeVariant::FlatList);
        let threads = &record.payload["threads"];
        let ideas: Vec<_> = threads["ideas"]["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["msg_index"].as_u64().unwrap())
            .collect();
        assert_eq!(ideas, vec![0, 5]);
        assert_eq!(threads["software"]["entries"].as_array().unwrap().len(), 1);
        assert_eq!(threads["uncategorized"]["entries"].as_array().unwrap().len(), 1);
        assert!(record.payload.get("extractions").is_none());
    }

    #[test]
    fn list_of_lists_uses_group_names_then_positions() {
        let record = assert_idempotent(json!({
            "threads": [
                [{"msg_index": 0}],
                {"name": "decisions", "description": "Choices", "entries": [{"msg_index": 3}]},
                [{"msg_index": 9}]
            ]
        }));

        assert_eq!(record.provenance.detected_variant, ShapeVariant::ListOfLists);
        let threads = record.payload["threads"].as_object().unwrap();
        let names: Vec<&str> = threads.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["decisions", "group_2", "ideas"]);
        assert_eq!(threads["decisions"]["description"], json!("Choices"));
    }

    #[test]
    fn missing_category_is_an_empty_mapping() {
        let record = assert_idempotent(json!({"session_id": "x"}));
        assert_eq!(record.provenance.detected_variant, ShapeVariant::MissingCategory);
        assert_eq!(record.payload["threads"], json!({}));

        let record = assert_idempotent(json!({"threads": null}));
        assert_eq!(record.provenance.detected_variant, ShapeVariant::MissingCategory);
    }

    #[test]
    fn metadata_is_kept_and_the_rest_goes_to_extra() {
        let record = assert_idempotent(json!({
            "generated_by": "opus",
            "threads": {},
            "some_custom_field": "hello",
            "another_field": 42,
            "_normalization_log": ["old"]
        }));

        assert_eq!(record.get("generator"), Some(&json!("opus")));
        assert!(record.get("generated_by").is_none());
        assert_eq!(
            record.get(EXTRA_KEY),
            Some(&json!({"some_custom_field": "hello", "another_field": 42}))
        );
        assert!(record.provenance.log.iter().any(|l| l.contains("generated_by")));
    }

    #[test]
    fn stray_key_colliding_with_extra_is_kept_under_a_new_name() {
        let record = assert_idempotent(json!({
            "threads": {},
            "_extra": {"note": "from before", "note__1": "also taken", "same": 1},
            "note": "fresh",
            "same": 1
        }));

        assert_eq!(
            record.get(EXTRA_KEY),
            Some(&json!({
                "note": "from before",
                "note__1": "also taken",
                "note__2": "fresh",
                "same": 1
            }))
        );
        assert!(
            record
                .provenance
                .log
                .iter()
                .any(|l| l.contains("kept as `note__2`"))
        );
    }

    #[test]
    fn no_extra_key_when_nothing_is_left_over() {
        let record = assert_idempotent(json!({"threads": {}}));
        assert!(record.get(EXTRA_KEY).is_none());
    }

    #[test]
    fn unrecognized_shapes_are_errors() {
        let phase = phase();
        assert!(matches!(
            normalize(&json!({"threads": "just text"}), &phase),
            Err(NormalizeError::UnrecognizedShape { .. })
        ));
        assert!(matches!(
            normalize(&json!({"threads": [1, 2, 3]}), &phase),
            Err(NormalizeError::UnrecognizedShape { .. })
        ));
        assert!(matches!(
            normalize(&json!("text"), &phase),
            Err(NormalizeError::NotAnObject("string"))
        ));
    }

    #[test]
    fn newer_schema_versions_are_rejected() {
        let phase = phase();
        let mut record = normalize(&json!({"threads": {}}), &phase).unwrap().to_value().unwrap();
        record["schema_version"] = json!(SCHEMA_VERSION + 1);

        assert_eq!(
            normalize(&record, &phase),
            Err(NormalizeError::FutureSchemaVersion {
                found: SCHEMA_VERSION + 1,
                current: SCHEMA_VERSION
            })
        );
    }

    #[test]
    fn records_for_other_phases_are_rejected() {
        let phase = phase();
        let mut record = normalize(&json!({"threads": {}}), &phase).unwrap();
        record.phase = "explorer_notes".into();

        assert!(matches!(
            normalize(&record.to_value().unwrap(), &phase),
            Err(NormalizeError::PhaseMismatch { .. })
        ));
    }

    #[test]
    fn input_is_not_mutated() {
        let raw = json!({"extractions": [{"thread": "ideas"}], "x": 1});
        let before = raw.clone();
        normalize(&raw, &phase()).unwrap();
        assert_eq!(raw, before);
    }
}
