use engine_config::settings::phase::ShapeConfig;
use model::schema::canonical::METADATA_KEYS;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Pulls a JSON value out of free-form model output.
///
/// Tries, in order: the whole text (after stripping code fences), the widest
/// bracketed span, then every line that parses as an object on its own.
pub fn extract_json(text: &str) -> Option<Value> {
    let text = strip_fences(text.trim());
    if text.is_empty() {
        return None;
    }

    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }

    let spans = [span(text, '{', '}'), span(text, '[', ']')];
    let mut spans: Vec<&str> = spans.into_iter().flatten().collect();
    spans.sort_by_key(|s| s.as_ptr() as usize);
    for candidate in spans {
        if let Ok(value) = serde_json::from_str::<Value>(candidate) {
            return Some(value);
        }
    }

    let objects: Vec<Value> = text
        .lines()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .filter_map(|l| serde_json::from_str::<Value>(l.trim_end_matches(',')).ok())
        .filter(Value::is_object)
        .collect();
    (!objects.is_empty()).then_some(Value::Array(objects))
}

fn strip_fences(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

fn span(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// Turns parsed output into a payload object. A bare list is taken as the
/// category listing itself.
pub fn into_payload(value: Value, shape: &ShapeConfig) -> Option<Value> {
    match value {
        Value::Object(_) => Some(value),
        Value::Array(items) => {
            let mut payload = Map::new();
            payload.insert(shape.category_key.clone(), Value::Array(items));
            Some(Value::Object(payload))
        }
        _ => None,
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ItemCount {
    pub total: usize,
    /// Values of the item key seen on returned items.
    pub keys: BTreeSet<u64>,
}

/// Counts output items in a payload: entries across categories when the
/// category key (or an alias) is present, otherwise non-metadata top-level
/// fields.
pub fn count_items(payload: &Value, shape: &ShapeConfig, item_key: &str) -> ItemCount {
    let mut count = ItemCount::default();
    let Some(obj) = payload.as_object() else {
        return count;
    };

    let Some(categories) = shape.keys().find_map(|k| obj.get(k)).filter(|v| !v.is_null()) else {
        count.total = obj
            .iter()
            .filter(|(k, v)| !METADATA_KEYS.contains(&k.as_str()) && !is_empty(v))
            .count();
        return count;
    };

    let groups: Vec<&Value> = match categories {
        Value::Object(map) => map.values().collect(),
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    for group in groups {
        match group {
            Value::Array(items) => {
                for item in items {
                    count.add(item, item_key);
                }
            }
            Value::Object(map) => match map.get(&shape.entries_field) {
                Some(Value::Array(entries)) => {
                    for entry in entries {
                        count.add(entry, item_key);
                    }
                }
                _ => count.add(group, item_key),
            },
            Value::Null => {}
            other => count.add(other, item_key),
        }
    }
    count
}

impl ItemCount {
    fn add(&mut self, item: &Value, item_key: &str) {
        self.total += 1;
        if let Some(key) = item.get(item_key).and_then(Value::as_u64) {
            self.keys.insert(key);
        }
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
