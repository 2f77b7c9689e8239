use crate::error::NormalizeError;
use engine_config::settings::phase::ShapeConfig;
use model::schema::{canonical::ShapeVariant, contract::JsonKind};
use serde_json::{Map, Value};

pub const DESCRIPTION_KEY: &str = "description";
pub const UNCATEGORIZED: &str = "uncategorized";

/// Classifies the value found under the category key (or an alias).
pub fn detect(value: Option<&Value>, shape: &ShapeConfig) -> Result<ShapeVariant, NormalizeError> {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return Ok(ShapeVariant::MissingCategory);
    };

    match value {
        Value::Object(_) => Ok(ShapeVariant::CanonicalMapping),
        Value::Array(items) if items.iter().all(|i| is_group(i, shape)) && !items.is_empty() => {
            Ok(ShapeVariant::ListOfLists)
        }
        Value::Array(items) if items.iter().all(Value::is_object) => Ok(ShapeVariant::FlatList),
        Value::Array(_) => Err(NormalizeError::UnrecognizedShape {
            key: shape.category_key.clone(),
            found: "list mixing items and groups".to_string(),
        }),
        other => Err(NormalizeError::UnrecognizedShape {
            key: shape.category_key.clone(),
            found: JsonKind::of(other).to_string(),
        }),
    }
}

fn is_group(item: &Value, shape: &ShapeConfig) -> bool {
    match item {
        Value::Array(_) => true,
        Value::Object(obj) => matches!(obj.get(&shape.entries_field), Some(Value::Array(_))),
        _ => false,
    }
}

/// Builds the canonical category mapping for a detected variant.
pub fn to_mapping(
    variant: ShapeVariant,
    value: Option<Value>,
    shape: &ShapeConfig,
    log: &mut Vec<String>,
) -> Result<Map<String, Value>, NormalizeError> {
    let mut mapping = Map::new();
    let value = value.unwrap_or(Value::Null);

    match (variant, value) {
        (ShapeVariant::MissingCategory, _) => {
            log.push(format!("no `{}` data found; empty mapping", shape.category_key));
        }
        (ShapeVariant::CanonicalMapping, Value::Object(categories)) => {
            for (name, category) in categories {
                let category = canonical_category(&name, category, shape)?;
                mapping.insert(name, category);
            }
        }
        (ShapeVariant::FlatList, Value::Array(items)) => {
            let count = items.len();
            for item in items {
                let name = item
                    .as_object()
                    .and_then(|obj| category_name(obj, shape))
                    .map(|(_, name)| name)
                    .unwrap_or_else(|| UNCATEGORIZED.to_string());
                push_entries(&mut mapping, &name, vec![item], Map::new(), shape);
            }
            log.push(format!(
                "grouped {count} flat items into {} categories",
                mapping.len()
            ));
        }
        (ShapeVariant::ListOfLists, Value::Array(groups)) => {
            for (position, group) in groups.into_iter().enumerate() {
                let positional = shape
                    .categories
                    .get(position)
                    .cloned()
                    .unwrap_or_else(|| format!("group_{position}"));
                match group {
                    Value::Array(entries) => {
                        push_entries(&mut mapping, &positional, entries, Map::new(), shape);
                    }
                    Value::Object(mut obj) => {
                        let name = match category_name(&obj, shape) {
                            Some((field, name)) => {
                                obj.remove(&field);
                                name
                            }
                            None => positional,
                        };
                        let entries = match obj.remove(&shape.entries_field) {
                            Some(Value::Array(entries)) => entries,
                            _ => Vec::new(),
                        };
                        push_entries(&mut mapping, &name, entries, obj, shape);
                    }
                    _ => {}
                }
            }
            log.push(format!("flattened list of lists into {} categories", mapping.len()));
        }
        (variant, other) => {
            return Err(NormalizeError::UnrecognizedShape {
                key: shape.category_key.clone(),
                found: format!("{} for {variant}", JsonKind::of(&other)),
            });
        }
    }
    Ok(mapping)
}

/// `{description, entries}` for one category of a canonical mapping. Already
/// canonical categories come back unchanged.
fn canonical_category(name: &str, value: Value, shape: &ShapeConfig) -> Result<Value, NormalizeError> {
    let entries_key = shape.entries_field.as_str();
    let mut category = match value {
        Value::Object(obj) => obj,
        Value::Array(entries) => {
            let mut obj = Map::new();
            obj.insert(entries_key.to_string(), Value::Array(entries));
            obj
        }
        Value::String(text) => {
            let mut obj = Map::new();
            obj.insert(DESCRIPTION_KEY.to_string(), Value::String(text));
            obj
        }
        Value::Null => Map::new(),
        other => {
            return Err(NormalizeError::UnrecognizedShape {
                key: format!("{}.{name}", shape.category_key),
                found: JsonKind::of(&other).to_string(),
            });
        }
    };

    match category.get(entries_key) {
        None | Some(Value::Null) => {
            category.insert(entries_key.to_string(), Value::Array(Vec::new()));
        }
        Some(Value::Array(_)) => {}
        Some(other) => {
            return Err(NormalizeError::UnrecognizedShape {
                key: format!("{}.{name}.{entries_key}", shape.category_key),
                found: JsonKind::of(other).to_string(),
            });
        }
    }
    category
        .entry(DESCRIPTION_KEY.to_string())
        .or_insert(Value::Null);
    Ok(Value::Object(category))
}

/// First category field carrying a non-empty string, with its value.
fn category_name(item: &Map<String, Value>, shape: &ShapeConfig) -> Option<(String, String)> {
    shape.category_fields.iter().find_map(|field| {
        item.get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|name| (field.clone(), name.to_string()))
    })
}

/// Appends entries to a category, creating it if needed. Group-level fields
/// (such as a description) fill in where the category has none yet.
fn push_entries(
    mapping: &mut Map<String, Value>,
    name: &str,
    entries: Vec<Value>,
    fields: Map<String, Value>,
    shape: &ShapeConfig,
) {
    let category = mapping.entry(name.to_string()).or_insert_with(|| {
        let mut obj = Map::new();
        obj.insert(DESCRIPTION_KEY.to_string(), Value::Null);
        obj.insert(shape.entries_field.clone(), Value::Array(Vec::new()));
        Value::Object(obj)
    });
    let Some(obj) = category.as_object_mut() else {
        return;
    };

    for (key, value) in fields {
        let slot = obj.entry(key).or_insert(Value::Null);
        if slot.is_null() {
            *slot = value;
        }
    }
    if let Some(Value::Array(existing)) = obj.get_mut(&shape.entries_field) {
        existing.extend(entries);
    }
}
