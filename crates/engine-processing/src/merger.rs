use engine_config::settings::phase::{FieldMerge, PhaseConfig};
use model::{
    core::identifiers::UnitId,
    execution::phase::{Fragment, FragmentBody, PhaseOutcome, PhaseResult},
};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

/// Combines per-chunk fragments into one phase payload.
///
/// Fragments are ordered by `(sequence, continuation)` before merging, so
/// the result does not depend on arrival order. Lists concatenate and are
/// deduplicated by the phase's item key (or by value when items carry none),
/// mappings merge recursively, and scalars keep the last non-null value.
/// Fields named in the phase's merge config override those defaults.
pub struct Merger<'a> {
    phase: &'a PhaseConfig,
    log: Vec<String>,
}

impl<'a> Merger<'a> {
    pub fn new(phase: &'a PhaseConfig) -> Self {
        Self {
            phase,
            log: Vec::new(),
        }
    }

    pub fn merge(
        mut self,
        unit_id: &UnitId,
        mut fragments: Vec<Fragment>,
        expected_items: usize,
    ) -> PhaseResult {
        fragments.sort_by_key(|f| (f.sequence, f.continuation));

        let sequences: BTreeSet<u32> = fragments.iter().map(|f| f.sequence).collect();
        let parsed: BTreeSet<u32> = fragments
            .iter()
            .filter(|f| !f.is_failed())
            .map(|f| f.sequence)
            .collect();
        let failed_chunks: Vec<u32> = sequences.difference(&parsed).copied().collect();
        let actual_items = fragments.iter().map(|f| f.item_count).sum();

        let mut merged = Map::new();
        for payload in fragments.iter().filter_map(Fragment::payload) {
            let Some(obj) = payload.as_object() else {
                self.log
                    .push("ignored non-object fragment payload".to_string());
                continue;
            };
            for (key, value) in obj {
                let policy = self.phase.merge.fields.get(key).copied();
                self.merge_field(&mut merged, key, value.clone(), policy);
            }
        }

        let outcome = if fragments.is_empty() {
            PhaseOutcome::Failed {
                reason: "no fragments to merge".to_string(),
            }
        } else if parsed.is_empty() {
            let first = fragments
                .iter()
                .find_map(|f| match &f.body {
                    FragmentBody::Failed { reason } => Some(reason.as_str()),
                    _ => None,
                })
                .unwrap_or("unknown");
            PhaseOutcome::Failed {
                reason: format!("all {} fragments failed; first: {first}", fragments.len()),
            }
        } else {
            PhaseOutcome::Merged(Value::Object(merged))
        };

        debug!(
            unit = %unit_id,
            phase = %self.phase.name,
            fragments = fragments.len(),
            failed_chunks = failed_chunks.len(),
            "Merged phase fragments"
        );

        PhaseResult {
            unit_id: unit_id.clone(),
            phase: self.phase.name.clone(),
            fragments,
            expected_items,
            actual_items,
            outcome,
            failed_chunks,
            merge_log: self.log,
        }
    }

    fn merge_field(
        &mut self,
        target: &mut Map<String, Value>,
        key: &str,
        incoming: Value,
        policy: Option<FieldMerge>,
    ) {
        let Some(existing) = target.get_mut(key) else {
            let incoming = match incoming {
                Value::Array(items) => Value::Array(self.dedup(items)),
                other => other,
            };
            target.insert(key.to_string(), incoming);
            return;
        };

        let policy = policy.unwrap_or_else(|| default_policy(&incoming));
        match (policy, existing, incoming) {
            (_, _, Value::Null) => {}
            (FieldMerge::Concat, Value::Array(items), Value::Array(more)) => {
                items.extend(more);
                let combined = std::mem::take(items);
                *items = self.dedup(combined);
            }
            (FieldMerge::DeepMerge, Value::Object(map), Value::Object(more)) => {
                for (k, v) in more {
                    self.merge_field(map, &k, v, None);
                }
            }
            (FieldMerge::LastNonNull, slot, value) => *slot = value,
            (_, slot, value) => {
                self.log.push(format!(
                    "`{key}` changed type across fragments; later value kept"
                ));
                *slot = value;
            }
        }
    }

    /// First occurrence wins.
    fn dedup(&mut self, items: Vec<Value>) -> Vec<Value> {
        let item_key = self.phase.item_key.as_str();
        let mut seen = HashSet::new();
        let before = items.len();
        let kept: Vec<Value> = items
            .into_iter()
            .filter(|item| {
                let identity = match item.get(item_key) {
                    Some(key) if !key.is_null() => format!("{item_key}={key}"),
                    _ => item.to_string(),
                };
                seen.insert(identity)
            })
            .collect();

        if kept.len() < before {
            self.log
                .push(format!("dropped {} duplicate items", before - kept.len()));
        }
        kept
    }
}

fn default_policy(value: &Value) -> FieldMerge {
    match value {
        Value::Array(_) => FieldMerge::Concat,
        Value::Object(_) => FieldMerge::DeepMerge,
        _ => FieldMerge::LastNonNull,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_config::settings::phase::ShapeConfig;
    use serde_json::json;

    fn phase() -> PhaseConfig {
        PhaseConfig::new("threads", "", ShapeConfig::new("threads"))
    }

    fn unit() -> UnitId {
        UnitId::parse("0012ebed").unwrap()
    }

    fn frag(sequence: u32, continuation: u32, payload: Value) -> Fragment {
        Fragment::parsed(sequence, continuation, payload, 1)
    }

    #[test]
    fn merge_is_independent_of_arrival_order() {
        let phase = phase();
        let a = frag(0, 0, json!({"threads": {"ideas": {"entries": [{"index": 0}]}}, "generator": "v1"}));
        let b = frag(0, 1, json!({"threads": {"ideas": {"entries": [{"index": 1}]}}}));
        let c = frag(1, 0, json!({"threads": {"bugs": {"entries": [{"index": 5}]}}, "generator": "v2"}));

        let forward = Merger::new(&phase).merge(&unit(), vec![a.clone(), b.clone(), c.clone()], 3);
        let shuffled = Merger::new(&phase).merge(&unit(), vec![c, a, b], 3);

        assert_eq!(forward.payload(), shuffled.payload());
        assert_eq!(
            forward.payload().unwrap(),
            &json!({
                "threads": {
                    "ideas": {"entries": [{"index": 0}, {"index": 1}]},
                    "bugs": {"entries": [{"index": 5}]}
                },
                "generator": "v2"
            })
        );
        assert_eq!(forward.actual_items, 3);
    }

    #[test]
    fn overlapping_items_are_deduplicated() {
        let phase = phase();
        let fragments = vec![
            frag(0, 0, json!({"items": [{"index": 1, "v": "first"}, {"index": 2}]})),
            frag(0, 1, json!({"items": [{"index": 2}, {"index": 1, "v": "second"}, {"index": 3}]})),
        ];

        let result = Merger::new(&phase).merge(&unit(), fragments, 3);
        assert_eq!(
            result.payload().unwrap()["items"],
            json!([{"index": 1, "v": "first"}, {"index": 2}, {"index": 3}])
        );
        assert!(result.merge_log.iter().any(|l| l.contains("duplicate")));
    }

    #[test]
    fn declared_policy_overrides_type_default() {
        let mut phase = phase();
        phase
            .merge
            .fields
            .insert("summary".into(), FieldMerge::LastNonNull);
        let fragments = vec![
            frag(0, 0, json!({"summary": ["a"]})),
            frag(1, 0, json!({"summary": ["b"]})),
            frag(2, 0, json!({"summary": null})),
        ];

        let result = Merger::new(&phase).merge(&unit(), fragments, 0);
        assert_eq!(result.payload().unwrap()["summary"], json!(["b"]));
    }

    #[test]
    fn failed_chunks_are_recorded_but_do_not_sink_the_phase() {
        let phase = phase();
        let fragments = vec![
            frag(0, 0, json!({"threads": {}})),
            Fragment::failed(1, 0, "timed out"),
            Fragment::failed(2, 0, "unparseable output"),
            frag(2, 1, json!({"threads": {}})),
        ];

        let result = Merger::new(&phase).merge(&unit(), fragments, 0);
        assert!(!result.is_failed());
        assert_eq!(result.failed_chunks, vec![1]);
    }

    #[test]
    fn nothing_to_merge_fails_the_phase() {
        let phase = phase();
        let empty = Merger::new(&phase).merge(&unit(), vec![], 0);
        assert_eq!(empty.failure_reason(), Some("no fragments to merge"));

        let all_failed = Merger::new(&phase).merge(
            &unit(),
            vec![Fragment::failed(0, 0, "timed out"), Fragment::failed(1, 0, "rejected")],
            0,
        );
        assert!(all_failed.is_failed());
        assert!(all_failed.failure_reason().unwrap().contains("timed out"));
    }
}
