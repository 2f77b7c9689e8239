use engine_core::retry::RetryPolicy;
use model::{
    core::{identifiers::PhaseId, tokens::estimate_tokens},
    records::message::{Message, Role},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};

/// How chunks of a phase reach the inference service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallMode {
    #[default]
    Sync,
    Batch,
}

/// What to do with a single item larger than the whole content budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OversizedPolicy {
    /// Clip head and tail deterministically so the item fits.
    #[default]
    Summarize,
    /// Leave the item out and report it.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldMerge {
    /// Lists concatenate in chunk order, then dedup by item key.
    Concat,
    /// Later non-null scalar wins.
    LastNonNull,
    /// Mappings merge by key, recursively.
    DeepMerge,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Per-field overrides; undeclared fields merge by JSON type.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldMerge>,
}

fn default_category_fields() -> Vec<String> {
    ["thread", "category", "type", "name"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_entries_field() -> String {
    "entries".to_string()
}

/// Declares where a phase keeps its categorized output and which legacy
/// spellings to accept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeConfig {
    pub category_key: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Item fields naming the category in flat lists, in priority order.
    #[serde(default = "default_category_fields")]
    pub category_fields: Vec<String>,
    /// Names for positional groups in list-of-lists output.
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default = "default_entries_field")]
    pub entries_field: String,
}

impl ShapeConfig {
    pub fn new(category_key: impl Into<String>) -> Self {
        Self {
            category_key: category_key.into(),
            aliases: Vec::new(),
            category_fields: default_category_fields(),
            categories: Vec::new(),
            entries_field: default_entries_field(),
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    /// Category key first, then aliases.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.category_key.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> usize {
    3
}
fn default_base_delay_ms() -> u64 {
    5_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Give up on a job that has not ended after this long.
    #[serde(default = "default_poll_deadline_secs")]
    pub poll_deadline_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    30
}
fn default_poll_deadline_secs() -> u64 {
    24 * 60 * 60
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            poll_deadline_secs: default_poll_deadline_secs(),
        }
    }
}

fn default_max_content_tokens() -> usize {
    164_000
}
fn default_max_output_tokens() -> usize {
    16_000
}
fn default_max_items_per_chunk() -> usize {
    40
}
fn default_template_overhead_tokens() -> usize {
    500
}
fn default_max_continuations() -> u32 {
    2
}
fn default_call_timeout_secs() -> u64 {
    600
}
fn default_item_key() -> String {
    "index".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseConfig {
    pub name: PhaseId,
    pub instructions: String,
    #[serde(default)]
    pub mode: CallMode,
    /// Budget for one call's input: instructions, template and content.
    #[serde(default = "default_max_content_tokens")]
    pub max_content_tokens: usize,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: usize,
    #[serde(default = "default_max_items_per_chunk")]
    pub max_items_per_chunk: usize,
    #[serde(default = "default_template_overhead_tokens")]
    pub template_overhead_tokens: usize,
    /// Reserved for notes carried from the previous chunk.
    #[serde(default)]
    pub notes_reserve_tokens: usize,
    #[serde(default = "default_max_continuations")]
    pub max_continuations: u32,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub oversized: OversizedPolicy,
    /// Roles sent to this phase; empty means all.
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub min_filter_tier: Option<u8>,
    /// Output carries one item per input message, keyed by `item_key`.
    #[serde(default)]
    pub per_item: bool,
    #[serde(default = "default_item_key")]
    pub item_key: String,
    pub shape: ShapeConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub batch: BatchSettings,
}

impl PhaseConfig {
    pub fn new(
        name: impl Into<PhaseId>,
        instructions: impl Into<String>,
        shape: ShapeConfig,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            mode: CallMode::default(),
            max_content_tokens: default_max_content_tokens(),
            max_output_tokens: default_max_output_tokens(),
            max_items_per_chunk: default_max_items_per_chunk(),
            template_overhead_tokens: default_template_overhead_tokens(),
            notes_reserve_tokens: 0,
            max_continuations: default_max_continuations(),
            retry: RetrySettings::default(),
            call_timeout_secs: default_call_timeout_secs(),
            oversized: OversizedPolicy::default(),
            roles: Vec::new(),
            min_filter_tier: None,
            per_item: false,
            item_key: default_item_key(),
            shape,
            merge: MergeConfig::default(),
            batch: BatchSettings::default(),
        }
    }

    /// Tokens every call spends before any content: instructions, prompt
    /// template and the carried-notes reserve.
    pub fn reserved_overhead(&self) -> usize {
        estimate_tokens(&self.instructions) + self.template_overhead_tokens + self.notes_reserve_tokens
    }

    /// Tokens left for content once the overhead is taken out. `None` when
    /// the overhead alone exhausts the budget.
    pub fn content_budget(&self) -> Option<usize> {
        self.max_content_tokens
            .checked_sub(self.reserved_overhead())
            .filter(|budget| *budget > 0)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn accepts(&self, message: &Message) -> bool {
        let role_ok = self.roles.is_empty() || self.roles.contains(&message.role);
        let tier_ok = match self.min_filter_tier {
            Some(min) => message.filter_tier.unwrap_or(0) >= min,
            None => true,
        };
        role_ok && tier_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overhead_is_subtracted_before_content() {
        let mut phase = PhaseConfig::new("threads", "x".repeat(350), ShapeConfig::new("threads"));
        phase.max_content_tokens = 1_000;
        phase.notes_reserve_tokens = 100;

        assert_eq!(phase.reserved_overhead(), 100 + 500 + 100);
        assert_eq!(phase.content_budget(), Some(300));

        phase.max_content_tokens = 700;
        assert_eq!(phase.content_budget(), None);
    }

    #[test]
    fn filters_by_role_and_tier() {
        let mut phase = PhaseConfig::new("notes", "", ShapeConfig::new("notes"));
        phase.roles = vec![Role::Assistant];
        phase.min_filter_tier = Some(2);

        let mut msg = Message::new(0, Role::Assistant, "ok");
        assert!(!phase.accepts(&msg));
        msg.filter_tier = Some(3);
        assert!(phase.accepts(&msg));
        msg.role = Role::User;
        assert!(!phase.accepts(&msg));
    }

    #[test]
    fn deserializes_with_defaults() {
        let phase: PhaseConfig = serde_json::from_str(
            r#"{
                "name": "thread_extractions",
                "instructions": "Extract threads.",
                "shape": {"category_key": "threads", "aliases": ["extractions"]}
            }"#,
        )
        .unwrap();

        assert_eq!(phase.mode, CallMode::Sync);
        assert_eq!(phase.max_items_per_chunk, 40);
        assert_eq!(phase.shape.keys().collect::<Vec<_>>(), vec!["threads", "extractions"]);
        assert_eq!(phase.shape.category_fields[0], "thread");
    }
}
