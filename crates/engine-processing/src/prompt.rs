use connectors::inference::InferenceRequest;
use engine_config::settings::phase::PhaseConfig;
use model::{
    core::tokens::chars_for_tokens,
    records::{chunk::Chunk, message::Message},
};
use serde_json::Value;
use std::collections::BTreeSet;

/// Renders one message the way every prompt presents it.
pub fn format_message(message: &Message) -> String {
    format!(
        "--- Message {} ({}) ---\n{}",
        message.index, message.role, message.content
    )
}

pub fn format_messages<'m>(messages: impl IntoIterator<Item = &'m Message>) -> String {
    messages
        .into_iter()
        .map(format_message)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Builds inference requests for one phase.
pub struct PromptBuilder<'a> {
    phase: &'a PhaseConfig,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(phase: &'a PhaseConfig) -> Self {
        Self { phase }
    }

    pub fn initial(&self, chunk: &Chunk, total_chunks: usize, notes: Option<&str>) -> InferenceRequest {
        let mut prompt = format!(
            "Unit {}, chunk {} of {}.\n\n",
            chunk.unit_id,
            chunk.sequence + 1,
            total_chunks.max(1)
        );
        if let Some(notes) = notes.filter(|n| !n.is_empty()) {
            prompt.push_str("Notes carried from earlier chunks:\n");
            prompt.push_str(notes);
            prompt.push_str("\n\n");
        }
        prompt.push_str(&self.output_rules());
        prompt.push_str("\n\n");
        prompt.push_str(&format_messages(&chunk.messages));

        self.request(chunk.custom_id(), prompt)
    }

    /// Asks for the rest of an incomplete answer. Only the messages whose
    /// indices are still missing are re-sent; an empty `remaining` re-sends
    /// the whole chunk.
    pub fn continuation(&self, chunk: &Chunk, remaining: &BTreeSet<u64>, round: u32) -> InferenceRequest {
        let scoped: Vec<&Message> = chunk
            .messages
            .iter()
            .filter(|m| remaining.is_empty() || remaining.contains(&m.index))
            .collect();

        let mut prompt = format!(
            "Unit {}, chunk {}: your previous answer was incomplete.\n",
            chunk.unit_id,
            chunk.sequence + 1
        );
        if remaining.is_empty() {
            prompt.push_str("It contained no usable output. Answer again for every message below.\n\n");
        } else {
            let indices: Vec<String> = remaining.iter().map(u64::to_string).collect();
            prompt.push_str(&format!(
                "Continue with only these messages: {}. Do not repeat items you already returned.\n\n",
                indices.join(", ")
            ));
        }
        prompt.push_str(&self.output_rules());
        prompt.push_str("\n\n");
        prompt.push_str(&format_messages(scoped));

        self.request(format!("{}-c{round}", chunk.custom_id()), prompt)
    }

    fn output_rules(&self) -> String {
        let shape = &self.phase.shape;
        let mut rules = format!(
            "Respond with a single JSON object and nothing else. Put the categorized output under `{}`, one entry per category.",
            shape.category_key
        );
        if self.phase.per_item {
            rules.push_str(&format!(
                " Return one item per message, each carrying the message's `{}`.",
                self.phase.item_key
            ));
        }
        rules
    }

    fn request(&self, custom_id: String, prompt: String) -> InferenceRequest {
        InferenceRequest {
            custom_id,
            system: self.phase.instructions.clone(),
            prompt,
            max_output_tokens: self.phase.max_output_tokens,
        }
    }
}

/// Compact notes for the next chunk: the category names seen so far,
/// truncated to the phase's notes reserve. `None` when the phase reserves
/// nothing for notes or there is nothing to carry.
pub fn carry_notes(phase: &PhaseConfig, payload: &Value) -> Option<String> {
    if phase.notes_reserve_tokens == 0 {
        return None;
    }
    let categories = phase
        .shape
        .keys()
        .find_map(|key| payload.get(key))?
        .as_object()?;
    if categories.is_empty() {
        return None;
    }

    let names: Vec<&str> = categories.keys().map(String::as_str).collect();
    let mut notes = format!("Categories so far: {}", names.join(", "));
    let limit = chars_for_tokens(phase.notes_reserve_tokens);
    if notes.chars().count() > limit {
        notes = notes.chars().take(limit).collect();
    }
    Some(notes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_config::settings::phase::ShapeConfig;
    use model::{
        core::identifiers::UnitId,
        records::{chunk::ChunkDisposition, message::Role},
    };
    use serde_json::json;

    fn chunk() -> Chunk {
        Chunk {
            unit_id: UnitId::parse("0012ebed").unwrap(),
            phase: "threads".into(),
            sequence: 1,
            messages: vec![
                Message::new(4, Role::User, "first"),
                Message::new(5, Role::Assistant, "second"),
                Message::new(6, Role::User, "third"),
            ],
            content_tokens: 60,
            reserved_overhead: 500,
            oversized: false,
            disposition: ChunkDisposition::Send,
        }
    }

    fn phase() -> PhaseConfig {
        let mut phase = PhaseConfig::new("threads", "Extract threads.", ShapeConfig::new("threads"));
        phase.per_item = true;
        phase
    }

    #[test]
    fn initial_prompt_lists_every_message() {
        let phase = phase();
        let request = PromptBuilder::new(&phase).initial(&chunk(), 3, Some("Categories so far: ideas"));

        assert_eq!(request.custom_id, "0012ebed-threads-1");
        assert_eq!(request.system, "Extract threads.");
        assert_eq!(request.max_output_tokens, 16_000);
        assert!(request.prompt.contains("chunk 2 of 3"));
        assert!(request.prompt.contains("Categories so far: ideas"));
        assert!(request.prompt.contains("--- Message 4 (user) ---\nfirst"));
        assert!(request.prompt.contains("--- Message 6 (user) ---\nthird"));
    }

    #[test]
    fn continuation_is_scoped_to_missing_items() {
        let phase = phase();
        let remaining = BTreeSet::from([6]);
        let request = PromptBuilder::new(&phase).continuation(&chunk(), &remaining, 1);

        assert_eq!(request.custom_id, "0012ebed-threads-1-c1");
        assert!(request.prompt.contains("only these messages: 6"));
        assert!(request.prompt.contains("--- Message 6 (user) ---"));
        assert!(!request.prompt.contains("--- Message 4"));
    }

    #[test]
    fn empty_remaining_resends_the_whole_chunk() {
        let phase = phase();
        let request = PromptBuilder::new(&phase).continuation(&chunk(), &BTreeSet::new(), 2);
        assert!(request.prompt.contains("no usable output"));
        assert!(request.prompt.contains("--- Message 4"));
        assert!(request.prompt.contains("--- Message 6"));
    }

    #[test]
    fn notes_respect_the_reserve() {
        let mut phase = phase();
        let payload = json!({"threads": {"ideas": {}, "bugs": {}}});
        assert_eq!(carry_notes(&phase, &payload), None);

        phase.notes_reserve_tokens = 100;
        assert_eq!(
            carry_notes(&phase, &payload).as_deref(),
            Some("Categories so far: bugs, ideas")
        );

        phase.notes_reserve_tokens = 2;
        assert_eq!(carry_notes(&phase, &payload).unwrap().chars().count(), 7);
    }
}
