use crate::error::ChunkError;
use engine_config::settings::phase::{OversizedPolicy, PhaseConfig};
use model::{
    core::{
        identifiers::UnitId,
        tokens::{MESSAGE_HEADER_CHARS, chars_for_tokens},
    },
    records::{
        chunk::{Chunk, ChunkDisposition},
        message::Message,
    },
};
use tracing::{debug, warn};

pub const ELISION_MARKER: &str = "\n[... clipped to fit the content budget ...]\n";

/// Share of a clipped message kept from its head; the rest comes from the tail.
const HEAD_SHARE: f64 = 0.7;

/// Packs a unit's messages into chunks that fit a phase's token budget.
///
/// Messages are pushed in order; chunks are emitted as they close so the
/// transcript never has to be held in memory at once. Reserved overhead
/// (instructions, template, notes) is taken out of the budget before any
/// content is placed, so `content_tokens + reserved_overhead` never exceeds
/// `max_content_tokens`.
pub struct Chunker<'a> {
    unit_id: UnitId,
    phase: &'a PhaseConfig,
    budget: usize,
    overhead: usize,
    current: Vec<Message>,
    current_tokens: usize,
    next_sequence: u32,
}

impl<'a> Chunker<'a> {
    pub fn new(unit_id: UnitId, phase: &'a PhaseConfig) -> Result<Self, ChunkError> {
        let budget = phase.content_budget().ok_or_else(|| ChunkError::NoBudget {
            phase: phase.name.to_string(),
        })?;

        Ok(Self {
            unit_id,
            phase,
            budget,
            overhead: phase.reserved_overhead(),
            current: Vec::new(),
            current_tokens: 0,
            next_sequence: 0,
        })
    }

    /// Adds a message, returning any chunks it caused to close.
    pub fn push(&mut self, message: Message) -> Vec<Chunk> {
        if !self.phase.accepts(&message) {
            return Vec::new();
        }

        let mut closed = Vec::new();
        let tokens = message.estimated_tokens();

        if tokens > self.budget {
            closed.extend(self.flush());
            closed.push(self.oversized(message));
            return closed;
        }

        if self.current_tokens + tokens > self.budget {
            closed.extend(self.flush());
        }

        self.current.push(message);
        self.current_tokens += tokens;

        if self.current.len() >= self.phase.max_items_per_chunk {
            closed.extend(self.flush());
        }
        closed
    }

    pub fn finish(mut self) -> Vec<Chunk> {
        self.flush().into_iter().collect()
    }

    fn flush(&mut self) -> Option<Chunk> {
        if self.current.is_empty() {
            return None;
        }
        let messages = std::mem::take(&mut self.current);
        let tokens = std::mem::replace(&mut self.current_tokens, 0);
        Some(self.chunk(messages, tokens, false, ChunkDisposition::Send))
    }

    fn oversized(&mut self, mut message: Message) -> Chunk {
        if self.phase.oversized == OversizedPolicy::Summarize
            && let Some(clipped) = clip(&message.content, self.budget)
        {
            debug!(
                unit = %self.unit_id,
                phase = %self.phase.name,
                index = message.index,
                "Clipping oversized message"
            );
            message.content = clipped;
            let tokens = message.estimated_tokens();
            return self.chunk(vec![message], tokens, true, ChunkDisposition::Send);
        }

        warn!(
            unit = %self.unit_id,
            phase = %self.phase.name,
            index = message.index,
            "Skipping message larger than the content budget"
        );
        message.content.clear();
        self.chunk(vec![message], 0, true, ChunkDisposition::Skipped)
    }

    fn chunk(
        &mut self,
        messages: Vec<Message>,
        content_tokens: usize,
        oversized: bool,
        disposition: ChunkDisposition,
    ) -> Chunk {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Chunk {
            unit_id: self.unit_id.clone(),
            phase: self.phase.name.clone(),
            sequence,
            messages,
            content_tokens,
            reserved_overhead: self.overhead,
            oversized,
            disposition,
        }
    }
}

/// Keeps the head and tail of `content` with an elision marker between
/// them so the message fits `budget` tokens. `None` if even the message
/// header does not fit.
fn clip(content: &str, budget: usize) -> Option<String> {
    let room = chars_for_tokens(budget)
        .checked_sub(MESSAGE_HEADER_CHARS + ELISION_MARKER.chars().count())
        .filter(|room| *room > 0)?;

    let chars: Vec<char> = content.chars().collect();
    let head = (room as f64 * HEAD_SHARE) as usize;
    let tail = room - head;

    let mut clipped: String = chars[..head].iter().collect();
    clipped.push_str(ELISION_MARKER);
    clipped.extend(&chars[chars.len() - tail..]);
    Some(clipped)
}

/// Chunks a whole message sequence in one call.
pub fn allocate(
    unit_id: &UnitId,
    messages: impl IntoIterator<Item = Message>,
    phase: &PhaseConfig,
) -> Result<Vec<Chunk>, ChunkError> {
    let mut chunker = Chunker::new(unit_id.clone(), phase)?;
    let mut chunks = Vec::new();
    for message in messages {
        chunks.extend(chunker.push(message));
    }
    chunks.extend(chunker.finish());
    Ok(chunks)
}
