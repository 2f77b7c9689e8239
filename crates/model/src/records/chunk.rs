use crate::{
    core::identifiers::{PhaseId, UnitId},
    records::message::Message,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkDisposition {
    Send,
    /// Oversized item dropped by policy; never sent.
    Skipped,
}

/// One content slice destined for a single external call.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub unit_id: UnitId,
    pub phase: PhaseId,
    pub sequence: u32,
    pub messages: Vec<Message>,
    pub content_tokens: usize,
    pub reserved_overhead: usize,
    pub oversized: bool,
    pub disposition: ChunkDisposition,
}

impl Chunk {
    pub fn total_tokens(&self) -> usize {
        self.content_tokens + self.reserved_overhead
    }

    pub fn item_indices(&self) -> Vec<u64> {
        self.messages.iter().map(|m| m.index).collect()
    }

    pub fn is_sendable(&self) -> bool {
        self.disposition == ChunkDisposition::Send
    }

    /// Stable id used to correlate batch results back to this chunk.
    pub fn custom_id(&self) -> String {
        format!("{}-{}-{}", self.unit_id, self.phase, self.sequence)
    }
}
