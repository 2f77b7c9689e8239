use crate::core::identifiers::{PhaseId, UnitId};
use serde_json::Value;

/// Output of one external call: either a parsed payload or the reason it
/// could not be used.
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentBody {
    Parsed(Value),
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    /// Chunk sequence this fragment answers.
    pub sequence: u32,
    /// 0 for the initial call, then 1.. for each continuation.
    pub continuation: u32,
    pub body: FragmentBody,
    pub item_count: usize,
}

impl Fragment {
    pub fn parsed(sequence: u32, continuation: u32, payload: Value, item_count: usize) -> Self {
        Self {
            sequence,
            continuation,
            body: FragmentBody::Parsed(payload),
            item_count,
        }
    }

    pub fn failed(sequence: u32, continuation: u32, reason: impl Into<String>) -> Self {
        Self {
            sequence,
            continuation,
            body: FragmentBody::Failed {
                reason: reason.into(),
            },
            item_count: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.body, FragmentBody::Failed { .. })
    }

    pub fn payload(&self) -> Option<&Value> {
        match &self.body {
            FragmentBody::Parsed(v) => Some(v),
            FragmentBody::Failed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhaseOutcome {
    Merged(Value),
    Failed { reason: String },
}

/// Accumulated result of one phase for one unit, finalized by the merger.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseResult {
    pub unit_id: UnitId,
    pub phase: PhaseId,
    pub fragments: Vec<Fragment>,
    pub expected_items: usize,
    pub actual_items: usize,
    pub outcome: PhaseOutcome,
    /// Chunk sequences whose every fragment failed.
    pub failed_chunks: Vec<u32>,
    pub merge_log: Vec<String>,
}

impl PhaseResult {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, PhaseOutcome::Failed { .. })
    }

    pub fn payload(&self) -> Option<&Value> {
        match &self.outcome {
            PhaseOutcome::Merged(v) => Some(v),
            PhaseOutcome::Failed { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match &self.outcome {
            PhaseOutcome::Merged(_) => None,
            PhaseOutcome::Failed { reason } => Some(reason),
        }
    }
}
