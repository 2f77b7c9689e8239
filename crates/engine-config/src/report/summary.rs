use crate::report::finding::Finding;
use engine_core::metrics::MetricsSnapshot;
use model::{
    core::identifiers::{PhaseId, UnitId},
    execution::errors::FailureKind,
    records::unit::UnitStatus,
};
use serde::Serialize;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct UnitFailure {
    pub unit_id: UnitId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<PhaseId>,
    pub kind: FailureKind,
    pub reason: String,
}

/// A finding tied to the unit (and phase) it was raised for.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct UnitFinding {
    pub unit_id: UnitId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<PhaseId>,
    pub finding: Finding,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SkippedItem {
    pub unit_id: UnitId,
    pub phase: PhaseId,
    pub sequence: u32,
    pub item_indices: Vec<u64>,
}

/// Outcome of one `run()`; every per-unit problem ends up here rather than
/// as an error.
#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct BatchReport {
    pub run_id: String,
    pub succeeded: Vec<UnitId>,
    pub failed: Vec<UnitFailure>,
    pub skipped_duplicates: Vec<UnitId>,
    pub flagged_for_review: Vec<UnitFinding>,
    pub advisories: Vec<UnitFinding>,
    pub skipped_items: Vec<SkippedItem>,
    /// Units not attempted because the run was cancelled first.
    pub not_started: Vec<UnitId>,
    pub cancelled: bool,
    pub metrics: MetricsSnapshot,
    /// Spend implied by token usage at the configured model's price.
    pub estimated_cost_usd: f64,
}

impl BatchReport {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            ..Default::default()
        }
    }

    pub fn status_of(&self, unit_id: &UnitId) -> Option<UnitStatus> {
        if self.succeeded.contains(unit_id) {
            Some(UnitStatus::Completed)
        } else if self.failed.iter().any(|f| &f.unit_id == unit_id) {
            Some(UnitStatus::Failed)
        } else if self.skipped_duplicates.contains(unit_id) {
            Some(UnitStatus::SkippedDuplicate)
        } else if self.not_started.contains(unit_id) {
            Some(UnitStatus::Queued)
        } else {
            None
        }
    }

    pub fn failure_for(&self, unit_id: &UnitId) -> Option<&UnitFailure> {
        self.failed.iter().find(|f| &f.unit_id == unit_id)
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && !self.cancelled
    }

    /// Sorts every list by unit id so reports from concurrent runs compare equal.
    pub fn sort(&mut self) {
        self.succeeded.sort();
        self.failed.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        self.skipped_duplicates.sort();
        self.flagged_for_review
            .sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        self.advisories.sort_by(|a, b| {
            (&a.unit_id, &a.phase, &a.finding.code).cmp(&(&b.unit_id, &b.phase, &b.finding.code))
        });
        self.skipped_items
            .sort_by(|a, b| (&a.unit_id, &a.phase, a.sequence).cmp(&(&b.unit_id, &b.phase, b.sequence)));
        self.not_started.sort();
    }
}
