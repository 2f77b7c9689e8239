use crate::execution::{executor::InferenceClients, phase::PhaseExecutor};
use connectors::transcript::TranscriptSource;
use engine_config::{
    report::{
        finding::Finding,
        summary::{BatchReport, SkippedItem, UnitFailure, UnitFinding},
    },
    settings::PipelineConfig,
};
use engine_core::context::exec::ExecutionContext;
use engine_processing::{
    catalog::{
        dedup::{DedupVerdict, is_duplicate},
        registry::ProcessedRegistry,
    },
    state_manager::UnitStateManager,
};
use model::{
    core::identifiers::{PhaseId, UnitId},
    execution::errors::FailureKind,
    records::unit::WorkUnit,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    Succeeded,
    Failed(UnitFailure),
    SkippedDuplicate,
    NotStarted,
}

/// What one unit contributes to the batch report.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitReport {
    pub unit_id: UnitId,
    pub outcome: UnitOutcome,
    pub flagged: Vec<UnitFinding>,
    pub advisories: Vec<UnitFinding>,
    pub skipped_items: Vec<SkippedItem>,
}

impl UnitReport {
    pub fn new(unit_id: UnitId) -> Self {
        Self {
            unit_id,
            outcome: UnitOutcome::Succeeded,
            flagged: Vec::new(),
            advisories: Vec::new(),
            skipped_items: Vec::new(),
        }
    }

    pub fn not_started(unit_id: UnitId) -> Self {
        Self {
            outcome: UnitOutcome::NotStarted,
            ..Self::new(unit_id)
        }
    }

    pub fn fail(&mut self, phase: Option<PhaseId>, kind: FailureKind, reason: impl Into<String>) {
        self.outcome = UnitOutcome::Failed(UnitFailure {
            unit_id: self.unit_id.clone(),
            phase,
            kind,
            reason: reason.into(),
        });
    }

    pub fn flag(&mut self, phase: Option<&PhaseId>, finding: Finding) {
        self.flagged.push(UnitFinding {
            unit_id: self.unit_id.clone(),
            phase: phase.cloned(),
            finding,
        });
    }

    pub fn advise(&mut self, phase: &PhaseId, finding: Finding) {
        self.advisories.push(UnitFinding {
            unit_id: self.unit_id.clone(),
            phase: Some(phase.clone()),
            finding,
        });
    }

    pub fn apply(self, report: &mut BatchReport) {
        match self.outcome {
            UnitOutcome::Succeeded => report.succeeded.push(self.unit_id),
            UnitOutcome::Failed(failure) => report.failed.push(failure),
            UnitOutcome::SkippedDuplicate => report.skipped_duplicates.push(self.unit_id),
            UnitOutcome::NotStarted => report.not_started.push(self.unit_id),
        }
        report.flagged_for_review.extend(self.flagged);
        report.advisories.extend(self.advisories);
        report.skipped_items.extend(self.skipped_items);
    }
}

/// Runs every phase of one unit, in order, under the unit's lock.
pub struct UnitRunner {
    pub ctx: ExecutionContext,
    pub config: Arc<PipelineConfig>,
    pub clients: InferenceClients,
    pub source: Arc<dyn TranscriptSource>,
    pub registry: Arc<ProcessedRegistry>,
}

impl UnitRunner {
    pub async fn run(&self, unit: WorkUnit) -> UnitReport {
        let mut report = UnitReport::new(unit.id.clone());
        if self.ctx.is_cancelled() {
            report.outcome = UnitOutcome::NotStarted;
            return report;
        }

        let _guard = self.ctx.locks.acquire(&unit.id).await;
        let state = UnitStateManager::new(
            self.ctx.run_id.clone(),
            unit.id.clone(),
            self.ctx.state.clone(),
        );

        match is_duplicate(&unit, self.ctx.state.as_ref(), &self.registry).await {
            Ok(DedupVerdict::Duplicate) => {
                if let Err(e) = state.skip_unit("listed in processed registry").await {
                    warn!(unit = %unit.id, error = %e, "Failed to journal skipped unit");
                }
                self.ctx.metrics.increment_units_skipped(1);
                report.outcome = UnitOutcome::SkippedDuplicate;
                return report;
            }
            Ok(DedupVerdict::Disputed) => {
                warn!(unit = %unit.id, "Registry lists unit that has local progress; reprocessing");
                report.flag(None, Finding::new_disputed_duplicate(unit.id.as_str()));
            }
            Ok(DedupVerdict::Unique) => {}
            Err(e) => {
                error!(unit = %unit.id, error = %e, "Dedup check failed");
                report.fail(None, FailureKind::Storage, e.to_string());
                self.ctx.metrics.increment_units_failed(1);
                return report;
            }
        }

        if let Err(e) = state.start_unit().await {
            report.fail(None, FailureKind::Storage, e.to_string());
            self.ctx.metrics.increment_units_failed(1);
            return report;
        }
        info!(unit = %unit.id, locator = %unit.locator.display(), "Processing unit");

        for phase in &self.config.phases {
            if self.ctx.is_cancelled() {
                report.fail(
                    Some(phase.name.clone()),
                    FailureKind::Abandoned,
                    "cancelled before phase started",
                );
                break;
            }

            match state.is_done(&phase.name).await {
                Ok(true) => {
                    debug!(unit = %unit.id, phase = %phase.name, "Phase already done; skipping");
                    self.ctx.metrics.increment_phases_resumed(1);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    report.fail(Some(phase.name.clone()), FailureKind::Storage, e.to_string());
                    break;
                }
            }

            let executor = PhaseExecutor {
                ctx: &self.ctx,
                config: &self.config,
                phase,
                clients: &self.clients,
                source: self.source.as_ref(),
            };
            if let Err(failure) = executor.execute(&unit, &state, &mut report).await {
                report.fail(Some(phase.name.clone()), failure.kind, failure.reason);
                break;
            }
        }

        match &report.outcome {
            UnitOutcome::Failed(failure) => {
                warn!(
                    unit = %unit.id,
                    phase = ?failure.phase.as_ref().map(PhaseId::as_str),
                    kind = %failure.kind,
                    reason = %failure.reason,
                    "Unit failed"
                );
                self.ctx.metrics.increment_units_failed(1);
            }
            _ => {
                if let Err(e) = state.finish_unit().await {
                    warn!(unit = %unit.id, error = %e, "Failed to journal finished unit");
                }
                info!(unit = %unit.id, "Unit completed");
                self.ctx.metrics.increment_units_completed(1);
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(hex: &str) -> UnitId {
        UnitId::parse(hex).unwrap()
    }

    #[test]
    fn each_outcome_lands_in_its_own_bucket() {
        let mut report = BatchReport::new("run-test");
        let phase = PhaseId::from("thread_extractions");

        let mut failed = UnitReport::new(unit("bbbbbbbb"));
        failed.fail(Some(phase.clone()), FailureKind::SchemaViolation, "missing key");
        failed.flag(Some(&phase), Finding::new_disputed_duplicate("bbbbbbbb"));

        UnitReport::new(unit("aaaaaaaa")).apply(&mut report);
        failed.apply(&mut report);
        UnitReport::not_started(unit("cccccccc")).apply(&mut report);

        assert_eq!(report.succeeded, vec![unit("aaaaaaaa")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].phase, Some(phase));
        assert_eq!(report.flagged_for_review.len(), 1);
        assert_eq!(report.not_started, vec![unit("cccccccc")]);
        assert_eq!(report.status_of(&unit("bbbbbbbb")), Some(model::records::unit::UnitStatus::Failed));
    }
}
