use crate::execution::{batch::BatchRound, executor::InferenceClients, unit::UnitReport};
use connectors::transcript::TranscriptSource;
use engine_config::{
    report::{finding::Finding, summary::SkippedItem},
    settings::{
        PipelineConfig,
        phase::{CallMode, PhaseConfig},
    },
};
use engine_core::{
    context::exec::ExecutionContext,
    retry::RetryPolicy,
    state::{export::export_record, models::CheckpointEntry},
};
use engine_processing::{
    chunker::Chunker,
    continuation::{ChunkOutcome, ContinuationController},
    merger::Merger,
    normalizer::normalize,
    prompt::carry_notes,
    retry::classify_transcript_error,
    state_manager::UnitStateManager,
    validator::validate,
};
use futures::{StreamExt, future::BoxFuture, stream};
use model::{
    execution::{errors::FailureKind, phase::PhaseOutcome},
    records::{chunk::Chunk, unit::WorkUnit},
    schema::canonical::CanonicalRecord,
};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Why a phase could not produce a committed record.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl PhaseFailure {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::new(FailureKind::Storage, err.to_string())
    }
}

/// One phase of one unit: chunk, call, merge, normalize, validate, commit.
pub struct PhaseExecutor<'a> {
    pub ctx: &'a ExecutionContext,
    pub config: &'a PipelineConfig,
    pub phase: &'a PhaseConfig,
    pub clients: &'a InferenceClients,
    pub source: &'a dyn TranscriptSource,
}

impl<'a> PhaseExecutor<'a> {
    pub async fn execute(
        &self,
        unit: &WorkUnit,
        state: &UnitStateManager,
        report: &mut UnitReport,
    ) -> Result<(), PhaseFailure> {
        let mut entry = state
            .begin_phase(&self.phase.name)
            .await
            .map_err(PhaseFailure::storage)?;

        let record = match self.produce(unit, state, &mut entry, report).await {
            Ok(record) => record,
            Err(failure) => {
                self.ctx.metrics.increment_failures(1);
                if let Err(e) = state.fail_phase(&entry, &failure.reason).await {
                    warn!(unit = %unit.id, phase = %self.phase.name, error = %e, "Failed to record phase failure");
                }
                return Err(failure);
            }
        };

        state
            .commit_phase(&entry, &record)
            .await
            .map_err(PhaseFailure::storage)?;
        self.ctx.metrics.increment_phases_committed(1);

        if let Some(dir) = &self.config.export_dir {
            match export_record(dir, &unit.id, &record).await {
                Ok(outcome) => debug!(unit = %unit.id, phase = %self.phase.name, ?outcome, "Exported record"),
                // The record is already committed; export can be redone from the store.
                Err(e) => warn!(unit = %unit.id, phase = %self.phase.name, error = %e, "Record export failed"),
            }
        }
        Ok(())
    }

    async fn produce(
        &self,
        unit: &WorkUnit,
        state: &UnitStateManager,
        entry: &mut CheckpointEntry,
        report: &mut UnitReport,
    ) -> Result<CanonicalRecord, PhaseFailure> {
        let phase = &self.phase.name;
        let (sendable, skipped): (Vec<Chunk>, Vec<Chunk>) = self
            .chunks(unit)
            .await?
            .into_iter()
            .partition(Chunk::is_sendable);

        for chunk in &skipped {
            for index in chunk.item_indices() {
                report.advise(
                    phase,
                    Finding::new_oversized_skipped(unit.id.as_str(), phase.as_str(), index),
                );
            }
            report.skipped_items.push(SkippedItem {
                unit_id: unit.id.clone(),
                phase: phase.clone(),
                sequence: chunk.sequence,
                item_indices: chunk.item_indices(),
            });
        }
        self.ctx.metrics.increment_chunks_skipped(skipped.len() as u64);
        self.ctx.metrics.increment_chunks_sent(sendable.len() as u64);
        info!(
            unit = %unit.id,
            phase = %phase,
            chunks = sendable.len(),
            skipped = skipped.len(),
            mode = ?self.phase.mode,
            "Running phase"
        );

        let outcomes = match (self.phase.mode, &self.clients.batch) {
            (CallMode::Batch, Some(batch)) if !sendable.is_empty() => {
                let round = BatchRound {
                    ctx: self.ctx,
                    phase: self.phase,
                    client: batch.as_ref(),
                    controller: self.controller(),
                };
                round.execute(&sendable, state, entry).await?
            }
            (CallMode::Batch, None) => {
                warn!(phase = %phase, "No batch client configured; calling synchronously");
                self.run_sync(&sendable).await
            }
            _ => self.run_sync(&sendable).await,
        };

        if outcomes.iter().any(ChunkOutcome::is_abandoned) {
            return Err(PhaseFailure::new(
                FailureKind::Abandoned,
                "cancelled before completion",
            ));
        }

        let expected_items = outcomes.iter().map(|o| o.expected_items).sum();
        let first_failure = outcomes.iter().find_map(|o| o.failure.clone());
        let fragments = outcomes.into_iter().flat_map(|o| o.fragments).collect();
        let result = Merger::new(self.phase).merge(&unit.id, fragments, expected_items);

        let merged = match result.outcome {
            PhaseOutcome::Merged(ref payload) => payload,
            PhaseOutcome::Failed { ref reason } => {
                let kind = first_failure
                    .map(|(kind, _)| kind)
                    .unwrap_or(FailureKind::MalformedOutput);
                return Err(PhaseFailure::new(kind, reason.clone()));
            }
        };
        if !result.failed_chunks.is_empty() {
            report.flag(
                Some(phase),
                Finding::new_partial_phase(unit.id.as_str(), phase.as_str(), &result.failed_chunks),
            );
        }

        let record = normalize(merged, self.phase)
            .map_err(|e| PhaseFailure::new(FailureKind::MalformedOutput, e.to_string()))?;

        let contract = self.config.contract(phase).ok_or_else(|| {
            PhaseFailure::new(
                FailureKind::FatalConfiguration,
                format!("no contract declared for phase '{phase}'"),
            )
        })?;
        let check = validate(contract, &record);
        for violation in check.advisory() {
            report.advise(phase, violation.to_finding(phase.as_str()));
        }
        if check.is_blocked() {
            let reasons: Vec<String> = check
                .blocking()
                .map(|v| v.to_finding(phase.as_str()).message)
                .collect();
            return Err(PhaseFailure::new(FailureKind::SchemaViolation, reasons.join(" ")));
        }

        Ok(record)
    }

    async fn chunks(&self, unit: &WorkUnit) -> Result<Vec<Chunk>, PhaseFailure> {
        chunk_unit(self.phase, self.source, unit).await
    }

    fn controller(&self) -> ContinuationController<'a> {
        ContinuationController::new(
            self.phase,
            self.clients.sync.as_ref(),
            &self.ctx.metrics,
            &self.ctx.cancel,
            self.config.concurrency.drain_grace(),
        )
        .with_price(self.config.pricing.price_for(&self.config.model))
    }

    /// One request per chunk. Phases that carry notes between chunks run
    /// strictly in order; the rest run up to `max_concurrent_calls` at once.
    pub async fn run_sync(&self, chunks: &[Chunk]) -> Vec<ChunkOutcome> {
        let controller = self.controller();
        let total = chunks.len();

        if self.phase.notes_reserve_tokens == 0 {
            let limit = self.config.concurrency.max_concurrent_calls.max(1);
            let outcomes: BoxFuture<'_, Vec<ChunkOutcome>> = Box::pin(
                stream::iter(chunks)
                    .map(|chunk| controller.run(chunk, total, None))
                    .buffered(limit)
                    .collect(),
            );
            return outcomes.await;
        }

        let mut outcomes: Vec<ChunkOutcome> = Vec::with_capacity(total);
        let mut notes: Option<String> = None;
        for chunk in chunks {
            let outcome = controller.run(chunk, total, notes.as_deref()).await;
            outcomes.push(outcome);
            notes = self.notes_so_far(chunk, &outcomes).or(notes);
        }
        outcomes
    }

    fn notes_so_far(&self, chunk: &Chunk, outcomes: &[ChunkOutcome]) -> Option<String> {
        let fragments = outcomes.iter().flat_map(|o| o.fragments.iter().cloned()).collect();
        let merged = Merger::new(self.phase).merge(&chunk.unit_id, fragments, 0);
        let record = normalize(merged.payload()?, self.phase).ok()?;
        carry_notes(self.phase, &Value::Object(record.payload))
    }
}

/// Streams the transcript through the chunker; the whole transcript is
/// never held as one string.
pub async fn chunk_unit(
    phase: &PhaseConfig,
    source: &dyn TranscriptSource,
    unit: &WorkUnit,
) -> Result<Vec<Chunk>, PhaseFailure> {
    let mut chunker = Chunker::new(unit.id.clone(), phase)
        .map_err(|e| PhaseFailure::new(FailureKind::FatalConfiguration, e.to_string()))?;

    let mut messages = RetryPolicy::default()
        .run(|| source.open(unit), classify_transcript_error)
        .await
        .map_err(|e| PhaseFailure::new(FailureKind::Source, e.into_inner().to_string()))?;

    let mut chunks = Vec::new();
    while let Some(message) = messages.next().await {
        let message = message.map_err(|e| PhaseFailure::new(FailureKind::Source, e.to_string()))?;
        chunks.extend(chunker.push(message));
    }
    chunks.extend(chunker.finish());
    Ok(chunks)
}
