use crate::execution::phase::PhaseFailure;
use chrono::Utc;
use connectors::{
    error::InferenceError,
    inference::{BatchInferenceClient, BatchItemResult, BatchOutcome, JobStatus},
};
use engine_config::settings::phase::PhaseConfig;
use engine_core::{
    context::exec::ExecutionContext,
    retry::{RetryDisposition, RetryPolicy},
    state::models::{BatchJobRef, CheckpointEntry},
};
use engine_processing::{
    continuation::{ChunkOutcome, ContinuationController},
    prompt::PromptBuilder,
    retry::classify_inference_error,
    state_manager::UnitStateManager,
};
use model::{execution::errors::FailureKind, records::chunk::Chunk};
use std::{collections::HashMap, time::Duration};
use tracing::{debug, info, warn};

enum PollEnd {
    Cancelled,
    Failed(String),
}

/// Submits every chunk of a unit's phase as one job, then feeds each
/// result through the continuation controller. Chunks without a usable
/// result are called again synchronously.
///
/// The job reference stays on the checkpoint until the phase commits, so a
/// run interrupted during follow-up continuations collects the same job
/// again instead of paying for a second submission.
pub struct BatchRound<'a> {
    pub ctx: &'a ExecutionContext,
    pub phase: &'a PhaseConfig,
    pub client: &'a dyn BatchInferenceClient,
    pub controller: ContinuationController<'a>,
}

impl<'a> BatchRound<'a> {
    pub async fn execute(
        &self,
        chunks: &[Chunk],
        state: &UnitStateManager,
        entry: &mut CheckpointEntry,
    ) -> Result<Vec<ChunkOutcome>, PhaseFailure> {
        let total = chunks.len();
        let job = match entry.job.clone() {
            Some(job) => {
                info!(
                    unit = %entry.unit_id,
                    phase = %entry.phase,
                    job = %job.job_id,
                    "Resuming submitted batch job"
                );
                job
            }
            None => {
                let job = self.submit(chunks).await?;
                state
                    .record_job(entry, job.clone())
                    .await
                    .map_err(PhaseFailure::storage)?;
                job
            }
        };

        let mut results: HashMap<String, BatchOutcome> = match self.poll(&job).await {
            Ok(items) => items
                .into_iter()
                .map(|BatchItemResult { custom_id, outcome }| (custom_id, outcome))
                .collect(),
            // The job reference stays on the checkpoint so a restart polls it again.
            Err(PollEnd::Cancelled) => {
                return Err(PhaseFailure::new(
                    FailureKind::Abandoned,
                    format!("cancelled while waiting on batch job {}", job.job_id),
                ));
            }
            // A dead job is never polled again; its chunks go out directly.
            Err(PollEnd::Failed(reason)) => {
                warn!(job = %job.job_id, reason, "Batch job unusable; falling back to sync calls");
                state.clear_job(entry).await.map_err(PhaseFailure::storage)?;
                HashMap::new()
            }
        };

        let mut outcomes = Vec::with_capacity(total);
        for chunk in chunks {
            let outcome = match results.remove(&chunk.custom_id()) {
                Some(BatchOutcome::Succeeded(response)) => {
                    self.controller.resume(chunk, total, response).await
                }
                other => {
                    debug!(chunk = %chunk.custom_id(), result = ?other.map(|o| describe(&o)), "No batch result; calling directly");
                    self.controller.run(chunk, total, None).await
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn submit(&self, chunks: &[Chunk]) -> Result<BatchJobRef, PhaseFailure> {
        let builder = PromptBuilder::new(self.phase);
        let requests: Vec<_> = chunks
            .iter()
            .map(|chunk| builder.initial(chunk, chunks.len(), None))
            .collect();

        let job_id = self
            .phase
            .retry
            .policy()
            .run(|| self.client.submit(&requests), classify_inference_error)
            .await
            .map_err(|e| failure_from(e.into_inner()))?;
        self.ctx.metrics.increment_calls(requests.len() as u64);

        info!(job = %job_id, requests = requests.len(), phase = %self.phase.name, "Submitted batch job");
        Ok(BatchJobRef {
            job_id,
            custom_ids: requests.into_iter().map(|r| r.custom_id).collect(),
            submitted_at: Utc::now(),
        })
    }

    async fn poll(&self, job: &BatchJobRef) -> Result<Vec<BatchItemResult>, PollEnd> {
        let settings = &self.phase.batch;
        let interval = Duration::from_secs(settings.poll_interval_secs);
        let deadline = job.submitted_at
            + chrono::Duration::seconds(settings.poll_deadline_secs.min(i64::MAX as u64) as i64);
        let policy = RetryPolicy::default();

        loop {
            let status = policy
                .run(|| self.client.status(&job.job_id), classify_inference_error)
                .await
                .map_err(|e| PollEnd::Failed(e.into_inner().to_string()))?;

            if status == JobStatus::Ended {
                return policy
                    .run(|| self.client.results(&job.job_id), classify_inference_error)
                    .await
                    .map_err(|e| PollEnd::Failed(e.into_inner().to_string()));
            }
            if Utc::now() >= deadline {
                return Err(PollEnd::Failed(format!(
                    "job still {status:?} after the poll deadline"
                )));
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.ctx.cancel.cancelled() => return Err(PollEnd::Cancelled),
            }
        }
    }
}

fn failure_from(err: InferenceError) -> PhaseFailure {
    let kind = match classify_inference_error(&err) {
        RetryDisposition::Retry => FailureKind::TransientExternal,
        RetryDisposition::Stop => FailureKind::RejectedExternal,
    };
    PhaseFailure::new(kind, err.to_string())
}

fn describe(outcome: &BatchOutcome) -> &'static str {
    match outcome {
        BatchOutcome::Succeeded(_) => "succeeded",
        BatchOutcome::Errored(_) => "errored",
        BatchOutcome::Canceled => "canceled",
        BatchOutcome::Expired => "expired",
    }
}
