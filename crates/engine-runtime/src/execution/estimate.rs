use crate::{error::PipelineError, execution::phase::chunk_unit};
use connectors::transcript::TranscriptSource;
use engine_config::{
    report::estimate::{CostEstimate, PhaseEstimate, UnitEstimate},
    settings::{
        PipelineConfig,
        phase::{CallMode, PhaseConfig},
        pricing::ModelPrice,
    },
};
use engine_core::state::{StateStore, models::CheckpointStatus};
use model::records::{chunk::Chunk, unit::WorkUnit};
use tracing::{info, warn};

/// Rough answer size per transcript message.
const OUTPUT_TOKENS_PER_ITEM: u64 = 200;

/// Chunks every pending (unit, phase) exactly as a run would and prices the
/// result. Nothing is sent and nothing is written.
pub async fn estimate_units(
    config: &PipelineConfig,
    state: &dyn StateStore,
    source: &dyn TranscriptSource,
    units: &[WorkUnit],
) -> Result<CostEstimate, PipelineError> {
    let price = config.pricing.price_for(&config.model);
    let mut estimate = CostEstimate::new(&config.model);

    for unit in units {
        let mut unit_estimate = UnitEstimate::new(unit.id.clone());
        for phase in &config.phases {
            let done = state
                .load_checkpoint(&unit.id, &phase.name)
                .await?
                .is_some_and(|entry| entry.status == CheckpointStatus::Done);
            if done {
                unit_estimate.already_done.push(phase.name.clone());
                continue;
            }

            match chunk_unit(phase, source, unit).await {
                Ok(chunks) => unit_estimate.phases.push(phase_estimate(phase, &chunks, price)),
                Err(failure) => {
                    warn!(unit = %unit.id, phase = %phase.name, reason = %failure.reason, "Cannot estimate unit");
                    unit_estimate.unreadable = Some(failure.reason);
                    break;
                }
            }
        }
        estimate.push(unit_estimate);
    }

    info!(
        units = estimate.units.len(),
        input_tokens = estimate.input_tokens,
        output_tokens = estimate.output_tokens,
        cost_usd = estimate.estimated_cost_usd,
        "Estimated batch cost"
    );
    Ok(estimate)
}

fn phase_estimate(phase: &PhaseConfig, chunks: &[Chunk], price: ModelPrice) -> PhaseEstimate {
    let (sendable, skipped): (Vec<&Chunk>, Vec<&Chunk>) =
        chunks.iter().partition(|chunk| chunk.is_sendable());

    let input_tokens: u64 = sendable.iter().map(|c| c.total_tokens() as u64).sum();
    let output_tokens: u64 = sendable
        .iter()
        .map(|c| (c.messages.len() as u64 * OUTPUT_TOKENS_PER_ITEM).min(phase.max_output_tokens as u64))
        .sum();
    let price = match phase.mode {
        CallMode::Batch => price.batch(),
        CallMode::Sync => price,
    };

    PhaseEstimate {
        phase: phase.name.clone(),
        chunks: sendable.len(),
        skipped_chunks: skipped.len(),
        input_tokens,
        output_tokens,
        cost_usd: price.cost(input_tokens, output_tokens),
    }
}
