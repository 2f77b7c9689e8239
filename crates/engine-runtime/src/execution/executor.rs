use crate::{
    error::PipelineError,
    execution::{estimate::estimate_units, unit::UnitRunner, workers},
};
use chrono::Utc;
use connectors::{
    inference::{BatchInferenceClient, InferenceClient},
    transcript::{DirectoryTranscriptSource, TranscriptSource},
};
use engine_config::{
    report::{estimate::CostEstimate, finding::Finding, summary::BatchReport},
    settings::{PipelineConfig, validator::SettingsValidator},
};
use engine_core::{
    context::exec::ExecutionContext,
    state::{StateStore, models::WalEntry},
};
use engine_processing::catalog::registry::ProcessedRegistry;
use model::records::unit::WorkUnit;
use std::{sync::Arc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The two ways a phase can reach the inference service. Batch mode falls
/// back to `sync` when no batch client is given.
#[derive(Clone)]
pub struct InferenceClients {
    pub sync: Arc<dyn InferenceClient>,
    pub batch: Option<Arc<dyn BatchInferenceClient>>,
}

impl InferenceClients {
    pub fn sync_only(client: Arc<dyn InferenceClient>) -> Self {
        Self {
            sync: client,
            batch: None,
        }
    }
}

/// Seeds the run id; equal configurations map to the same run.
pub fn config_digest(config: &PipelineConfig) -> String {
    blake3::hash(config.hash().as_bytes()).to_hex().to_string()
}

/// Composes catalog, chunking, calls, merging, normalization and
/// validation across every unit and phase of a batch.
pub struct Driver {
    config: Arc<PipelineConfig>,
    state: Arc<dyn StateStore>,
    clients: InferenceClients,
    source: Arc<dyn TranscriptSource>,
    registry: Arc<ProcessedRegistry>,
}

impl Driver {
    pub fn new(
        config: PipelineConfig,
        state: Arc<dyn StateStore>,
        clients: InferenceClients,
    ) -> Self {
        Self {
            config: Arc::new(config),
            state,
            clients,
            source: Arc::new(DirectoryTranscriptSource::new()),
            registry: Arc::new(ProcessedRegistry::empty()),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn TranscriptSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_registry(mut self, registry: ProcessedRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run ids derive from the configuration, so a restarted run with the
    /// same configuration keeps appending to the same journal.
    pub fn run_id(&self) -> String {
        ExecutionContext::new(&self.config_digest(), self.state.clone(), CancellationToken::new())
            .run_id()
    }

    fn config_digest(&self) -> String {
        config_digest(&self.config)
    }

    /// Fatal configuration problems come back as `Err`; warnings are returned.
    pub fn validate(&self) -> Result<Vec<Finding>, PipelineError> {
        Ok(SettingsValidator::new(&self.config).validate()?)
    }

    /// Dry run: chunks and prices what `run` would send for `units`,
    /// skipping phases already done, without calling any service.
    pub async fn estimate(&self, units: &[WorkUnit]) -> Result<CostEstimate, PipelineError> {
        self.validate()?;
        estimate_units(&self.config, self.state.as_ref(), self.source.as_ref(), units).await
    }

    /// Processes every unit through every phase. Only configuration and
    /// store initialization errors are returned; per-unit problems are in
    /// the report.
    pub async fn run(
        &self,
        units: Vec<WorkUnit>,
        cancel: CancellationToken,
    ) -> Result<BatchReport, PipelineError> {
        self.validate()?;
        for finding in self.registry.findings() {
            warn!(code = %finding.code, "{}", finding.message);
        }

        let ctx = ExecutionContext::new(&self.config_digest(), self.state.clone(), cancel);
        let started = Instant::now();
        info!(run_id = %ctx.run_id, units = units.len(), phases = self.config.phases.len(), "Starting batch run");

        ctx.state
            .append_wal(&WalEntry::RunStart {
                run_id: ctx.run_id(),
                config_hash: ctx.config_hash.clone(),
                at: Utc::now(),
            })
            .await?;

        let runner = Arc::new(UnitRunner {
            ctx: ctx.clone(),
            config: self.config.clone(),
            clients: self.clients.clone(),
            source: self.source.clone(),
            registry: self.registry.clone(),
        });
        let unit_reports = workers::spawn(runner, units).await;

        let mut report = BatchReport::new(ctx.run_id());
        for unit_report in unit_reports {
            unit_report.apply(&mut report);
        }
        report.cancelled = ctx.is_cancelled();
        report.metrics = ctx.metrics.snapshot();
        report.estimated_cost_usd = report.metrics.estimated_cost_usd();
        report.sort();

        if let Err(e) = ctx
            .state
            .append_wal(&WalEntry::RunDone {
                run_id: ctx.run_id(),
                cancelled: report.cancelled,
            })
            .await
        {
            warn!(error = %e, "Failed to journal run completion");
        }

        info!(
            run_id = %report.run_id,
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            skipped = report.skipped_duplicates.len(),
            not_started = report.not_started.len(),
            cancelled = report.cancelled,
            cost_usd = report.estimated_cost_usd,
            "Batch run finished in {:.2}s",
            started.elapsed().as_secs_f64()
        );
        Ok(report)
    }
}
