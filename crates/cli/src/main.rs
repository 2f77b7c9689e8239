use crate::{
    error::CliError,
    output::ScannedUnit,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use commands::Commands;
use connectors::{
    inference::anthropic::{AnthropicClient, AnthropicConfig},
    transcript::DirectoryTranscriptSource,
};
use engine_config::settings::{PipelineConfig, validator::SettingsValidator};
use engine_core::{
    context::exec::ExecutionContext,
    progress::{ProgressService, RunProgress, UnitProgress},
};
use engine_processing::{
    catalog::{
        Catalog,
        dedup::{DedupVerdict, is_duplicate},
        registry::ProcessedRegistry,
    },
    normalizer::normalize,
    response::{extract_json, into_payload},
};
use engine_runtime::{
    Driver, InferenceClients, config_digest,
    execution::{estimate::estimate_units, factory::open_state_store},
};
use model::core::identifiers::{PhaseId, UnitId};
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod output;
mod shutdown;

const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

#[derive(Parser)]
#[command(
    name = "hyperbatch",
    version = "0.1.0",
    about = "Batch transcript extraction pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match execute(cli.command).await {
        Ok(code) => code,
        Err(CliError::ShutdownRequested) => ExitCode::ShutdownRequested,
        Err(err) => {
            error!("{err}");
            ExitCode::GeneralError
        }
    };
    std::process::exit(code.as_i32());
}

async fn execute(command: Commands) -> Result<ExitCode, CliError> {
    match command {
        Commands::Run {
            config,
            state,
            registry,
            output,
            dry_run,
        } => {
            if dry_run {
                estimate(&config, state.as_deref(), output.as_deref()).await?;
                return Ok(ExitCode::Success);
            }
            run(&config, state.as_deref(), registry.as_deref(), output.as_deref()).await
        }
        Commands::Scan {
            roots,
            registry,
            state,
            json,
        } => {
            scan(roots, registry.as_deref(), state.as_deref(), json).await?;
            Ok(ExitCode::Success)
        }
        Commands::Status {
            config,
            units,
            state,
            json,
        } => {
            show_status(&config, &units, state.as_deref(), json).await?;
            Ok(ExitCode::Success)
        }
        Commands::Normalize {
            file,
            phase,
            config,
        } => {
            normalize_file(&file, &phase, &config).await?;
            Ok(ExitCode::Success)
        }
        Commands::ValidateConfig { config } => {
            let config = PipelineConfig::load(&config).await?;
            let warnings = SettingsValidator::new(&config).validate()?;
            output::print_json(&warnings)?;
            Ok(ExitCode::Success)
        }
    }
}

async fn load_registry(path: Option<&Path>) -> Result<ProcessedRegistry, CliError> {
    match path {
        Some(path) => Ok(ProcessedRegistry::load(path).await?),
        None => Ok(ProcessedRegistry::empty()),
    }
}

async fn run(
    config_path: &Path,
    state: Option<&Path>,
    registry: Option<&Path>,
    output: Option<&Path>,
) -> Result<ExitCode, CliError> {
    let config = PipelineConfig::load(config_path).await?;
    let registry = load_registry(registry.or(config.registry.as_deref())).await?;

    let api_key = std::env::var(API_KEY_ENV).map_err(|_| CliError::MissingEnv(API_KEY_ENV))?;
    let client = Arc::new(AnthropicClient::new(AnthropicConfig::new(
        api_key,
        config.model.clone(),
    ))?);
    let clients = InferenceClients {
        sync: client.clone(),
        batch: Some(client),
    };

    let units = Catalog::new(config.sources.clone()).scan().await?;
    let store = open_state_store(state)?;

    let coordinator =
        ShutdownCoordinator::new(CancellationToken::new(), config.concurrency.drain_grace());
    coordinator.register_handlers();

    let driver = Driver::new(config, store, clients).with_registry(registry);
    let report = driver.run(units, coordinator.cancel_token()).await?;

    match output {
        Some(path) => output::write_json(&report, path).await?,
        None => output::print_json(&report)?,
    }
    output::print_summary(&report);

    if coordinator.is_shutdown_requested() || report.cancelled {
        warn!(run_id = %report.run_id, "Run cancelled; rerun the same configuration to resume");
        return Err(CliError::ShutdownRequested);
    }
    if report.failed.is_empty() {
        Ok(ExitCode::Success)
    } else {
        Ok(ExitCode::UnitsFailed)
    }
}

/// Prices the pending work; needs no API key and writes nothing to the store.
async fn estimate(
    config_path: &Path,
    state: Option<&Path>,
    output: Option<&Path>,
) -> Result<(), CliError> {
    let config = PipelineConfig::load(config_path).await?;
    let units = Catalog::new(config.sources.clone()).scan().await?;
    let store = open_state_store(state)?;

    for warning in SettingsValidator::new(&config).validate()? {
        warn!(code = %warning.code, "{}", warning.message);
    }
    let source = DirectoryTranscriptSource::new();
    let estimate = estimate_units(&config, store.as_ref(), &source, &units).await?;

    match output {
        Some(path) => output::write_json(&estimate, path).await?,
        None => output::print_json(&estimate)?,
    }
    output::print_estimate_summary(&estimate);
    Ok(())
}

async fn scan(
    roots: Vec<PathBuf>,
    registry: Option<&Path>,
    state: Option<&Path>,
    as_json: bool,
) -> Result<(), CliError> {
    let units = Catalog::new(roots).scan().await?;
    let registry = load_registry(registry).await?;
    for finding in registry.findings() {
        warn!(code = %finding.code, "{}", finding.message);
    }

    // Verdicts only need the store when the registry lists something.
    let mut verdicts = vec![DedupVerdict::Unique; units.len()];
    if !registry.is_empty() {
        let store = open_state_store(state)?;
        for (unit, verdict) in units.iter().zip(verdicts.iter_mut()) {
            *verdict = is_duplicate(unit, store.as_ref(), &registry).await?;
        }
    }

    let scanned: Vec<ScannedUnit<'_>> = units
        .iter()
        .zip(verdicts)
        .map(|(unit, verdict)| ScannedUnit {
            unit,
            verdict: output::verdict_label(verdict),
        })
        .collect();

    if as_json {
        output::print_json(&scanned)
    } else {
        output::print_scan_table(&scanned);
        Ok(())
    }
}

#[derive(Serialize)]
struct StatusView {
    run: RunProgress,
    units: Vec<UnitProgress>,
}

async fn show_status(
    config_path: &Path,
    unit_ids: &[String],
    state: Option<&Path>,
    as_json: bool,
) -> Result<(), CliError> {
    let config = PipelineConfig::load(config_path).await?;
    let store = open_state_store(state)?;
    let run_id =
        ExecutionContext::new(&config_digest(&config), store.clone(), CancellationToken::new())
            .run_id();
    info!(run_id = %run_id, "Loading progress");

    let service = ProgressService::new(store);
    let run = service.run_status(&run_id).await?;

    let mut units = Vec::with_capacity(unit_ids.len());
    for raw in unit_ids {
        let unit_id = UnitId::parse(raw)?;
        units.push(service.unit_status(&unit_id, config.phases.len()).await?);
    }

    if as_json {
        return output::print_json(&StatusView { run, units });
    }
    output::print_run_progress(&run);
    for unit in &units {
        output::print_unit_progress(unit);
    }
    Ok(())
}

async fn normalize_file(file: &Path, phase: &str, config_path: &Path) -> Result<(), CliError> {
    let config = PipelineConfig::load(config_path).await?;
    let phase_config = config
        .phase(&PhaseId::from(phase))
        .ok_or_else(|| CliError::UnknownPhase(phase.to_string()))?;

    // Accepts saved model output as well as plain JSON.
    let raw = tokio::fs::read_to_string(file).await?;
    let payload = extract_json(&raw)
        .and_then(|value| into_payload(value, &phase_config.shape))
        .ok_or_else(|| CliError::Unparseable(file.to_path_buf()))?;
    let record = normalize(&payload, phase_config)?;
    output::print_json(&record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_accepts_repeated_roots() {
        let cli = Cli::try_parse_from([
            "hyperbatch", "scan", "--root", "/a", "--root", "/b", "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Scan { roots, json, .. } => {
                assert_eq!(roots, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
                assert!(json);
            }
            _ => panic!("expected scan"),
        }
    }

    #[test]
    fn validate_config_uses_kebab_case() {
        let cli =
            Cli::try_parse_from(["hyperbatch", "validate-config", "--config", "p.json"]).unwrap();
        assert!(matches!(cli.command, Commands::ValidateConfig { .. }));
    }

    #[test]
    fn run_accepts_dry_run() {
        let cli =
            Cli::try_parse_from(["hyperbatch", "run", "--config", "p.json", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Run { dry_run, output, .. } => {
                assert!(dry_run);
                assert!(output.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn scan_requires_a_root() {
        assert!(Cli::try_parse_from(["hyperbatch", "scan"]).is_err());
    }
}
