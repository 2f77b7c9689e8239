use crate::error::CliError;
use engine_config::report::{estimate::CostEstimate, summary::BatchReport};
use engine_core::progress::{RunProgress, UnitProgress};
use engine_processing::catalog::dedup::DedupVerdict;
use model::records::unit::WorkUnit;
use serde::Serialize;
use std::path::Path;

fn to_json<T: Serialize>(value: &T) -> Result<String, CliError> {
    serde_json::to_string_pretty(value).map_err(CliError::JsonSerialize)
}

pub async fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), CliError> {
    tokio::fs::write(path, to_json(value)?).await?;
    Ok(())
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", to_json(value)?);
    Ok(())
}

#[derive(Serialize)]
pub struct ScannedUnit<'a> {
    #[serde(flatten)]
    pub unit: &'a WorkUnit,
    pub verdict: &'static str,
}

pub fn verdict_label(verdict: DedupVerdict) -> &'static str {
    match verdict {
        DedupVerdict::Unique => "new",
        DedupVerdict::Duplicate => "duplicate",
        DedupVerdict::Disputed => "disputed",
    }
}

pub fn print_scan_table(units: &[ScannedUnit<'_>]) {
    println!("{:<10} {:<12} {:<10} {:>10}  Locator", "Unit", "Convention", "Verdict", "Bytes");
    println!("{}", "-".repeat(64));
    for scanned in units {
        let unit = scanned.unit;
        println!(
            "{:<10} {:<12} {:<10} {:>10}  {}",
            unit.id,
            unit.convention,
            scanned.verdict,
            unit.size_estimate,
            unit.locator.display()
        );
        for alias in &unit.aliases {
            println!("{:<45}  (alias) {}", "", alias.display());
        }
    }
    println!("{} unit(s)", units.len());
}

pub fn print_run_progress(progress: &RunProgress) {
    println!("Progress for run '{}':", progress.run_id);
    println!("-----------------------------");
    let started = progress
        .started_at
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "n/a".to_string());
    println!("{:<18} {}", "Started", started);
    println!("{:<18} {}", "Finished", progress.finished);
    println!("{:<18} {}", "Cancelled", progress.cancelled);
    println!("{:<18} {}", "Units started", progress.units_started);
    println!("{:<18} {}", "Units done", progress.units_done);
    println!("{:<18} {}", "Units skipped", progress.units_skipped);
    println!("{:<18} {}", "Phases committed", progress.phases_committed);
    println!("{:<18} {}", "Phases failed", progress.phases_failed);
    println!("{:<18} {}", "Jobs submitted", progress.jobs_submitted);
}

pub fn print_unit_progress(progress: &UnitProgress) {
    println!();
    println!("Unit '{}': {}", progress.unit_id, progress.stage);
    for phase in &progress.phases {
        println!(
            "  {:<24} {:<12} attempts={} updated={}",
            phase.phase,
            phase.status,
            phase.attempts,
            phase.updated_at.to_rfc3339()
        );
        if let Some(job) = &phase.job_id {
            println!("  {:<24} pending job {job}", "");
        }
        if let Some(err) = &phase.last_error {
            println!("  {:<24} last error: {err}", "");
        }
    }
}

/// One-line-per-bucket summary written to stderr so stdout stays JSON.
pub fn print_summary(report: &BatchReport) {
    eprintln!(
        "run {}: {} succeeded, {} failed, {} duplicate(s) skipped, {} flagged, {} not started{}",
        report.run_id,
        report.succeeded.len(),
        report.failed.len(),
        report.skipped_duplicates.len(),
        report.flagged_for_review.len(),
        report.not_started.len(),
        if report.cancelled { " (cancelled)" } else { "" }
    );
    eprintln!(
        "  {} input / {} output tokens, ~${:.3}",
        report.metrics.input_tokens, report.metrics.output_tokens, report.estimated_cost_usd
    );
    for failure in &report.failed {
        let phase = failure
            .phase
            .as_ref()
            .map(|p| p.as_str())
            .unwrap_or("-");
        eprintln!("  {} [{}] {}: {}", failure.unit_id, phase, failure.kind, failure.reason);
    }
}

pub fn print_estimate_summary(estimate: &CostEstimate) {
    let pending = estimate.units.iter().filter(|u| !u.phases.is_empty()).count();
    eprintln!(
        "dry run ({}): {} of {} unit(s) pending, ~{} input / ~{} output tokens, ~${:.3}",
        estimate.model,
        pending,
        estimate.units.len(),
        estimate.input_tokens,
        estimate.output_tokens,
        estimate.estimated_cost_usd
    );
    for unit in estimate.units.iter().filter(|u| u.unreadable.is_some()) {
        eprintln!("  {} unreadable: {}", unit.unit_id, unit.unreadable.as_deref().unwrap_or(""));
    }
}
