use crate::{
    report::finding::{
        CODE_CONTRACT_UNUSED, CODE_DUPLICATE_PHASE, CODE_INVALID_LIMIT, CODE_NO_PHASES, Finding,
        FindingKind,
    },
    settings::{PipelineConfig, error::SettingsError, phase::PhaseConfig},
};
use std::collections::HashSet;
use tracing::{info, warn};

/// Validates a pipeline configuration before any work starts. Every problem
/// is collected; errors make the whole batch fatal, warnings are returned.
pub struct SettingsValidator<'a> {
    config: &'a PipelineConfig,
}

impl<'a> SettingsValidator<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self) -> Result<Vec<Finding>, SettingsError> {
        let mut findings = Vec::new();

        self.validate_phases(&mut findings);
        self.validate_contracts(&mut findings);
        self.validate_concurrency(&mut findings);
        for phase in &self.config.phases {
            Self::validate_phase_limits(phase, &mut findings);
        }

        let (errors, warnings): (Vec<_>, Vec<_>) =
            findings.into_iter().partition(Finding::is_error);

        for w in &warnings {
            warn!(code = %w.code, "{}", w.message);
        }
        if !errors.is_empty() {
            return Err(SettingsError::ValidationFailed(errors));
        }

        info!(
            phases = self.config.phases.len(),
            "Pipeline configuration validated"
        );
        Ok(warnings)
    }

    fn validate_phases(&self, findings: &mut Vec<Finding>) {
        if self.config.phases.is_empty() {
            findings.push(Finding::error(
                CODE_NO_PHASES,
                "Pipeline declares no phases.",
                FindingKind::Configuration,
            ));
        }

        let mut seen = HashSet::new();
        for phase in &self.config.phases {
            if !seen.insert(phase.name.as_str()) {
                findings.push(Finding::error(
                    CODE_DUPLICATE_PHASE,
                    &format!("Phase `{}` is declared more than once.", phase.name),
                    FindingKind::Configuration,
                ));
            }
        }
    }

    fn validate_contracts(&self, findings: &mut Vec<Finding>) {
        for phase in &self.config.phases {
            if self.config.contract(&phase.name).is_none() {
                findings.push(Finding::new_contract_missing(phase.name.as_str()));
            }
        }

        for contract in &self.config.contracts {
            if self.config.phase(&contract.phase).is_none() {
                findings.push(Finding::warning(
                    CODE_CONTRACT_UNUSED,
                    &format!(
                        "Contract for `{}` matches no declared phase.",
                        contract.phase
                    ),
                    FindingKind::Configuration,
                ));
            }
        }
    }

    fn validate_concurrency(&self, findings: &mut Vec<Finding>) {
        let c = &self.config.concurrency;
        if c.max_concurrent_units == 0 || c.max_concurrent_calls == 0 {
            findings.push(Finding::error(
                CODE_INVALID_LIMIT,
                "Concurrency limits must be at least 1.",
                FindingKind::Configuration,
            ));
        }
    }

    fn validate_phase_limits(phase: &PhaseConfig, findings: &mut Vec<Finding>) {
        if phase.content_budget().is_none() {
            findings.push(Finding::new_budget_exhausted(
                phase.name.as_str(),
                phase.max_content_tokens,
                phase.reserved_overhead(),
            ));
        }

        let mut invalid = |what: &str| {
            findings.push(Finding::error(
                CODE_INVALID_LIMIT,
                &format!("Phase `{}`: {what}", phase.name),
                FindingKind::Configuration,
            ))
        };
        if phase.max_items_per_chunk == 0 {
            invalid("`max_items_per_chunk` must be at least 1.");
        }
        if phase.max_output_tokens == 0 {
            invalid("`max_output_tokens` must be at least 1.");
        }
        if phase.retry.max_attempts == 0 {
            invalid("`retry.max_attempts` must be at least 1.");
        }
        if phase.call_timeout_secs == 0 {
            invalid("`call_timeout_secs` must be at least 1.");
        }
        if phase.shape.category_key.trim().is_empty() {
            invalid("`shape.category_key` must not be empty.");
        }
    }
}
