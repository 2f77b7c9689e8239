use serde::Serialize;

#[derive(Serialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum FindingKind {
    Configuration, // phase/contract declarations
    Contract,      // canonical record vs stage contract
    Catalog,       // naming, registry, dedup
    Chunking,      // oversized or skipped items
    Output,        // partial or malformed phase output
    Other,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Finding {
    pub code: String,    // stable programmatic id
    pub message: String, // human-readable
    pub severity: Severity,
    pub kind: FindingKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>, // how to fix
}

/// Constants for finding codes.
pub const CODE_NO_PHASES: &str = "NO_PHASES";
pub const CODE_DUPLICATE_PHASE: &str = "DUPLICATE_PHASE";
pub const CODE_CONTRACT_MISSING: &str = "CONTRACT_MISSING";
pub const CODE_CONTRACT_UNUSED: &str = "CONTRACT_UNUSED";
pub const CODE_BUDGET_EXHAUSTED: &str = "BUDGET_EXHAUSTED";
pub const CODE_INVALID_LIMIT: &str = "INVALID_LIMIT";
pub const CODE_MISSING_KEY: &str = "MISSING_KEY";
pub const CODE_WRONG_TYPE: &str = "WRONG_TYPE";
pub const CODE_UNRECOGNIZED_REGISTRY_ENTRY: &str = "UNRECOGNIZED_REGISTRY_ENTRY";
pub const CODE_DISPUTED_DUPLICATE: &str = "DISPUTED_DUPLICATE";
pub const CODE_OVERSIZED_SKIPPED: &str = "OVERSIZED_SKIPPED";
pub const CODE_PARTIAL_PHASE: &str = "PARTIAL_PHASE";

impl Finding {
    pub fn new(
        code: &str,
        message: String,
        severity: Severity,
        kind: FindingKind,
        suggestion: Option<String>,
    ) -> Self {
        Finding {
            code: code.to_string(),
            message,
            severity,
            kind,
            suggestion,
        }
    }

    /// A declared phase has no stage contract.
    pub fn new_contract_missing(phase: &str) -> Self {
        Self::new(
            CODE_CONTRACT_MISSING,
            format!("Phase `{phase}` is declared but has no stage contract."),
            Severity::Error,
            FindingKind::Configuration,
            Some("Add a contract entry naming the phase's required keys.".into()),
        )
    }

    /// Instructions and template overhead leave no room for content.
    pub fn new_budget_exhausted(phase: &str, budget: usize, overhead: usize) -> Self {
        Self::new(
            CODE_BUDGET_EXHAUSTED,
            format!(
                "Phase `{phase}` reserves {overhead} tokens of overhead against a budget of {budget}; no room for content."
            ),
            Severity::Error,
            FindingKind::Configuration,
            Some("Raise `max_content_tokens` or shorten the phase instructions.".into()),
        )
    }

    /// Registry line that matches no naming convention.
    pub fn new_unrecognized_registry_entry(entry: &str) -> Self {
        Self::new(
            CODE_UNRECOGNIZED_REGISTRY_ENTRY,
            format!("Registry entry `{entry}` matches no known unit naming convention; ignored."),
            Severity::Warning,
            FindingKind::Catalog,
            None,
        )
    }

    /// Store and registry disagree on whether a unit was processed.
    pub fn new_disputed_duplicate(unit: &str) -> Self {
        Self::new(
            CODE_DISPUTED_DUPLICATE,
            format!(
                "Unit `{unit}` is listed as processed elsewhere but has local progress; reprocessed."
            ),
            Severity::Warning,
            FindingKind::Catalog,
            Some("Confirm which copy is authoritative and update the registry.".into()),
        )
    }

    pub fn new_oversized_skipped(unit: &str, phase: &str, index: u64) -> Self {
        Self::new(
            CODE_OVERSIZED_SKIPPED,
            format!("Message {index} of unit `{unit}` exceeds the `{phase}` budget and was skipped."),
            Severity::Warning,
            FindingKind::Chunking,
            Some("Use the `summarize` oversized policy to clip instead of skipping.".into()),
        )
    }

    pub fn new_partial_phase(unit: &str, phase: &str, failed_chunks: &[u32]) -> Self {
        Self::new(
            CODE_PARTIAL_PHASE,
            format!(
                "Phase `{phase}` of unit `{unit}` merged without chunks {failed_chunks:?}, which failed."
            ),
            Severity::Warning,
            FindingKind::Output,
            None,
        )
    }

    /// Creates a standardized error finding.
    pub fn error(code: &str, message: &str, kind: FindingKind) -> Self {
        Finding::new(code, message.to_string(), Severity::Error, kind, None)
    }

    /// Creates a standardized warning finding.
    pub fn warning(code: &str, message: &str, kind: FindingKind) -> Self {
        Finding::new(code, message.to_string(), Severity::Warning, kind, None)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}
