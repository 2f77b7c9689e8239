use crate::settings::{error::SettingsError, phase::PhaseConfig, pricing::PricingTable};
use model::{core::identifiers::PhaseId, schema::contract::StageContract};
use serde::{Deserialize, Serialize};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::info;

pub mod error;
pub mod phase;
pub mod pricing;
pub mod validator;

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencySettings {
    #[serde(default = "default_max_concurrent_units")]
    pub max_concurrent_units: usize,
    /// In-flight calls per unit in sync mode.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    /// How long an in-flight call may finish after cancellation.
    #[serde(default = "default_drain_grace_secs")]
    pub drain_grace_secs: u64,
}

fn default_max_concurrent_units() -> usize {
    4
}
fn default_max_concurrent_calls() -> usize {
    2
}
fn default_drain_grace_secs() -> u64 {
    30
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            max_concurrent_units: default_max_concurrent_units(),
            max_concurrent_calls: default_max_concurrent_calls(),
            drain_grace_secs: default_drain_grace_secs(),
        }
    }
}

impl ConcurrencySettings {
    pub fn drain_grace(&self) -> Duration {
        Duration::from_secs(self.drain_grace_secs)
    }
}

/// Everything a batch run needs, constructed once and passed explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Phases in execution order.
    pub phases: Vec<PhaseConfig>,
    #[serde(default)]
    pub contracts: Vec<StageContract>,
    #[serde(default)]
    pub concurrency: ConcurrencySettings,
    /// Directories scanned for work units.
    #[serde(default)]
    pub sources: Vec<PathBuf>,
    /// Manifest of units already processed elsewhere.
    #[serde(default)]
    pub registry: Option<PathBuf>,
    /// Where canonical records are written for downstream consumers.
    #[serde(default)]
    pub export_dir: Option<PathBuf>,
    /// Price overrides keyed by model name.
    #[serde(default, skip_serializing_if = "PricingTable::is_empty")]
    pub pricing: PricingTable,
}

impl PipelineConfig {
    pub fn new(phases: Vec<PhaseConfig>, contracts: Vec<StageContract>) -> Self {
        Self {
            model: default_model(),
            phases,
            contracts,
            concurrency: ConcurrencySettings::default(),
            sources: Vec::new(),
            registry: None,
            export_dir: None,
            pricing: PricingTable::default(),
        }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let source = tokio::fs::read_to_string(path).await?;
        let config: PipelineConfig = serde_json::from_str(&source)?;
        info!(
            path = %path.display(),
            phases = config.phases.len(),
            "Loaded pipeline configuration"
        );
        Ok(config)
    }

    pub fn phase(&self, name: &PhaseId) -> Option<&PhaseConfig> {
        self.phases.iter().find(|p| &p.name == name)
    }

    pub fn contract(&self, phase: &PhaseId) -> Option<&StageContract> {
        self.contracts.iter().find(|c| &c.phase == phase)
    }

    pub fn phase_ids(&self) -> Vec<PhaseId> {
        self.phases.iter().map(|p| p.name.clone()).collect()
    }

    /// Stable digest of the configuration; seeds the run id.
    pub fn hash(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        format!("{:x}", md5::compute(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const CONFIG: &str = r#"{
        "phases": [
            {
                "name": "thread_extractions",
                "instructions": "Extract threads.",
                "shape": {"category_key": "threads", "aliases": ["extractions"]}
            },
            {
                "name": "explorer_notes",
                "instructions": "Write notes.",
                "mode": "batch",
                "shape": {"category_key": "observations"}
            }
        ],
        "contracts": [
            {"phase": "thread_extractions", "required": [{"key": "threads", "kind": "mapping"}]},
            {"phase": "explorer_notes", "required": [{"key": "observations", "kind": "mapping", "blocking": false}]}
        ],
        "concurrency": {"max_concurrent_units": 8}
    }"#;

    #[tokio::test]
    async fn loads_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        tokio::fs::write(&path, CONFIG).await.unwrap();

        let config = PipelineConfig::load(&path).await.unwrap();
        assert_eq!(config.phases.len(), 2);
        assert_eq!(config.concurrency.max_concurrent_units, 8);
        assert_eq!(config.concurrency.max_concurrent_calls, 2);
        assert!(config.contract(&PhaseId::from("explorer_notes")).is_some());
        assert!(!config.contracts[1].required[0].blocking);
    }

    #[test]
    fn hash_is_stable_and_sensitive() {
        let config: PipelineConfig = serde_json::from_str(CONFIG).unwrap();
        let mut changed = config.clone();
        changed.phases[0].instructions.push('!');

        assert_eq!(config.hash(), config.clone().hash());
        assert_ne!(config.hash(), changed.hash());
        assert_eq!(config.hash().len(), 32);
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let err = PipelineConfig::load("/definitely/not/here.json")
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsError::Read(_)));
    }
}
