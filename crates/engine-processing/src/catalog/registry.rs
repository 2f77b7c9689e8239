use crate::error::CatalogError;
use engine_config::report::finding::Finding;
use model::core::identifiers::{UnitId, canonicalize};
use serde::Deserialize;
use std::{collections::HashSet, path::Path};
use tracing::{info, warn};

pub const REGISTRY_FILE: &str = "duplicate_manifest.json";

#[derive(Deserialize)]
#[serde(untagged)]
enum Manifest {
    Plain(Vec<String>),
    Keyed {
        #[serde(default)]
        skip_short_ids: Vec<String>,
    },
}

/// Units already processed somewhere else. Entries may be written in any
/// naming convention; they are canonicalized on load.
#[derive(Debug, Default, Clone)]
pub struct ProcessedRegistry {
    ids: HashSet<UnitId>,
    unrecognized: Vec<String>,
}

impl ProcessedRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::default();
        for entry in entries {
            let entry = entry.as_ref();
            match canonicalize(entry) {
                Some((id, _)) => {
                    registry.ids.insert(id);
                }
                None => {
                    warn!(entry, "Ignoring unrecognized registry entry");
                    registry.unrecognized.push(entry.to_string());
                }
            }
        }
        registry
    }

    pub async fn load(path: &Path) -> Result<Self, CatalogError> {
        let registry_err = |message: String| CatalogError::Registry {
            path: path.to_path_buf(),
            message,
        };

        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| registry_err(e.to_string()))?;
        let manifest: Manifest =
            serde_json::from_str(&raw).map_err(|e| registry_err(e.to_string()))?;

        let entries = match manifest {
            Manifest::Keyed { skip_short_ids } => skip_short_ids,
            Manifest::Plain(entries) => entries,
        };
        let registry = Self::from_entries(entries);
        info!(
            path = %path.display(),
            units = registry.len(),
            unrecognized = registry.unrecognized.len(),
            "Loaded processed-unit registry"
        );
        Ok(registry)
    }

    pub fn contains(&self, id: &UnitId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// One warning per entry that matched no naming convention.
    pub fn findings(&self) -> Vec<Finding> {
        self.unrecognized
            .iter()
            .map(|e| Finding::new_unrecognized_registry_entry(e))
            .collect()
    }
}
