use crate::error::CatalogError;
use model::{
    core::identifiers::{NamingConvention, UnitId, canonicalize},
    records::unit::WorkUnit,
};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

pub mod dedup;
pub mod registry;

/// Discovers work units under a set of root directories.
///
/// A unit is any directory whose name resolves to a canonical id under one
/// of the known naming conventions. Several directories may resolve to the
/// same id; they collapse into one unit whose locator is the preferred
/// spelling and whose aliases are the rest. Scanning never writes anywhere.
pub struct Catalog {
    roots: Vec<PathBuf>,
}

struct Candidate {
    path: PathBuf,
    name: String,
    convention: NamingConvention,
}

impl Catalog {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub async fn scan(&self) -> Result<Vec<WorkUnit>, CatalogError> {
        let mut groups: BTreeMap<UnitId, Vec<Candidate>> = BTreeMap::new();

        for root in &self.roots {
            let mut entries = tokio::fs::read_dir(root)
                .await
                .map_err(|source| CatalogError::Scan {
                    path: root.clone(),
                    source,
                })?;

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|source| CatalogError::Scan {
                    path: root.clone(),
                    source,
                })?
            {
                let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                if !is_dir {
                    continue;
                }

                let name = entry.file_name().to_string_lossy().into_owned();
                match canonicalize(&name) {
                    Some((id, convention)) => groups.entry(id).or_default().push(Candidate {
                        path: entry.path(),
                        name,
                        convention,
                    }),
                    None => debug!(dir = %name, "Ignoring directory with unrecognized name"),
                }
            }
        }

        let mut units = Vec::with_capacity(groups.len());
        for (id, mut candidates) in groups {
            // Preferred spelling first, then the lexicographically smallest name.
            candidates.sort_by(|a, b| {
                let a_key = (a.convention != NamingConvention::SessionShort, &a.name);
                let b_key = (b.convention != NamingConvention::SessionShort, &b.name);
                a_key.cmp(&b_key)
            });

            let mut candidates = candidates.into_iter();
            let Some(primary) = candidates.next() else {
                continue;
            };

            let mut unit = WorkUnit::new(id, primary.path, primary.convention);
            unit.aliases = candidates.map(|c| c.path).collect();
            if !unit.aliases.is_empty() {
                warn!(
                    unit = %unit.id,
                    aliases = unit.aliases.len(),
                    "Several directories resolve to the same unit; using {}",
                    unit.locator.display()
                );
            }
            unit.size_estimate = directory_size(&unit.locator).await;
            units.push(unit);
        }

        info!(
            roots = self.roots.len(),
            units = units.len(),
            "Catalog scan complete"
        );
        Ok(units)
    }
}

/// Sum of the sizes of the files directly inside `dir`. Unreadable entries
/// count as zero; the figure only orders work.
async fn directory_size(dir: &Path) -> u64 {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };

    let mut total = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Ok(meta) = entry.metadata().await
            && meta.is_file()
        {
            total += meta.len();
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const UUID: &str = "0012ebed-4c1f-4f55-9d0e-2b0a51f0aa11";

    #[tokio::test]
    async fn collapses_every_convention_into_one_unit() {
        let dir = tempdir().unwrap();
        for name in [
            format!("session_{UUID}"),
            UUID.to_string(),
            "0012EBED".to_string(),
            "session_0012ebed".to_string(),
        ] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("session_0012ebed").join("transcript.jsonl"), "{}\n").unwrap();

        let units = Catalog::new(vec![dir.path().to_path_buf()]).scan().await.unwrap();

        assert_eq!(units.len(), 1);
        let unit = &units[0];
        assert_eq!(unit.id.as_str(), "0012ebed");
        assert_eq!(unit.convention, NamingConvention::SessionShort);
        assert!(unit.locator.ends_with("session_0012ebed"));
        assert_eq!(unit.aliases.len(), 3);
        assert_eq!(unit.size_estimate, 3);
    }

    #[tokio::test]
    async fn ignores_files_and_unrecognized_names() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("notes")).unwrap();
        std::fs::create_dir(dir.path().join("session_xyz")).unwrap();
        std::fs::write(dir.path().join("deadbeef"), "file, not a dir").unwrap();
        std::fs::create_dir(dir.path().join("cafebabe")).unwrap();

        let units = Catalog::new(vec![dir.path().to_path_buf()]).scan().await.unwrap();
        let ids: Vec<_> = units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["cafebabe"]);
    }

    #[tokio::test]
    async fn rescanning_yields_the_same_units() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("session_aaaaaaaa")).unwrap();
        std::fs::create_dir(dir.path().join("bbbbbbbb")).unwrap();
        let catalog = Catalog::new(vec![dir.path().to_path_buf()]);

        assert_eq!(catalog.scan().await.unwrap(), catalog.scan().await.unwrap());
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let err = Catalog::new(vec![PathBuf::from("/no/such/root")])
            .scan()
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::Scan { .. }));
    }
}
