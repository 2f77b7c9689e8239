use crate::error::ExportError;
use model::{core::identifiers::UnitId, schema::canonical::CanonicalRecord};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportOutcome {
    Written(PathBuf),
    /// Target already holds identical bytes.
    Unchanged(PathBuf),
}

pub fn record_path(root: &Path, unit_id: &UnitId, record: &CanonicalRecord) -> PathBuf {
    root.join(unit_id.dir_name())
        .join(format!("{}.json", record.phase))
}

/// Writes a record for downstream consumers. The file is written to a
/// sibling temp path and renamed into place, so readers never observe a
/// partial document.
pub async fn export_record(
    root: &Path,
    unit_id: &UnitId,
    record: &CanonicalRecord,
) -> Result<ExportOutcome, ExportError> {
    let path = record_path(root, unit_id, record);
    let mut bytes = serde_json::to_vec_pretty(record)?;
    bytes.push(b'\n');

    if let Ok(existing) = fs::read(&path).await
        && Sha256::digest(&existing) == Sha256::digest(&bytes)
    {
        return Ok(ExportOutcome::Unchanged(path));
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &bytes).await?;
    fs::rename(&tmp, &path).await?;

    Ok(ExportOutcome::Written(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use model::{
        core::identifiers::PhaseId,
        schema::canonical::{Provenance, SCHEMA_VERSION, ShapeVariant},
    };
    use serde_json::Map;
    use tempfile::tempdir;

    fn record() -> CanonicalRecord {
        CanonicalRecord {
            schema_version: SCHEMA_VERSION,
            phase: PhaseId::from("thread_extractions"),
            payload: Map::new(),
            provenance: Provenance {
                detected_variant: ShapeVariant::FlatList,
                normalized_at: Utc::now(),
                log: vec!["grouped 0 items".into()],
            },
        }
    }

    #[tokio::test]
    async fn second_export_of_same_record_is_a_no_op() {
        let dir = tempdir().unwrap();
        let unit = UnitId::parse("0012ebed").unwrap();
        let rec = record();

        let first = export_record(dir.path(), &unit, &rec).await.unwrap();
        let second = export_record(dir.path(), &unit, &rec).await.unwrap();

        let expected = dir
            .path()
            .join("session_0012ebed")
            .join("thread_extractions.json");
        assert_eq!(first, ExportOutcome::Written(expected.clone()));
        assert_eq!(second, ExportOutcome::Unchanged(expected.clone()));
        assert!(!expected.with_extension("json.tmp").exists());

        let back: CanonicalRecord =
            serde_json::from_slice(&std::fs::read(&expected).unwrap()).unwrap();
        assert_eq!(back, rec);
    }
}
