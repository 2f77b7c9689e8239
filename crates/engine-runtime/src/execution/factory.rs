use crate::error::PipelineError;
use engine_core::state::{StateStore, sled_store::SledStateStore};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

/// Location of the state store under the user's home directory.
pub const STATE_DIR: &str = ".hyperbatch/state";

pub fn default_state_dir() -> Result<PathBuf, PipelineError> {
    let home_dir = dirs::home_dir().ok_or_else(|| {
        PipelineError::Initialization("Could not determine home directory".to_string())
    })?;
    Ok(home_dir.join(STATE_DIR))
}

/// Opens the state store at `dir`, or at the default location.
pub fn open_state_store(dir: Option<&Path>) -> Result<Arc<dyn StateStore>, PipelineError> {
    let dir = match dir {
        Some(dir) => dir.to_path_buf(),
        None => default_state_dir()?,
    };
    info!(path = %dir.display(), "Opening state store");
    Ok(Arc::new(SledStateStore::open(&dir)?))
}
