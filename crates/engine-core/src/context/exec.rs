use crate::{
    metrics::Metrics,
    state::{StateStore, lock::UnitLocks},
};
use model::core::identifiers::RunId;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared handles for one batch run, passed explicitly to every unit task.
#[derive(Clone)]
pub struct ExecutionContext {
    pub run_id: RunId,
    pub config_hash: String,
    pub state: Arc<dyn StateStore>,
    pub locks: Arc<UnitLocks>,
    pub metrics: Metrics,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(config_hash: &str, state: Arc<dyn StateStore>, cancel: CancellationToken) -> Self {
        // Deterministic over the configuration so a restarted run keeps
        // appending to the same journal.
        let prefix_len = config_hash.len().min(16);
        let run_id = RunId::new(format!("run-{}", &config_hash[..prefix_len]));

        ExecutionContext {
            run_id,
            config_hash: config_hash.to_string(),
            state,
            locks: Arc::new(UnitLocks::new()),
            metrics: Metrics::new(),
            cancel,
        }
    }

    pub fn run_id(&self) -> String {
        self.run_id.as_str().to_string()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
