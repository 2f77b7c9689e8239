#![allow(dead_code)]

use async_trait::async_trait;
use connectors::{
    error::InferenceError,
    inference::{
        BatchInferenceClient, BatchItemResult, BatchOutcome, InferenceClient, InferenceRequest,
        InferenceResponse, JobStatus,
    },
};
use engine_config::settings::{
    PipelineConfig,
    phase::{PhaseConfig, ShapeConfig},
};
use engine_core::state::{StateStore, sled_store::SledStateStore};
use engine_processing::catalog::Catalog;
use engine_runtime::{Driver, InferenceClients};
use model::{
    core::identifiers::{PhaseId, UnitId},
    records::unit::WorkUnit,
    schema::contract::{JsonKind, RequiredKey, StageContract},
};
use serde_json::json;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use tokio_util::sync::CancellationToken;

pub const THREADS: &str = "thread_extractions";
pub const NOTES: &str = "explorer_notes";

type Responder = dyn Fn(&InferenceRequest) -> Result<InferenceResponse, InferenceError> + Send + Sync;

/// In-memory inference service. Every request is answered by the responder
/// and its custom id is remembered, so tests can count calls per unit.
pub struct ScriptedClient {
    responder: Box<Responder>,
    calls: Mutex<Vec<String>>,
    cancel_after: Option<(usize, CancellationToken)>,
}

impl ScriptedClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&InferenceRequest) -> Result<InferenceResponse, InferenceError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
            cancel_after: None,
        }
    }

    /// Well-formed output for both test phases.
    pub fn healthy() -> Self {
        Self::new(|request| Ok(default_reply(request)))
    }

    /// Fires `token` once `calls` requests have been answered.
    pub fn cancelling_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, unit: &UnitId, phase: &str) -> usize {
        let prefix = format!("{unit}-{phase}-");
        self.calls()
            .iter()
            .filter(|id| id.starts_with(&prefix))
            .count()
    }
}

#[async_trait]
impl InferenceClient for ScriptedClient {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
        let count = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.custom_id.clone());
            calls.len()
        };
        let reply = (self.responder)(request);
        if let Some((after, token)) = &self.cancel_after
            && count >= *after
        {
            token.cancel();
        }
        reply
    }
}

/// Batch service that ends every job immediately, answering with the same
/// responder a [`ScriptedClient`] would use.
pub struct ScriptedBatchClient {
    responder: Box<Responder>,
    jobs: Mutex<HashMap<String, Vec<InferenceRequest>>>,
}

impl ScriptedBatchClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&InferenceRequest) -> Result<InferenceResponse, InferenceError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn submitted_jobs(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }
}

#[async_trait]
impl BatchInferenceClient for ScriptedBatchClient {
    async fn submit(&self, requests: &[InferenceRequest]) -> Result<String, InferenceError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job_id = format!("msgbatch_{}", jobs.len() + 1);
        jobs.insert(job_id.clone(), requests.to_vec());
        Ok(job_id)
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, InferenceError> {
        if self.jobs.lock().unwrap().contains_key(job_id) {
            Ok(JobStatus::Ended)
        } else {
            Err(InferenceError::JobNotFound(job_id.to_string()))
        }
    }

    async fn results(&self, job_id: &str) -> Result<Vec<BatchItemResult>, InferenceError> {
        let jobs = self.jobs.lock().unwrap();
        let requests = jobs
            .get(job_id)
            .ok_or_else(|| InferenceError::JobNotFound(job_id.to_string()))?;
        Ok(requests
            .iter()
            .map(|request| BatchItemResult {
                custom_id: request.custom_id.clone(),
                outcome: match (self.responder)(request) {
                    Ok(response) => BatchOutcome::Succeeded(response),
                    Err(err) => BatchOutcome::Errored(err.to_string()),
                },
            })
            .collect())
    }
}

/// Canonical output for whichever test phase the request belongs to.
pub fn default_reply(request: &InferenceRequest) -> InferenceResponse {
    let body = if request.custom_id.contains(NOTES) {
        json!({
            "generator": "scripted",
            "observations": {
                "patterns": {"description": "Recurring patterns", "entries": ["retries cluster"]}
            }
        })
    } else {
        json!({
            "generator": "scripted",
            "threads": {
                "ideas": {"description": "Ideas", "entries": [{"index": 0, "content": "build a cli"}]}
            }
        })
    };
    InferenceResponse::text(body.to_string())
}

/// Same output, but with the category list flattened the way older prompts
/// answered.
pub fn flat_list_reply(request: &InferenceRequest) -> InferenceResponse {
    if request.custom_id.contains(NOTES) {
        return default_reply(request);
    }
    let body = json!({
        "extractions": [
            {"thread": "ideas", "content": "build a cli", "index": 0},
            {"thread": "software", "content": "created main.rs", "index": 1}
        ]
    });
    InferenceResponse::text(format!("```json\n{body}\n```"))
}

/// Two phases in fixed order, both blocking on their category key. Retries
/// do not wait.
pub fn two_phase_config() -> PipelineConfig {
    let mut threads = PhaseConfig::new(
        THREADS,
        "Extract conversation threads.",
        ShapeConfig::new("threads").with_aliases(&["extractions"]),
    );
    threads.retry.base_delay_ms = 0;
    threads.retry.max_delay_ms = 0;

    let mut notes = PhaseConfig::new(
        NOTES,
        "Write explorer notes.",
        ShapeConfig::new("observations"),
    );
    notes.retry.base_delay_ms = 0;
    notes.retry.max_delay_ms = 0;

    let mut config = PipelineConfig::new(
        vec![threads, notes],
        vec![
            StageContract::new(
                THREADS,
                vec![
                    RequiredKey::blocking("threads", JsonKind::Mapping),
                    RequiredKey::advisory("generator", JsonKind::String),
                ],
            ),
            StageContract::new(
                NOTES,
                vec![RequiredKey::blocking("observations", JsonKind::Mapping)],
            ),
        ],
    );
    config.concurrency.drain_grace_secs = 1;
    config
}

/// Eight-hex unit id for test unit `n`.
pub fn unit_hex(n: usize) -> String {
    format!("{n:08x}")
}

/// Writes a unit directory holding a JSONL transcript.
pub fn write_unit(root: &Path, dir_name: &str, messages: &[(&str, &str)]) -> PathBuf {
    let dir = root.join(dir_name);
    fs::create_dir_all(&dir).unwrap();
    let lines: String = messages
        .iter()
        .map(|(role, content)| format!("{}\n", json!({"role": role, "content": content})))
        .collect();
    fs::write(dir.join("transcript.jsonl"), lines).unwrap();
    dir
}

pub fn conversation() -> Vec<(&'static str, &'static str)> {
    vec![
        ("user", "Let's build a small CLI for the batch tool."),
        ("assistant", "Sure. I created main.rs with a clap parser."),
        ("user", "Add a status command next."),
    ]
}

/// `count` units named `session_<hex>` with a short conversation each.
pub fn write_units(root: &Path, count: usize) -> Vec<UnitId> {
    (1..=count)
        .map(|n| {
            let hex = unit_hex(n);
            write_unit(root, &format!("session_{hex}"), &conversation());
            UnitId::parse(&hex).unwrap()
        })
        .collect()
}

pub async fn scan(root: &Path) -> Vec<WorkUnit> {
    Catalog::new(vec![root.to_path_buf()]).scan().await.unwrap()
}

pub fn open_store(dir: &Path) -> Arc<dyn StateStore> {
    Arc::new(SledStateStore::open(dir).unwrap())
}

pub fn driver(
    config: PipelineConfig,
    store: Arc<dyn StateStore>,
    client: Arc<ScriptedClient>,
) -> Driver {
    Driver::new(config, store, InferenceClients::sync_only(client))
}

pub fn phase(name: &str) -> PhaseId {
    PhaseId::from(name)
}
