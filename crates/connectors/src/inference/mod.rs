use crate::error::InferenceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod anthropic;

/// One self-contained request to the inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    /// Correlates batch results back to the chunk that produced the request.
    pub custom_id: String,
    pub system: String,
    pub prompt: String,
    pub max_output_tokens: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResponse {
    pub text: String,
    pub stop_reason: Option<StopReason>,
    pub usage: Usage,
}

impl InferenceResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stop_reason: Some(StopReason::EndTurn),
            usage: Usage::default(),
        }
    }

    /// Output was cut off by the token ceiling.
    pub fn truncated(&self) -> bool {
        self.stop_reason == Some(StopReason::MaxTokens)
    }
}

/// Request/response access to the inference service.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn complete(&self, request: &InferenceRequest)
    -> Result<InferenceResponse, InferenceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    InProgress,
    Canceling,
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Succeeded(InferenceResponse),
    Errored(String),
    Canceled,
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchItemResult {
    pub custom_id: String,
    pub outcome: BatchOutcome,
}

/// Asynchronous job access: submit many requests, poll, collect.
#[async_trait]
pub trait BatchInferenceClient: Send + Sync {
    /// Returns the service-assigned job id.
    async fn submit(&self, requests: &[InferenceRequest]) -> Result<String, InferenceError>;

    async fn status(&self, job_id: &str) -> Result<JobStatus, InferenceError>;

    async fn results(&self, job_id: &str) -> Result<Vec<BatchItemResult>, InferenceError>;
}
