use crate::{
    error::InferenceError,
    inference::{
        BatchInferenceClient, BatchItemResult, BatchOutcome, InferenceClient, InferenceRequest,
        InferenceResponse, JobStatus, StopReason, Usage,
    },
};
use async_trait::async_trait;
use reqwest::{
    Client, Response, StatusCode,
    header::{CONTENT_TYPE, HeaderMap, HeaderValue},
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Transport-level ceiling; per-call budgets are enforced by the caller.
    pub request_timeout: Duration,
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(600),
        }
    }
}

/// Messages and Message Batches API client.
pub struct AnthropicClient {
    config: AnthropicConfig,
    http: Client,
}

impl AnthropicClient {
    pub fn new(config: AnthropicConfig) -> Result<Self, InferenceError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| InferenceError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    fn headers(&self) -> Result<HeaderMap, InferenceError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(self.config.api_key.trim())
                .map_err(|_| InferenceError::Authentication("invalid API key header".into()))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(API_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    fn params<'a>(&'a self, request: &'a InferenceRequest) -> MessageParams<'a> {
        MessageParams {
            model: &self.config.model,
            max_tokens: request.max_output_tokens,
            system: &request.system,
            messages: vec![UserMessage {
                role: "user",
                content: &request.prompt,
            }],
        }
    }

    async fn get_batch(&self, job_id: &str) -> Result<BatchResource, InferenceError> {
        let resp = self
            .http
            .get(self.url(&format!("/v1/messages/batches/{job_id}")))
            .headers(self.headers()?)
            .send()
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(InferenceError::JobNotFound(job_id.to_string()));
        }
        let resp = check_status(resp).await?;
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl InferenceClient for AnthropicClient {
    async fn complete(
        &self,
        request: &InferenceRequest,
    ) -> Result<InferenceResponse, InferenceError> {
        debug!(custom_id = %request.custom_id, "Calling messages API");
        let resp = self
            .http
            .post(self.url("/v1/messages"))
            .headers(self.headers()?)
            .json(&self.params(request))
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let body: MessageResponse = resp.json().await?;
        Ok(body.into_response())
    }
}

#[async_trait]
impl BatchInferenceClient for AnthropicClient {
    async fn submit(&self, requests: &[InferenceRequest]) -> Result<String, InferenceError> {
        let body = BatchCreate {
            requests: requests
                .iter()
                .map(|r| BatchRequestEntry {
                    custom_id: &r.custom_id,
                    params: self.params(r),
                })
                .collect(),
        };
        let resp = self
            .http
            .post(self.url("/v1/messages/batches"))
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        let batch: BatchResource = resp.json().await?;
        debug!(job_id = %batch.id, requests = requests.len(), "Submitted message batch");
        Ok(batch.id)
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, InferenceError> {
        let batch = self.get_batch(job_id).await?;
        Ok(match batch.processing_status.as_str() {
            "ended" => JobStatus::Ended,
            "canceling" => JobStatus::Canceling,
            _ => JobStatus::InProgress,
        })
    }

    async fn results(&self, job_id: &str) -> Result<Vec<BatchItemResult>, InferenceError> {
        let batch = self.get_batch(job_id).await?;
        let results_url = batch
            .results_url
            .ok_or_else(|| InferenceError::ResultsUnavailable(job_id.to_string()))?;

        let resp = self
            .http
            .get(results_url)
            .headers(self.headers()?)
            .send()
            .await?;
        let text = check_status(resp).await?.text().await?;

        let mut results = Vec::new();
        for (line_no, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<BatchResultLine>(line) {
                Ok(entry) => results.push(entry.into_result()),
                Err(err) => {
                    warn!(job_id, line = line_no + 1, error = %err, "Skipping unreadable batch result line");
                }
            }
        }
        Ok(results)
    }
}

async fn check_status(resp: Response) -> Result<Response, InferenceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let message = resp
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    Err(error_for_status(status, message))
}

fn error_for_status(status: StatusCode, message: String) -> InferenceError {
    match status.as_u16() {
        429 => InferenceError::RateLimited(message),
        401 | 403 => InferenceError::Authentication(message),
        408 => InferenceError::Timeout,
        // 529 is the service's "overloaded" status.
        code if code >= 500 => InferenceError::Unavailable {
            status: code,
            message,
        },
        _ => InferenceError::InvalidRequest(format!("{status}: {message}")),
    }
}

#[derive(Serialize)]
struct MessageParams<'a> {
    model: &'a str,
    max_tokens: usize,
    system: &'a str,
    messages: Vec<UserMessage<'a>>,
}

#[derive(Serialize)]
struct UserMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct BatchCreate<'a> {
    requests: Vec<BatchRequestEntry<'a>>,
}

#[derive(Serialize)]
struct BatchRequestEntry<'a> {
    custom_id: &'a str,
    params: MessageParams<'a>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<StopReason>,
    #[serde(default)]
    usage: Usage,
}

impl MessageResponse {
    fn into_response(self) -> InferenceResponse {
        let text = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text),
                ResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        InferenceResponse {
            text,
            stop_reason: self.stop_reason,
            usage: self.usage,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct BatchResource {
    id: String,
    processing_status: String,
    #[serde(default)]
    results_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchResultLine {
    custom_id: String,
    result: BatchResultBody,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BatchResultBody {
    Succeeded { message: MessageResponse },
    Errored { error: serde_json::Value },
    Canceled,
    Expired,
}

impl BatchResultLine {
    fn into_result(self) -> BatchItemResult {
        let outcome = match self.result {
            BatchResultBody::Succeeded { message } => BatchOutcome::Succeeded(message.into_response()),
            BatchResultBody::Errored { error } => BatchOutcome::Errored(error.to_string()),
            BatchResultBody::Canceled => BatchOutcome::Canceled,
            BatchResultBody::Expired => BatchOutcome::Expired,
        };
        BatchItemResult {
            custom_id: self.custom_id,
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_status_codes_to_error_kinds() {
        assert!(matches!(
            error_for_status(StatusCode::TOO_MANY_REQUESTS, String::new()),
            InferenceError::RateLimited(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::from_u16(529).unwrap(), String::new()),
            InferenceError::Unavailable { status: 529, .. }
        ));
        assert!(matches!(
            error_for_status(StatusCode::UNAUTHORIZED, String::new()),
            InferenceError::Authentication(_)
        ));
        assert!(matches!(
            error_for_status(StatusCode::BAD_REQUEST, String::new()),
            InferenceError::InvalidRequest(_)
        ));
    }

    #[test]
    fn decodes_message_response_text_blocks() {
        let raw = r#"{
            "content": [
                {"type": "thinking", "thinking": "..."},
                {"type": "text", "text": "[{\"index\": 1}]"}
            ],
            "stop_reason": "max_tokens",
            "usage": {"input_tokens": 120, "output_tokens": 16000}
        }"#;
        let resp: MessageResponse = serde_json::from_str(raw).unwrap();
        let resp = resp.into_response();
        assert_eq!(resp.text, "[{\"index\": 1}]");
        assert!(resp.truncated());
        assert_eq!(resp.usage.output_tokens, 16000);
    }

    #[test]
    fn decodes_batch_result_lines() {
        let ok = r#"{"custom_id":"0012ebed-threads-0","result":{"type":"succeeded","message":{"content":[{"type":"text","text":"{}"}],"stop_reason":"end_turn","usage":{"input_tokens":1,"output_tokens":1}}}}"#;
        let expired = r#"{"custom_id":"0012ebed-threads-1","result":{"type":"expired"}}"#;

        let ok: BatchResultLine = serde_json::from_str(ok).unwrap();
        let expired: BatchResultLine = serde_json::from_str(expired).unwrap();

        assert!(matches!(
            ok.into_result().outcome,
            BatchOutcome::Succeeded(InferenceResponse { ref text, .. }) if text == "{}"
        ));
        assert_eq!(expired.into_result().outcome, BatchOutcome::Expired);
    }
}
