use crate::{
    continuation::machine::{CallEvent, CallState, transition},
    prompt::PromptBuilder,
    response::{count_items, extract_json, into_payload},
    retry::classify_inference_error,
};
use connectors::{
    error::InferenceError,
    inference::{InferenceClient, InferenceRequest, InferenceResponse},
};
use engine_config::settings::{phase::PhaseConfig, pricing::ModelPrice};
use engine_core::{
    metrics::Metrics,
    retry::{RetryDisposition, RetryPolicy},
};
use model::{
    execution::{errors::FailureKind, phase::Fragment},
    records::chunk::Chunk,
};
use std::{collections::BTreeSet, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub mod machine;

/// A response needs a follow-up when it carries nothing, or fewer items
/// than the chunk is known to hold.
pub fn needs_continuation(expected: Option<usize>, actual: usize) -> bool {
    actual == 0 || expected.is_some_and(|e| actual < e)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkOutcome {
    pub sequence: u32,
    pub state: CallState,
    /// Every response received for the chunk, parsed or not, in order.
    pub fragments: Vec<Fragment>,
    pub expected_items: usize,
    pub actual_items: usize,
    pub calls: u32,
    pub continuations: u32,
    pub failure: Option<(FailureKind, String)>,
}

impl ChunkOutcome {
    fn new(sequence: u32, expected_items: usize) -> Self {
        Self {
            sequence,
            state: CallState::Start,
            fragments: Vec::new(),
            expected_items,
            actual_items: 0,
            calls: 0,
            continuations: 0,
            failure: None,
        }
    }

    pub fn is_abandoned(&self) -> bool {
        self.state == CallState::Abandoned
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.state, CallState::Complete | CallState::Exhausted)
    }
}

enum CallResult {
    Response(InferenceResponse),
    Failed(InferenceError),
    Abandoned,
}

/// Drives one chunk through request, retry and continuation until it
/// reaches a terminal [`CallState`].
pub struct ContinuationController<'a> {
    phase: &'a PhaseConfig,
    client: &'a dyn InferenceClient,
    metrics: &'a Metrics,
    cancel: &'a CancellationToken,
    drain_grace: Duration,
    policy: RetryPolicy,
    price: ModelPrice,
}

impl<'a> ContinuationController<'a> {
    pub fn new(
        phase: &'a PhaseConfig,
        client: &'a dyn InferenceClient,
        metrics: &'a Metrics,
        cancel: &'a CancellationToken,
        drain_grace: Duration,
    ) -> Self {
        Self {
            phase,
            client,
            metrics,
            cancel,
            drain_grace,
            policy: phase.retry.policy(),
            price: ModelPrice::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Rate applied to the usage of every direct call.
    pub fn with_price(mut self, price: ModelPrice) -> Self {
        self.price = price;
        self
    }

    pub async fn run(&self, chunk: &Chunk, total_chunks: usize, notes: Option<&str>) -> ChunkOutcome {
        let request = PromptBuilder::new(self.phase).initial(chunk, total_chunks, notes);
        self.drive(chunk, request, None).await
    }

    /// Picks up a chunk whose first response arrived out of band, such as
    /// from a batch job, and carries on with continuations as needed.
    pub async fn resume(
        &self,
        chunk: &Chunk,
        total_chunks: usize,
        first: InferenceResponse,
    ) -> ChunkOutcome {
        let request = PromptBuilder::new(self.phase).initial(chunk, total_chunks, None);
        let mut outcome = self.drive(chunk, request, Some(first)).await;
        // The out-of-band call was already counted when it was submitted.
        outcome.calls += 1;
        outcome
    }

    async fn drive(
        &self,
        chunk: &Chunk,
        mut request: InferenceRequest,
        mut pending: Option<InferenceResponse>,
    ) -> ChunkOutcome {
        let builder = PromptBuilder::new(self.phase);
        let shape = &self.phase.shape;
        let expected: BTreeSet<u64> = if self.phase.per_item {
            chunk.item_indices().into_iter().collect()
        } else {
            BTreeSet::new()
        };

        let mut outcome = ChunkOutcome::new(chunk.sequence, expected.len());
        let mut state = CallState::Start;
        let mut returned: BTreeSet<u64> = BTreeSet::new();
        let mut total_items = 0usize;
        let mut failed_attempts = 0usize;
        let mut round = 0u32;

        loop {
            if pending.is_none() && self.cancel.is_cancelled() {
                state = self.step(chunk, state, CallEvent::Cancelled);
                break;
            }

            state = self.step(chunk, state, CallEvent::Dispatch);
            // Out-of-band responses came from a batch job and bill at its rate.
            let price = if pending.is_some() {
                self.price.batch()
            } else {
                self.price
            };
            let result = match pending.take() {
                Some(response) => CallResult::Response(response),
                None => {
                    outcome.calls += 1;
                    self.metrics.increment_calls(1);
                    self.call(&request).await
                }
            };

            let event = match result {
                CallResult::Abandoned => CallEvent::Cancelled,
                CallResult::Response(response) => {
                    let usage = &response.usage;
                    self.metrics
                        .record_usage(usage.input_tokens, usage.output_tokens);
                    self.metrics
                        .record_cost(price.cost(usage.input_tokens, usage.output_tokens));
                    match extract_json(&response.text).and_then(|v| into_payload(v, shape)) {
                        Some(payload) => {
                            let count = count_items(&payload, shape, &self.phase.item_key);
                            total_items += count.total;
                            returned.extend(count.keys.into_iter().filter(|k| expected.contains(k)));
                            outcome
                                .fragments
                                .push(Fragment::parsed(chunk.sequence, round, payload, count.total));

                            let actual = if self.phase.per_item && !returned.is_empty() {
                                returned.len()
                            } else {
                                total_items
                            };
                            outcome.actual_items = actual;

                            let expected_count = self.phase.per_item.then_some(expected.len());
                            // Without per-item keys, a cut-off answer is the only sign of loss.
                            let cut_off = !self.phase.per_item && response.truncated();
                            if needs_continuation(expected_count, actual) || cut_off {
                                CallEvent::Shortfall {
                                    continuations_left: round < self.phase.max_continuations,
                                }
                            } else {
                                CallEvent::Completed
                            }
                        }
                        None => {
                            warn!(
                                chunk = %chunk.custom_id(),
                                round,
                                "Response contained no parseable output"
                            );
                            outcome.fragments.push(Fragment::failed(
                                chunk.sequence,
                                round,
                                "unparseable output",
                            ));
                            if round < self.phase.max_continuations {
                                CallEvent::Shortfall {
                                    continuations_left: true,
                                }
                            } else {
                                failed_attempts += 1;
                                outcome.failure = Some((
                                    FailureKind::MalformedOutput,
                                    "no parseable output after every continuation".to_string(),
                                ));
                                CallEvent::Errored {
                                    attempts_left: failed_attempts < self.policy.max_attempts,
                                }
                            }
                        }
                    }
                }
                CallResult::Failed(err) => match classify_inference_error(&err) {
                    RetryDisposition::Stop => {
                        error!(chunk = %chunk.custom_id(), error = %err, "Inference call rejected");
                        outcome.failure = Some((FailureKind::RejectedExternal, err.to_string()));
                        CallEvent::Rejected
                    }
                    RetryDisposition::Retry => {
                        failed_attempts += 1;
                        warn!(
                            chunk = %chunk.custom_id(),
                            attempt = failed_attempts,
                            error = %err,
                            "Inference call failed"
                        );
                        outcome.failure = Some((FailureKind::TransientExternal, err.to_string()));
                        CallEvent::Errored {
                            attempts_left: failed_attempts < self.policy.max_attempts,
                        }
                    }
                },
            };

            state = self.step(chunk, state, event);
            match state {
                CallState::Incomplete => {
                    round += 1;
                    outcome.continuations += 1;
                    self.metrics.increment_continuations(1);
                    let remaining: BTreeSet<u64> = expected.difference(&returned).copied().collect();
                    debug!(
                        chunk = %chunk.custom_id(),
                        round,
                        remaining = remaining.len(),
                        "Requesting continuation"
                    );
                    request = builder.continuation(chunk, &remaining, round);
                }
                CallState::Error => {
                    self.metrics.increment_retries(1);
                    let delay = self.policy.backoff_delay(failed_attempts.saturating_sub(1));
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => {
                            state = self.step(chunk, state, CallEvent::Cancelled);
                            break;
                        }
                    }
                }
                s if s.is_terminal() => break,
                _ => {}
            }
        }

        match state {
            CallState::Complete | CallState::Exhausted => outcome.failure = None,
            CallState::Abandoned => {
                outcome.failure = Some((FailureKind::Abandoned, "cancelled before completion".into()));
            }
            _ => {}
        }
        if !outcome.succeeded() && !outcome.fragments.iter().any(|f| f.continuation == round) {
            let reason = outcome
                .failure
                .as_ref()
                .map(|(_, r)| r.clone())
                .unwrap_or_else(|| state.to_string());
            outcome
                .fragments
                .push(Fragment::failed(chunk.sequence, round, reason));
        }
        outcome.state = state;
        outcome
    }

    async fn call(&self, request: &InferenceRequest) -> CallResult {
        let call = tokio::time::timeout(self.phase.call_timeout(), self.client.complete(request));
        tokio::pin!(call);

        let finished = tokio::select! {
            biased;
            res = &mut call => res,
            _ = self.cancel.cancelled() => {
                // In-flight work gets a grace period before it is abandoned.
                match tokio::time::timeout(self.drain_grace, &mut call).await {
                    Ok(res) => res,
                    Err(_) => return CallResult::Abandoned,
                }
            }
        };

        match finished {
            Ok(Ok(response)) => CallResult::Response(response),
            Ok(Err(err)) => CallResult::Failed(err),
            Err(_) => CallResult::Failed(InferenceError::Timeout),
        }
    }

    fn step(&self, chunk: &Chunk, state: CallState, event: CallEvent) -> CallState {
        match transition(state, event) {
            Ok(next) => next,
            Err(err) => {
                error!(chunk = %chunk.custom_id(), error = %err, "Call state machine violated");
                CallState::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use connectors::inference::Usage;
    use engine_config::settings::phase::ShapeConfig;
    use model::{
        core::identifiers::UnitId,
        records::{
            chunk::ChunkDisposition,
            message::{Message, Role},
        },
    };
    use std::{collections::VecDeque, sync::Mutex};

    type Scripted = Result<InferenceResponse, InferenceError>;

    struct ScriptedClient {
        replies: Mutex<VecDeque<Scripted>>,
        prompts: Mutex<Vec<String>>,
        delay: Duration,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Scripted>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InferenceClient for ScriptedClient {
        async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse, InferenceError> {
            self.prompts.lock().unwrap().push(request.prompt.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(InferenceResponse::text("")))
        }
    }

    fn ok(text: &str) -> Scripted {
        Ok(InferenceResponse::text(text))
    }

    fn phase(per_item: bool) -> PhaseConfig {
        let mut phase = PhaseConfig::new("threads", "Extract.", ShapeConfig::new("threads"));
        phase.per_item = per_item;
        phase
    }

    fn chunk() -> Chunk {
        chunk_of(3)
    }

    fn chunk_of(messages: u64) -> Chunk {
        Chunk {
            unit_id: UnitId::parse("0012ebed").unwrap(),
            phase: "threads".into(),
            sequence: 0,
            messages: (0..messages).map(|i| Message::new(i, Role::User, format!("m{i}"))).collect(),
            content_tokens: 60,
            reserved_overhead: 500,
            oversized: false,
            disposition: ChunkDisposition::Send,
        }
    }

    async fn run(phase: &PhaseConfig, client: &ScriptedClient, cancel: &CancellationToken) -> ChunkOutcome {
        let metrics = Metrics::new();
        ContinuationController::new(phase, client, &metrics, cancel, Duration::from_secs(1))
            .with_policy(RetryPolicy::immediate(3))
            .run(&chunk(), 1, None)
            .await
    }

    #[tokio::test]
    async fn completes_on_first_full_answer() {
        let phase = phase(true);
        let client = ScriptedClient::new(vec![ok(
            r#"{"threads": {"a": [{"index": 0}, {"index": 1}, {"index": 2}]}}"#,
        )]);

        let outcome = run(&phase, &client, &CancellationToken::new()).await;
        assert_eq!(outcome.state, CallState::Complete);
        assert_eq!(outcome.calls, 1);
        assert_eq!(outcome.fragments.len(), 1);
        assert_eq!(outcome.actual_items, 3);
    }

    #[tokio::test]
    async fn partial_answer_triggers_scoped_continuation() {
        let phase = phase(true);
        let client = ScriptedClient::new(vec![
            ok(r#"{"threads": {"a": [{"index": 0}]}}"#),
            ok(r#"{"threads": {"b": [{"index": 1}, {"index": 2}]}}"#),
        ]);

        let outcome = run(&phase, &client, &CancellationToken::new()).await;
        assert_eq!(outcome.state, CallState::Complete);
        assert_eq!(outcome.continuations, 1);
        assert_eq!(outcome.fragments.len(), 2);
        assert_eq!(outcome.fragments[1].continuation, 1);

        let prompts = client.prompts();
        assert!(prompts[1].contains("only these messages: 1, 2"));
        assert!(!prompts[1].contains("--- Message 0"));
    }

    #[tokio::test]
    async fn empty_first_answer_for_twelve_items_is_continued_to_twelve() {
        let phase = phase(true);
        let all: Vec<String> = (0..12).map(|i| format!(r#"{{"index": {i}}}"#)).collect();
        let client = ScriptedClient::new(vec![
            ok(r#"{"threads": {}}"#),
            ok(&format!(r#"{{"threads": {{"a": [{}]}}}}"#, all.join(", "))),
        ]);
        let metrics = Metrics::new();
        let cancel = CancellationToken::new();

        let outcome = ContinuationController::new(&phase, &client, &metrics, &cancel, Duration::ZERO)
            .with_policy(RetryPolicy::immediate(3))
            .run(&chunk_of(12), 1, None)
            .await;

        assert_eq!(outcome.expected_items, 12);
        assert_eq!(outcome.state, CallState::Complete);
        assert_eq!(outcome.calls, 2);
        assert_eq!(outcome.continuations, 1);
        assert_eq!(outcome.actual_items, 12);
        assert_eq!(metrics.snapshot().continuations, 1);
    }

    #[tokio::test]
    async fn zero_output_exhausts_the_continuation_budget() {
        let phase = phase(false);
        let client = ScriptedClient::new(vec![ok("{}"), ok("{}"), ok("{}")]);

        let outcome = run(&phase, &client, &CancellationToken::new()).await;
        assert_eq!(outcome.state, CallState::Exhausted);
        assert_eq!(outcome.calls, 1 + phase.max_continuations);
        assert!(outcome.failure.is_none());
    }

    #[tokio::test]
    async fn malformed_output_continues_then_recovers() {
        let phase = phase(false);
        let client = ScriptedClient::new(vec![
            ok("I'm sorry, here is some prose."),
            ok(r#"{"threads": {"a": {"entries": [1]}}}"#),
        ]);

        let outcome = run(&phase, &client, &CancellationToken::new()).await;
        assert_eq!(outcome.state, CallState::Complete);
        assert!(outcome.fragments[0].is_failed());
        assert!(!outcome.fragments[1].is_failed());
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let phase = phase(false);
        let client = ScriptedClient::new(vec![
            Err(InferenceError::RateLimited("slow down".into())),
            Err(InferenceError::Unavailable {
                status: 529,
                message: "overloaded".into(),
            }),
            ok(r#"{"threads": {"a": {"entries": [1]}}}"#),
        ]);

        let outcome = run(&phase, &client, &CancellationToken::new()).await;
        assert_eq!(outcome.state, CallState::Complete);
        assert_eq!(outcome.calls, 3);
    }

    #[tokio::test]
    async fn retries_stop_after_max_attempts() {
        let phase = phase(false);
        let client = ScriptedClient::new(vec![
            Err(InferenceError::Timeout),
            Err(InferenceError::Timeout),
            Err(InferenceError::Timeout),
            ok(r#"{"threads": {"never": []}}"#),
        ]);

        let outcome = run(&phase, &client, &CancellationToken::new()).await;
        assert_eq!(outcome.state, CallState::Failed);
        assert_eq!(outcome.calls, 3);
        assert_eq!(outcome.failure.unwrap().0, FailureKind::TransientExternal);
        assert!(outcome.fragments.iter().all(Fragment::is_failed));
    }

    #[tokio::test]
    async fn rejected_requests_fail_immediately() {
        let phase = phase(false);
        let client = ScriptedClient::new(vec![Err(InferenceError::Authentication("bad key".into()))]);

        let outcome = run(&phase, &client, &CancellationToken::new()).await;
        assert_eq!(outcome.state, CallState::Failed);
        assert_eq!(outcome.calls, 1);
        assert_eq!(outcome.failure.unwrap().0, FailureKind::RejectedExternal);
    }

    #[tokio::test]
    async fn cancelled_before_dispatch_is_abandoned() {
        let phase = phase(false);
        let client = ScriptedClient::new(vec![]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = run(&phase, &client, &cancel).await;
        assert!(outcome.is_abandoned());
        assert_eq!(outcome.calls, 0);
        assert_eq!(outcome.failure.unwrap().0, FailureKind::Abandoned);
    }

    #[tokio::test]
    async fn in_flight_call_finishes_within_drain_grace() {
        let phase = phase(false);
        let mut client = ScriptedClient::new(vec![ok(r#"{"threads": {"a": {"entries": [1]}}}"#)]);
        client.delay = Duration::from_millis(50);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = run(&phase, &client, &cancel).await;
        assert_eq!(outcome.state, CallState::Complete);
    }

    #[tokio::test]
    async fn resumed_batch_response_continues_synchronously() {
        let phase = phase(true);
        let client = ScriptedClient::new(vec![ok(r#"{"threads": {"b": [{"index": 2}]}}"#)]);
        let metrics = Metrics::new();
        let cancel = CancellationToken::new();

        let outcome = ContinuationController::new(&phase, &client, &metrics, &cancel, Duration::ZERO)
            .with_policy(RetryPolicy::immediate(3))
            .resume(
                &chunk(),
                1,
                InferenceResponse::text(r#"{"threads": {"a": [{"index": 0}, {"index": 1}]}}"#),
            )
            .await;

        assert_eq!(outcome.state, CallState::Complete);
        assert_eq!(outcome.calls, 2);
        assert_eq!(client.prompts().len(), 1);
        assert_eq!(metrics.snapshot().calls_made, 1);
    }

    #[tokio::test]
    async fn batch_usage_is_priced_at_the_batch_rate() {
        let phase = phase(true);
        let billed = |text: &str| InferenceResponse {
            text: text.to_string(),
            stop_reason: None,
            usage: Usage {
                input_tokens: 1_000_000,
                output_tokens: 0,
            },
        };
        let client = ScriptedClient::new(vec![Ok(billed(r#"{"threads": {"b": [{"index": 2}]}}"#))]);
        let metrics = Metrics::new();
        let cancel = CancellationToken::new();

        ContinuationController::new(&phase, &client, &metrics, &cancel, Duration::ZERO)
            .with_price(ModelPrice::new(3.0, 15.0))
            .resume(
                &chunk(),
                1,
                billed(r#"{"threads": {"a": [{"index": 0}, {"index": 1}]}}"#),
            )
            .await;

        // 1.50 for the batch answer plus 3.00 for the direct continuation.
        assert_eq!(metrics.snapshot().cost_micro_usd, 4_500_000);
    }

    #[test]
    fn continuation_trigger() {
        assert!(needs_continuation(None, 0));
        assert!(needs_continuation(Some(12), 0));
        assert!(!needs_continuation(None, 1));
        assert!(needs_continuation(Some(3), 2));
        assert!(!needs_continuation(Some(3), 3));
    }
}
