// src/dispatcher.rs

use std::time::Duration;

use async_trait::async_trait;
use futures::future;
use reqwest::Client;
use serde_json::Value;

use crate::config::{CompletionConfig, RetryConfig};
use crate::errors::{Result, RewardError};

/// Which provider surface a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMode {
    Chat,
    Completion,
}

/// An opaque completion request: a mapping of API parameter names to
/// values, passed through to the provider untyped.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub params: Value,
    pub mode: ApiMode,
}

/// Terminal failure of one dispatched request, after retries. Carries the
/// attempt count and the underlying error text so callers can distinguish
/// an exhausted retry budget from a first-attempt permanent error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchFailure {
    pub attempts: u32,
    pub error: String,
}

/// Outcome of one dispatched request. Failures are captured values, never
/// propagated errors, so the result vector always lines up with the input.
#[derive(Debug, Clone)]
pub enum ApiResponse {
    Success(Value),
    Failure(DispatchFailure),
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, ApiResponse::Success(_))
    }
}

/// Seam between the dispatcher and the upstream completion provider.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &ApiRequest) -> Result<Value>;
}

/// Production provider: posts the request parameters to an OpenAI-style
/// HTTP API with bearer authentication.
pub struct HttpCompletionProvider {
    client: Client,
    config: CompletionConfig,
}

impl HttpCompletionProvider {
    pub fn new(client: Client, config: CompletionConfig) -> Self {
        Self { client, config }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.config.retry
    }
}

#[async_trait]
impl CompletionProvider for HttpCompletionProvider {
    async fn complete(&self, request: &ApiRequest) -> Result<Value> {
        let base = self.config.api_base.trim_end_matches('/');
        let url = match request.mode {
            ApiMode::Chat => format!("{base}/chat/completions"),
            ApiMode::Completion => format!("{base}/completions"),
        };

        log::debug!("calling completion provider at {url}");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request.params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "Could not read error body".to_string());
            return Err(RewardError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp.json::<Value>().await?)
    }
}

/// Dispatches batches of completion requests under a single-task
/// cooperative scheduler with exponential-backoff retry.
///
/// All request futures are multiplexed in the calling task via `join_all`;
/// they suspend only at network I/O and timer waits, so no locks or
/// spawned workers are involved.
pub struct Dispatcher<P> {
    provider: P,
    retry: RetryConfig,
}

impl<P: CompletionProvider> Dispatcher<P> {
    pub fn new(provider: P, retry: RetryConfig) -> Self {
        Self { provider, retry }
    }

    /// Issue one request, retrying transient errors with exponential
    /// backoff up to the configured attempt budget. Always resolves to a
    /// value.
    async fn call_with_backoff(&self, index: usize, request: &ApiRequest) -> ApiResponse {
        let mut attempt: u32 = 1;
        loop {
            match self.provider.complete(request).await {
                Ok(value) => return ApiResponse::Success(value),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let wait = self.retry.backoff(attempt);
                    log::warn!(
                        "request {index}: transient provider error on attempt {attempt}/{}: {e}; retrying in {wait:?}",
                        self.retry.max_attempts
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => {
                    log::warn!(
                        "request {index}: giving up after {attempt} attempt(s): {e}"
                    );
                    return ApiResponse::Failure(DispatchFailure {
                        attempts: attempt,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    /// Dispatch all requests concurrently, preserving input order in the
    /// returned vector.
    ///
    /// When `pacing` is set, task *i* suspends for `i * pacing` before
    /// issuing its call, staggering request issuance to avoid provider-side
    /// burst penalties without stalling sibling tasks.
    pub async fn dispatch(
        &self,
        requests: Vec<ApiRequest>,
        pacing: Option<Duration>,
    ) -> Vec<ApiResponse> {
        let futures: Vec<_> = requests
            .iter()
            .enumerate()
            .map(|(index, request)| async move {
                if let Some(delay) = pacing {
                    tokio::time::sleep(delay * index as u32).await;
                }
                self.call_with_backoff(index, request).await
            })
            .collect();

        future::join_all(futures).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    /// Fails with a transient error for the first `failures` calls, then
    /// echoes the request parameters back.
    struct FlakyProvider {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyProvider {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl CompletionProvider for FlakyProvider {
        async fn complete(&self, request: &ApiRequest) -> Result<Value> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(RewardError::ApiError {
                    status: 429,
                    body: "rate limited".to_string(),
                })
            } else {
                Ok(request.params.clone())
            }
        }
    }

    /// Sleeps for the per-request latency in `params.latency_ms`, then
    /// returns `params.id`.
    struct LatencyProvider;

    #[async_trait]
    impl CompletionProvider for LatencyProvider {
        async fn complete(&self, request: &ApiRequest) -> Result<Value> {
            let latency = request.params["latency_ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(latency)).await;
            Ok(request.params["id"].clone())
        }
    }

    struct PermanentlyBroken;

    #[async_trait]
    impl CompletionProvider for PermanentlyBroken {
        async fn complete(&self, _request: &ApiRequest) -> Result<Value> {
            Err(RewardError::ApiError {
                status: 400,
                body: "invalid request".to_string(),
            })
        }
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 5,
            min_wait: Duration::from_millis(10),
            max_wait: Duration::from_millis(40),
        }
    }

    fn chat_request(params: Value) -> ApiRequest {
        ApiRequest {
            params,
            mode: ApiMode::Chat,
        }
    }

    #[tokio::test]
    async fn retries_transient_errors_then_succeeds() {
        let provider = FlakyProvider::new(2);
        let dispatcher = Dispatcher::new(provider, fast_retry());

        let start = Instant::now();
        let responses = dispatcher
            .dispatch(vec![chat_request(json!({"model": "m"}))], None)
            .await;
        let elapsed = start.elapsed();

        assert_eq!(responses.len(), 1);
        assert!(responses[0].is_success());
        assert_eq!(dispatcher.provider.calls.load(Ordering::SeqCst), 3);
        // Two backoff sleeps: 10ms + 20ms.
        assert!(elapsed >= Duration::from_millis(30), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn exhausted_retries_become_a_captured_failure() {
        let provider = FlakyProvider::new(u32::MAX);
        let dispatcher = Dispatcher::new(provider, fast_retry());

        let responses = dispatcher
            .dispatch(vec![chat_request(json!({"model": "m"}))], None)
            .await;

        match &responses[0] {
            ApiResponse::Failure(failure) => {
                assert_eq!(failure.attempts, 5);
                assert!(failure.error.contains("rate limited"));
            }
            ApiResponse::Success(_) => panic!("expected a captured failure"),
        }
        assert_eq!(dispatcher.provider.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let dispatcher = Dispatcher::new(PermanentlyBroken, fast_retry());

        let responses = dispatcher
            .dispatch(vec![chat_request(json!({}))], None)
            .await;

        match &responses[0] {
            ApiResponse::Failure(failure) => {
                assert_eq!(failure.attempts, 1);
                assert!(failure.error.contains("400"));
            }
            ApiResponse::Success(_) => panic!("expected a captured failure"),
        }
    }

    #[tokio::test]
    async fn ordering_is_preserved_under_permuted_latency() {
        let dispatcher = Dispatcher::new(LatencyProvider, fast_retry());

        // Latencies deliberately reversed relative to index order.
        let requests: Vec<_> = (0..4)
            .map(|i| chat_request(json!({"id": i, "latency_ms": (3 - i) * 25})))
            .collect();

        let responses = dispatcher.dispatch(requests, None).await;

        assert_eq!(responses.len(), 4);
        for (i, response) in responses.iter().enumerate() {
            match response {
                ApiResponse::Success(value) => assert_eq!(value, &json!(i)),
                ApiResponse::Failure(f) => panic!("request {i} failed: {f:?}"),
            }
        }
    }

    #[tokio::test]
    async fn failed_task_does_not_affect_siblings() {
        let provider = FlakyProvider::new(u32::MAX);
        let dispatcher = Dispatcher::new(provider, fast_retry());
        let latency_dispatcher = Dispatcher::new(LatencyProvider, fast_retry());

        // A hopeless batch and a healthy batch resolve independently.
        let failed = dispatcher
            .dispatch(vec![chat_request(json!({})), chat_request(json!({}))], None)
            .await;
        let ok = latency_dispatcher
            .dispatch(vec![chat_request(json!({"id": 0, "latency_ms": 0}))], None)
            .await;

        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|r| !r.is_success()));
        assert!(ok[0].is_success());
    }

    #[tokio::test]
    async fn pacing_staggers_issuance_without_blocking_siblings() {
        let dispatcher = Dispatcher::new(LatencyProvider, fast_retry());
        let requests: Vec<_> = (0..3)
            .map(|i| chat_request(json!({"id": i, "latency_ms": 0})))
            .collect();

        let start = Instant::now();
        let responses = dispatcher
            .dispatch(requests, Some(Duration::from_millis(20)))
            .await;
        let elapsed = start.elapsed();

        assert_eq!(responses.len(), 3);
        // Last task issues after 2 * 20ms; the whole batch still finishes
        // concurrently rather than serializing full calls.
        assert!(elapsed >= Duration::from_millis(40), "elapsed {elapsed:?}");
        assert!(responses.iter().all(ApiResponse::is_success));
    }

    #[tokio::test]
    async fn empty_batch_returns_empty_vec() {
        let dispatcher = Dispatcher::new(LatencyProvider, fast_retry());
        let responses = dispatcher.dispatch(Vec::new(), None).await;
        assert!(responses.is_empty());
    }
}
