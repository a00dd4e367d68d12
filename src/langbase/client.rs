use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::types::{CreatePipeRequest, CreatePipeResponse, Message, PipeRequest, PipeResponse};
use crate::config::{LangbaseConfig, RequestConfig};
use crate::error::{LangbaseError, LangbaseResult};

const RUN_PATH: &str = "/v1/pipes/run";
const PIPES_PATH: &str = "/v1/pipes";

/// Upper bound for a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Exponential backoff between attempts of one pipe run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    fn from_config(config: &RequestConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    /// Sleep before retry number `retry` (1-based): base, 2x, 4x, ... capped.
    fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32
            .checked_shl(retry.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Client for the Langbase Pipes API.
///
/// Only pipe runs are retried. A run can be bounded by a call budget so
/// that retries never sleep past the stage timeout the caller runs under.
#[derive(Clone)]
pub struct LangbaseClient {
    client: Client,
    base_url: String,
    api_key: String,
    request_timeout: Duration,
    retry: RetryPolicy,
    call_budget: Option<Duration>,
}

impl LangbaseClient {
    /// Create a new Langbase client
    pub fn new(config: &LangbaseConfig, request_config: RequestConfig) -> LangbaseResult<Self> {
        let request_timeout = Duration::from_millis(request_config.timeout_ms);
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(LangbaseError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_timeout,
            retry: RetryPolicy::from_config(&request_config),
            call_budget: None,
        })
    }

    /// Bound each pipe run, retries and backoff included, to `budget`.
    ///
    /// Attempts are shortened to the time left, and a retry whose backoff
    /// would overrun the budget is not started.
    pub fn with_call_budget(mut self, budget: Duration) -> Self {
        self.call_budget = Some(budget);
        self
    }

    /// Run a pipe, retrying transient failures.
    ///
    /// Client rejections (4xx other than 408/429) are returned as is. Once
    /// retries or the call budget run out the last failure is wrapped in
    /// [`LangbaseError::Unavailable`] with the number of attempts made.
    pub async fn call_pipe(&self, request: PipeRequest) -> LangbaseResult<PipeResponse> {
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut last_error: Option<LangbaseError> = None;

        loop {
            if attempts > 0 {
                if attempts > self.retry.max_retries {
                    break;
                }
                let delay = self.retry.backoff(attempts);
                if self.remaining(started).is_some_and(|left| left <= delay) {
                    warn!(pipe = %request.name, attempts, "Call budget spent, not retrying");
                    break;
                }
                warn!(
                    pipe = %request.name,
                    retry = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying Langbase request"
                );
                tokio::time::sleep(delay).await;
            }

            let timeout = self
                .remaining(started)
                .map_or(self.request_timeout, |left| left.min(self.request_timeout));
            let attempt_start = Instant::now();
            attempts += 1;

            match self.run_once(&request, timeout).await {
                Ok(response) => {
                    info!(
                        pipe = %request.name,
                        attempts,
                        latency_ms = attempt_start.elapsed().as_millis() as u64,
                        total_tokens = ?response.total_tokens(),
                        "Langbase pipe call succeeded"
                    );
                    return Ok(response);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(pipe = %request.name, error = %e, "Langbase rejected request");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        pipe = %request.name,
                        error = %e,
                        attempt = attempts,
                        latency_ms = attempt_start.elapsed().as_millis() as u64,
                        "Langbase pipe call failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(LangbaseError::Unavailable {
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt completed".to_string()),
            retries: attempts,
        })
    }

    /// Ensure the analysis pipe exists, creating or updating it.
    ///
    /// Stage-specific instructions travel as system messages on every call,
    /// so the pipe itself only carries the shared analyst persona. Not
    /// retried: it runs once at startup and a failure there is fatal.
    pub async fn ensure_analysis_pipe(
        &self,
        pipe_name: &str,
        system_prompt: &str,
    ) -> LangbaseResult<()> {
        let request = CreatePipeRequest::new(pipe_name)
            .with_description("Multi-stage investigative article analysis")
            .with_model("openai:gpt-4o-mini")
            .with_upsert(true)
            .with_json_output(true)
            .with_temperature(0.2)
            .with_max_tokens(4000)
            .with_messages(vec![Message::system(system_prompt)]);

        let created: LangbaseResult<CreatePipeResponse> = self
            .post_json(PIPES_PATH, &request, self.request_timeout)
            .await;
        match created {
            Ok(pipe) => {
                info!(pipe = %pipe.name, url = %pipe.url, "Analysis pipe ready");
                Ok(())
            }
            Err(LangbaseError::Api { status: 409, .. }) => {
                info!(pipe = %pipe_name, "Pipe already exists");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn remaining(&self, started: Instant) -> Option<Duration> {
        self.call_budget
            .map(|budget| budget.saturating_sub(started.elapsed()))
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn run_once(&self, request: &PipeRequest, timeout: Duration) -> LangbaseResult<PipeResponse> {
        debug!(
            pipe = %request.name,
            messages = request.messages.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Calling Langbase pipe"
        );
        let response: PipeResponse = self.post_json(RUN_PATH, request, timeout).await?;
        if !response.success {
            return Err(LangbaseError::InvalidResponse {
                message: "Pipe reported success=false".to_string(),
            });
        }
        Ok(response)
    }

    async fn post_json<B, R>(&self, path: &str, body: &B, timeout: Duration) -> LangbaseResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.endpoint(path))
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LangbaseError::Timeout {
                        timeout_ms: timeout.as_millis() as u64,
                    }
                } else {
                    LangbaseError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(LangbaseError::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| LangbaseError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })
    }
}
