//! Extraction call: send the prompt, with retry, timeout and cancellation.
//!
//! All prompt engineering lives in [`crate::prompts`] and all HTTP detail in
//! [`crate::providers`]; this module only decides when to try again.
//!
//! ## Retry Strategy
//!
//! Only [`ScanbriefError::TransientService`] is retried, up to `max_attempts`
//! attempts in total. The wait before attempt `n` is
//! `retry_backoff_ms * 2^(n-2)`, saturating and capped at
//! [`MAX_BACKOFF_MS`]: with the defaults 500 ms, then 1 s. Each attempt is
//! bounded by `api_timeout_secs`; an elapsed timeout counts as a transient
//! failure. Cancellation interrupts both the call and the sleep.
//!
//! [`RetryPolicy`] is shared with vision OCR so both remote calls follow the
//! same rules.

use crate::config::PipelineConfig;
use crate::error::ScanbriefError;
use crate::output::{LlmResponse, Prompt};
use crate::progress::ProgressCallback;
use crate::providers::{LlmProvider, QueryOptions};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest single backoff sleep, whatever the configured base delay.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Attempt budget, backoff and per-attempt deadline for one remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_ms: config.retry_backoff_ms,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }

    /// Sleep before `attempt` (1-based). Zero for the first attempt.
    pub fn backoff_before(&self, attempt: u32) -> u64 {
        if attempt < 2 {
            return 0;
        }
        let factor = 2u64.saturating_pow(attempt - 2);
        self.backoff_ms.saturating_mul(factor).min(MAX_BACKOFF_MS)
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// Returns the value and the attempt that produced it. Exhaustion yields
    /// [`ScanbriefError::TransientService`] labelled with `label`.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        progress: Option<&ProgressCallback>,
        mut op: F,
    ) -> Result<(T, u32), ScanbriefError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ScanbriefError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut last_detail = String::from("no attempt made");

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let backoff = self.backoff_before(attempt);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    label, attempt, max_attempts, backoff
                );
                if let Some(cb) = progress {
                    cb.on_retry(attempt - 1, backoff, &last_detail);
                }
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(ScanbriefError::Cancelled),
                    _ = sleep(Duration::from_millis(backoff)) => {}
                }
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ScanbriefError::Cancelled),
                outcome = timeout(self.timeout, op()) => outcome,
            };

            match outcome {
                Ok(Ok(value)) => return Ok((value, attempt)),
                Ok(Err(e)) if e.is_retryable() => {
                    last_detail = match e {
                        ScanbriefError::TransientService { detail, .. } => detail,
                        other => other.to_string(),
                    };
                }
                Ok(Err(e)) => {
                    warn!("{}: attempt {} failed permanently — {}", label, attempt, e);
                    return Err(e);
                }
                Err(_) => {
                    last_detail = format!("timed out after {:?}", self.timeout);
                }
            }
            warn!("{}: attempt {} failed — {}", label, attempt, last_detail);
        }

        Err(ScanbriefError::TransientService {
            provider: label.to_string(),
            attempts: max_attempts,
            detail: last_detail,
        })
    }
}

/// Drives one provider with the configured retry policy.
pub struct ExtractionClient {
    provider: Arc<dyn LlmProvider>,
    policy: RetryPolicy,
    options: QueryOptions,
    progress: Option<ProgressCallback>,
}

impl ExtractionClient {
    pub fn new(provider: Arc<dyn LlmProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            policy: RetryPolicy::from_config(config),
            options: QueryOptions {
                temperature: config.temperature,
                max_tokens: config.prompt.max_tokens,
                json_mode: true,
            },
            progress: config.progress_callback.clone(),
        }
    }

    /// Override the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.policy.timeout = timeout;
        self
    }

    /// Send `prompt`, retrying transient failures.
    ///
    /// # Errors
    /// * [`ScanbriefError::Cancelled`] — `cancel` fired
    /// * [`ScanbriefError::TransientService`] — every attempt failed transiently;
    ///   `attempts` holds how many were made
    /// * any non-retryable provider error, after exactly one attempt
    pub async fn extract(
        &self,
        prompt: &Prompt,
        cancel: &CancellationToken,
    ) -> Result<LlmResponse, ScanbriefError> {
        let start = Instant::now();
        let mut options = self.options.clone();
        if prompt.max_tokens.is_some() {
            options.max_tokens = prompt.max_tokens;
        }
        let provider = &self.provider;
        let options = &options;

        let (mut response, attempt) = self
            .policy
            .run(provider.name(), cancel, self.progress.as_ref(), move || {
                provider.query(prompt, options)
            })
            .await?;

        response.attempts = attempt;
        info!(
            "{} ({}): answered on attempt {} in {:?}",
            provider.name(),
            provider.model(),
            attempt,
            start.elapsed()
        );
        debug!(
            "{}: {} prompt tokens, {} completion tokens, {} chars",
            provider.name(),
            response.prompt_tokens,
            response.completion_tokens,
            response.content.len()
        );
        Ok(response)
    }
}
