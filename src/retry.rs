//! Retry manager with exponential backoff and per-call timeout
//!
//! Every attempt runs under `timeout`; an elapsed attempt becomes
//! `RagError::Timeout` for the calling stage. Only transient failures
//! (see [`RagError::is_transient`]) are retried, and configuration
//! errors never are.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::errors::{RagError, Result, Stage};
use crate::telemetry::{TelemetryCollector, TelemetryEvent};

/// Default number of attempts (first try included)
pub const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff
const BASE_DELAY_MS: u64 = 500;

/// Maximum delay cap (8 seconds)
const MAX_DELAY_MS: u64 = 8000;

/// Default per-attempt timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry manager with exponential backoff
#[derive(Clone)]
pub struct RetryManager {
    /// Maximum attempts
    max_retries: u32,

    /// Base delay in milliseconds
    base_delay_ms: u64,

    /// Maximum delay cap in milliseconds
    max_delay_ms: u64,

    /// Enable jitter
    enable_jitter: bool,

    /// Budget for a single attempt
    timeout: Duration,

    telemetry: Option<TelemetryCollector>,
}

impl std::fmt::Debug for RetryManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryManager")
            .field("max_retries", &self.max_retries)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for RetryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryManager {
    /// Create new retry manager with default settings
    pub fn new() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay_ms: BASE_DELAY_MS,
            max_delay_ms: MAX_DELAY_MS,
            enable_jitter: true,
            timeout: DEFAULT_TIMEOUT,
            telemetry: None,
        }
    }

    /// Create retry manager with custom settings
    pub fn with_config(max_retries: u32, base_delay_ms: u64, timeout: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            base_delay_ms,
            max_delay_ms: MAX_DELAY_MS,
            enable_jitter: true,
            timeout,
            telemetry: None,
        }
    }

    /// Single attempt, timeout only
    pub fn single_attempt(timeout: Duration) -> Self {
        Self::with_config(1, 0, timeout)
    }

    /// Report retries to a telemetry collector
    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Run `operation` under the timeout once, without retrying
    pub async fn execute_once<F, Fut, T>(&self, stage: Stage, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(RagError::Timeout {
                stage,
                duration_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// Execute operation with retry logic
    ///
    /// The last error is returned unchanged once attempts are exhausted,
    /// so the caller still sees which stage failed.
    pub async fn execute_with_retry<F, Fut, T>(&self, stage: Stage, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            let started = Instant::now();
            match self.execute_once(stage, &mut operation).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_transient() {
                        return Err(e);
                    }

                    attempt += 1;

                    if attempt >= self.max_retries {
                        tracing::warn!(%stage, attempts = attempt, error = %e, "retries exhausted");
                        return Err(e);
                    }

                    let delay = self.calculate_delay(attempt - 1);
                    tracing::debug!(
                        %stage,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient failure, retrying"
                    );
                    if let Some(telemetry) = &self.telemetry {
                        telemetry.record(TelemetryEvent::RetryAttempt {
                            stage,
                            attempt,
                            timestamp: Instant::now(),
                        });
                    }
                    sleep(delay).await;
                }
            }
        }
    }

    /// Calculate delay for given attempt number
    fn calculate_delay(&self, attempt: u32) -> Duration {
        // Binary exponential backoff: 2^attempt
        let exponential_delay = self.base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));

        let delay_ms = exponential_delay.min(self.max_delay_ms);

        // ±25% jitter
        let final_delay = if self.enable_jitter {
            let jitter = (delay_ms / 4) as i64;
            let random_jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter as f64;
            ((delay_ms as i64) + random_jitter as i64).max(0) as u64
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
