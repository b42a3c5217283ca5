//! Circuit breaker guarding calls to the repository host.
//!
//! The breaker stops attempting an operation after repeated failures and
//! periodically lets a single probe through to check whether the host has
//! recovered.
//!
//! ```text
//! Closed   → Open:     consecutive failures reach the threshold
//! Open     → HalfOpen: reset timeout elapsed since the last failure
//! HalfOpen → Closed:   probe succeeds
//! HalfOpen → Open:     probe fails
//! ```
//!
//! The breaker is an owned instance injected into the engine, not global
//! state. Its clock is [`tokio::time::Instant`] so tests can drive the reset
//! timeout with a paused runtime.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::errors::ConfigError;
use crate::types::Timestamp;

/// Configuration for circuit breaker behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failed invocations that open the circuit.
    pub failure_threshold: u32,
    /// Time since the last failure after which one probe is allowed.
    #[serde(with = "crate::config::serde_millis")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        Ok(())
    }
}

/// Current state of the circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls are attempted.
    Closed,
    /// Calls fail fast without being attempted.
    Open,
    /// A single probe call is attempted.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        })
    }
}

/// Point-in-time view of a breaker, for logs and assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Wall-clock time of the most recent failure.
    pub last_failure_at: Option<Timestamp>,
}

/// The call was rejected without being attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("circuit open; next probe allowed in {retry_in:?}")]
pub struct CircuitOpen {
    /// Time remaining until the breaker will admit a probe.
    pub retry_in: Duration,
}

/// Outcome of a guarded call that did not succeed.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker rejected the call; the operation never ran.
    #[error(transparent)]
    Open(#[from] CircuitOpen),
    /// The operation ran and failed.
    #[error("{0}")]
    Failed(E),
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<Timestamp>,
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                last_failure_at: None,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn current_state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.lock();
        CircuitBreakerState {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            last_failure_at: inner.last_failure_at,
        }
    }

    /// Runs `operation` if the circuit admits it and records the outcome.
    ///
    /// Whatever `operation` does internally (including its own retries) counts
    /// as a single success or failure toward the threshold.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut permit = Permit {
            breaker: self,
            half_open: self.try_acquire()?,
            settled: false,
        };
        let outcome = operation().await;
        permit.settled = true;
        match outcome {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(BreakerError::Failed(err))
            }
        }
    }

    /// Returns `true` when the admitted call is the half-open probe.
    fn try_acquire(&self) -> Result<bool, CircuitOpen> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(false),
            // Only one probe per half-open window.
            CircuitState::HalfOpen => Err(CircuitOpen {
                retry_in: Duration::ZERO,
            }),
            CircuitState::Open => {
                let since_failure = inner
                    .last_failure
                    .map_or(self.config.reset_timeout, |t| t.elapsed());
                if since_failure >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    info!(
                        consecutive_failures = inner.consecutive_failures,
                        "circuit half-open; admitting probe"
                    );
                    Ok(true)
                } else {
                    Err(CircuitOpen {
                        retry_in: self.config.reset_timeout - since_failure,
                    })
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(from = %inner.state, "circuit closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
    }

    fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.last_failure_at = Some(Timestamp::now());

        let open = match inner.state {
            CircuitState::Closed => inner.consecutive_failures >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => true,
        };
        if open && inner.state != CircuitState::Open {
            warn!(
                from = %inner.state,
                consecutive_failures = inner.consecutive_failures,
                reset_timeout_ms = self.config.reset_timeout.as_millis() as u64,
                "circuit opened"
            );
            inner.state = CircuitState::Open;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An admitted call that has not reported its outcome yet.
///
/// A half-open call dropped before completion (timeout, `select!`, task
/// abort) counts as a failure; otherwise the breaker stays half-open and
/// rejects every later call.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    half_open: bool,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.settled || !self.half_open {
            return;
        }
        warn!("half-open call abandoned before completing");
        self.breaker.record_failure();
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_reset_timeout(Duration::from_secs(30)),
        )
    }

    type Outcome = Result<(), BreakerError<&'static str>>;

    async fn fail(cb: &CircuitBreaker, calls: &AtomicU32) -> Outcome {
        cb.call(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("boom")
        })
        .await
    }

    async fn succeed(cb: &CircuitBreaker, calls: &AtomicU32) -> Outcome {
        cb.call(move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<(), &'static str>(())
        })
        .await
    }

    #[test]
    fn breaker_starts_closed() {
        let cb = CircuitBreaker::default();
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.consecutive_failures, 0);
        assert!(snap.last_failure_at.is_none());
    }

    #[test]
    fn validate_rejects_zero_threshold() {
        assert_eq!(
            CircuitBreakerConfig::default()
                .with_failure_threshold(0)
                .validate(),
            Err(ConfigError::ZeroFailureThreshold)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_fails_fast() {
        let cb = breaker(3);
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let outcome = fail(&cb, &calls).await;
            assert!(matches!(outcome, Err(BreakerError::Failed("boom"))));
        }
        assert_eq!(cb.current_state(), CircuitState::Open);
        assert!(cb.snapshot().last_failure_at.is_some());

        let fourth = succeed(&cb, &calls).await;
        assert!(matches!(fourth, Err(BreakerError::Open(CircuitOpen { .. }))));
        assert_eq!(
            calls.load(Ordering::SeqCst),
            3,
            "open circuit must not invoke the operation"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_success_closes_circuit() {
        let cb = breaker(3);
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let _ = fail(&cb, &calls).await;
        }

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(succeed(&cb, &calls).await.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_probe_failure_reopens_circuit() {
        let cb = breaker(2);
        let calls = AtomicU32::new(0);
        for _ in 0..2 {
            let _ = fail(&cb, &calls).await;
        }

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(matches!(fail(&cb, &calls).await, Err(BreakerError::Failed(_))));
        assert_eq!(cb.current_state(), CircuitState::Open);

        // The failed probe refreshed the failure timestamp.
        tokio::time::advance(Duration::from_secs(10)).await;
        match succeed(&cb, &calls).await {
            Err(BreakerError::Open(open)) => assert_eq!(open.retry_in, Duration::from_secs(20)),
            other => panic!("expected open circuit, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_half_open_call_reopens_circuit_instead_of_wedging() {
        let cb = breaker(1);
        let calls = AtomicU32::new(0);
        let _ = fail(&cb, &calls).await;
        tokio::time::advance(Duration::from_secs(31)).await;

        let slow_call = cb.call(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), &'static str>(())
        });
        let timed_out = tokio::time::timeout(Duration::from_secs(1), slow_call).await;
        assert!(timed_out.is_err());

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.consecutive_failures, 2);

        // Still inside the fresh reset window.
        assert!(matches!(succeed(&cb, &calls).await, Err(BreakerError::Open(_))));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(succeed(&cb, &calls).await.is_ok());
        assert_eq!(cb.current_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_closed_call_does_not_count_as_failure() {
        let cb = breaker(1);
        let slow = cb.call(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), &'static str>(())
        });
        assert!(tokio::time::timeout(Duration::from_secs(1), slow)
            .await
            .is_err());
        assert_eq!(cb.snapshot().consecutive_failures, 0);
        assert_eq!(cb.current_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count() {
        let cb = breaker(3);
        let calls = AtomicU32::new(0);

        let _ = fail(&cb, &calls).await;
        let _ = fail(&cb, &calls).await;
        assert!(succeed(&cb, &calls).await.is_ok());
        assert_eq!(cb.snapshot().consecutive_failures, 0);

        let _ = fail(&cb, &calls).await;
        let _ = fail(&cb, &calls).await;
        assert_eq!(cb.current_state(), CircuitState::Closed);
        let _ = fail(&cb, &calls).await;
        assert_eq!(cb.current_state(), CircuitState::Open);
    }
}
