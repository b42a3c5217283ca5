//! Resilient execution engine: a circuit breaker wrapped around a
//! backoff retry loop.
//!
//! The breaker sits outside the loop. While it is open, no attempt and no
//! delay happens. Otherwise the loop runs up to `max_retries + 1` attempts
//! and the breaker observes only the loop's final outcome.

use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::EngineConfig;
use crate::errors::{ConfigError, RetryPolicy, Retryable};
use crate::resilience::backoff::{BackoffConfig, BackoffPolicy};
use crate::resilience::circuit_breaker::{BreakerError, CircuitBreaker, CircuitOpen};
use crate::types::ExecutionContext;

/// The last underlying failure of a retry sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryError<E> {
    /// The error returned by the final attempt.
    pub source: E,
    /// Attempts made, always at least 1.
    pub attempts: u32,
    /// Time from the first attempt to giving up.
    pub elapsed: Duration,
}

/// Why [`ResilientExecutor::execute`] gave up.
#[derive(Debug, Error)]
pub enum ExecutionError<E: std::fmt::Display> {
    /// The breaker rejected the call; the operation was never attempted.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),

    /// An attempt failed with an error that must not be retried.
    #[error("{} (after {} attempt(s))", .0.source, .0.attempts)]
    NonRetryable(RetryError<E>),

    /// Every permitted attempt failed.
    #[error("{} (gave up after {} attempts in {:?})", .0.source, .0.attempts, .0.elapsed)]
    RetriesExhausted(RetryError<E>),

    /// The next backoff delay would have crossed the configured deadline.
    #[error("{} (deadline reached after {} attempt(s) in {:?})", .0.source, .0.attempts, .0.elapsed)]
    DeadlineExceeded(RetryError<E>),
}

impl<E: std::fmt::Display> ExecutionError<E> {
    /// Attempts actually made. Zero when the circuit was open.
    pub fn attempts(&self) -> u32 {
        self.retry_error().map_or(0, |r| r.attempts)
    }

    /// The error from the last attempt, if any attempt was made.
    pub fn last_error(&self) -> Option<&E> {
        self.retry_error().map(|r| &r.source)
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ExecutionError::CircuitOpen(_))
    }

    fn retry_error(&self) -> Option<&RetryError<E>> {
        match self {
            ExecutionError::CircuitOpen(_) => None,
            ExecutionError::NonRetryable(r)
            | ExecutionError::RetriesExhausted(r)
            | ExecutionError::DeadlineExceeded(r) => Some(r),
        }
    }
}

/// A successful execution together with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution<T> {
    pub value: T,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Retry-with-backoff composed with a circuit breaker.
///
/// The breaker is injected so callers decide its lifetime; one breaker per
/// process gates every call site that shares this executor.
#[derive(Debug)]
pub struct ResilientExecutor {
    config: BackoffConfig,
    backoff: Mutex<BackoffPolicy>,
    breaker: CircuitBreaker,
}

impl ResilientExecutor {
    /// Creates an executor, rejecting an invalid backoff configuration.
    pub fn new(backoff: BackoffConfig, breaker: CircuitBreaker) -> Result<Self, ConfigError> {
        Self::with_policy(BackoffPolicy::new(backoff), breaker)
    }

    /// Creates an executor with a caller-supplied policy (e.g. seeded jitter).
    pub fn with_policy(policy: BackoffPolicy, breaker: CircuitBreaker) -> Result<Self, ConfigError> {
        policy.config().validate()?;
        breaker.config().validate()?;
        Ok(Self {
            config: *policy.config(),
            backoff: Mutex::new(policy),
            breaker,
        })
    }

    /// Builds the executor and a fresh breaker from loaded configuration.
    pub fn from_config(config: &EngineConfig) -> Result<Self, ConfigError> {
        Self::new(config.backoff, CircuitBreaker::new(config.circuit_breaker))
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Runs `operation` under the breaker with the full retry budget.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: F,
        context: &ExecutionContext,
    ) -> Result<T, ExecutionError<E>>
    where
        E: Retryable,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.execute_with_stats(operation, context)
            .await
            .map(|execution| execution.value)
    }

    /// Like [`execute`](Self::execute) but also reports attempts and elapsed
    /// time of the successful sequence.
    pub async fn execute_with_stats<T, E, F, Fut>(
        &self,
        operation: F,
        context: &ExecutionContext,
    ) -> Result<Execution<T>, ExecutionError<E>>
    where
        E: Retryable,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.guarded(operation, context, self.config.max_retries)
            .await
    }

    /// Runs `operation` exactly once under the breaker.
    ///
    /// For calls that are not safe to repeat, such as repository creation.
    /// A retryable failure is reported as [`ExecutionError::RetriesExhausted`]
    /// with `attempts == 1`.
    pub async fn execute_once<T, E, F, Fut>(
        &self,
        operation: F,
        context: &ExecutionContext,
    ) -> Result<T, ExecutionError<E>>
    where
        E: Retryable,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let span = execution_span(context);
        async {
            let start = Instant::now();
            let outcome = self
                .breaker
                .call(move || async move {
                    match operation().await {
                        Ok(value) => Ok(succeeded(value, 1, start, context)),
                        Err(err) => {
                            let policy = log_failure(&err, 1, context);
                            let failure = RetryError {
                                source: err,
                                attempts: 1,
                                elapsed: start.elapsed(),
                            };
                            Err(match policy {
                                RetryPolicy::NonRetryable => ExecutionError::NonRetryable(failure),
                                RetryPolicy::Retryable { .. } => {
                                    ExecutionError::RetriesExhausted(failure)
                                }
                            })
                        }
                    }
                })
                .await;
            settle(outcome)
        }
        .instrument(span)
        .await
        .map(|execution| execution.value)
    }

    async fn guarded<T, E, F, Fut>(
        &self,
        operation: F,
        context: &ExecutionContext,
        max_retries: u32,
    ) -> Result<Execution<T>, ExecutionError<E>>
    where
        E: Retryable,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let span = execution_span(context);
        async {
            let outcome = self
                .breaker
                .call(|| self.retry_loop(operation, context, max_retries))
                .await;
            settle(outcome)
        }
        .instrument(span)
        .await
    }

    async fn retry_loop<T, E, F, Fut>(
        &self,
        mut operation: F,
        context: &ExecutionContext,
        max_retries: u32,
    ) -> Result<Execution<T>, ExecutionError<E>>
    where
        E: Retryable,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match operation(attempt).await {
                Ok(value) => return Ok(succeeded(value, attempt, start, context)),
                Err(err) => err,
            };

            let policy = log_failure(&err, attempt, context);
            let failure = |source: E| RetryError {
                source,
                attempts: attempt,
                elapsed: start.elapsed(),
            };
            let hint = match policy {
                RetryPolicy::NonRetryable => {
                    return Err(ExecutionError::NonRetryable(failure(err)))
                }
                RetryPolicy::Retryable { after } => after,
            };
            if attempt > max_retries {
                return Err(ExecutionError::RetriesExhausted(failure(err)));
            }

            let mut delay = self
                .backoff
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .compute_delay(attempt - 1);
            if let Some(hint) = hint {
                delay = delay.max(hint.min(self.config.max_delay));
            }
            if let Some(deadline) = self.config.deadline {
                if start.elapsed() + delay > deadline {
                    return Err(ExecutionError::DeadlineExceeded(failure(err)));
                }
            }

            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "backing off before next attempt"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn execution_span(context: &ExecutionContext) -> tracing::Span {
    info_span!(
        "resilient_execute",
        operation = context.operation(),
        context = %context,
    )
}

fn succeeded<T>(
    value: T,
    attempts: u32,
    start: Instant,
    context: &ExecutionContext,
) -> Execution<T> {
    let elapsed = start.elapsed();
    info!(
        operation = context.operation(),
        attempts,
        elapsed_ms = elapsed.as_millis() as u64,
        "operation succeeded"
    );
    Execution {
        value,
        attempts,
        elapsed,
    }
}

fn log_failure<E: Retryable>(err: &E, attempt: u32, context: &ExecutionContext) -> RetryPolicy {
    let policy = err.retry_policy();
    warn!(
        operation = context.operation(),
        attempt,
        error_kind = err.kind(),
        error = %err,
        retryable = policy.is_retryable(),
        "attempt failed"
    );
    policy
}

fn settle<T, E: std::fmt::Display>(
    outcome: Result<Execution<T>, BreakerError<ExecutionError<E>>>,
) -> Result<Execution<T>, ExecutionError<E>> {
    match outcome {
        Ok(execution) => Ok(execution),
        Err(BreakerError::Open(open)) => {
            warn!(
                error_kind = "circuit_open",
                retry_in_ms = open.retry_in.as_millis() as u64,
                "call rejected by open circuit"
            );
            Err(ExecutionError::CircuitOpen(open))
        }
        Err(BreakerError::Failed(err)) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use tracing::field::{Field, Visit};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{self, Layer, SubscriberExt};
    use tracing_subscriber::registry;

    use super::*;
    use crate::resilience::circuit_breaker::{CircuitBreakerConfig, CircuitState};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestError {
        Transient,
        Fatal,
        Throttled(Duration),
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => f.write_str("transient"),
                TestError::Fatal => f.write_str("fatal"),
                TestError::Throttled(_) => f.write_str("throttled"),
            }
        }
    }

    impl Retryable for TestError {
        fn retry_policy(&self) -> RetryPolicy {
            match self {
                TestError::Transient => RetryPolicy::Retryable { after: None },
                TestError::Throttled(after) => RetryPolicy::Retryable {
                    after: Some(*after),
                },
                TestError::Fatal => RetryPolicy::NonRetryable,
            }
        }
    }

    fn backoff(max_retries: u32) -> BackoffConfig {
        BackoffConfig::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_secs(10))
            .with_max_retries(max_retries)
            .with_jitter(false)
    }

    fn executor(max_retries: u32, threshold: u32) -> ResilientExecutor {
        let breaker = CircuitBreaker::new(
            CircuitBreakerConfig::default()
                .with_failure_threshold(threshold)
                .with_reset_timeout(Duration::from_secs(60)),
        );
        ResilientExecutor::new(backoff(max_retries), breaker).unwrap()
    }

    /// Fields of every event emitted while installed, keyed by name.
    #[derive(Clone, Default)]
    struct CapturedEvents(Arc<Mutex<Vec<BTreeMap<&'static str, String>>>>);

    struct FieldMap(BTreeMap<&'static str, String>);

    impl Visit for FieldMap {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.0.insert(field.name(), format!("{value:?}"));
        }
    }

    impl<S: Subscriber> Layer<S> for CapturedEvents {
        fn on_event(&self, event: &Event<'_>, _ctx: layer::Context<'_, S>) {
            let mut fields = FieldMap(BTreeMap::new());
            event.record(&mut fields);
            self.0.lock().unwrap().push(fields.0);
        }
    }

    impl CapturedEvents {
        fn with_message(&self, message: &str) -> Vec<BTreeMap<&'static str, String>> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter(|fields| fields.get("message").map(String::as_str) == Some(message))
                .cloned()
                .collect()
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new("test_op").with("repository", "octo/widgets")
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_two_failures() {
        let events = CapturedEvents::default();
        let _guard = tracing::subscriber::set_default(registry().with(events.clone()));
        let engine = executor(2, 5);
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let execution = engine
            .execute_with_stats(
                move |_| async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(TestError::Transient)
                    } else {
                        Ok("created")
                    }
                },
                &ctx(),
            )
            .await
            .unwrap();

        assert_eq!(execution.value, "created");
        assert_eq!(execution.attempts, 3);
        assert_eq!(execution.elapsed, Duration::from_millis(300));
        assert_eq!(engine.breaker().snapshot().consecutive_failures, 0);

        let failures = events.with_message("attempt failed");
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[1]["attempt"], "2");
        assert_eq!(failures[1]["error"], "transient");
        let successes = events.with_message("operation succeeded");
        assert_eq!(successes.len(), 1);
        assert_eq!(successes[0]["attempts"], "3");
        assert_eq!(successes[0]["elapsed_ms"], "300");
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_retries_plus_one_attempts() {
        let engine = executor(2, 5);
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let err = engine
            .execute(
                move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError::Transient)
                },
                &ctx(),
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match err {
            ExecutionError::RetriesExhausted(r) => {
                assert_eq!(r.attempts, 3);
                assert_eq!(r.source, TestError::Transient);
                assert_eq!(r.elapsed, Duration::from_millis(300));
            }
            other => panic!("expected retries exhausted, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_numbers_are_sequential() {
        let engine = executor(3, 5);
        let seen = Mutex::new(Vec::new());
        let seen_ref = &seen;

        let _ = engine
            .execute(
                move |attempt| async move {
                    seen_ref.lock().unwrap().push(attempt);
                    Err::<(), _>(TestError::Transient)
                },
                &ctx(),
            )
            .await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_stops_immediately() {
        let engine = executor(5, 5);
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let err = engine
            .execute(
                move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError::Fatal)
                },
                &ctx(),
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ExecutionError::NonRetryable(_)));
        assert_eq!(err.attempts(), 1);
        assert_eq!(err.last_error(), Some(&TestError::Fatal));
    }

    #[tokio::test(start_paused = true)]
    async fn whole_retry_sequence_counts_once_toward_breaker() {
        let engine = executor(2, 2);

        let _ = engine
            .execute(|_| async { Err::<(), _>(TestError::Transient) }, &ctx())
            .await;
        let snap = engine.breaker().snapshot();
        assert_eq!(snap.consecutive_failures, 1);
        assert_eq!(snap.state, CircuitState::Closed);

        let _ = engine
            .execute(|_| async { Err::<(), _>(TestError::Transient) }, &ctx())
            .await;
        assert_eq!(engine.breaker().current_state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_makes_no_attempt_and_no_delay() {
        let engine = executor(2, 1);
        let _ = engine
            .execute(|_| async { Err::<(), _>(TestError::Fatal) }, &ctx())
            .await;
        assert_eq!(engine.breaker().current_state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let calls = &calls;
        let before = Instant::now();
        let err = engine
            .execute(
                move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, TestError>(())
                },
                &ctx(),
            )
            .await
            .unwrap_err();

        assert!(err.is_circuit_open());
        assert_eq!(err.attempts(), 0);
        assert!(err.last_error().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_after_reset_timeout_closes_circuit() {
        let engine = executor(0, 1);
        let _ = engine
            .execute(|_| async { Err::<(), _>(TestError::Transient) }, &ctx())
            .await;
        assert_eq!(engine.breaker().current_state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(60)).await;
        let value = engine
            .execute(|_| async { Ok::<_, TestError>(7) }, &ctx())
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(engine.breaker().current_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_hint_raises_delay() {
        let engine = executor(1, 5);
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let execution = engine
            .execute_with_stats(
                move |_| async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(TestError::Throttled(Duration::from_secs(5)))
                    } else {
                        Ok(())
                    }
                },
                &ctx(),
            )
            .await
            .unwrap();

        assert_eq!(execution.attempts, 2);
        assert_eq!(execution.elapsed, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_before_crossing_budget() {
        let config = backoff(5).with_deadline(Some(Duration::from_millis(250)));
        let engine = ResilientExecutor::new(config, CircuitBreaker::default()).unwrap();
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let err = engine
            .execute(
                move |_| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError::Transient)
                },
                &ctx(),
            )
            .await
            .unwrap_err();

        // 100ms fits, the following 200ms would end at 300ms.
        assert!(matches!(err, ExecutionError::DeadlineExceeded(_)));
        assert_eq!(err.attempts(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn execute_once_never_retries() {
        let engine = executor(5, 5);
        let calls = AtomicU32::new(0);
        let calls = &calls;

        let err = engine
            .execute_once(
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(TestError::Transient)
                },
                &ctx(),
            )
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, ExecutionError::RetriesExhausted(_)));
        assert_eq!(err.attempts(), 1);
        assert_eq!(engine.breaker().snapshot().consecutive_failures, 1);
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let config = backoff(1).with_base_delay(Duration::ZERO);
        let err = ResilientExecutor::new(config, CircuitBreaker::default()).unwrap_err();
        assert_eq!(err, ConfigError::ZeroBaseDelay);
    }
}
