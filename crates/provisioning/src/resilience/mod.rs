//! Failure handling for calls to the repository host: exponential backoff,
//! a consecutive-failure circuit breaker, and the executor composing them.
//!
//! ```text
//! ResilientExecutor::execute
//!     → CircuitBreaker::call      (fail fast while open)
//!         → retry loop            (up to max_retries + 1 attempts)
//!             → BackoffPolicy     (delay between attempts)
//! ```

mod backoff;
mod circuit_breaker;
mod executor;

pub use backoff::{BackoffConfig, BackoffPolicy};
pub use circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitOpen,
    CircuitState,
};
pub use executor::{Execution, ExecutionError, ResilientExecutor, RetryError};
