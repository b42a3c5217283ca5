//! Core domain for template-based repository provisioning.
//!
//! This crate provisions a repository from a template, protects its default
//! branch, and tears repositories down again. The repository host is reached
//! only through the [`RepositoryHost`] port; infrastructure crates implement
//! it and never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** No network I/O happens here; tokio
//! is used only for timers.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Validated newtype names (`OwnerName`, `RepositoryName`, etc.) |
//! | [`types`] | Shared value types (`AccessToken`, `ExecutionContext`, etc.) |
//! | [`errors`] | Host error taxonomy and retry-policy types |
//! | [`config`] | Serialisable engine configuration |
//! | [`resilience`] | Backoff policy, circuit breaker, resilient executor |
//! | [`ports`] | `RepositoryHost` and `OutcomeReporter` traits |
//! | [`provisioner`] | Create → verify → protect state machine |
//! | [`deletion`] | Idempotent existence-check-then-delete |

pub mod config;
pub mod deletion;
pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod provisioner;
pub mod resilience;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use config::EngineConfig;
pub use deletion::{delete_repository, DeletionFailure, DeletionOutcome, DeletionRequest};
pub use errors::{ConfigError, HostError, RetryPolicy, Retryable};
pub use identifiers::{BranchName, InvocationId, OwnerName, RepositoryName, RepositoryRef};
pub use ports::{GeneratedRepository, OutcomeReporter, RepositoryHost, TemplateGeneration};
pub use provisioner::{
    FailureCause, InvalidRequest, ProvisioningFailure, ProvisioningRequest, ProvisioningResult,
    ProvisioningState, Provisioner,
};
pub use resilience::{
    BackoffConfig, BackoffPolicy, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState,
    CircuitOpen, CircuitState, Execution, ExecutionError, ResilientExecutor, RetryError,
};
pub use types::{AccessToken, BranchProtectionPolicy, ExecutionContext, Timestamp};
