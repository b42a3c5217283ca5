//! Error taxonomy and retry-policy types for the provisioning domain.
//!
//! [`HostError`] covers failures reported by the repository host. Every
//! variant carries an explicit [`RetryPolicy`], so the resilient execution
//! engine dispatches on the error kind and never inspects message text.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that flows
//! through [`crate::resilience::ResilientExecutor`] must implement
//! [`Retryable`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{BranchName, RepositoryRef};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// - `Retryable` errors: rate limiting, network failures, host 5xx, and the
///   branch-not-yet-initialised condition after template generation.
/// - `NonRetryable` errors: already-exists, authentication, permission,
///   malformed input, missing template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    Retryable {
        /// Minimum back-off before the next attempt (e.g. from `Retry-After`).
        /// `None` means apply the engine's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

/// Classification hook for errors that pass through the resilient execution
/// engine.
pub trait Retryable: std::fmt::Display {
    /// Whether the failed attempt may be repeated.
    fn retry_policy(&self) -> RetryPolicy;

    /// Short machine-readable tag used as the `error_kind` log field.
    fn kind(&self) -> &'static str {
        "error"
    }
}

// ---------------------------------------------------------------------------
// Repository host errors
// ---------------------------------------------------------------------------

/// Failures reported by a [`crate::RepositoryHost`] implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    /// A repository with the requested name already exists.
    #[error("repository {repository} already exists")]
    AlreadyExists {
        /// The conflicting repository.
        repository: RepositoryRef,
    },

    /// The addressed resource (template, repository, branch) does not exist.
    #[error("not found: {resource}")]
    NotFound {
        /// Description of the missing resource.
        resource: String,
    },

    /// The host is throttling requests.
    #[error("rate limited by repository host")]
    RateLimited {
        /// Host-provided hint for when to try again.
        retry_after: Option<Duration>,
    },

    /// The credential was rejected.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Host-provided detail.
        message: String,
    },

    /// The credential is valid but lacks permission for the operation.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Host-provided detail.
        message: String,
    },

    /// The host rejected the request payload.
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Host-provided detail.
        message: String,
    },

    /// The request never produced an HTTP response.
    #[error("network failure: {message}")]
    Network {
        /// Transport-level detail.
        message: String,
    },

    /// The host answered with a server-side error status.
    #[error("repository host returned {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Host-provided detail.
        message: String,
    },

    /// The default branch of a freshly generated repository does not exist
    /// yet. Template generation is asynchronous on the host, so this clears
    /// on its own given time.
    #[error("branch '{branch}' of {repository} is not initialised yet")]
    BranchNotReady {
        /// Repository being provisioned.
        repository: RepositoryRef,
        /// Branch that was expected to exist.
        branch: BranchName,
    },

    /// The host answered with a response this client does not understand.
    #[error("unexpected response from repository host: {message}")]
    UnexpectedResponse {
        /// Description of the unexpected content.
        message: String,
    },
}

impl Retryable for HostError {
    fn retry_policy(&self) -> RetryPolicy {
        match self {
            HostError::RateLimited { retry_after } => RetryPolicy::Retryable {
                after: *retry_after,
            },
            HostError::Network { .. }
            | HostError::Server { .. }
            | HostError::BranchNotReady { .. } => RetryPolicy::Retryable { after: None },
            HostError::AlreadyExists { .. }
            | HostError::NotFound { .. }
            | HostError::Authentication { .. }
            | HostError::PermissionDenied { .. }
            | HostError::InvalidInput { .. }
            | HostError::UnexpectedResponse { .. } => RetryPolicy::NonRetryable,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            HostError::AlreadyExists { .. } => "already_exists",
            HostError::NotFound { .. } => "not_found",
            HostError::RateLimited { .. } => "rate_limited",
            HostError::Authentication { .. } => "authentication",
            HostError::PermissionDenied { .. } => "permission_denied",
            HostError::InvalidInput { .. } => "invalid_input",
            HostError::Network { .. } => "network",
            HostError::Server { .. } => "server",
            HostError::BranchNotReady { .. } => "branch_not_ready",
            HostError::UnexpectedResponse { .. } => "unexpected_response",
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Engine configuration that violates an invariant.
///
/// Produced at load time; the engine is never constructed from an invalid
/// configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `base_delay` must be strictly positive.
    #[error("base_delay must be greater than zero")]
    ZeroBaseDelay,

    /// `max_delay` must not be shorter than `base_delay`.
    #[error("max_delay ({max_delay:?}) must be at least base_delay ({base_delay:?})")]
    MaxDelayBelowBase {
        /// Configured base delay.
        base_delay: Duration,
        /// Configured maximum delay.
        max_delay: Duration,
    },

    /// The breaker must tolerate at least one failure.
    #[error("failure_threshold must be at least 1")]
    ZeroFailureThreshold,

    /// A configured deadline must be strictly positive.
    #[error("deadline must be greater than zero when set")]
    ZeroDeadline,

    /// The configuration document could not be parsed.
    #[error("configuration could not be parsed: {message}")]
    Parse {
        /// Parser detail.
        message: String,
    },
}
