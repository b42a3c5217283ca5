//! Repository provisioning state machine.
//!
//! ```text
//! Requested → Creating → Created ─┬─────────────────────────────────────────→ Done
//!                                 └→ VerifyingBranch ⇄ Protecting → Protected → Done
//! (any non-terminal state) → Failed
//! ```
//!
//! Creation is a single breaker-gated attempt: generating a repository is
//! not idempotent, so a duplicate name fails immediately. Branch
//! verification and protection run together inside the resilient executor
//! because the host generates repositories asynchronously and the default
//! branch may not exist yet.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, info_span, Instrument};

use crate::errors::{HostError, Retryable};
use crate::ports::{GeneratedRepository, RepositoryHost, TemplateGeneration};
use crate::resilience::{ExecutionError, ResilientExecutor};
use crate::{
    AccessToken, BranchName, BranchProtectionPolicy, ExecutionContext, InvocationId,
    RepositoryRef, Timestamp,
};

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A validated provisioning request. Immutable for the invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningRequest {
    pub token: AccessToken,
    pub template: RepositoryRef,
    pub target: RepositoryRef,
    pub private: bool,
    pub protect_default_branch: bool,
    pub description: Option<String>,
}

/// A request field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {value:?}")]
pub struct InvalidRequest {
    pub field: &'static str,
    /// Offending value. Never populated for the token.
    pub value: String,
}

impl ProvisioningRequest {
    /// Validates raw input. Nothing is sent to the host for a malformed
    /// request.
    pub fn parse(
        token: &str,
        template_owner: &str,
        template_repo: &str,
        new_owner: &str,
        new_name: &str,
        private: bool,
        protect_default_branch: bool,
    ) -> Result<Self, InvalidRequest> {
        let invalid = |field: &'static str, value: &str| InvalidRequest {
            field,
            value: value.to_owned(),
        };
        let token = AccessToken::new(token).ok_or_else(|| invalid("token", ""))?;
        let template = RepositoryRef::parse(template_owner, template_repo)
            .ok_or_else(|| invalid("template", &format!("{template_owner}/{template_repo}")))?;
        let target = RepositoryRef::parse(new_owner, new_name)
            .ok_or_else(|| invalid("repository", &format!("{new_owner}/{new_name}")))?;
        Ok(Self {
            token,
            template,
            target,
            private,
            protect_default_branch,
            description: None,
        })
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

/// Where a provisioning run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    Requested,
    Creating,
    Created,
    VerifyingBranch,
    Protecting,
    Protected,
    Done,
    Failed,
}

impl ProvisioningState {
    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(self, next: ProvisioningState) -> bool {
        use ProvisioningState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Requested, Creating)
            | (Creating, Created)
            | (Created, VerifyingBranch)
            | (Created, Done)
            | (VerifyingBranch, Protecting)
            // A failed protection attempt is retried from verification.
            | (Protecting, VerifyingBranch)
            | (Protecting, Protected)
            | (Protected, Done) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProvisioningState::Requested => "requested",
            ProvisioningState::Creating => "creating",
            ProvisioningState::Created => "created",
            ProvisioningState::VerifyingBranch => "verifying_branch",
            ProvisioningState::Protecting => "protecting",
            ProvisioningState::Protected => "protected",
            ProvisioningState::Done => "done",
            ProvisioningState::Failed => "failed",
        })
    }
}

/// The states visited by one run, in order.
#[derive(Debug)]
struct Run {
    trail: Mutex<Vec<ProvisioningState>>,
}

impl Run {
    fn new() -> Self {
        Self {
            trail: Mutex::new(vec![ProvisioningState::Requested]),
        }
    }

    fn current(&self) -> ProvisioningState {
        let trail = self.trail.lock().unwrap_or_else(PoisonError::into_inner);
        trail.last().copied().unwrap_or(ProvisioningState::Requested)
    }

    /// Moves to `next`; staying in the current state is a no-op.
    fn advance(&self, next: ProvisioningState) {
        let mut trail = self.trail.lock().unwrap_or_else(PoisonError::into_inner);
        let from = trail.last().copied().unwrap_or(ProvisioningState::Requested);
        if from == next {
            return;
        }
        debug_assert!(from.can_transition_to(next), "illegal transition {from} → {next}");
        if !from.can_transition_to(next) {
            error!(%from, to = %next, "illegal provisioning transition ignored");
            return;
        }
        debug!(%from, to = %next, "provisioning transition");
        trail.push(next);
    }

    fn trail(&self) -> Vec<ProvisioningState> {
        self.trail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Successful provisioning outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningResult {
    pub invocation_id: InvocationId,
    pub repository: RepositoryRef,
    pub repository_url: String,
    pub default_branch: BranchName,
    /// `true` when protection was requested and applied.
    pub branch_protected: bool,
    /// States visited, from `requested` to `done`.
    pub transitions: Vec<ProvisioningState>,
    pub completed_at: Timestamp,
}

/// Why a run ended in [`ProvisioningState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    AlreadyExists,
    NotFound,
    Authentication,
    PermissionDenied,
    InvalidInput,
    /// Host rejected the call for another non-retryable reason.
    Rejected,
    /// The breaker was open; the call was never attempted.
    CircuitOpen,
    RetriesExhausted,
    DeadlineExceeded,
}

impl FailureCause {
    fn from_execution(err: &ExecutionError<HostError>) -> Self {
        match err {
            ExecutionError::CircuitOpen(_) => FailureCause::CircuitOpen,
            ExecutionError::RetriesExhausted(_) => FailureCause::RetriesExhausted,
            ExecutionError::DeadlineExceeded(_) => FailureCause::DeadlineExceeded,
            ExecutionError::NonRetryable(r) => match r.source {
                HostError::AlreadyExists { .. } => FailureCause::AlreadyExists,
                HostError::NotFound { .. } => FailureCause::NotFound,
                HostError::Authentication { .. } => FailureCause::Authentication,
                HostError::PermissionDenied { .. } => FailureCause::PermissionDenied,
                HostError::InvalidInput { .. } => FailureCause::InvalidInput,
                _ => FailureCause::Rejected,
            },
        }
    }
}

/// Terminal failure of a provisioning run.
///
/// The two variants need different recovery: `NotCreated` can simply be
/// retried, `CreatedUnprotected` needs protection applied by hand (or the
/// repository deleted) because a retry would hit "already exists".
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum ProvisioningFailure {
    #[error("repository {repository} was not created ({cause:?} while {failed_in}): {message}")]
    NotCreated {
        invocation_id: InvocationId,
        repository: RepositoryRef,
        failed_in: ProvisioningState,
        cause: FailureCause,
        /// Attempts made by the failing step; zero when the circuit was open.
        attempts: u32,
        /// `error_kind` of the last host error, if any call was made.
        last_error_kind: Option<&'static str>,
        message: String,
    },

    /// The request failed validation; nothing was sent to the host.
    #[serde(rename = "not_created")]
    #[error("repository was not created: {message}")]
    Rejected {
        invocation_id: InvocationId,
        /// Request field that failed validation.
        field: &'static str,
        value: String,
        failed_in: ProvisioningState,
        cause: FailureCause,
        attempts: u32,
        message: String,
    },

    #[error(
        "repository {repository} was created at {repository_url} but branch '{default_branch}' \
         is NOT protected ({cause:?} while {failed_in}): {message}"
    )]
    CreatedUnprotected {
        invocation_id: InvocationId,
        repository: RepositoryRef,
        repository_url: String,
        default_branch: BranchName,
        failed_in: ProvisioningState,
        cause: FailureCause,
        attempts: u32,
        last_error_kind: Option<&'static str>,
        message: String,
    },
}

impl ProvisioningFailure {
    /// Failure report for a request that never reached the host.
    pub fn rejected(invalid: &InvalidRequest) -> Self {
        ProvisioningFailure::Rejected {
            invocation_id: InvocationId::new_random(),
            field: invalid.field,
            value: invalid.value.clone(),
            failed_in: ProvisioningState::Requested,
            cause: FailureCause::InvalidInput,
            attempts: 0,
            message: invalid.to_string(),
        }
    }

    /// `true` if the repository exists despite the failure.
    pub fn repository_created(&self) -> bool {
        matches!(self, ProvisioningFailure::CreatedUnprotected { .. })
    }

    pub fn cause(&self) -> FailureCause {
        match self {
            ProvisioningFailure::NotCreated { cause, .. }
            | ProvisioningFailure::CreatedUnprotected { cause, .. }
            | ProvisioningFailure::Rejected { cause, .. } => *cause,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            ProvisioningFailure::NotCreated { attempts, .. }
            | ProvisioningFailure::CreatedUnprotected { attempts, .. }
            | ProvisioningFailure::Rejected { attempts, .. } => *attempts,
        }
    }
}

// ---------------------------------------------------------------------------
// Provisioner
// ---------------------------------------------------------------------------

/// Drives create → verify → protect against a [`RepositoryHost`].
///
/// The executor (and the breaker inside it) is owned by the provisioner and
/// shared by every step of every run it performs.
#[derive(Debug)]
pub struct Provisioner<H> {
    host: H,
    engine: ResilientExecutor,
    policy: BranchProtectionPolicy,
}

impl<H: RepositoryHost> Provisioner<H> {
    pub fn new(host: H, engine: ResilientExecutor) -> Self {
        Self {
            host,
            engine,
            policy: BranchProtectionPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_protection_policy(mut self, policy: BranchProtectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn engine(&self) -> &ResilientExecutor {
        &self.engine
    }

    /// Runs one provisioning invocation to a terminal state.
    pub async fn provision(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisioningResult, ProvisioningFailure> {
        let invocation_id = InvocationId::new_random();
        let span = info_span!(
            "provision",
            %invocation_id,
            repository = %request.target,
            template = %request.template,
            private = request.private,
            protect = request.protect_default_branch,
        );
        self.run(invocation_id, request).instrument(span).await
    }

    async fn run(
        &self,
        invocation_id: InvocationId,
        request: &ProvisioningRequest,
    ) -> Result<ProvisioningResult, ProvisioningFailure> {
        let run = Run::new();

        run.advance(ProvisioningState::Creating);
        let generated = match self.create(request).await {
            Ok(generated) => generated,
            Err(err) => {
                let failed_in = run.current();
                run.advance(ProvisioningState::Failed);
                let failure = ProvisioningFailure::NotCreated {
                    invocation_id,
                    repository: request.target.clone(),
                    failed_in,
                    cause: FailureCause::from_execution(&err),
                    attempts: err.attempts(),
                    last_error_kind: err.last_error().map(Retryable::kind),
                    message: err.to_string(),
                };
                error!(error = %failure, "provisioning failed");
                return Err(failure);
            }
        };
        run.advance(ProvisioningState::Created);
        info!(
            url = %generated.url,
            default_branch = %generated.default_branch,
            "repository created"
        );

        if request.protect_default_branch {
            if let Err(err) = self.verify_and_protect(&run, request, &generated).await {
                let failed_in = run.current();
                run.advance(ProvisioningState::Failed);
                let failure = ProvisioningFailure::CreatedUnprotected {
                    invocation_id,
                    repository: request.target.clone(),
                    repository_url: generated.url,
                    default_branch: generated.default_branch,
                    failed_in,
                    cause: FailureCause::from_execution(&err),
                    attempts: err.attempts(),
                    last_error_kind: err.last_error().map(Retryable::kind),
                    message: err.to_string(),
                };
                error!(error = %failure, "provisioning partially failed");
                return Err(failure);
            }
            run.advance(ProvisioningState::Protected);
        }
        run.advance(ProvisioningState::Done);

        info!(url = %generated.url, "provisioning complete");
        Ok(ProvisioningResult {
            invocation_id,
            repository: request.target.clone(),
            repository_url: generated.url,
            default_branch: generated.default_branch,
            branch_protected: request.protect_default_branch,
            transitions: run.trail(),
            completed_at: Timestamp::now(),
        })
    }

    async fn create(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<GeneratedRepository, ExecutionError<HostError>> {
        let generation = TemplateGeneration {
            template: request.template.clone(),
            target: request.target.clone(),
            private: request.private,
            description: request.description.clone(),
        };
        let context = ExecutionContext::new("create_repository")
            .with("repository", &request.target)
            .with("template", &request.template);

        let host = &self.host;
        let token = &request.token;
        let generation = &generation;
        self.engine
            .execute_once(
                move || host.create_repository_from_template(token, generation),
                &context,
            )
            .await
    }

    async fn verify_and_protect(
        &self,
        run: &Run,
        request: &ProvisioningRequest,
        generated: &GeneratedRepository,
    ) -> Result<(), ExecutionError<HostError>> {
        let context = ExecutionContext::new("protect_default_branch")
            .with("repository", &request.target)
            .with("branch", &generated.default_branch);

        let host = &self.host;
        let token = &request.token;
        let repository = &request.target;
        let branch = &generated.default_branch;
        let policy = &self.policy;
        self.engine
            .execute(
                move |attempt| async move {
                    run.advance(ProvisioningState::VerifyingBranch);
                    if !host.branch_exists(token, repository, branch).await? {
                        debug!(attempt, %branch, "default branch not initialised yet");
                        return Err(HostError::BranchNotReady {
                            repository: repository.clone(),
                            branch: branch.clone(),
                        });
                    }
                    run.advance(ProvisioningState::Protecting);
                    host.protect_branch(token, repository, branch, policy).await
                },
                &context,
            )
            .await
    }
}
