//! Idempotent repository deletion.
//!
//! Existence is checked first, so deleting an already-absent repository is a
//! no-op rather than an error. There is no retry loop here: deletion runs
//! from an already-triggered lifecycle event and a transient failure is
//! surfaced immediately.

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, info_span, warn, Instrument};

use crate::errors::HostError;
use crate::ports::RepositoryHost;
use crate::provisioner::InvalidRequest;
use crate::{AccessToken, InvocationId, RepositoryRef};

/// A validated deletion request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionRequest {
    pub token: AccessToken,
    pub repository: RepositoryRef,
}

impl DeletionRequest {
    pub fn parse(token: &str, owner: &str, name: &str) -> Result<Self, InvalidRequest> {
        let token = AccessToken::new(token).ok_or_else(|| InvalidRequest {
            field: "token",
            value: String::new(),
        })?;
        let repository = RepositoryRef::parse(owner, name).ok_or_else(|| InvalidRequest {
            field: "repository",
            value: format!("{owner}/{name}"),
        })?;
        Ok(Self { token, repository })
    }
}

/// Result of a deletion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletionOutcome {
    pub repository: RepositoryRef,
    /// `false` when the repository was already absent.
    pub deleted: bool,
}

/// Deletion could not be completed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeletionFailure {
    /// The credential may not delete this repository. Fatal; distinct from
    /// the repository being absent.
    #[error("permission denied deleting {repository}: {message}")]
    PermissionDenied {
        repository: RepositoryRef,
        message: String,
    },

    /// The credential was rejected outright.
    #[error("authentication failed deleting {repository}: {message}")]
    Authentication {
        repository: RepositoryRef,
        message: String,
    },

    /// The request failed validation; the host was never contacted.
    #[error("deletion request rejected: {message}")]
    InvalidRequest {
        field: &'static str,
        value: String,
        message: String,
    },

    /// Any other host failure.
    #[error("could not delete {repository}: {message}")]
    Host {
        repository: RepositoryRef,
        /// `error_kind` of the underlying host error.
        kind: &'static str,
        message: String,
    },
}

impl DeletionFailure {
    pub fn rejected(invalid: &InvalidRequest) -> Self {
        DeletionFailure::InvalidRequest {
            field: invalid.field,
            value: invalid.value.clone(),
            message: invalid.to_string(),
        }
    }

    fn from_host(repository: &RepositoryRef, err: HostError) -> Self {
        use crate::errors::Retryable;

        let repository = repository.clone();
        match err {
            HostError::PermissionDenied { message } => {
                DeletionFailure::PermissionDenied { repository, message }
            }
            HostError::Authentication { message } => {
                DeletionFailure::Authentication { repository, message }
            }
            other => DeletionFailure::Host {
                repository,
                kind: other.kind(),
                message: other.to_string(),
            },
        }
    }
}

/// Deletes `repository` if it exists.
pub async fn delete_repository<H>(
    host: &H,
    token: &AccessToken,
    repository: &RepositoryRef,
) -> Result<DeletionOutcome, DeletionFailure>
where
    H: RepositoryHost + ?Sized,
{
    let invocation_id = InvocationId::new_random();
    let span = info_span!("delete_repository", %invocation_id, %repository);
    delete_existing(host, token, repository)
        .instrument(span)
        .await
}

async fn delete_existing<H>(
    host: &H,
    token: &AccessToken,
    repository: &RepositoryRef,
) -> Result<DeletionOutcome, DeletionFailure>
where
    H: RepositoryHost + ?Sized,
{
    let exists = host
        .repository_exists(token, repository)
        .await
        .map_err(|err| fail(repository, err))?;
    if !exists {
        info!("repository already absent; nothing to delete");
        return Ok(DeletionOutcome {
            repository: repository.clone(),
            deleted: false,
        });
    }

    let deleted = match host.delete_repository(token, repository).await {
        Ok(()) => true,
        // Removed by someone else since the existence check.
        Err(HostError::NotFound { .. }) => false,
        Err(err) => return Err(fail(repository, err)),
    };
    info!(deleted, "repository deletion finished");
    Ok(DeletionOutcome {
        repository: repository.clone(),
        deleted,
    })
}

fn fail(repository: &RepositoryRef, err: HostError) -> DeletionFailure {
    let failure = DeletionFailure::from_host(repository, err);
    match failure {
        DeletionFailure::PermissionDenied { .. } => error!(error = %failure, "deletion forbidden"),
        _ => warn!(error = %failure, "deletion failed"),
    }
    failure
}
