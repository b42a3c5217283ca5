//! Port traits implemented by infrastructure crates.
//!
//! [`RepositoryHost`] is the only outbound dependency of the provisioning
//! core. [`OutcomeReporter`] is the inbound seam through which the
//! composition root publishes results (comments, step outputs).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::deletion::{DeletionFailure, DeletionOutcome};
use crate::errors::HostError;
use crate::provisioner::{ProvisioningFailure, ProvisioningResult};
use crate::{AccessToken, BranchName, BranchProtectionPolicy, RepositoryRef};

/// Parameters for generating a repository from a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateGeneration {
    pub template: RepositoryRef,
    pub target: RepositoryRef,
    pub private: bool,
    pub description: Option<String>,
}

/// What the host reports back after template generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedRepository {
    /// Browser URL of the new repository.
    pub url: String,
    /// Default branch the repository will have once generation completes.
    pub default_branch: BranchName,
}

/// Repository-hosting API used by provisioning and deletion.
///
/// The token is passed into every call and never stored by the core.
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Starts generating `target` from `template`.
    ///
    /// Not idempotent: a second call for the same target fails with
    /// [`HostError::AlreadyExists`].
    async fn create_repository_from_template(
        &self,
        token: &AccessToken,
        request: &TemplateGeneration,
    ) -> Result<GeneratedRepository, HostError>;

    /// Returns `Ok(false)` when the branch does not exist; any other failure
    /// is an error.
    async fn branch_exists(
        &self,
        token: &AccessToken,
        repository: &RepositoryRef,
        branch: &BranchName,
    ) -> Result<bool, HostError>;

    async fn protect_branch(
        &self,
        token: &AccessToken,
        repository: &RepositoryRef,
        branch: &BranchName,
        policy: &BranchProtectionPolicy,
    ) -> Result<(), HostError>;

    /// Returns `Ok(false)` when the repository does not exist.
    async fn repository_exists(
        &self,
        token: &AccessToken,
        repository: &RepositoryRef,
    ) -> Result<bool, HostError>;

    async fn delete_repository(
        &self,
        token: &AccessToken,
        repository: &RepositoryRef,
    ) -> Result<(), HostError>;
}

/// Publishes the terminal outcome of an invocation.
///
/// Each method is called at most once per invocation.
#[async_trait]
pub trait OutcomeReporter: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn provisioned(&self, result: &ProvisioningResult) -> Result<(), Self::Error>;

    async fn provisioning_failed(&self, failure: &ProvisioningFailure) -> Result<(), Self::Error>;

    async fn deleted(&self, outcome: &DeletionOutcome) -> Result<(), Self::Error>;

    async fn deletion_failed(&self, failure: &DeletionFailure) -> Result<(), Self::Error>;
}
