//! Outcome reporting for workflow runners.
//!
//! Every outcome is printed to stdout as one JSON document. When
//! `GITHUB_OUTPUT` names a file, the same outcome is also appended as
//! `key=value` step outputs.

use std::fmt::Display;
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use provisioning::{
    DeletionFailure, DeletionOutcome, OutcomeReporter, ProvisioningFailure, ProvisioningResult,
};

/// Environment variable naming the step-output file.
pub const STEP_OUTPUT_ENV: &str = "GITHUB_OUTPUT";

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to serialise outcome: {0}")]
    Serialise(#[from] serde_json::Error),

    #[error("failed to write outcome: {0}")]
    Io(#[from] std::io::Error),
}

/// JSON envelope: a `status` field followed by the outcome's own fields.
#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<&'static str>,
    #[serde(flatten)]
    outcome: &'a T,
}

#[derive(Debug, Default)]
pub struct StepOutputReporter {
    output_file: Option<PathBuf>,
}

impl StepOutputReporter {
    pub fn new(output_file: Option<PathBuf>) -> Self {
        Self { output_file }
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var_os(STEP_OUTPUT_ENV).map(PathBuf::from))
    }

    async fn emit<T: Serialize>(
        &self,
        envelope: Envelope<'_, T>,
        outputs: Vec<(&'static str, String)>,
    ) -> Result<(), ReportError> {
        let json = serde_json::to_string(&envelope)?;
        {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}")?;
        }

        let Some(path) = &self.output_file else {
            return Ok(());
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(render_outputs(&outputs).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl OutcomeReporter for StepOutputReporter {
    type Error = ReportError;

    async fn provisioned(&self, result: &ProvisioningResult) -> Result<(), ReportError> {
        let envelope = Envelope {
            status: "provisioned",
            stage: None,
            outcome: result,
        };
        self.emit(envelope, provisioned_outputs(result)).await
    }

    async fn provisioning_failed(&self, failure: &ProvisioningFailure) -> Result<(), ReportError> {
        // `stage` comes from the failure's own serde tag.
        let envelope = Envelope {
            status: "failed",
            stage: None,
            outcome: failure,
        };
        self.emit(envelope, provisioning_failed_outputs(failure))
            .await
    }

    async fn deleted(&self, outcome: &DeletionOutcome) -> Result<(), ReportError> {
        let envelope = Envelope {
            status: deletion_status(outcome),
            stage: None,
            outcome,
        };
        self.emit(envelope, deleted_outputs(outcome)).await
    }

    async fn deletion_failed(&self, failure: &DeletionFailure) -> Result<(), ReportError> {
        let envelope = Envelope {
            status: "failed",
            stage: Some("deletion_failed"),
            outcome: failure,
        };
        self.emit(envelope, deletion_failed_outputs(failure)).await
    }
}

fn deletion_status(outcome: &DeletionOutcome) -> &'static str {
    if outcome.deleted {
        "deleted"
    } else {
        "absent"
    }
}

fn pair(key: &'static str, value: impl Display) -> (&'static str, String) {
    (key, value.to_string())
}

fn provisioned_outputs(result: &ProvisioningResult) -> Vec<(&'static str, String)> {
    vec![
        pair("status", "provisioned"),
        pair("invocation_id", &result.invocation_id),
        pair("repository", &result.repository),
        pair("repository_url", &result.repository_url),
        pair("default_branch", &result.default_branch),
        pair("branch_protected", result.branch_protected),
    ]
}

fn provisioning_failed_outputs(failure: &ProvisioningFailure) -> Vec<(&'static str, String)> {
    let cause = serde_json::to_value(failure.cause())
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default();
    let mut outputs = vec![pair("status", "failed")];
    match failure {
        ProvisioningFailure::NotCreated {
            invocation_id,
            repository,
            last_error_kind,
            ..
        } => {
            outputs.push(pair("stage", "not_created"));
            outputs.push(pair("invocation_id", invocation_id));
            outputs.push(pair("repository", repository));
            outputs.extend(last_error_kind.map(|kind| pair("last_error_kind", kind)));
        }
        ProvisioningFailure::Rejected {
            invocation_id,
            field,
            value,
            ..
        } => {
            outputs.push(pair("stage", "not_created"));
            outputs.push(pair("invocation_id", invocation_id));
            outputs.push(pair("invalid_field", field));
            outputs.push(pair("invalid_value", value));
        }
        ProvisioningFailure::CreatedUnprotected {
            invocation_id,
            repository,
            repository_url,
            last_error_kind,
            ..
        } => {
            outputs.push(pair("stage", "created_unprotected"));
            outputs.push(pair("invocation_id", invocation_id));
            outputs.push(pair("repository", repository));
            outputs.push(pair("repository_url", repository_url));
            outputs.extend(last_error_kind.map(|kind| pair("last_error_kind", kind)));
        }
    }
    outputs.push(pair("cause", cause));
    outputs.push(pair("attempts", failure.attempts()));
    outputs.push(pair("message", failure));
    outputs
}

fn deleted_outputs(outcome: &DeletionOutcome) -> Vec<(&'static str, String)> {
    vec![
        pair("status", deletion_status(outcome)),
        pair("repository", &outcome.repository),
        pair("deleted", outcome.deleted),
    ]
}

fn deletion_failed_outputs(failure: &DeletionFailure) -> Vec<(&'static str, String)> {
    let (reason, target) = match failure {
        DeletionFailure::PermissionDenied { repository, .. } => {
            ("permission_denied", repository.to_string())
        }
        DeletionFailure::Authentication { repository, .. } => {
            ("authentication", repository.to_string())
        }
        DeletionFailure::InvalidRequest { value, .. } => ("invalid_request", value.clone()),
        DeletionFailure::Host {
            repository, kind, ..
        } => (*kind, repository.to_string()),
    };
    vec![
        pair("status", "failed"),
        pair("stage", "deletion_failed"),
        pair("repository", target),
        pair("reason", reason),
        pair("message", failure),
    ]
}

/// One `key=value` line per output; values are flattened to a single line.
fn render_outputs(outputs: &[(&'static str, String)]) -> String {
    outputs
        .iter()
        .map(|(key, value)| format!("{key}={}\n", value.replace(['\r', '\n'], " ")))
        .collect()
}
