//! Repository provisioner entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse input**: subcommand arguments with environment fallbacks
//!    (`GITHUB_TOKEN`, `GITHUB_API_URL`, `PROVISIONER_CONFIG`).
//! 2. **Load configuration**: an optional JSON [`EngineConfig`], validated
//!    before anything is constructed.
//! 3. **Wire observability**: JSON logs on stderr plus optional OTLP export
//!    (see [`observability`]).
//! 4. **Construct infrastructure**: a [`GitHubClient`] injected into the
//!    [`Provisioner`] or the deletion path.
//! 5. **Report**: the outcome goes to stdout and `GITHUB_OUTPUT`; the exit
//!    code is 0 on success (including deleting an absent repository) and 1
//!    on failure.

mod observability;
mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{error, info};

use github::{GitHubClient, GitHubConfig, DEFAULT_API_BASE};
use provisioning::{
    delete_repository, DeletionFailure, DeletionRequest, EngineConfig, OutcomeReporter,
    ProvisioningFailure, ProvisioningRequest, Provisioner, ResilientExecutor,
};

use crate::output::StepOutputReporter;

#[derive(Debug, Parser)]
#[command(
    name = "repo-provisioner",
    version,
    about = "Provision repositories from templates and tear them down again"
)]
struct Cli {
    /// Token used for every GitHub API call.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: String,

    /// GitHub REST API root.
    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_API_BASE)]
    api_url: String,

    /// JSON file with retry and circuit breaker settings.
    #[arg(long, env = "PROVISIONER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a repository from a template and protect its default branch.
    Provision(ProvisionArgs),
    /// Delete a repository if it exists.
    Delete(DeleteArgs),
}

#[derive(Debug, Args)]
struct ProvisionArgs {
    #[arg(long)]
    template_owner: String,

    #[arg(long)]
    template_repo: String,

    /// Owner of the new repository.
    #[arg(long)]
    owner: String,

    /// Name of the new repository.
    #[arg(long)]
    name: String,

    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    private: bool,

    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    protect_default_branch: bool,

    #[arg(long)]
    description: Option<String>,
}

#[derive(Debug, Args)]
struct DeleteArgs {
    #[arg(long)]
    owner: String,

    #[arg(long)]
    name: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let telemetry = match observability::init() {
        Ok(telemetry) => telemetry,
        Err(err) => {
            eprintln!("failed to initialise logging: {err:#}");
            return ExitCode::FAILURE;
        }
    };

    let code = match run(cli, &StepOutputReporter::from_env()).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = %format!("{err:#}"), "invocation aborted");
            ExitCode::FAILURE
        }
    };

    telemetry.shutdown();
    code
}

/// Returns whether the requested operation succeeded; every outcome,
/// including a rejected request, goes through `reporter`. `Err` is reserved
/// for failures that prevent reporting (configuration, client setup, I/O).
async fn run<R: OutcomeReporter>(cli: Cli, reporter: &R) -> anyhow::Result<bool> {
    let engine_config = load_engine_config(cli.config.as_deref())?;
    let client = GitHubClient::new(GitHubConfig::default().with_api_base(cli.api_url))?;
    info!(api = client.api_base(), "github client ready");

    match cli.command {
        Command::Provision(args) => {
            let parsed = ProvisioningRequest::parse(
                &cli.token,
                &args.template_owner,
                &args.template_repo,
                &args.owner,
                &args.name,
                args.private,
                args.protect_default_branch,
            );
            let mut request = match parsed {
                Ok(request) => request,
                Err(invalid) => {
                    let failure = ProvisioningFailure::rejected(&invalid);
                    error!(error = %failure, "provisioning request rejected");
                    reporter.provisioning_failed(&failure).await?;
                    return Ok(false);
                }
            };
            if let Some(description) = args.description {
                request = request.with_description(description);
            }
            let engine = ResilientExecutor::from_config(&engine_config)?;
            let provisioner = Provisioner::new(client, engine);

            match provisioner.provision(&request).await {
                Ok(result) => {
                    reporter.provisioned(&result).await?;
                    Ok(true)
                }
                Err(failure) => {
                    reporter.provisioning_failed(&failure).await?;
                    Ok(false)
                }
            }
        }
        Command::Delete(args) => {
            let request = match DeletionRequest::parse(&cli.token, &args.owner, &args.name) {
                Ok(request) => request,
                Err(invalid) => {
                    let failure = DeletionFailure::rejected(&invalid);
                    error!(error = %failure, "deletion request rejected");
                    reporter.deletion_failed(&failure).await?;
                    return Ok(false);
                }
            };

            match delete_repository(&client, &request.token, &request.repository).await {
                Ok(outcome) => {
                    reporter.deleted(&outcome).await?;
                    Ok(true)
                }
                Err(failure) => {
                    reporter.deletion_failed(&failure).await?;
                    Ok(false)
                }
            }
        }
    }
}

fn load_engine_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let document = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read engine config {}", path.display()))?;
    EngineConfig::from_json_str(&document)
        .with_context(|| format!("invalid engine config {}", path.display()))
}
