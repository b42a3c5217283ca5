//! `reqwest`-backed implementation of [`RepositoryHost`].

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reqwest::{header, Method, RequestBuilder, Response, StatusCode, Url};
use thiserror::Error;
use tracing::debug;

use provisioning::{
    AccessToken, BranchName, BranchProtectionPolicy, GeneratedRepository, HostError,
    RepositoryHost, RepositoryRef, TemplateGeneration,
};

use crate::classify::{classify, Endpoint, RateLimitHeaders};
use crate::payloads::{GenerateRequest, ProtectionRequest, RepositoryResponse};

/// Public GitHub REST API root.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";
const ACCEPT: &str = "application/vnd.github+json";

/// Connection settings for [`GitHubClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubConfig {
    /// API root without a trailing slash, e.g. a GitHub Enterprise
    /// `https://ghe.example.com/api/v3`.
    pub api_base: String,
    pub user_agent: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_owned(),
            user_agent: concat!("repo-provisioner/", env!("CARGO_PKG_VERSION")).to_owned(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl GitHubConfig {
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_owned();
        self
    }
}

/// The HTTP client could not be constructed.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build GitHub HTTP client: {0}")]
    Build(#[from] reqwest::Error),

    #[error("invalid GitHub API root '{0}'")]
    InvalidApiBase(String),
}

/// GitHub REST client implementing the provisioning host port.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_base: Url,
}

impl GitHubClient {
    pub fn new(config: GitHubConfig) -> Result<Self, ClientError> {
        let trimmed = config.api_base.trim_end_matches('/');
        let api_base = Url::parse(trimmed)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ClientError::InvalidApiBase(config.api_base.clone()))?;
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http, api_base })
    }

    pub fn api_base(&self) -> &str {
        self.api_base.as_str().trim_end_matches('/')
    }

    /// Appends `segments` to the API root, percent-encoding each one.
    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.api_base.clone();
        // `new` rejects cannot-be-a-base roots, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn repo_url(&self, repository: &RepositoryRef) -> Url {
        self.endpoint([
            "repos",
            repository.owner.as_str(),
            repository.name.as_str(),
        ])
    }

    fn branch_url(&self, repository: &RepositoryRef, branch: &BranchName) -> Url {
        self.endpoint([
            "repos",
            repository.owner.as_str(),
            repository.name.as_str(),
            "branches",
            branch.as_str(),
        ])
    }

    fn request(&self, method: Method, url: Url, token: &AccessToken) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(token.expose())
            .header(header::ACCEPT, ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, HostError> {
        let response = builder.send().await.map_err(network)?;
        debug!(
            status = response.status().as_u16(),
            url = %response.url(),
            "github response"
        );
        Ok(response)
    }
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    async fn create_repository_from_template(
        &self,
        token: &AccessToken,
        request: &TemplateGeneration,
    ) -> Result<GeneratedRepository, HostError> {
        let template = &request.template;
        let url = self.endpoint([
            "repos",
            template.owner.as_str(),
            template.name.as_str(),
            "generate",
        ]);
        let response = self
            .send(
                self.request(Method::POST, url, token)
                    .json(&GenerateRequest::from(request)),
            )
            .await?;

        if response.status() != StatusCode::CREATED {
            return Err(failure(
                response,
                Endpoint::Generate {
                    target: &request.target,
                },
            )
            .await);
        }

        let body: RepositoryResponse = response.json().await.map_err(unexpected)?;
        let branch = body.default_branch.as_deref().unwrap_or("main");
        let default_branch =
            BranchName::new(branch).ok_or_else(|| HostError::UnexpectedResponse {
                message: format!("invalid default branch name '{branch}'"),
            })?;
        Ok(GeneratedRepository {
            url: body.html_url,
            default_branch,
        })
    }

    async fn branch_exists(
        &self,
        token: &AccessToken,
        repository: &RepositoryRef,
        branch: &BranchName,
    ) -> Result<bool, HostError> {
        let url = self.branch_url(repository, branch);
        let resource = url.to_string();
        let response = self.send(self.request(Method::GET, url, token)).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(failure(response, Endpoint::Other { resource: &resource }).await),
        }
    }

    async fn protect_branch(
        &self,
        token: &AccessToken,
        repository: &RepositoryRef,
        branch: &BranchName,
        policy: &BranchProtectionPolicy,
    ) -> Result<(), HostError> {
        let mut url = self.branch_url(repository, branch);
        if let Ok(mut path) = url.path_segments_mut() {
            path.push("protection");
        }
        let response = self
            .send(
                self.request(Method::PUT, url, token)
                    .json(&ProtectionRequest::from(policy)),
            )
            .await?;
        if response.status().is_success() {
            return Ok(());
        }
        Err(failure(response, Endpoint::Protection { repository, branch }).await)
    }

    async fn repository_exists(
        &self,
        token: &AccessToken,
        repository: &RepositoryRef,
    ) -> Result<bool, HostError> {
        let url = self.repo_url(repository);
        let resource = url.to_string();
        let response = self.send(self.request(Method::GET, url, token)).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(failure(response, Endpoint::Other { resource: &resource }).await),
        }
    }

    async fn delete_repository(
        &self,
        token: &AccessToken,
        repository: &RepositoryRef,
    ) -> Result<(), HostError> {
        let url = self.repo_url(repository);
        let response = self.send(self.request(Method::DELETE, url, token)).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(());
        }
        let resource = repository.to_string();
        Err(failure(response, Endpoint::Other { resource: &resource }).await)
    }
}

async fn failure(response: Response, endpoint: Endpoint<'_>) -> HostError {
    let status = response.status().as_u16();
    let headers = RateLimitHeaders::from_headers(response.headers());
    // An unreadable body still classifies by status.
    let body = response.text().await.unwrap_or_default();
    classify(status, headers, &body, endpoint, now_epoch_secs())
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn network(err: reqwest::Error) -> HostError {
    HostError::Network {
        message: err.to_string(),
    }
}

fn unexpected(err: reqwest::Error) -> HostError {
    HostError::UnexpectedResponse {
        message: err.to_string(),
    }
}
