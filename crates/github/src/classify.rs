//! Maps non-success GitHub responses onto [`HostError`] kinds.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};

use provisioning::{BranchName, HostError, RepositoryRef};

use crate::payloads::ApiErrorBody;

/// Which call produced the response; some statuses mean different things
/// per endpoint.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Endpoint<'a> {
    Generate { target: &'a RepositoryRef },
    Protection {
        repository: &'a RepositoryRef,
        branch: &'a BranchName,
    },
    Other { resource: &'a str },
}

/// Rate-limit related response headers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RateLimitHeaders {
    /// `retry-after`, seconds.
    pub retry_after: Option<u64>,
    /// `x-ratelimit-remaining`.
    pub remaining: Option<u64>,
    /// `x-ratelimit-reset`, epoch seconds.
    pub reset: Option<u64>,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let number = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
        };
        Self {
            retry_after: number(RETRY_AFTER.as_str()),
            remaining: number("x-ratelimit-remaining"),
            reset: number("x-ratelimit-reset"),
        }
    }

    fn exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// `retry-after` wins; otherwise the time until the quota resets.
    fn wait_hint(&self, now_epoch_secs: u64) -> Option<Duration> {
        self.retry_after
            .or_else(|| self.reset.map(|reset| reset.saturating_sub(now_epoch_secs)))
            .map(Duration::from_secs)
    }
}

pub(crate) fn classify(
    status: u16,
    headers: RateLimitHeaders,
    body: &str,
    endpoint: Endpoint<'_>,
    now_epoch_secs: u64,
) -> HostError {
    let body = ApiErrorBody::parse(body);
    let message = body.summary();
    let secondary_limit = message.to_ascii_lowercase().contains("rate limit");

    match status {
        401 => HostError::Authentication { message },
        429 => HostError::RateLimited {
            retry_after: headers.wait_hint(now_epoch_secs),
        },
        403 if headers.exhausted() || headers.retry_after.is_some() || secondary_limit => {
            HostError::RateLimited {
                retry_after: headers.wait_hint(now_epoch_secs),
            }
        }
        403 => HostError::PermissionDenied { message },
        404 => match endpoint {
            Endpoint::Protection { repository, branch } => HostError::BranchNotReady {
                repository: repository.clone(),
                branch: branch.clone(),
            },
            Endpoint::Generate { .. } => HostError::NotFound {
                resource: format!("template repository ({message})"),
            },
            Endpoint::Other { resource } => HostError::NotFound {
                resource: resource.to_owned(),
            },
        },
        422 => match endpoint {
            Endpoint::Generate { target } if body.mentions_existing_name() => {
                HostError::AlreadyExists {
                    repository: target.clone(),
                }
            }
            _ => HostError::InvalidInput { message },
        },
        400 => HostError::InvalidInput { message },
        500..=599 => HostError::Server { status, message },
        _ => HostError::UnexpectedResponse {
            message: format!("status {status}: {message}"),
        },
    }
}
