//! GitHub infrastructure adapter.
//!
//! Implements the [`provisioning::RepositoryHost`] port against the GitHub
//! REST API using `reqwest`.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules. All GitHub
//! API details (headers, payload shapes, status codes, rate-limit headers)
//! are handled here; the [`provisioning`] crate only ever sees
//! [`provisioning::HostError`] kinds.
//!
//! ## Endpoints
//!
//! | Port method | Endpoint |
//! |-------------|----------|
//! | `create_repository_from_template` | `POST /repos/{template_owner}/{template_repo}/generate` |
//! | `branch_exists` | `GET /repos/{owner}/{repo}/branches/{branch}` |
//! | `protect_branch` | `PUT /repos/{owner}/{repo}/branches/{branch}/protection` |
//! | `repository_exists` | `GET /repos/{owner}/{repo}` |
//! | `delete_repository` | `DELETE /repos/{owner}/{repo}` |

mod classify;
mod client;
mod payloads;

pub use client::{ClientError, GitHubClient, GitHubConfig, DEFAULT_API_BASE};
