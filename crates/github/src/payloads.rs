//! JSON request and response bodies for the GitHub REST endpoints in use.

use serde::{Deserialize, Serialize};

use provisioning::{BranchProtectionPolicy, TemplateGeneration};

/// Body of `POST /repos/{template_owner}/{template_repo}/generate`.
#[derive(Debug, Serialize)]
pub(crate) struct GenerateRequest<'a> {
    pub owner: &'a str,
    pub name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
    pub private: bool,
    pub include_all_branches: bool,
}

impl<'a> From<&'a TemplateGeneration> for GenerateRequest<'a> {
    fn from(request: &'a TemplateGeneration) -> Self {
        Self {
            owner: request.target.owner.as_str(),
            name: request.target.name.as_str(),
            description: request.description.as_deref(),
            private: request.private,
            include_all_branches: false,
        }
    }
}

/// The subset of the repository object returned by template generation.
#[derive(Debug, Deserialize)]
pub(crate) struct RepositoryResponse {
    pub html_url: String,
    #[serde(default)]
    pub default_branch: Option<String>,
}

/// Body of `PUT /repos/{owner}/{repo}/branches/{branch}/protection`.
///
/// All four top-level keys are required by the API, even when `null`.
#[derive(Debug, Serialize, PartialEq)]
pub(crate) struct ProtectionRequest {
    pub required_status_checks: Option<StatusChecks>,
    pub enforce_admins: bool,
    pub required_pull_request_reviews: Option<PullRequestReviews>,
    pub restrictions: Option<PushRestrictions>,
}

#[derive(Debug, Serialize, PartialEq)]
pub(crate) struct StatusChecks {
    pub strict: bool,
    pub contexts: Vec<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub(crate) struct PullRequestReviews {
    pub required_approving_review_count: u8,
}

#[derive(Debug, Serialize, PartialEq)]
pub(crate) struct PushRestrictions {
    pub users: Vec<String>,
    pub teams: Vec<String>,
}

impl From<&BranchProtectionPolicy> for ProtectionRequest {
    fn from(policy: &BranchProtectionPolicy) -> Self {
        let checks_required =
            policy.strict_status_checks || !policy.required_status_contexts.is_empty();
        Self {
            required_status_checks: checks_required.then(|| StatusChecks {
                strict: policy.strict_status_checks,
                contexts: policy.required_status_contexts.clone(),
            }),
            enforce_admins: policy.enforce_admins,
            required_pull_request_reviews: (policy.required_approving_reviews > 0).then(|| {
                PullRequestReviews {
                    required_approving_review_count: policy.required_approving_reviews,
                }
            }),
            // Empty allow-lists: only administrators may push.
            restrictions: policy.restrict_pushes.then(|| PushRestrictions {
                users: Vec::new(),
                teams: Vec::new(),
            }),
        }
    }
}

/// GitHub's error envelope.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub errors: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl ApiErrorBody {
    /// Parses an error body, tolerating non-JSON content.
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| ApiErrorBody {
            message: (!body.trim().is_empty()).then(|| body.trim().to_owned()),
            errors: Vec::new(),
        })
    }

    /// Top-level message followed by any detail messages.
    pub fn summary(&self) -> String {
        let mut parts: Vec<&str> = self.message.iter().map(String::as_str).collect();
        parts.extend(self.errors.iter().filter_map(|e| e.message.as_deref()));
        if parts.is_empty() {
            "no error detail".to_owned()
        } else {
            parts.join("; ")
        }
    }

    /// GitHub reports a duplicate repository name only in prose.
    pub fn mentions_existing_name(&self) -> bool {
        let mentions = |text: &str| text.to_ascii_lowercase().contains("already exists");
        self.message.as_deref().is_some_and(mentions)
            || self.errors.iter().any(|e| {
                e.message.as_deref().is_some_and(mentions)
                    || e.code.as_deref() == Some("already_exists")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provisioning::RepositoryRef;
    use serde_json::json;

    #[test]
    fn generate_request_omits_missing_description() {
        let generation = TemplateGeneration {
            template: RepositoryRef::parse("octo-org", "template").unwrap(),
            target: RepositoryRef::parse("octo-org", "widgets").unwrap(),
            private: true,
            description: None,
        };
        let body = serde_json::to_value(GenerateRequest::from(&generation)).unwrap();
        assert_eq!(
            body,
            json!({
                "owner": "octo-org",
                "name": "widgets",
                "private": true,
                "include_all_branches": false
            })
        );
    }

    #[test]
    fn default_policy_serialises_to_expected_protection_body() {
        let body =
            serde_json::to_value(ProtectionRequest::from(&BranchProtectionPolicy::default()))
                .unwrap();
        assert_eq!(
            body,
            json!({
                "required_status_checks": { "strict": true, "contexts": [] },
                "enforce_admins": true,
                "required_pull_request_reviews": { "required_approving_review_count": 1 },
                "restrictions": null
            })
        );
    }

    #[test]
    fn relaxed_policy_sends_nulls() {
        let policy = BranchProtectionPolicy {
            strict_status_checks: false,
            required_status_contexts: Vec::new(),
            enforce_admins: false,
            required_approving_reviews: 0,
            restrict_pushes: true,
        };
        let body = ProtectionRequest::from(&policy);
        assert!(body.required_status_checks.is_none());
        assert!(body.required_pull_request_reviews.is_none());
        assert_eq!(
            body.restrictions,
            Some(PushRestrictions {
                users: vec![],
                teams: vec![]
            })
        );
    }

    #[test]
    fn error_body_detects_duplicate_names() {
        let body = ApiErrorBody::parse(
            r#"{"message":"Repository creation failed.","errors":[{"resource":"Repository","code":"custom","field":"name","message":"name already exists on this account"}]}"#,
        );
        assert!(body.mentions_existing_name());
        assert_eq!(
            body.summary(),
            "Repository creation failed.; name already exists on this account"
        );
    }

    #[test]
    fn non_json_error_body_is_kept_as_message() {
        let body = ApiErrorBody::parse("upstream connect error");
        assert_eq!(body.summary(), "upstream connect error");
        assert!(!body.mentions_existing_name());
        assert_eq!(ApiErrorBody::parse("").summary(), "no error detail");
    }
}
