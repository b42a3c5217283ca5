//! Shared value types for the provisioning domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! behaviour or policy: a credential that refuses to be printed, the log-only
//! execution context, the branch-protection policy, and wall-clock timestamps.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Credentials
// ---------------------------------------------------------------------------

/// A repository-host access token.
///
/// The value is read-only and is only exposed through [`AccessToken::expose`].
/// `Debug` and `Display` never print it, so the token cannot leak into
/// structured logs by accident.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wraps a raw token, returning `None` if it is empty or blank.
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let t = token.into();
        if t.trim().is_empty() {
            None
        } else {
            Some(Self(t))
        }
    }

    /// Returns the raw token for use in an `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

impl std::fmt::Display for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("***")
    }
}

// ---------------------------------------------------------------------------
// Execution context
// ---------------------------------------------------------------------------

/// Descriptive key/value pairs attached to engine log records.
///
/// Has no effect on control flow. Keys are kept sorted so log output is
/// stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    operation: String,
    fields: BTreeMap<String, String>,
}

impl ExecutionContext {
    /// Creates a context for the named operation (e.g. `"protect_branch"`).
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a descriptive field, replacing any previous value for `key`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl std::fmt::Display) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }

    /// The operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Looks up a descriptive field.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }
}

impl std::fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for (key, value) in &self.fields {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Branch protection
// ---------------------------------------------------------------------------

/// Protection settings applied to a freshly provisioned default branch.
///
/// [`Default`] yields the provisioning policy: strict status checks with no
/// required contexts, enforcement for administrators, one approving review,
/// and no push restrictions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchProtectionPolicy {
    /// Require branches to be up to date with the base before merging.
    pub strict_status_checks: bool,
    /// Status check contexts that must pass before merging.
    pub required_status_contexts: Vec<String>,
    /// Apply the rules to repository administrators as well.
    pub enforce_admins: bool,
    /// Minimum number of approving reviews on a pull request.
    pub required_approving_reviews: u8,
    /// Restrict who may push to the branch. `false` means no restrictions.
    pub restrict_pushes: bool,
}

impl Default for BranchProtectionPolicy {
    fn default() -> Self {
        Self {
            strict_status_checks: true,
            required_status_contexts: Vec::new(),
            enforce_admins: true,
            required_approving_reviews: 1,
            restrict_pushes: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly. Used for reporting only; elapsed-time logic runs on the
/// monotonic clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}
