//! Newtype domain identifiers.
//!
//! Every name that travels to the repository host is wrapped in a distinct
//! newtype. This prevents accidentally passing, for example, a template
//! owner where a branch name is expected, and it lets malformed input be
//! rejected before any API call is made.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Macro for String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// The optional `valid` predicate runs after the non-empty check.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident
    ) => {
        string_id! {
            $(#[$attr])*
            $name, valid = |_: &str| true
        }
    };
    (
        $(#[$attr:meta])*
        $name:ident, valid = $valid:expr
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value is empty
            /// or malformed.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                let valid: fn(&str) -> bool = $valid;
                if v.is_empty() || !valid(&v) { None } else { Some(Self(v)) }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed (host account and Git names)
// ---------------------------------------------------------------------------

string_id! {
    /// A user or organisation login that owns repositories (e.g. `"octo-org"`).
    ///
    /// Logins are 1–39 ASCII alphanumerics or hyphens and may not start or end
    /// with a hyphen.
    OwnerName, valid = |v: &str| {
        v.len() <= 39
            && !v.starts_with('-')
            && !v.ends_with('-')
            && v.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    }
}

string_id! {
    /// A repository name within an owner (e.g. `"service-template"`).
    ///
    /// Names are 1–100 characters drawn from `[A-Za-z0-9._-]`; `.` and `..`
    /// are reserved.
    RepositoryName, valid = |v: &str| {
        v.len() <= 100
            && v != "."
            && v != ".."
            && v.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    }
}

string_id! {
    /// A Git branch name (e.g. `"main"`).
    BranchName, valid = |v: &str| !v.chars().any(|c| c.is_whitespace() || c.is_control())
}

// ---------------------------------------------------------------------------
// Composite identifiers
// ---------------------------------------------------------------------------

/// Fully qualified repository reference (`owner/name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    /// Owning user or organisation.
    pub owner: OwnerName,
    /// Repository name within the owner.
    pub name: RepositoryName,
}

impl RepositoryRef {
    /// Creates a [`RepositoryRef`] from already-validated parts.
    pub fn new(owner: OwnerName, name: RepositoryName) -> Self {
        Self { owner, name }
    }

    /// Parses a reference from raw strings, returning `None` if either part
    /// is malformed.
    pub fn parse(owner: &str, name: &str) -> Option<Self> {
        Some(Self::new(OwnerName::new(owner)?, RepositoryName::new(name)?))
    }
}

impl std::fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single provisioning or deletion invocation.
///
/// Generated fresh for every process invocation; attached to spans so all
/// activity from one run can be correlated across the engine's retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(Uuid);

impl InvocationId {
    /// Generates a new random invocation identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_name_rejects_malformed_logins() {
        assert!(OwnerName::new("octo-org").is_some());
        assert!(OwnerName::new("").is_none());
        assert!(OwnerName::new("-leading").is_none());
        assert!(OwnerName::new("trailing-").is_none());
        assert!(OwnerName::new("has space").is_none());
        assert!(OwnerName::new("a".repeat(40)).is_none());
    }

    #[test]
    fn repository_name_follows_host_naming_rules() {
        assert!(RepositoryName::new("my_repo.rs-2").is_some());
        assert!(RepositoryName::new(".").is_none());
        assert!(RepositoryName::new("..").is_none());
        assert!(RepositoryName::new("bad/name").is_none());
        assert!(RepositoryName::new("x".repeat(101)).is_none());
    }

    #[test]
    fn branch_name_rejects_whitespace() {
        assert!(BranchName::new("release/1.0").is_some());
        assert!(BranchName::new("two words").is_none());
    }

    #[test]
    fn repository_ref_displays_as_owner_slash_name() {
        let repo = RepositoryRef::parse("octo-org", "widgets").unwrap();
        assert_eq!(repo.to_string(), "octo-org/widgets");
        assert!(RepositoryRef::parse("octo-org", "").is_none());
    }

    #[test]
    fn invocation_ids_are_unique() {
        assert_ne!(InvocationId::new_random(), InvocationId::new_random());
    }
}
