//! Authenticated caller and role normalization.

use std::collections::BTreeSet;

/// Role claims carried by the caller's credential.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSignals {
    /// Top-level `role` claim of the session token.
    pub session_role: Option<String>,
    /// `app_metadata.role`.
    pub app_metadata_role: Option<String>,
    /// `user_metadata.role`.
    pub user_metadata_role: Option<String>,
}

/// An authenticated caller. Guests are represented by the absence of an `Identity`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    pub roles: RoleSignals,
}

/// Normalized union of every role source known for one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet(BTreeSet<String>);

impl RoleSet {
    /// Merge role sources in fixed order: profile, session, app metadata, user metadata.
    pub fn merge(profile_role: Option<&str>, signals: &RoleSignals) -> Self {
        let sources = [
            profile_role,
            signals.session_role.as_deref(),
            signals.app_metadata_role.as_deref(),
            signals.user_metadata_role.as_deref(),
        ];

        Self(
            sources
                .into_iter()
                .flatten()
                .map(normalize_role)
                .filter(|role| !role.is_empty())
                .collect(),
        )
    }

    pub fn contains(&self, role: &str) -> bool {
        self.0.contains(&normalize_role(role))
    }

    /// True when any source grants one of the privileged roles.
    pub fn is_privileged(&self, privileged_roles: &BTreeSet<String>) -> bool {
        privileged_roles.iter().any(|role| self.contains(role))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

pub fn normalize_role(role: &str) -> String {
    role.trim().to_ascii_lowercase()
}
