//! Caller identity and the access gate port.

use std::sync::Arc;

use async_trait::async_trait;
use common::SubjectId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Role of an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Customer,
    Admin,
}

impl Role {
    /// Parses a role claim value. Matching is case-insensitive.
    pub fn parse(value: &str) -> Option<Role> {
        match value.trim().to_ascii_lowercase().as_str() {
            "customer" | "user" => Some(Role::Customer),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The authenticated caller of an engine operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub subject_id: SubjectId,
    pub role: Role,
}

impl Identity {
    pub fn new(subject_id: impl Into<SubjectId>, role: Role) -> Self {
        Self {
            subject_id: subject_id.into(),
            role,
        }
    }

    /// Creates a customer identity.
    pub fn customer(subject_id: impl Into<SubjectId>) -> Self {
        Self::new(subject_id, Role::Customer)
    }

    /// Creates an admin identity.
    pub fn admin(subject_id: impl Into<SubjectId>) -> Self {
        Self::new(subject_id, Role::Admin)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Errors raised while turning a credential into an [`Identity`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("Missing credential")]
    MissingCredential,

    #[error("Credential expired")]
    Expired,

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),
}

/// Verifies a bearer credential and yields the caller's identity.
///
/// Implementations normalize whatever claim layout the identity provider
/// uses; callers only ever see [`Identity`].
#[async_trait]
pub trait AccessGate: Send + Sync {
    async fn authenticate(&self, credential: &str) -> Result<Identity, AuthenticationError>;
}

#[async_trait]
impl<T: AccessGate + ?Sized> AccessGate for Arc<T> {
    async fn authenticate(&self, credential: &str) -> Result<Identity, AuthenticationError> {
        (**self).authenticate(credential).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse("ADMIN"), Some(Role::Admin));
        assert_eq!(Role::parse("customer"), Some(Role::Customer));
        assert_eq!(Role::parse("user"), Some(Role::Customer));
        assert_eq!(Role::parse("root"), None);
    }

    #[test]
    fn test_identity_constructors() {
        let admin = Identity::admin("u1");
        assert!(admin.is_admin());
        assert_eq!(admin.subject_id.as_str(), "u1");

        let customer = Identity::customer("u2");
        assert!(!customer.is_admin());
        assert_eq!(customer.role, Role::Customer);
    }
}
