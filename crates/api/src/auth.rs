//! Bearer token authentication.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{HeaderMap, header, request::Parts};
use domain::{AccessGate, AuthenticationError, Identity, Role};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use order_store::OrderStore;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

/// JWT claims accepted by [`JwtAccessGate`].
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject id of the caller.
    pub sub: String,
    /// Expiration (Unix timestamp seconds)
    pub exp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// `customer` (also `user`) or `admin`; absent means customer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Verifies HS256 tokens issued by the identity provider.
pub struct JwtAccessGate {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAccessGate {
    /// Creates a gate for tokens signed with `secret`.
    ///
    /// When `issuer` is set, tokens must carry a matching `iss` claim.
    pub fn new(secret: &str, issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match issuer {
            Some(issuer) => {
                validation.set_issuer(&[issuer]);
                validation.set_required_spec_claims(&["exp", "sub", "iss"]);
            }
            None => validation.set_required_spec_claims(&["exp", "sub"]),
        }

        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl AccessGate for JwtAccessGate {
    async fn authenticate(&self, credential: &str) -> Result<Identity, AuthenticationError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Err(AuthenticationError::MissingCredential);
        }

        let data = jsonwebtoken::decode::<Claims>(credential, &self.key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthenticationError::Expired,
                _ => {
                    tracing::debug!(error = %e, "JWT validation failed");
                    AuthenticationError::InvalidCredential(e.to_string())
                }
            })?;
        let claims = data.claims;

        if claims.sub.trim().is_empty() {
            return Err(AuthenticationError::InvalidCredential(
                "empty subject".into(),
            ));
        }

        let role = match claims.role.as_deref() {
            None => Role::Customer,
            Some(raw) => {
                Role::parse(raw).ok_or_else(|| AuthenticationError::UnknownRole(raw.to_string()))?
            }
        };

        Ok(Identity::new(claims.sub, role))
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Identity);

impl<S: OrderStore + 'static> FromRequestParts<Arc<AppState<S>>> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState<S>>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(AuthenticationError::MissingCredential)?;
        let identity = state.access_gate.authenticate(token).await?;
        Ok(Authenticated(identity))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use jsonwebtoken::{EncodingKey, Header};

    use super::*;

    const SECRET: &str = "test-secret";

    fn token(secret: &str, claims: &Claims) -> String {
        jsonwebtoken::encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(sub: &str, role: Option<&str>, exp_offset: i64) -> Claims {
        Claims {
            sub: sub.to_string(),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as u64,
            iss: None,
            role: role.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_role_claims() {
        let gate = JwtAccessGate::new(SECRET, None);

        let identity = gate
            .authenticate(&token(SECRET, &claims("u1", None, 3600)))
            .await
            .unwrap();
        assert_eq!(identity.subject_id.as_str(), "u1");
        assert_eq!(identity.role, Role::Customer);

        let identity = gate
            .authenticate(&token(SECRET, &claims("a1", Some("admin"), 3600)))
            .await
            .unwrap();
        assert!(identity.is_admin());

        let result = gate
            .authenticate(&token(SECRET, &claims("u1", Some("root"), 3600)))
            .await;
        assert_eq!(
            result,
            Err(AuthenticationError::UnknownRole("root".into()))
        );
    }

    #[tokio::test]
    async fn test_rejects_bad_tokens() {
        let gate = JwtAccessGate::new(SECRET, None);

        let expired = token(SECRET, &claims("u1", None, -3600));
        assert_eq!(
            gate.authenticate(&expired).await,
            Err(AuthenticationError::Expired)
        );

        let forged = token("other-secret", &claims("u1", Some("admin"), 3600));
        assert!(matches!(
            gate.authenticate(&forged).await,
            Err(AuthenticationError::InvalidCredential(_))
        ));

        assert_eq!(
            gate.authenticate("  ").await,
            Err(AuthenticationError::MissingCredential)
        );
        assert!(matches!(
            gate.authenticate("not.a.jwt").await,
            Err(AuthenticationError::InvalidCredential(_))
        ));

        let blank_subject = token(SECRET, &claims(" ", None, 3600));
        assert!(matches!(
            gate.authenticate(&blank_subject).await,
            Err(AuthenticationError::InvalidCredential(_))
        ));
    }

    #[tokio::test]
    async fn test_issuer_is_enforced_when_configured() {
        let gate = JwtAccessGate::new(SECRET, Some("https://id.example.com"));

        let mut good = claims("u1", None, 3600);
        good.iss = Some("https://id.example.com".into());
        assert!(gate.authenticate(&token(SECRET, &good)).await.is_ok());

        let mut wrong = claims("u1", None, 3600);
        wrong.iss = Some("https://evil.example.com".into());
        assert!(gate.authenticate(&token(SECRET, &wrong)).await.is_err());

        let missing = claims("u1", None, 3600);
        assert!(gate.authenticate(&token(SECRET, &missing)).await.is_err());
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("bearer  xyz"));
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }
}
