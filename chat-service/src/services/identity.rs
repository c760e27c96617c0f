//! Bearer credential verification.
//!
//! A missing or invalid credential yields a guest (`None`); callers never see
//! an error from identification.

use crate::models::{Identity, RoleSignals};
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn identify(&self, bearer: Option<&str>) -> Option<Identity>;
}

/// Extract the bearer token from an `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataClaims {
    #[serde(default)]
    pub role: Option<String>,
}

/// Claims of a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user ID)
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub app_metadata: Option<MetadataClaims>,
    #[serde(default)]
    pub user_metadata: Option<MetadataClaims>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

impl From<SessionClaims> for Identity {
    fn from(claims: SessionClaims) -> Self {
        Identity {
            id: claims.sub,
            email: claims.email,
            roles: RoleSignals {
                session_role: claims.role,
                app_metadata_role: claims.app_metadata.and_then(|m| m.role),
                user_metadata_role: claims.user_metadata.and_then(|m| m.role),
            },
        }
    }
}

/// Verifies HS256-signed session tokens.
#[derive(Clone)]
pub struct JwtIdentityProvider {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityProvider {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;

        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn validate(&self, token: &str) -> Result<SessionClaims, jsonwebtoken::errors::Error> {
        decode::<SessionClaims>(token, &self.decoding_key, &self.validation).map(|data| data.claims)
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn identify(&self, bearer: Option<&str>) -> Option<Identity> {
        let token = bearer?;
        match self.validate(token) {
            Ok(claims) => Some(claims.into()),
            Err(e) => {
                tracing::warn!(error = %e, "Invalid bearer token, treating caller as guest");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn token(claims: &SessionClaims, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn claims(exp_offset: i64) -> SessionClaims {
        SessionClaims {
            sub: "user-1".to_string(),
            email: Some("user@example.com".to_string()),
            role: Some("authenticated".to_string()),
            app_metadata: Some(MetadataClaims {
                role: Some("admin".to_string()),
            }),
            user_metadata: None,
            exp: Utc::now().timestamp() + exp_offset,
        }
    }

    #[tokio::test]
    async fn valid_token_yields_identity_with_role_signals() {
        let provider = JwtIdentityProvider::new(SECRET);
        let jwt = token(&claims(3600), SECRET);

        let identity = provider.identify(Some(&jwt)).await.unwrap();
        assert_eq!(identity.id, "user-1");
        assert_eq!(identity.roles.session_role.as_deref(), Some("authenticated"));
        assert_eq!(identity.roles.app_metadata_role.as_deref(), Some("admin"));
        assert!(identity.roles.user_metadata_role.is_none());
    }

    #[tokio::test]
    async fn missing_or_invalid_credentials_are_guests() {
        let provider = JwtIdentityProvider::new(SECRET);

        assert!(provider.identify(None).await.is_none());
        assert!(provider.identify(Some("not-a-jwt")).await.is_none());
        assert!(provider
            .identify(Some(&token(&claims(3600), "other-secret")))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn expired_token_is_guest() {
        let provider = JwtIdentityProvider::new(SECRET);
        let jwt = token(&claims(-3600), SECRET);

        assert!(provider.identify(Some(&jwt)).await.is_none());
    }

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
    }
}
