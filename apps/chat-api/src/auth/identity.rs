//! Bearer-token verification against the auth service's signing secret.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// The externally-verified caller attached to a request or connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
}

/// Claims issued by the auth service's login endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub exp: i64,
}

/// Resolves a bearer token to an [`Identity`].
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &str) -> Result<Identity, ApiError>;
}

/// Verifies HMAC-signed JWT access tokens.
pub struct JwtIdentity {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentity {
    pub fn new(secret: &str, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentity {
    async fn verify(&self, token: &str) -> Result<Identity, ApiError> {
        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.key, &self.validation)
            .map_err(|e| {
                tracing::debug!(?e, "access token validation failed");
                ApiError::unauthorized("Invalid or expired token")
            })?;

        if data.claims.sub.is_empty() {
            return Err(ApiError::unauthorized("Token has no subject"));
        }

        Ok(Identity {
            user_id: data.claims.sub,
        })
    }
}
