//! Bearer token authentication

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use beacon_common::config::SecurityConfig;
use beacon_common::{Error, OrgId, Result};

use crate::error::ApiError;
use crate::state::AppState;

/// JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub org_id: OrgId,
    #[serde(default)]
    pub email: String,
    pub iss: String,
    pub exp: usize,
    pub iat: usize,
}

/// HS256 token issuer and validator
pub struct JwtAuth {
    secret: String,
    issuer: String,
}

impl JwtAuth {
    pub fn new(secret: &str, issuer: &str) -> Self {
        Self {
            secret: secret.to_string(),
            issuer: issuer.to_string(),
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(&config.jwt_secret, &config.jwt_issuer)
    }

    /// Generate a token for a user of `org_id`, valid for `ttl_secs`
    pub fn generate_token(&self, user_id: &str, org_id: &str, ttl_secs: usize) -> Result<String> {
        let now = chrono::Utc::now().timestamp() as usize;
        let claims = Claims {
            sub: user_id.to_string(),
            org_id: org_id.to_string(),
            email: String::new(),
            iss: self.issuer.clone(),
            exp: now + ttl_secs,
            iat: now,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| Error::Internal(format!("failed to sign token: {}", e)))
    }

    /// Validate a token's signature, expiry and issuer
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| Error::Unauthenticated(format!("invalid token: {}", e)))?;

        Ok(token_data.claims)
    }
}

/// The caller, as established by the bearer token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    /// Tenant from the token; unset when authentication is disabled
    pub org_id: Option<OrgId>,
}

impl AuthUser {
    fn anonymous() -> Self {
        Self {
            user_id: "anonymous".to_string(),
            org_id: None,
        }
    }

    /// Resolve the tenant for a request.
    ///
    /// An explicit `org_id` must match the token's tenant when there is one.
    pub fn org(&self, requested: Option<&str>) -> Result<OrgId> {
        let requested = requested.map(str::trim).filter(|s| !s.is_empty());
        match (&self.org_id, requested) {
            (Some(own), Some(requested)) if own != requested => Err(Error::Unauthenticated(
                format!("token is not valid for org {}", requested),
            )),
            (Some(own), _) => Ok(own.clone()),
            (None, Some(requested)) => Ok(requested.to_string()),
            (None, None) => Err(Error::invalid_input("org_id is required")),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> std::result::Result<Self, Self::Rejection> {
        if !state.config.security.auth_enabled {
            return Ok(AuthUser::anonymous());
        }

        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::Unauthenticated("missing bearer token".into()))?;
        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Unauthenticated("malformed authorization header".into()))?;

        let claims = state.auth.validate_token(token)?;
        Ok(AuthUser {
            user_id: claims.sub,
            org_id: Some(claims.org_id),
        })
    }
}
