//! JWT authentication
//!
//! The auth provider mints HS256 tokens carrying the user id, email, and
//! role; this module validates them and exposes the claims to handlers as
//! an [`AuthUser`] extension. Auth flows themselves (signup, password
//! reset) live with the provider, not here.

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use prokit_shared::UserRole;

use crate::error::ApiError;
use crate::state::AppState;

/// JWT claims
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: Option<String>,
    pub role: String,
    pub exp: usize,
    pub iat: usize,
}

/// Authenticated user extracted from a verified token
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub role: UserRole,
}

/// Token signing and verification
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiry_hours: i64,
}

impl JwtManager {
    pub fn new(secret: &str, expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiry_hours,
        }
    }

    pub fn generate_token(
        &self,
        user_id: Uuid,
        email: Option<&str>,
        role: UserRole,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.map(|e| e.to_string()),
            role: role.as_str().to_string(),
            exp: (now + Duration::hours(self.expiry_hours)).unix_timestamp() as usize,
            iat: now.unix_timestamp() as usize,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(data.claims)
    }
}

/// Middleware requiring a valid bearer token; inserts [`AuthUser`]
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthorized)?;

    let claims = state
        .jwt_manager
        .verify_token(token)
        .map_err(|_| ApiError::Unauthorized)?;

    let user_id = Uuid::parse_str(&claims.sub).map_err(|_| ApiError::Unauthorized)?;
    // Unknown role strings degrade to the unprivileged role rather than 401:
    // the token is genuine, the claim set is just newer than this binary.
    let role = claims.role.parse::<UserRole>().unwrap_or(UserRole::User);

    request.extensions_mut().insert(AuthUser {
        user_id,
        email: claims.email,
        role,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trip() {
        let manager = JwtManager::new("test-secret", 24);
        let user_id = Uuid::new_v4();

        let token = manager
            .generate_token(user_id, Some("user@example.com"), UserRole::Admin)
            .unwrap();
        let claims = manager.verify_token(&token).unwrap();

        assert_eq!(claims.sub, user_id.to_string());
        assert_eq!(claims.email.as_deref(), Some("user@example.com"));
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let manager = JwtManager::new("test-secret", 24);
        let other = JwtManager::new("other-secret", 24);

        let token = other
            .generate_token(Uuid::new_v4(), None, UserRole::User)
            .unwrap();
        assert!(manager.verify_token(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let manager = JwtManager::new("test-secret", -1);

        let token = manager
            .generate_token(Uuid::new_v4(), None, UserRole::User)
            .unwrap();
        assert!(manager.verify_token(&token).is_err());
    }
}
