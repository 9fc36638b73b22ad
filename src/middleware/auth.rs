use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_USER: &str = "user";

#[derive(Debug, Deserialize, Serialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

/// The session attached to a request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

pub fn ensure_role(user: &AuthUser, role: &str) -> Result<(), AppError> {
    if user.role != role {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

pub fn ensure_admin(user: &AuthUser) -> Result<(), AppError> {
    ensure_role(user, ROLE_ADMIN)
}

/// Resolve the session carried by a bearer token, if any.
pub fn session_from_headers(headers: &HeaderMap, secret: &str) -> Option<AuthUser> {
    let auth_str = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = auth_str.strip_prefix("Bearer ")?.trim();

    let decoded = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()?;

    let user_id = Uuid::parse_str(&decoded.claims.sub).ok()?;
    Some(AuthUser {
        user_id,
        role: decoded.claims.role,
    })
}

/// Mint a bearer token. Only the seed binary and tests issue sessions; real
/// sessions come from the identity provider sharing `JWT_SECRET`.
pub fn issue_token(
    user_id: Uuid,
    role: &str,
    secret: &str,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<String, AppError> {
    let expiration = now
        .checked_add_signed(ttl)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = Claims {
        sub: user_id.to_string(),
        role: role.to_string(),
        exp: expiration.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        session_from_headers(&parts.headers, &state.config.jwt_secret).ok_or(AppError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "test-secret";

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn valid_token_yields_session() {
        let user_id = Uuid::new_v4();
        let token = issue_token(user_id, ROLE_ADMIN, SECRET, Utc::now(), Duration::hours(1)).unwrap();

        let session = session_from_headers(&headers_with(&format!("Bearer {token}")), SECRET)
            .expect("session");
        assert_eq!(session.user_id, user_id);
        assert!(session.is_admin());
    }

    #[test]
    fn missing_header_has_no_session() {
        assert!(session_from_headers(&HeaderMap::new(), SECRET).is_none());
    }

    #[test]
    fn wrong_scheme_or_secret_is_rejected() {
        let token =
            issue_token(Uuid::new_v4(), ROLE_USER, SECRET, Utc::now(), Duration::hours(1)).unwrap();
        assert!(session_from_headers(&headers_with(&format!("Basic {token}")), SECRET).is_none());
        assert!(session_from_headers(&headers_with(&format!("Bearer {token}")), "other").is_none());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue_token(
            Uuid::new_v4(),
            ROLE_USER,
            SECRET,
            Utc::now() - Duration::hours(3),
            Duration::hours(1),
        )
        .unwrap();
        assert!(session_from_headers(&headers_with(&format!("Bearer {token}")), SECRET).is_none());
    }

    #[test]
    fn ensure_admin_rejects_plain_users() {
        let user = AuthUser {
            user_id: Uuid::new_v4(),
            role: ROLE_USER.into(),
        };
        assert!(matches!(ensure_admin(&user), Err(AppError::Forbidden)));
    }
}
