use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;
use crate::models::{AppState, Owned};

const ACCESS_TOKEN_COOKIE: &str = "accessToken";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "_id")]
    pub id: String,
    pub exp: usize,
}

/// The acting principal, taken from a verified access token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthUser(pub ObjectId);

impl AuthUser {
    pub fn id(&self) -> ObjectId {
        self.0
    }
}

fn bearer_token(parts: &Parts) -> Option<String> {
    let from_header = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());

    from_header.or_else(|| {
        parts
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == ACCESS_TOKEN_COOKIE)
            .map(|(_, value)| value.to_string())
    })
}

pub fn verify_token(token: &str, secret: &str) -> Result<ObjectId, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map_err(|e| {
        debug!("[auth] rejected token: {}", e);
        ApiError::Unauthenticated("Invalid access token".to_string())
    })?;

    ObjectId::parse_str(&data.claims.id)
        .map_err(|_| ApiError::Unauthenticated("Invalid access token".to_string()))
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::Unauthenticated("Unauthorized request".to_string()))?;

        verify_token(&token, &state.config.auth.access_token_secret).map(AuthUser)
    }
}

pub fn is_owner<E: Owned>(entity: &E, principal: AuthUser) -> bool {
    entity.owner() == principal.id()
}

/// Fails with `Forbidden` unless `principal` owns `entity`.
pub fn ensure_owner<E: Owned>(entity: &E, principal: AuthUser, message: &str) -> Result<(), ApiError> {
    if is_owner(entity, principal) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(message.to_string()))
    }
}

#[cfg(test)]
pub fn issue_token(secret: &str, id: ObjectId, ttl_seconds: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let claims = Claims {
        id: id.to_hex(),
        exp: (now + ttl_seconds).max(0) as usize,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_with(name: header::HeaderName, value: &str) -> Parts {
        let (parts, _) = Request::builder()
            .header(name, value)
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn accepts_a_valid_token() {
        let id = ObjectId::new();
        let token = issue_token("s3cret", id, 60);
        assert_eq!(verify_token(&token, "s3cret").unwrap(), id);
    }

    #[test]
    fn rejects_wrong_secret_and_expired_tokens() {
        let id = ObjectId::new();
        let wrong = issue_token("other", id, 60);
        assert!(matches!(verify_token(&wrong, "s3cret"), Err(ApiError::Unauthenticated(_))));

        let expired = issue_token("s3cret", id, -3600);
        assert!(matches!(verify_token(&expired, "s3cret"), Err(ApiError::Unauthenticated(_))));
    }

    #[test]
    fn token_comes_from_header_or_cookie() {
        let parts = parts_with(header::AUTHORIZATION, "Bearer abc");
        assert_eq!(bearer_token(&parts).as_deref(), Some("abc"));

        let parts = parts_with(header::COOKIE, "theme=dark; accessToken=xyz");
        assert_eq!(bearer_token(&parts).as_deref(), Some("xyz"));

        let parts = parts_with(header::COOKIE, "theme=dark");
        assert_eq!(bearer_token(&parts), None);
    }
}
