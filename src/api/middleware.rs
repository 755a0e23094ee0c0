use crate::app::AppState;
use crate::error::{AppError, Result};
use crate::services::auth::Claims;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
};
use std::sync::Arc;

pub const ADMIN_KEY_HEADER: &str = "x-admin-key";

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// A verified caller identity.
pub struct RequireAuth(pub Claims);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self> {
        let token = bearer_token(parts).ok_or(AppError::Unauthorized)?;
        let claims = state.auth_service.verify_token(token)?;

        Ok(RequireAuth(claims))
    }
}

/// The caller identity when one is presented and valid.
pub struct MaybeAuth(pub Option<Claims>);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for MaybeAuth {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self> {
        let claims = bearer_token(parts).and_then(|token| state.auth_service.verify_token(token).ok());

        Ok(MaybeAuth(claims))
    }
}

/// Shared-secret guard for the import routes.
pub struct RequireAdminKey;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for RequireAdminKey {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self> {
        let presented = parts
            .headers
            .get(ADMIN_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?;

        if !constant_time_eq(presented.as_bytes(), state.admin_key.as_bytes()) {
            tracing::warn!("Rejected admin request with invalid key");
            return Err(AppError::Unauthorized);
        }

        Ok(RequireAdminKey)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
