use crate::config::Config;
use crate::error::{AppError, Result};
use crate::models::NewUser;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

/// How long a Spotify authorization round trip may take.
const OAUTH_STATE_TTL_MINUTES: i64 = 10;

/// Claims carried by identity tokens from the sign-in provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
}

impl Claims {
    /// Name shown next to hot takes and comments.
    pub fn display_name(&self) -> String {
        self.first_name
            .clone()
            .or_else(|| self.username.clone())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "Anonymous".to_string())
    }

    /// Identity details for creating the caller's user row.
    pub fn new_user(&self) -> NewUser {
        let name = self
            .username
            .clone()
            .or_else(|| self.first_name.clone())
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "User".to_string());
        NewUser::new(self.sub.clone(), name)
    }
}

/// Signed `state` parameter for the Spotify authorization redirect.
#[derive(Debug, Serialize, Deserialize)]
struct OAuthState {
    sub: String,
    nonce: String,
    exp: i64,
}

pub struct AuthService {
    jwt_secret: String,
}

impl AuthService {
    pub fn new(config: &Config) -> Self {
        Self::with_secret(config.auth_jwt_secret.clone())
    }

    pub fn with_secret(jwt_secret: String) -> Self {
        Self { jwt_secret }
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| AppError::Unauthorized)?;

        Ok(token_data.claims)
    }

    /// Issues an identity token. Used by tooling and tests standing in for the provider.
    pub fn issue_token(&self, claims: &Claims) -> Result<String> {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Token generation failed: {}", e)))
    }

    pub fn issue_oauth_state(&self, user_id: &str) -> Result<String> {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();

        let state = OAuthState {
            sub: user_id.to_string(),
            nonce,
            exp: (Utc::now() + Duration::minutes(OAUTH_STATE_TTL_MINUTES)).timestamp(),
        };

        encode(
            &Header::default(),
            &state,
            &EncodingKey::from_secret(self.state_key().as_bytes()),
        )
        .map_err(|e| AppError::Internal(anyhow::anyhow!("State generation failed: {}", e)))
    }

    /// Returns the user id the state was issued for.
    pub fn verify_oauth_state(&self, state: &str) -> Result<String> {
        let data = decode::<OAuthState>(
            state,
            &DecodingKey::from_secret(self.state_key().as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| AppError::Unauthorized)?;

        Ok(data.claims.sub)
    }

    /// State tokens are signed with a derived key so they never verify as identity tokens.
    fn state_key(&self) -> String {
        format!("{}:spotify-oauth-state", self.jwt_secret)
    }
}
