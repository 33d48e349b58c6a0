use confero_config::JwtSettings;
use jsonwebtoken::{DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token expired")]
    TokenExpired,
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

impl From<AuthError> for CoreError {
    fn from(_: AuthError) -> Self {
        CoreError::Unauthenticated
    }
}

/// The only claim this system trusts: who the token says the caller is.
/// Issuing the token — registration, login, refresh — is an external concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub iss: Option<String>,
    pub exp: i64,
}

pub struct JoinTokenVerifier {
    settings: JwtSettings,
    decoding_key: DecodingKey,
}

impl JoinTokenVerifier {
    pub fn new(settings: JwtSettings) -> Self {
        let decoding_key = DecodingKey::from_secret(settings.secret.as_bytes());
        Self {
            settings,
            decoding_key,
        }
    }

    /// Verifies a join token carried on `joinRoom` and returns the caller's userId.
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        let mut validation = Validation::default();
        if !self.settings.issuer.is_empty() {
            validation.set_issuer(&[&self.settings.issuer]);
        }

        let data = decode::<Claims>(token, &self.decoding_key, &validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        Ok(data.claims.sub)
    }
}
