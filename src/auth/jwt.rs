use async_trait::async_trait;
use axum::http::HeaderMap;
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use super::{Identity, SessionError, SessionResolver, TokenSource};

/// Claims carried by provider-issued access tokens
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
}

/// Verifies HS256 access tokens locally with the provider's JWT secret.
pub struct JwtSessionVerifier {
    source: TokenSource,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtSessionVerifier {
    pub fn new(source: TokenSource, secret: &str, audience: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        match audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }

        Self {
            source,
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Validate JWT token and extract claims
    pub fn verify(&self, token: &str) -> Result<Claims, SessionError> {
        let token_data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            let reason = match e.kind() {
                ErrorKind::ExpiredSignature => "token expired".to_string(),
                ErrorKind::InvalidSignature => "signature mismatch".to_string(),
                ErrorKind::InvalidAudience => "audience mismatch".to_string(),
                _ => e.to_string(),
            };
            SessionError::InvalidToken(reason)
        })?;

        if token_data.claims.sub.trim().is_empty() {
            return Err(SessionError::InvalidToken("token has no subject".to_string()));
        }

        Ok(token_data.claims)
    }
}

#[async_trait]
impl SessionResolver for JwtSessionVerifier {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Identity, SessionError> {
        let token = self.source.extract(headers)?;
        let claims = self.verify(&token)?;

        Ok(Identity {
            id: claims.sub,
            email: claims.email,
            access_token: token,
        })
    }
}
