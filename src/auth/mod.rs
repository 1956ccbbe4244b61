pub mod jwt;
pub mod remote;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use thiserror::Error;

pub use jwt::{Claims, JwtSessionVerifier};
pub use remote::RemoteSessionVerifier;

/// Authenticated principal recovered from a session token.
///
/// Lives only for the duration of one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub email: Option<String>,
    /// Raw access token, forwarded to the provider when roles are read over REST
    pub access_token: String,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session token in request")]
    MissingToken,

    #[error("malformed authorization header: {0}")]
    MalformedHeader(String),

    #[error("invalid session token: {0}")]
    InvalidToken(String),

    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),
}

/// Turns an inbound request into an identity, or says why it cannot.
#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Identity, SessionError>;
}

/// Where a resolver finds the caller's token.
#[derive(Clone, Debug)]
pub struct TokenSource {
    cookie_name: String,
}

impl TokenSource {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
        }
    }

    pub fn extract(&self, headers: &HeaderMap) -> Result<String, SessionError> {
        extract_access_token(headers, &self.cookie_name)
    }
}

/// Bearer header first, then the named session cookie.
///
/// An `Authorization` header with another scheme (e.g. `Basic`) does not hide
/// the cookie. It is only reported as malformed when no cookie is present.
pub fn extract_access_token(headers: &HeaderMap, cookie_name: &str) -> Result<String, SessionError> {
    let mut header_problem = None;

    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        match auth_header.to_str() {
            Ok(auth_str) => match auth_str.strip_prefix("Bearer ") {
                Some(token) if !token.trim().is_empty() => return Ok(token.trim().to_string()),
                Some(_) => {}
                None => {
                    header_problem = Some(SessionError::MalformedHeader(
                        "Authorization header must use Bearer token format".to_string(),
                    ))
                }
            },
            Err(_) => {
                header_problem = Some(SessionError::MalformedHeader(
                    "non-ASCII Authorization header".to_string(),
                ))
            }
        }
    }

    match cookie_value(headers, cookie_name).filter(|token| !token.is_empty()) {
        Some(token) => Ok(token),
        None => Err(header_problem.unwrap_or(SessionError::MissingToken)),
    }
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
}
