use async_trait::async_trait;
use axum::http::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;
use url::Url;

use super::{Identity, SessionError, SessionResolver, TokenSource};

#[derive(Debug, Deserialize)]
struct ProviderUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Asks the identity provider's auth API to resolve the access token.
///
/// Used when tokens cannot be checked locally, e.g. asymmetric signing keys
/// or when revoked sessions must be rejected immediately.
pub struct RemoteSessionVerifier {
    source: TokenSource,
    http: reqwest::Client,
    user_endpoint: Url,
    anon_key: String,
}

impl RemoteSessionVerifier {
    pub fn new(
        source: TokenSource,
        http: reqwest::Client,
        provider_url: &Url,
        anon_key: impl Into<String>,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            source,
            http,
            user_endpoint: provider_url.join("auth/v1/user")?,
            anon_key: anon_key.into(),
        })
    }

    pub async fn verify(&self, token: &str) -> Result<Identity, SessionError> {
        let response = self
            .http
            .get(self.user_endpoint.clone())
            .header("apikey", &self.anon_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| SessionError::ProviderUnavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let user: ProviderUser = response
                    .json()
                    .await
                    .map_err(|e| SessionError::ProviderUnavailable(format!("unreadable user response: {}", e)))?;

                if user.id.trim().is_empty() {
                    return Err(SessionError::InvalidToken("provider returned a user without id".to_string()));
                }

                Ok(Identity {
                    id: user.id,
                    email: user.email,
                    access_token: token.to_string(),
                })
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(SessionError::InvalidToken(format!(
                "provider rejected token with {}",
                response.status()
            ))),
            status => Err(SessionError::ProviderUnavailable(format!(
                "provider answered {}",
                status
            ))),
        }
    }
}

#[async_trait]
impl SessionResolver for RemoteSessionVerifier {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Identity, SessionError> {
        let token = self.source.extract(headers)?;
        self.verify(&token).await
    }
}
