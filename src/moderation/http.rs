use async_trait::async_trait;
use std::time::Duration;
use url::Url;

use super::{Classifier, ClassifierError, ModerationItem, ModerationResult};

/// Classifier reached over HTTP: one `POST` per item, item JSON as the body.
#[derive(Debug, Clone)]
pub struct HttpClassifier {
    http: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpClassifier {
    pub fn new(http: reqwest::Client, endpoint: Url, api_key: Option<String>, timeout: Duration) -> Self {
        Self {
            http,
            endpoint,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            timeout,
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, item: &ModerationItem) -> Result<ModerationResult, ClassifierError> {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .json(item);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ClassifierError::Timeout(self.timeout.as_millis() as u64)
            } else {
                ClassifierError::Transport(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ClassifierError::Timeout(self.timeout.as_millis() as u64)
            } else {
                ClassifierError::Transport(e.to_string())
            }
        })?;

        serde_json::from_slice(&bytes).map_err(|e| ClassifierError::InvalidResponse(e.to_string()))
    }
}
