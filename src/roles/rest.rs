use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use url::Url;

use super::{Role, RoleStore, RoleStoreError};
use crate::auth::Identity;

#[derive(Debug, Deserialize)]
struct RoleRow {
    role: String,
}

/// Reads `user_roles` through the provider's REST interface using the
/// caller's own token, so row-level security applies to the lookup.
pub struct RestRoleStore {
    http: reqwest::Client,
    endpoint: Url,
    anon_key: String,
}

impl RestRoleStore {
    pub fn new(http: reqwest::Client, provider_url: &Url, anon_key: impl Into<String>) -> Result<Self, url::ParseError> {
        Ok(Self {
            http,
            endpoint: provider_url.join("rest/v1/user_roles")?,
            anon_key: anon_key.into(),
        })
    }
}

#[async_trait]
impl RoleStore for RestRoleStore {
    async fn get_roles(&self, identity: &Identity) -> Result<HashSet<Role>, RoleStoreError> {
        let user_filter = format!("eq.{}", identity.id);
        let response = self
            .http
            .get(self.endpoint.clone())
            .query(&[("select", "role"), ("user_id", user_filter.as_str())])
            .header("apikey", &self.anon_key)
            .bearer_auth(&identity.access_token)
            .send()
            .await
            .map_err(|e| RoleStoreError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RoleStoreError::Query(format!("{}: {}", status, body)));
        }

        let rows: Vec<RoleRow> = response
            .json()
            .await
            .map_err(|e| RoleStoreError::Query(format!("unreadable role rows: {}", e)))?;

        Ok(rows.into_iter().map(|row| Role::parse(&row.role)).collect())
    }
}
