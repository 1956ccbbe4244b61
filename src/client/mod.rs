use once_cell::sync::Lazy;
use sqlx::PgPool;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use url::Url;

use crate::config::{AppConfig, RoleBackend};
use crate::roles::PgRoleStore;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("service client used before init_client()")]
    NotInitialized,

    #[error("service client already initialized")]
    AlreadyInitialized,

    #[error("missing setting: {0}")]
    Missing(&'static str),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Outbound connections shared by every request: one HTTP client for the
/// identity provider and classifier, and the role database pool when used.
#[derive(Debug)]
pub struct ServiceClient {
    pub http: reqwest::Client,
    pub provider_url: Option<Url>,
    pub role_pool: Option<PgPool>,
}

impl ServiceClient {
    pub fn build(config: &AppConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("moderation-gateway/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let provider_url = config.provider.url.as_deref().map(base_url).transpose()?;

        let role_pool = match config.roles.backend {
            RoleBackend::Postgres => {
                let database_url = config
                    .roles
                    .database_url
                    .as_deref()
                    .ok_or(ClientError::Missing("roles.database_url"))?;
                Some(PgRoleStore::lazy_pool(database_url, config.roles.max_connections)?)
            }
            RoleBackend::Rest | RoleBackend::Static => None,
        };

        Ok(Self {
            http,
            provider_url,
            role_pool,
        })
    }

    pub fn provider_url(&self) -> Result<&Url, ClientError> {
        self.provider_url.as_ref().ok_or(ClientError::Missing("provider.url"))
    }
}

/// Parses a base URL and makes sure relative joins append to its path.
pub fn base_url(raw: &str) -> Result<Url, ClientError> {
    let mut url = Url::parse(raw).map_err(|e| ClientError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

static CLIENT: Lazy<RwLock<Option<Arc<ServiceClient>>>> = Lazy::new(|| RwLock::new(None));

/// Builds the process-wide client. Call once at startup.
pub fn init_client(config: &AppConfig) -> Result<Arc<ServiceClient>, ClientError> {
    let mut slot = CLIENT.write().unwrap_or_else(|poisoned| poisoned.into_inner());
    if slot.is_some() {
        return Err(ClientError::AlreadyInitialized);
    }
    let client = Arc::new(ServiceClient::build(config)?);
    *slot = Some(client.clone());
    tracing::info!("Service client initialized");
    Ok(client)
}

pub fn get_client() -> Result<Arc<ServiceClient>, ClientError> {
    CLIENT
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
        .ok_or(ClientError::NotInitialized)
}

/// Drops the process-wide client so the next init starts clean.
pub fn reset_client() {
    CLIENT.write().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
}
