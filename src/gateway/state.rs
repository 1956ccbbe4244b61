use std::sync::Arc;
use std::time::Duration;

use crate::auth::{JwtSessionVerifier, RemoteSessionVerifier, SessionResolver, TokenSource};
use crate::client::{ClientError, ServiceClient};
use crate::config::{AppConfig, RoleBackend, SessionMode};
use crate::moderation::{Classifier, HttpClassifier, ModerationForwarder};
use crate::roles::{PgRoleStore, RestRoleStore, Role, RoleAuthorizer, RoleStore, StaticRoleStore};

/// Everything one moderation request needs, shared read-only across requests.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<dyn SessionResolver>,
    pub authorizer: Arc<RoleAuthorizer>,
    pub forwarder: Arc<ModerationForwarder>,
    pub max_batch_items: usize,
    pub request_timeout: Option<Duration>,
}

impl AppState {
    pub fn new(
        sessions: Arc<dyn SessionResolver>,
        authorizer: Arc<RoleAuthorizer>,
        forwarder: Arc<ModerationForwarder>,
    ) -> Self {
        Self {
            sessions,
            authorizer,
            forwarder,
            max_batch_items: 100,
            request_timeout: None,
        }
    }

    pub fn with_max_batch_items(mut self, max: usize) -> Self {
        self.max_batch_items = max;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Wires the configured backends onto an already initialized client.
    pub fn from_client(client: &ServiceClient, config: &AppConfig) -> Result<Self, ClientError> {
        let source = TokenSource::new(config.provider.session_cookie.clone());

        let sessions: Arc<dyn SessionResolver> = match config.provider.session_mode {
            SessionMode::Jwt => {
                let secret = config
                    .provider
                    .jwt_secret
                    .as_deref()
                    .ok_or(ClientError::Missing("provider.jwt_secret"))?;
                Arc::new(JwtSessionVerifier::new(
                    source,
                    secret,
                    config.provider.jwt_audience.as_deref(),
                ))
            }
            SessionMode::Remote => Arc::new(
                RemoteSessionVerifier::new(
                    source,
                    client.http.clone(),
                    client.provider_url()?,
                    anon_key(config)?,
                )
                .map_err(|e| invalid_url("auth/v1/user", e))?,
            ),
        };

        let store: Arc<dyn RoleStore> = match config.roles.backend {
            RoleBackend::Postgres => {
                let pool = client
                    .role_pool
                    .clone()
                    .ok_or(ClientError::Missing("roles.database_url"))?;
                Arc::new(PgRoleStore::new(pool))
            }
            RoleBackend::Rest => Arc::new(
                RestRoleStore::new(client.http.clone(), client.provider_url()?, anon_key(config)?)
                    .map_err(|e| invalid_url("rest/v1/user_roles", e))?,
            ),
            RoleBackend::Static => Arc::new(StaticRoleStore::from_assignments(
                config.roles.static_assignments.clone(),
            )),
        };

        let required = config.roles.required.iter().map(|r| Role::parse(r.trim()));
        let authorizer = RoleAuthorizer::new(store, required);

        let endpoint = config
            .classifier
            .endpoint
            .as_deref()
            .ok_or(ClientError::Missing("classifier.endpoint"))?;
        let classifier: Arc<dyn Classifier> = Arc::new(HttpClassifier::new(
            client.http.clone(),
            endpoint_url(endpoint)?,
            config.classifier.api_key.clone(),
            Duration::from_millis(config.classifier.timeout_ms),
        ));
        let forwarder = ModerationForwarder::new(classifier, config.gateway.batch_concurrency);

        tracing::info!(
            "Gateway wired: session={:?} roles={:?} required=[{}]",
            config.provider.session_mode,
            config.roles.backend,
            authorizer
                .required()
                .iter()
                .map(Role::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(Self::new(sessions, Arc::new(authorizer), Arc::new(forwarder))
            .with_max_batch_items(config.gateway.max_batch_items)
            .with_request_timeout(config.gateway.request_timeout_ms.map(Duration::from_millis)))
    }
}

fn anon_key(config: &AppConfig) -> Result<String, ClientError> {
    config
        .provider
        .anon_key
        .clone()
        .ok_or(ClientError::Missing("provider.anon_key"))
}

fn invalid_url(path: &str, err: url::ParseError) -> ClientError {
    ClientError::InvalidUrl {
        url: path.to_string(),
        reason: err.to_string(),
    }
}

/// Classifier endpoints are used as-is, not as a base for joins.
fn endpoint_url(raw: &str) -> Result<url::Url, ClientError> {
    url::Url::parse(raw).map_err(|e| ClientError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}
