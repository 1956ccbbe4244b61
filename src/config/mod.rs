use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("missing configuration: {0}")]
    Missing(&'static str),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub roles: RolesConfig,
    pub classifier: ClassifierConfig,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_request_size_bytes: usize,
    /// Empty means permissive CORS.
    pub cors_origins: Vec<String>,
}

/// How a session token is turned into an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Verify the provider-issued JWT locally with the shared secret
    Jwt,
    /// Ask the provider's auth API who the token belongs to
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub url: Option<String>,
    pub anon_key: Option<String>,
    pub jwt_secret: Option<String>,
    pub jwt_audience: Option<String>,
    pub session_cookie: String,
    pub session_mode: SessionMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleBackend {
    Postgres,
    Rest,
    Static,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesConfig {
    pub backend: RoleBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
    /// Any one of these grants access. Order is kept for error messages.
    pub required: Vec<String>,
    /// identity id -> role names, used by the static backend
    pub static_assignments: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub max_batch_items: usize,
    pub batch_concurrency: usize,
    pub request_timeout_ms: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::development()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        AppConfig::development().server
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        AppConfig::development().provider
    }
}

impl Default for RolesConfig {
    fn default() -> Self {
        AppConfig::development().roles
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        AppConfig::development().classifier
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        AppConfig::development().gateway
    }
}

impl AppConfig {
    /// Profile defaults, then the optional YAML file, then env overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::for_environment(Self::environment_from_env()),
        };
        Ok(base.with_env_overrides())
    }

    fn environment_from_env() -> Environment {
        match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        }
    }

    fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// YAML laid over the profile it names, or over the `APP_ENV` profile.
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        Self::from_yaml_over(raw, Self::environment_from_env())
    }

    pub fn from_yaml_over(raw: &str, fallback: Environment) -> Result<Self, serde_yaml::Error> {
        let overlay: Value = serde_yaml::from_str(raw)?;
        let environment = match overlay.get("environment") {
            Some(value) => serde_yaml::from_value(value.clone())?,
            None => fallback,
        };

        let mut merged = serde_yaml::to_value(Self::for_environment(environment))?;
        merge_yaml(&mut merged, overlay);
        serde_yaml::from_value(merged)
    }

    fn with_env_overrides(mut self) -> Self {
        // Server overrides
        if let Ok(v) = env::var("GATEWAY_HOST") {
            self.server.host = v;
        }
        if let Some(port) = env::var("GATEWAY_PORT")
            .ok()
            .or_else(|| env::var("PORT").ok())
            .and_then(|s| s.parse::<u16>().ok())
        {
            self.server.port = port;
        }
        if let Ok(v) = env::var("MAX_REQUEST_SIZE_BYTES") {
            self.server.max_request_size_bytes = v.parse().unwrap_or(self.server.max_request_size_bytes);
        }
        if let Ok(v) = env::var("CORS_ORIGINS") {
            self.server.cors_origins = split_list(&v);
        }

        // Provider overrides
        if let Ok(v) = env::var("PROVIDER_URL") {
            self.provider.url = Some(v);
        }
        if let Ok(v) = env::var("PROVIDER_ANON_KEY") {
            self.provider.anon_key = Some(v);
        }
        if let Ok(v) = env::var("PROVIDER_JWT_SECRET") {
            self.provider.jwt_secret = Some(v);
        }
        if let Ok(v) = env::var("PROVIDER_JWT_AUDIENCE") {
            self.provider.jwt_audience = if v.trim().is_empty() { None } else { Some(v) };
        }
        if let Ok(v) = env::var("SESSION_COOKIE_NAME") {
            self.provider.session_cookie = v;
        }
        if let Ok(v) = env::var("SESSION_MODE") {
            match v.as_str() {
                "jwt" => self.provider.session_mode = SessionMode::Jwt,
                "remote" => self.provider.session_mode = SessionMode::Remote,
                other => tracing::warn!("Ignoring unknown SESSION_MODE '{}'", other),
            }
        }

        // Role store overrides
        if let Ok(v) = env::var("ROLE_BACKEND") {
            match v.as_str() {
                "postgres" => self.roles.backend = RoleBackend::Postgres,
                "rest" => self.roles.backend = RoleBackend::Rest,
                "static" => self.roles.backend = RoleBackend::Static,
                other => tracing::warn!("Ignoring unknown ROLE_BACKEND '{}'", other),
            }
        }
        if let Ok(v) = env::var("DATABASE_URL") {
            self.roles.database_url = Some(v);
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.roles.max_connections = v.parse().unwrap_or(self.roles.max_connections);
        }
        if let Ok(v) = env::var("REQUIRED_ROLES") {
            self.roles.required = split_list(&v);
        }

        // Classifier overrides
        if let Ok(v) = env::var("CLASSIFIER_URL") {
            self.classifier.endpoint = Some(v);
        }
        if let Ok(v) = env::var("CLASSIFIER_API_KEY") {
            self.classifier.api_key = Some(v);
        }
        if let Ok(v) = env::var("CLASSIFIER_TIMEOUT_MS") {
            self.classifier.timeout_ms = v.parse().unwrap_or(self.classifier.timeout_ms);
        }

        // Gateway overrides
        if let Ok(v) = env::var("MAX_BATCH_ITEMS") {
            self.gateway.max_batch_items = v.parse().unwrap_or(self.gateway.max_batch_items);
        }
        if let Ok(v) = env::var("BATCH_CONCURRENCY") {
            self.gateway.batch_concurrency = v.parse().unwrap_or(self.gateway.batch_concurrency);
        }
        if let Ok(v) = env::var("REQUEST_TIMEOUT_MS") {
            self.gateway.request_timeout_ms = timeout_override(&v, self.gateway.request_timeout_ms);
        }

        self
    }

    /// Checks that every selected backend has the settings it needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.provider.session_mode {
            SessionMode::Jwt => {
                if is_blank(&self.provider.jwt_secret) {
                    return Err(ConfigError::Missing("provider.jwt_secret (PROVIDER_JWT_SECRET)"));
                }
            }
            SessionMode::Remote => {
                if is_blank(&self.provider.url) {
                    return Err(ConfigError::Missing("provider.url (PROVIDER_URL)"));
                }
                if is_blank(&self.provider.anon_key) {
                    return Err(ConfigError::Missing("provider.anon_key (PROVIDER_ANON_KEY)"));
                }
            }
        }

        match self.roles.backend {
            RoleBackend::Postgres => {
                if is_blank(&self.roles.database_url) {
                    return Err(ConfigError::Missing("roles.database_url (DATABASE_URL)"));
                }
            }
            RoleBackend::Rest => {
                if is_blank(&self.provider.url) {
                    return Err(ConfigError::Missing("provider.url (PROVIDER_URL)"));
                }
                if is_blank(&self.provider.anon_key) {
                    return Err(ConfigError::Missing("provider.anon_key (PROVIDER_ANON_KEY)"));
                }
            }
            RoleBackend::Static => {}
        }

        if self.roles.required.iter().all(|r| r.trim().is_empty()) {
            return Err(ConfigError::Invalid("roles.required must name at least one role".to_string()));
        }

        if is_blank(&self.classifier.endpoint) {
            return Err(ConfigError::Missing("classifier.endpoint (CLASSIFIER_URL)"));
        }

        if self.gateway.batch_concurrency == 0 {
            return Err(ConfigError::Invalid("gateway.batch_concurrency must be at least 1".to_string()));
        }

        for url in [&self.provider.url, &self.classifier.endpoint].into_iter().flatten() {
            url::Url::parse(url).map_err(|e| ConfigError::Invalid(format!("'{}' is not a valid URL: {}", url, e)))?;
        }

        Ok(())
    }

    /// Copy safe to print: secrets are replaced with a marker.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let mask = |v: &mut Option<String>| {
            if v.is_some() {
                *v = Some("<redacted>".to_string());
            }
        };
        mask(&mut copy.provider.anon_key);
        mask(&mut copy.provider.jwt_secret);
        mask(&mut copy.classifier.api_key);
        if let Some(db) = copy.roles.database_url.as_mut() {
            if let Ok(mut parsed) = url::Url::parse(db) {
                if parsed.password().is_some() {
                    let _ = parsed.set_password(Some("redacted"));
                    *db = parsed.to_string();
                }
            }
        }
        copy
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
                max_request_size_bytes: 10 * 1024 * 1024, // 10MB
                cors_origins: Vec::new(),
            },
            provider: ProviderConfig {
                url: None,
                anon_key: None,
                jwt_secret: None,
                jwt_audience: Some("authenticated".to_string()),
                session_cookie: "sb-access-token".to_string(),
                session_mode: SessionMode::Jwt,
            },
            roles: RolesConfig {
                backend: RoleBackend::Static,
                database_url: None,
                max_connections: 5,
                required: default_required_roles(),
                static_assignments: HashMap::new(),
            },
            classifier: ClassifierConfig {
                endpoint: None,
                api_key: None,
                timeout_ms: 30_000,
            },
            gateway: GatewayConfig {
                max_batch_items: 100,
                batch_concurrency: 4,
                request_timeout_ms: None,
            },
        }
    }

    fn staging() -> Self {
        let mut config = Self::development();
        config.environment = Environment::Staging;
        config.server.host = "0.0.0.0".to_string();
        config.server.max_request_size_bytes = 5 * 1024 * 1024; // 5MB
        config.roles.backend = RoleBackend::Postgres;
        config.roles.max_connections = 10;
        config.gateway.request_timeout_ms = Some(60_000);
        config
    }

    fn production() -> Self {
        let mut config = Self::staging();
        config.environment = Environment::Production;
        config.server.max_request_size_bytes = 2 * 1024 * 1024; // 2MB
        config.roles.max_connections = 20;
        config.classifier.timeout_ms = 15_000;
        config.gateway.max_batch_items = 50;
        config.gateway.request_timeout_ms = Some(30_000);
        config
    }
}

fn default_required_roles() -> Vec<String> {
    vec!["photo_team".to_string(), "admin".to_string()]
}

/// Mappings merge key by key; any other value replaces. Null keeps the base.
fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Empty, `none` or `0` turns the deadline off. Unparsable input keeps `current`.
fn timeout_override(raw: &str, current: Option<u64>) -> Option<u64> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "0" || raw.eq_ignore_ascii_case("none") {
        return None;
    }
    match raw.parse() {
        Ok(ms) => Some(ms),
        Err(_) => {
            tracing::warn!("Ignoring invalid REQUEST_TIMEOUT_MS '{}'", raw);
            current
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map(str::trim).map_or(true, str::is_empty)
}
