#![allow(dead_code)]

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;

pub const JWT_SECRET: &str = "integration-test-secret";

const CONFIG_YAML: &str = r#"
environment: development
roles:
  backend: static
  static_assignments:
    admin-user: [admin]
    photo-user: [photo_team]
    bidder-user: [bidder]
"#;

/// Signs an access token the way the identity provider would.
pub fn access_token(sub: &str) -> String {
    let now = Utc::now().timestamp();
    let claims = json!({
        "sub": sub,
        "aud": "authenticated",
        "role": "authenticated",
        "iat": now,
        "exp": now + 3600,
    });
    encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET.as_bytes()))
        .expect("token encodes")
}

/// The real binary on a free port. Killed when dropped.
pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    child: Child,
    config_path: PathBuf,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        let server = Self::spawn()?;
        server.wait_ready(Duration::from_secs(10)).await?;
        Ok(server)
    }

    fn spawn() -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);

        let config_path = std::env::temp_dir().join(format!("moderation-gateway-test-{}.yaml", port));
        std::fs::write(&config_path, CONFIG_YAML).context("failed to write test config")?;

        // Port 9 (discard) on loopback refuses connections, so classifier calls fail fast
        let child = Command::new(env!("CARGO_BIN_EXE_moderation-gateway"))
            .arg("serve")
            .env("GATEWAY_CONFIG", &config_path)
            .env("APP_ENV", "development")
            .env("GATEWAY_HOST", "127.0.0.1")
            .env("GATEWAY_PORT", port.to_string())
            .env("SESSION_MODE", "jwt")
            .env("PROVIDER_JWT_SECRET", JWT_SECRET)
            .env("PROVIDER_JWT_AUDIENCE", "authenticated")
            .env("ROLE_BACKEND", "static")
            .env("REQUIRED_ROLES", "photo_team,admin")
            .env("CLASSIFIER_URL", "http://127.0.0.1:9/moderate")
            .env("CLASSIFIER_TIMEOUT_MS", "2000")
            .env("MAX_BATCH_ITEMS", "5")
            .env_remove("REQUEST_TIMEOUT_MS")
            .env_remove("PORT")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .context("failed to spawn server binary")?;

        Ok(Self {
            port,
            base_url,
            child,
            config_path,
        })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            let url = format!("{}/health", self.base_url);
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_file(&self.config_path);
    }
}
