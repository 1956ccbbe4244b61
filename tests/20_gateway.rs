mod common;

use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Map, Value};
use tower::ServiceExt;

use moderation_gateway::auth::{Identity, JwtSessionVerifier, TokenSource};
use moderation_gateway::config::ServerConfig;
use moderation_gateway::gateway::{self, AppState};
use moderation_gateway::moderation::{
    Classifier, ClassifierError, ModerationForwarder, ModerationItem, ModerationResult,
};
use moderation_gateway::roles::{Role, RoleAuthorizer, RoleStore, RoleStoreError, StaticRoleStore};

/// Echoes each item's text back so results can be matched to inputs.
#[derive(Default)]
struct EchoClassifier {
    calls: AtomicUsize,
    delay: Option<Duration>,
}

#[async_trait]
impl Classifier for EchoClassifier {
    async fn classify(&self, item: &ModerationItem) -> Result<ModerationResult, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let text = item.text().unwrap_or_default().to_string();
        if text == "explode" {
            return Err(ClassifierError::Transport("connection reset".to_string()));
        }
        let flagged = text.contains("spam");
        let mut extra = Map::new();
        extra.insert("input".to_string(), json!(text));
        Ok(ModerationResult {
            flagged,
            categories: BTreeMap::from([("spam".to_string(), flagged)]),
            category_scores: BTreeMap::new(),
            extra,
        })
    }
}

struct BrokenRoleStore;

#[async_trait]
impl RoleStore for BrokenRoleStore {
    async fn get_roles(&self, _identity: &Identity) -> Result<HashSet<Role>, RoleStoreError> {
        Err(RoleStoreError::Unreachable("database is down".to_string()))
    }
}

struct Harness {
    app: Router,
    classifier: Arc<EchoClassifier>,
}

fn harness_with(
    store: Arc<dyn RoleStore>,
    classifier: EchoClassifier,
    timeout: Option<Duration>,
    server: ServerConfig,
) -> Harness {
    let classifier = Arc::new(classifier);
    let sessions = Arc::new(JwtSessionVerifier::new(
        TokenSource::new("sb-access-token"),
        common::JWT_SECRET,
        Some("authenticated"),
    ));
    let authorizer = Arc::new(RoleAuthorizer::new(store, [Role::PhotoTeam, Role::Admin]));
    let forwarder = Arc::new(ModerationForwarder::new(classifier.clone(), 3));
    let state = AppState::new(sessions, authorizer, forwarder)
        .with_max_batch_items(10)
        .with_request_timeout(timeout);

    Harness {
        app: gateway::router(state, &server),
        classifier,
    }
}

fn assignments() -> StaticRoleStore {
    StaticRoleStore::from_assignments([
        ("admin-user", vec!["admin"]),
        ("photo-user", vec!["photo_team"]),
        ("bidder-user", vec!["bidder"]),
        ("customs-user", vec!["customs", "bidder"]),
    ])
}

fn harness() -> Harness {
    harness_with(Arc::new(assignments()), EchoClassifier::default(), None, ServerConfig::default())
}

/// Router that accepts request bodies of at most `limit` bytes.
fn small_body_harness(limit: usize) -> Harness {
    let server = ServerConfig {
        max_request_size_bytes: limit,
        ..ServerConfig::default()
    };
    harness_with(Arc::new(assignments()), EchoClassifier::default(), None, server)
}

async fn post(app: &Router, token: Option<&str>, body: &str) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri("/api/moderate")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn admin_single_item_gets_bare_result() {
    let h = harness();
    let token = common::access_token("admin-user");

    let (status, body) = post(&h.app, Some(&token), r#"{"text":"hello"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["flagged"], false);
    assert_eq!(body["input"], "hello");
    assert!(body.get("results").is_none(), "single input must not be wrapped: {}", body);
    assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn bidder_is_forbidden() {
    let h = harness();
    let token = common::access_token("bidder-user");

    let (status, body) = post(&h.app, Some(&token), r#"{"text":"hello"}"#).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "error": "Forbidden: requires photo_team or admin role" }));
    assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn roles_outside_the_required_set_are_forbidden() {
    let h = harness();
    for sub in ["customs-user", "nobody"] {
        let (status, _) = post(&h.app, Some(&common::access_token(sub)), r#"{"text":"hello"}"#).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "identity {}", sub);
    }
}

#[tokio::test]
async fn missing_session_is_unauthorized() {
    let h = harness();

    let (status, body) = post(&h.app, None, r#"{"text":"hello"}"#).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Unauthorized" }));
    assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn forged_token_is_unauthorized() {
    let h = harness();
    let forged = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &json!({ "sub": "admin-user", "aud": "authenticated", "exp": chrono::Utc::now().timestamp() + 600 }),
        &jsonwebtoken::EncodingKey::from_secret(b"someone-elses-secret"),
    )
    .unwrap();

    let (status, body) = post(&h.app, Some(&forged), r#"{"text":"hello"}"#).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Unauthorized" }));
}

#[tokio::test]
async fn session_cookie_is_accepted() {
    let h = harness();
    let request = Request::builder()
        .method("POST")
        .uri("/api/moderate")
        .header(header::COOKIE, format!("theme=dark; sb-access-token={}", common::access_token("photo-user")))
        .body(Body::from(r#"{"text":"hello"}"#))
        .unwrap();

    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn basic_auth_header_does_not_hide_session_cookie() {
    let h = harness();
    let request = Request::builder()
        .method("POST")
        .uri("/api/moderate")
        .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
        .header(header::COOKIE, format!("sb-access-token={}", common::access_token("admin-user")))
        .body(Body::from(r#"{"text":"hello"}"#))
        .unwrap();

    let response = h.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn photo_team_batch_keeps_order_and_length() {
    let h = harness();
    let token = common::access_token("photo-user");

    let (status, body) = post(&h.app, Some(&token), r#"[{"text":"a"},{"text":"b spam"},{"text":"c"}]"#).await;

    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_array().expect("results array");
    assert_eq!(results.len(), 3);
    let inputs: Vec<_> = results.iter().map(|r| r["input"].as_str().unwrap()).collect();
    assert_eq!(inputs, vec!["a", "b spam", "c"]);
    let flags: Vec<_> = results.iter().map(|r| r["flagged"].as_bool().unwrap()).collect();
    assert_eq!(flags, vec![false, true, false]);
    assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn empty_batch_returns_empty_results() {
    let h = harness();
    let token = common::access_token("admin-user");

    let (status, body) = post(&h.app, Some(&token), "[]").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "results": [] }));
    assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn repeated_requests_keep_status_and_shape() {
    let h = harness();
    let token = common::access_token("admin-user");

    let first = post(&h.app, Some(&token), r#"[{"text":"x"}]"#).await;
    let second = post(&h.app, Some(&token), r#"[{"text":"x"}]"#).await;

    assert_eq!(first.0, second.0);
    assert_eq!(first.1["results"].as_array().unwrap().len(), second.1["results"].as_array().unwrap().len());
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
    let h = harness();
    let token = common::access_token("admin-user");

    for body in ["not json", "42", r#""text""#, r#"[{"text":"a"}, "b"]"#] {
        let (status, json) = post(&h.app, Some(&token), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body {:?}", body);
        assert!(json["error"].is_string());
    }
    assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_body_without_session_is_still_unauthorized() {
    let h = harness();
    let (status, _) = post(&h.app, None, "not json").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn oversized_batch_is_rejected_before_classification() {
    let h = harness();
    let token = common::access_token("admin-user");
    let items: Vec<Value> = (0..11).map(|i| json!({ "text": format!("item {}", i) })).collect();

    let (status, body) = post(&h.app, Some(&token), &Value::Array(items).to_string()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("exceeds"));
    assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);
}

const LONG_BODY: &str = r#"{"text":"this body is well over the sixteen byte limit set for the router"}"#;

#[tokio::test]
async fn oversized_body_without_session_is_still_unauthorized() {
    let h = small_body_harness(16);

    let (status, body) = post(&h.app, None, LONG_BODY).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Unauthorized" }));
}

#[tokio::test]
async fn oversized_body_from_bidder_is_forbidden() {
    let h = small_body_harness(16);

    let (status, body) = post(&h.app, Some(&common::access_token("bidder-user")), LONG_BODY).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "error": "Forbidden: requires photo_team or admin role" }));
}

#[tokio::test]
async fn oversized_body_from_authorized_caller_is_json_413() {
    let h = small_body_harness(16);

    let (status, body) = post(&h.app, Some(&common::access_token("admin-user")), LONG_BODY).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body, json!({ "error": "request body exceeds the size limit" }));
    assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn one_failing_item_fails_the_batch() {
    let h = harness();
    let token = common::access_token("admin-user");

    let (status, body) = post(&h.app, Some(&token), r#"[{"text":"a"},{"text":"explode"},{"text":"c"}]"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Moderation failed" }));
}

#[tokio::test]
async fn role_store_outage_is_reported_distinctly() {
    let h = harness_with(Arc::new(BrokenRoleStore), EchoClassifier::default(), None, ServerConfig::default());
    let token = common::access_token("admin-user");

    let (status, body) = post(&h.app, Some(&token), r#"{"text":"hello"}"#).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "error": "Forbidden: unable to verify roles" }));
    assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn gateway_deadline_turns_slow_classifier_into_failure() {
    let store = StaticRoleStore::from_assignments([("admin-user", vec!["admin"])]);
    let slow = EchoClassifier {
        calls: AtomicUsize::new(0),
        delay: Some(Duration::from_millis(500)),
    };
    let h = harness_with(Arc::new(store), slow, Some(Duration::from_millis(50)), ServerConfig::default());
    let token = common::access_token("admin-user");

    let (status, body) = post(&h.app, Some(&token), r#"{"text":"hello"}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "error": "Moderation failed" }));
}

#[tokio::test]
async fn health_is_public() {
    let h = harness();
    let response = h
        .app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

/// Collects formatted log output so span fields can be inspected.
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[tokio::test]
async fn rejection_stage_is_recorded_on_request_span() {
    let capture = LogCapture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::INFO)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let h = harness();
    let (status, _) = post(&h.app, Some(&common::access_token("bidder-user")), r#"{"text":"hello"}"#).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let logs = capture.contents();
    let line = logs
        .lines()
        .find(|line| line.contains("Moderation request rejected"))
        .unwrap_or_else(|| panic!("no rejection logged in:\n{}", logs));
    assert!(line.contains(r#"stage="role_check""#), "stage missing from span: {}", line);
    assert!(line.contains(r#"identity="bidder-user""#), "identity missing from span: {}", line);
}
