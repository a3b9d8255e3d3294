//! End-to-end tests for the HTTP API.
//!
//! Drives the production router with `tower::ServiceExt::oneshot`. The
//! identity provider and trust authority are replaced by in-process fakes;
//! assertions are signed with the RSA fixture key from `shiblink-core`.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use tower::ServiceExt;

use shiblink_core::attributes::AttributeStore;
use shiblink_core::cipher::{Cipher, CipherKey};
use shiblink_core::error::VerifyError;
use shiblink_core::linking::Linker;
use shiblink_core::resolver::{ApiKeySecret, Resolver};
use shiblink_core::verifier::{AssertionVerifier, ExternalIdentity, PublicKeySource, TokenIntrospector};
use shiblink_server::routes::build_router;
use shiblink_server::routes::link::MAX_ASSERTION_BYTES;
use shiblink_server::state::AppState;
use shiblink_storage::{
    AttributeRecord, BatchOutcome, MemoryRecordStore, RecordStore, RecordWrite, StorageError,
};

const SIGNING_KEY: &str = include_str!("../../shiblink-core/tests/fixtures/signing_key.pem");
const PUBLIC_KEY: &str = include_str!("../../shiblink-core/tests/fixtures/public_key.pem");

const API_KEY: &str = "s3cret";
const GOOD_BEARER: &str = "Bearer good-token";

// ── Fakes ────────────────────────────────────────────────────────────

struct FakeProvider;

#[async_trait::async_trait]
impl TokenIntrospector for FakeProvider {
    async fn introspect(&self, token: &str) -> Result<ExternalIdentity, VerifyError> {
        match token {
            "good-token" => ExternalIdentity::from_token_info(r#"{"sub":"abc123"}"#),
            "other-token" => ExternalIdentity::from_token_info(r#"{"sub":"xyz789"}"#),
            _ => Err(VerifyError::InvalidExternalToken {
                body: r#"{"error_description":"Invalid Value"}"#.to_owned(),
            }),
        }
    }
}

struct FixtureKey;

#[async_trait::async_trait]
impl PublicKeySource for FixtureKey {
    async fn public_key_pem(&self, _environment: &str) -> Result<String, VerifyError> {
        Ok(PUBLIC_KEY.to_owned())
    }
}

struct KeyHostDown;

#[async_trait::async_trait]
impl PublicKeySource for KeyHostDown {
    async fn public_key_pem(&self, environment: &str) -> Result<String, VerifyError> {
        Err(VerifyError::KeyFetch {
            url: format!("https://trust.example.org/{environment}/public-key.pem"),
            reason: "status 503".to_owned(),
        })
    }
}

/// Reads as empty and reports every batch as touching no rows.
struct LosingRaceStore;

#[async_trait::async_trait]
impl RecordStore for LosingRaceStore {
    async fn fetch_all(&self, _account_id: &str) -> Result<Vec<AttributeRecord>, StorageError> {
        Ok(Vec::new())
    }

    async fn insert(&self, _record: &AttributeRecord) -> Result<u64, StorageError> {
        Ok(0)
    }

    async fn update(&self, _record: &AttributeRecord) -> Result<u64, StorageError> {
        Ok(0)
    }

    async fn apply(&self, _writes: &[RecordWrite]) -> Result<BatchOutcome, StorageError> {
        Ok(BatchOutcome::Aborted {
            index: 0,
            affected: 0,
        })
    }
}

/// Database that accepts every statement but drops the connection on commit.
struct CommitFailsStore;

#[async_trait::async_trait]
impl RecordStore for CommitFailsStore {
    async fn fetch_all(&self, _account_id: &str) -> Result<Vec<AttributeRecord>, StorageError> {
        Ok(Vec::new())
    }

    async fn insert(&self, _record: &AttributeRecord) -> Result<u64, StorageError> {
        Ok(1)
    }

    async fn update(&self, _record: &AttributeRecord) -> Result<u64, StorageError> {
        Ok(1)
    }

    async fn apply(&self, _writes: &[RecordWrite]) -> Result<BatchOutcome, StorageError> {
        Err(StorageError::Transaction {
            reason: "commit failed: connection reset by 10.0.0.9".to_owned(),
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

struct TestApp {
    router: Router,
    records: MemoryRecordStore,
}

fn build_app(
    keys: Arc<dyn PublicKeySource>,
    records: Arc<dyn RecordStore>,
    dev_mode: bool,
) -> Router {
    let attributes = Arc::new(AttributeStore::new(
        records,
        Arc::new(Cipher::new(CipherKey::generate())),
    ));
    let resolver = Resolver::new(Some(ApiKeySecret::new(API_KEY)), Arc::new(FakeProvider));
    let linker = Linker::new(AssertionVerifier::new(keys), Arc::clone(&attributes), "dev");
    build_router(Arc::new(AppState::new(resolver, attributes, linker, dev_mode)))
}

fn app() -> TestApp {
    app_with_dev_mode(false)
}

fn app_with_dev_mode(dev_mode: bool) -> TestApp {
    let records = MemoryRecordStore::new();
    let router = build_app(Arc::new(FixtureKey), Arc::new(records.clone()), dev_mode);
    TestApp { router, records }
}

fn assertion(username: &str, iat: i64) -> String {
    let key = EncodingKey::from_rsa_pem(SIGNING_KEY.as_bytes()).unwrap();
    jsonwebtoken::encode(
        &Header::new(Algorithm::RS256),
        &json!({"eraCommonsUsername": username, "iat": iat}),
        &key,
    )
    .unwrap()
}

fn tamper(token: &str) -> String {
    let (head, signature) = token.rsplit_once('.').unwrap();
    let mut chars: Vec<char> = signature.chars().collect();
    let mid = chars.len() / 2;
    chars[mid] = if chars[mid] == 'A' { 'B' } else { 'A' };
    format!("{head}.{}", chars.into_iter().collect::<String>())
}

struct Reply {
    status: StatusCode,
    headers: axum::http::HeaderMap,
    body: Value,
}

async fn send(router: &Router, method: Method, uri: &str, auth: Option<&str>, body: String) -> Reply {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    let response = router
        .clone()
        .oneshot(builder.body(Body::from(body)).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    Reply {
        status,
        headers,
        body,
    }
}

async fn get_me(router: &Router, auth: Option<&str>) -> Reply {
    send(router, Method::GET, "/me", auth, String::new()).await
}

async fn link(router: &Router, auth: Option<&str>, assertion: String) -> Reply {
    send(router, Method::POST, "/shibboleth-token", auth, assertion).await
}

fn assert_error_body(body: &Value) {
    for key in body.as_object().unwrap().keys() {
        assert!(
            ["error", "reason", "message"].contains(&key.as_str()),
            "unexpected field {key}"
        );
    }
}

// ── Health ───────────────────────────────────────────────────────────

#[tokio::test]
async fn health_needs_no_credentials() {
    let app = app();
    let reply = send(&app.router, Method::GET, "/health", None, String::new()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({"status": "ok"}));
}

#[tokio::test]
async fn security_headers_are_set() {
    let app = app();
    let reply = send(&app.router, Method::GET, "/health", None, String::new()).await;
    assert_eq!(reply.headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(reply.headers[header::X_FRAME_OPTIONS], "DENY");
    assert_eq!(reply.headers[header::CACHE_CONTROL], "no-store");
}

// ── Authentication ───────────────────────────────────────────────────

#[tokio::test]
async fn missing_header_is_unauthorized() {
    let app = app();
    let reply = get_me(&app.router, None).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["error"], "unauthorized");
    assert_eq!(reply.body["reason"], "missing-header");
    assert_error_body(&reply.body);
}

#[tokio::test]
async fn unknown_scheme_is_unauthorized() {
    let app = app();
    let reply = get_me(&app.router, Some("Basic dXNlcjpwYXNz")).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["reason"], "invalid-auth-type");
}

#[tokio::test]
async fn rejected_bearer_token_does_not_leak_provider_response() {
    let app = app();
    let reply = get_me(&app.router, Some("Bearer expired")).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["reason"], "invalid-bearer-token");
    assert!(!reply.body.to_string().contains("Invalid Value"));
    assert_error_body(&reply.body);
}

#[tokio::test]
async fn api_key_caller_cannot_read_attributes() {
    let app = app();
    let reply = get_me(&app.router, Some(&format!("Key {API_KEY}"))).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body["error"], "forbidden");
}

#[tokio::test]
async fn wrong_api_key_is_unauthorized() {
    let app = app();
    let reply = get_me(&app.router, Some("Key nope")).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply.body["reason"], "invalid-key");
}

// ── Attributes and linking ───────────────────────────────────────────

#[tokio::test]
async fn new_account_has_no_attributes() {
    let app = app();
    let reply = get_me(&app.router, Some(GOOD_BEARER)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, json!({}));
}

#[tokio::test]
async fn link_then_read_back() {
    let app = app();
    let reply = link(&app.router, Some(GOOD_BEARER), assertion("jdoe", 1_700_000_000)).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(
        reply.body,
        json!({
            "linkedNihUsername": "jdoe",
            "lastLinkTime": "1700000000",
            "linkExpireTime": "1702592000",
            "lastLinkTimeHuman": "Tue, 14 Nov 2023 22:13:20 +0000",
            "linkExpireTimeHuman": "Thu, 14 Dec 2023 22:13:20 +0000",
        })
    );

    let me = get_me(&app.router, Some(GOOD_BEARER)).await;
    assert_eq!(me.status, StatusCode::OK);
    assert_eq!(
        me.body,
        json!({
            "lastLinkTime": "1700000000",
            "linkExpireTime": "1702592000",
            "linkedNihUsername": "jdoe",
        })
    );

    // Another subject sees nothing.
    let other = get_me(&app.router, Some("Bearer other-token")).await;
    assert_eq!(other.body, json!({}));
}

#[tokio::test]
async fn tampered_assertion_is_rejected_and_nothing_is_stored() {
    let app = app();
    let reply = link(
        &app.router,
        Some(GOOD_BEARER),
        tamper(&assertion("jdoe", 1_700_000_000)),
    )
    .await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body["error"], "bad_request");
    assert_error_body(&reply.body);
    assert!(app.records.is_empty().await);
}

#[tokio::test]
async fn malformed_assertion_is_bad_request() {
    let app = app();
    let reply = link(&app.router, Some(GOOD_BEARER), "definitely not a jwt".to_owned()).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(app.records.is_empty().await);
}

#[tokio::test]
async fn link_requires_bearer_identity() {
    let app = app();
    let token = assertion("jdoe", 1_700_000_000);

    let reply = link(&app.router, None, token.clone()).await;
    assert_eq!(reply.status, StatusCode::UNAUTHORIZED);

    let reply = link(&app.router, Some(&format!("Key {API_KEY}")), token).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert!(app.records.is_empty().await);
}

#[tokio::test]
async fn oversized_assertion_is_rejected() {
    let app = app();
    let reply = link(&app.router, Some(GOOD_BEARER), "a".repeat(MAX_ASSERTION_BYTES + 1)).await;
    assert_eq!(reply.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(reply.body["error"], "payload_too_large");
}

#[tokio::test]
async fn unreachable_key_host_is_bad_gateway() {
    let records = MemoryRecordStore::new();
    let router = build_app(Arc::new(KeyHostDown), Arc::new(records.clone()), false);
    let reply = link(&router, Some(GOOD_BEARER), assertion("jdoe", 1_700_000_000)).await;
    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.body["error"], "upstream_error");
    assert!(!reply.body.to_string().contains("trust.example.org"));
    assert!(records.is_empty().await);
}

#[tokio::test]
async fn lost_write_race_is_conflict() {
    let router = build_app(Arc::new(FixtureKey), Arc::new(LosingRaceStore), false);
    let reply = link(&router, Some(GOOD_BEARER), assertion("jdoe", 1_700_000_000)).await;
    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.body["error"], "conflict");
}

#[tokio::test]
async fn store_write_fault_is_bad_gateway() {
    let router = build_app(Arc::new(FixtureKey), Arc::new(CommitFailsStore), false);
    let reply = link(&router, Some(GOOD_BEARER), assertion("jdoe", 1_700_000_000)).await;
    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.body["error"], "upstream_error");
    assert!(!reply.body.to_string().contains("10.0.0.9"));
    assert!(!reply.body.to_string().contains("commit failed"));
}

// ── Dev reload gate ──────────────────────────────────────────────────

#[tokio::test]
async fn reload_gate_accepts_api_key_in_dev_mode() {
    let app = app_with_dev_mode(true);
    let reply = send(
        &app.router,
        Method::POST,
        "/.src",
        Some(&format!("key {API_KEY}")),
        String::new(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn reload_gate_rejects_bearer_identity() {
    let app = app_with_dev_mode(true);
    let reply = send(&app.router, Method::POST, "/.src", Some(GOOD_BEARER), String::new()).await;
    assert_eq!(reply.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn reload_gate_is_absent_outside_dev_mode() {
    let app = app();
    let reply = send(
        &app.router,
        Method::POST,
        "/.src",
        Some(&format!("Key {API_KEY}")),
        String::new(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);
}
