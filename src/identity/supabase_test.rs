use super::*;
use std::collections::HashMap;

use axum::Router;
use axum::extract::{Json, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::json;

const USER_ID: &str = "7b0c1a52-1a0e-4d8e-9a37-0a4f3c1d2e11";

// =============================================================================
// SupabaseConfig
// =============================================================================

#[test]
fn config_trims_trailing_slash() {
    let config = SupabaseConfig::new("https://proj.supabase.co/ ", " anon ");
    assert_eq!(config.url, "https://proj.supabase.co");
    assert_eq!(config.anon_key, "anon");
}

#[test]
fn config_builds_service_urls() {
    let config = SupabaseConfig::new("https://proj.supabase.co", "k");
    assert_eq!(config.auth_url("token"), "https://proj.supabase.co/auth/v1/token");
    assert_eq!(config.rest_url("profiles"), "https://proj.supabase.co/rest/v1/profiles");
}

#[test]
fn config_uses_default_timeouts() {
    let config = SupabaseConfig::new("http://localhost", "k");
    assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    assert_eq!(config.connect_timeout_secs, DEFAULT_CONNECT_TIMEOUT_SECS);
}

// =============================================================================
// error_message / error_from_response
// =============================================================================

#[test]
fn error_message_prefers_msg_field() {
    let body = r#"{"code":400,"error_code":"invalid_credentials","msg":"Invalid login credentials"}"#;
    assert_eq!(error_message(400, body), "Invalid login credentials");
}

#[test]
fn error_message_reads_legacy_error_description() {
    let body = r#"{"error":"invalid_grant","error_description":"Email not confirmed"}"#;
    assert_eq!(error_message(400, body), "Email not confirmed");
}

#[test]
fn error_message_reads_postgrest_message() {
    let body = r#"{"code":"42501","message":"permission denied for table profiles"}"#;
    assert_eq!(error_message(401, body), "permission denied for table profiles");
}

#[test]
fn error_message_falls_back_to_plain_body() {
    assert_eq!(error_message(502, "Bad Gateway\n"), "Bad Gateway");
}

#[test]
fn error_message_falls_back_to_status_for_empty_body() {
    assert_eq!(error_message(429, ""), "request failed with status 429");
    assert_eq!(error_message(400, "{}"), "request failed with status 400");
}

#[test]
fn client_errors_are_auth_errors() {
    let err = error_from_response(422, r#"{"msg":"User already registered"}"#);
    assert_eq!(err, IdentityError::auth(422, "User already registered"));
}

#[test]
fn server_errors_are_transport_errors() {
    let err = error_from_response(503, "upstream down");
    assert!(!err.is_auth());
    assert!(err.to_string().contains("503"));
    assert!(err.to_string().contains("upstream down"));
}

// =============================================================================
// parse_session / parse_sign_up / is_no_rows
// =============================================================================

fn user_json() -> serde_json::Value {
    json!({
        "id": USER_ID,
        "email": "a@b.com",
        "created_at": "2025-03-14T09:26:53Z",
        "user_metadata": {"full_name": "Ada", "company": null}
    })
}

fn session_json() -> serde_json::Value {
    json!({
        "access_token": "at-123",
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": "rt-456",
        "user": user_json()
    })
}

#[test]
fn parse_session_rejects_garbage() {
    let err = parse_session("not json").unwrap_err();
    assert!(matches!(err, IdentityError::Decode(_)));
}

#[test]
fn parse_sign_up_with_session() {
    let outcome = parse_sign_up(&session_json().to_string()).unwrap();
    let session = outcome.session.unwrap();
    assert_eq!(session.access_token, "at-123");
    assert_eq!(outcome.user.unwrap().email, "a@b.com");
}

#[test]
fn parse_sign_up_with_bare_user() {
    let outcome = parse_sign_up(&user_json().to_string()).unwrap();
    assert!(outcome.session.is_none());
    assert_eq!(outcome.user.unwrap().id.to_string(), USER_ID);
}

#[test]
fn parse_sign_up_with_wrapped_user() {
    let body = json!({ "user": user_json(), "session": null }).to_string();
    let outcome = parse_sign_up(&body).unwrap();
    assert!(outcome.session.is_none());
    assert!(outcome.user.is_some());
}

#[test]
fn parse_sign_up_with_null_user() {
    let outcome = parse_sign_up(r#"{"user":null,"session":null}"#).unwrap();
    assert!(outcome.user.is_none());
    assert!(outcome.session.is_none());
}

#[test]
fn is_no_rows_detects_pgrst116() {
    let body = r#"{"code":"PGRST116","details":"The result contains 0 rows","message":"JSON object requested, multiple (or no) rows returned"}"#;
    assert!(is_no_rows(406, body));
    assert!(!is_no_rows(400, body));
    assert!(!is_no_rows(406, r#"{"code":"PGRST100"}"#));
    assert!(!is_no_rows(406, "not json"));
}

// =============================================================================
// HTTP round trips against a stub project
// =============================================================================

fn has_anon_key(headers: &HeaderMap) -> bool {
    headers.get("apikey").and_then(|v| v.to_str().ok()) == Some("anon")
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

async fn token(
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if !has_anon_key(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "No API key found in request"}))).into_response();
    }
    match params.get("grant_type").map(String::as_str) {
        Some("password") if body["password"] == "secret1" => Json(session_json()).into_response(),
        Some("password") => (
            StatusCode::BAD_REQUEST,
            Json(json!({"code": 400, "error_code": "invalid_credentials", "msg": "Invalid login credentials"})),
        )
            .into_response(),
        Some("refresh_token") => (StatusCode::SERVICE_UNAVAILABLE, "upstream unavailable").into_response(),
        _ => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn signup(Json(body): Json<serde_json::Value>) -> Response {
    if body["email"] == "dup@b.com" {
        return (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"msg": "User already registered"}))).into_response();
    }
    let mut user = user_json();
    user["user_metadata"] = body["data"].clone();
    Json(user).into_response()
}

async fn user(headers: HeaderMap) -> Response {
    match bearer(&headers).as_deref() {
        Some("at-123") => Json(user_json()).into_response(),
        _ => (StatusCode::FORBIDDEN, Json(json!({"msg": "invalid JWT: token is expired"}))).into_response(),
    }
}

async fn logout(headers: HeaderMap) -> StatusCode {
    match bearer(&headers).as_deref() {
        Some("at-123") => StatusCode::NO_CONTENT,
        Some("boom") => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::FORBIDDEN,
    }
}

async fn profiles(headers: HeaderMap, Query(params): Query<HashMap<String, String>>) -> Response {
    let accept = headers.get("accept").and_then(|v| v.to_str().ok());
    if accept != Some(SINGLE_OBJECT_MEDIA_TYPE) {
        return StatusCode::BAD_REQUEST.into_response();
    }
    if params.get("id") == Some(&format!("eq.{USER_ID}")) {
        return Json(json!({
            "id": USER_ID,
            "email": "a@b.com",
            "full_name": "Ada",
            "company": null,
            "role": "free",
            "avatar_url": null,
            "created_at": "2025-03-14T09:26:53+00:00",
            "updated_at": "2025-03-14T09:26:53+00:00"
        }))
        .into_response();
    }
    (StatusCode::NOT_ACCEPTABLE, Json(json!({"code": "PGRST116", "message": "JSON object requested, multiple (or no) rows returned"})))
        .into_response()
}

async fn spawn_stub() -> SupabaseIdentity {
    let app = Router::new()
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/signup", post(signup))
        .route("/auth/v1/user", get(user))
        .route("/auth/v1/logout", post(logout))
        .route("/rest/v1/profiles", get(profiles));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    SupabaseIdentity::new(SupabaseConfig::new(&format!("http://{addr}"), "anon")).unwrap()
}

#[tokio::test]
async fn sign_in_returns_session_and_notifies() {
    let client = spawn_stub().await;
    let mut events = client.subscribe();
    let session = client.sign_in_with_password("a@b.com", "secret1").await.unwrap();
    assert_eq!(session.access_token, "at-123");
    assert_eq!(session.user.email, "a@b.com");
    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, crate::identity::AuthChangeEvent::SignedIn);
}

#[tokio::test]
async fn sign_in_surfaces_provider_message() {
    let client = spawn_stub().await;
    let err = client.sign_in_with_password("a@b.com", "wrong").await.unwrap_err();
    assert_eq!(err, IdentityError::auth(400, "Invalid login credentials"));
}

#[tokio::test]
async fn sign_up_sends_metadata() {
    let client = spawn_stub().await;
    let meta = SignUpMetadata { full_name: "Ada".into(), company: Some("Engines".into()) };
    let outcome = client.sign_up("new@b.com", "secret1", &meta).await.unwrap();
    assert!(outcome.session.is_none());
    let user = outcome.user.unwrap();
    assert_eq!(user.user_metadata["full_name"], "Ada");
    assert_eq!(user.user_metadata["company"], "Engines");
}

#[tokio::test]
async fn sign_up_duplicate_is_auth_error() {
    let client = spawn_stub().await;
    let meta = SignUpMetadata { full_name: "Ada".into(), company: None };
    let err = client.sign_up("dup@b.com", "secret1", &meta).await.unwrap_err();
    assert_eq!(err.to_string(), "User already registered");
    assert!(err.is_auth());
}

#[tokio::test]
async fn get_user_without_token_skips_request() {
    let client = spawn_stub().await;
    assert!(client.get_user(&Credentials::anonymous()).await.unwrap().is_none());
}

#[tokio::test]
async fn get_user_with_valid_token() {
    let client = spawn_stub().await;
    let user = client.get_user(&Credentials::bearer("at-123")).await.unwrap().unwrap();
    assert_eq!(user.id.to_string(), USER_ID);
}

#[tokio::test]
async fn get_user_with_rejected_token_is_auth_error() {
    let client = spawn_stub().await;
    let err = client.get_user(&Credentials::bearer("stale")).await.unwrap_err();
    assert!(err.is_auth());
}

#[tokio::test]
async fn get_session_maps_rejected_token_to_none() {
    let client = spawn_stub().await;
    assert!(client.get_session(&Credentials::bearer("stale")).await.unwrap().is_none());
    let session = client.get_session(&Credentials::bearer("at-123")).await.unwrap().unwrap();
    assert_eq!(session.access_token, "at-123");
}

#[tokio::test]
async fn sign_out_notifies_with_revoked_user() {
    let client = spawn_stub().await;
    let mut events = client.subscribe();
    client.sign_out(&Credentials::bearer("at-123")).await.unwrap();
    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, crate::identity::AuthChangeEvent::SignedOut);
    assert_eq!(event.user_id.to_string(), USER_ID);
}

#[tokio::test]
async fn sign_out_tolerates_already_revoked_session() {
    let client = spawn_stub().await;
    let mut events = client.subscribe();
    client.sign_out(&Credentials::bearer("stale")).await.unwrap();
    // Nobody to name, so nothing to announce.
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn sign_out_server_error_is_transport_error() {
    let client = spawn_stub().await;
    let err = client.sign_out(&Credentials::bearer("boom")).await.unwrap_err();
    assert!(!err.is_auth());
}

#[tokio::test]
async fn refresh_outage_is_transport_error() {
    let client = spawn_stub().await;
    let err = client.refresh_session("rt-456").await.unwrap_err();
    assert!(matches!(err, IdentityError::Transport(_)));
}

#[tokio::test]
async fn select_one_finds_row() {
    let client = spawn_stub().await;
    let query = RowQuery::matching("profiles", "id", USER_ID);
    let row = client.select_one(&Credentials::bearer("at-123"), &query).await.unwrap().unwrap();
    assert_eq!(row["full_name"], "Ada");
}

#[tokio::test]
async fn select_one_missing_row_is_none() {
    let client = spawn_stub().await;
    let query = RowQuery::matching("profiles", "id", uuid::Uuid::nil());
    assert!(client.select_one(&Credentials::bearer("at-123"), &query).await.unwrap().is_none());
}

#[tokio::test]
async fn unreachable_project_is_transport_error() {
    // Port 9 (discard) is reserved and never serves HTTP locally.
    let client = SupabaseIdentity::new(SupabaseConfig::new("http://127.0.0.1:9", "anon")).unwrap();
    let err = client.get_user(&Credentials::bearer("at-123")).await.unwrap_err();
    assert!(matches!(err, IdentityError::Transport(_)));
}
