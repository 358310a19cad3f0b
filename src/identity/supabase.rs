//! Supabase client for GoTrue (`/auth/v1`) and PostgREST (`/rest/v1`) over HTTP.
//!
//! Thin wrapper in the style of the provider's own SDK: one request per
//! operation, provider error text passed through untouched. Pure parsing
//! lives in free functions for testability.

use std::time::Duration;

use reqwest::RequestBuilder;
use tokio::sync::broadcast;

use super::{
    AuthEvent, Credentials, EVENT_CHANNEL_CAPACITY, IdentityError, IdentityService, RowQuery, Session,
    SignUpMetadata, SignUpOutcome, User,
};

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// PostgREST media type that returns a single object instead of an array.
const SINGLE_OBJECT_MEDIA_TYPE: &str = "application/vnd.pgrst.object+json";
/// PostgREST error code for "single object requested, zero rows found".
const NO_ROWS_CODE: &str = "PGRST116";

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    /// Project base URL, without trailing slash.
    pub url: String,
    /// Public anon key sent as `apikey` on every request.
    pub anon_key: String,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl SupabaseConfig {
    #[must_use]
    pub fn new(url: &str, anon_key: &str) -> Self {
        Self {
            url: url.trim().trim_end_matches('/').to_owned(),
            anon_key: anon_key.trim().to_owned(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }

    #[must_use]
    pub fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.url)
    }

    #[must_use]
    pub fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.url)
    }
}

// =============================================================================
// CLIENT
// =============================================================================

pub struct SupabaseIdentity {
    http: reqwest::Client,
    config: SupabaseConfig,
    events: broadcast::Sender<AuthEvent>,
}

impl SupabaseIdentity {
    /// Build a client for the given project.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(config: SupabaseConfig) -> Result<Self, IdentityError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| IdentityError::HttpClientBuild(e.to_string()))?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self { http, config, events })
    }

    #[must_use]
    pub fn config(&self) -> &SupabaseConfig {
        &self.config
    }

    /// Send with the project key attached. Returns status and body text.
    async fn send(&self, request: RequestBuilder) -> Result<(u16, String), IdentityError> {
        let response = request
            .header("apikey", &self.config.anon_key)
            .send()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| IdentityError::Transport(e.to_string()))?;
        Ok((status, body))
    }

    /// Send and require a 2xx, mapping anything else through `error_from_response`.
    async fn send_ok(&self, request: RequestBuilder) -> Result<String, IdentityError> {
        let (status, body) = self.send(request).await?;
        if (200..300).contains(&status) {
            Ok(body)
        } else {
            Err(error_from_response(status, &body))
        }
    }

    fn emit(&self, event: AuthEvent) {
        // No subscribers is the normal server-side case.
        let _ = self.events.send(event);
    }
}

#[async_trait::async_trait]
impl IdentityService for SupabaseIdentity {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, IdentityError> {
        let request = self
            .http
            .post(self.config.auth_url("token"))
            .query(&[("grant_type", "password")])
            .json(&serde_json::json!({ "email": email, "password": password }));
        let body = self.send_ok(request).await?;
        let session = parse_session(&body)?;
        self.emit(AuthEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<SignUpOutcome, IdentityError> {
        let request = self
            .http
            .post(self.config.auth_url("signup"))
            .json(&serde_json::json!({ "email": email, "password": password, "data": metadata }));
        let body = self.send_ok(request).await?;
        let outcome = parse_sign_up(&body)?;
        if let Some(session) = &outcome.session {
            self.emit(AuthEvent::signed_in(session.clone()));
        }
        Ok(outcome)
    }

    async fn sign_out(&self, credentials: &Credentials) -> Result<(), IdentityError> {
        let Some(token) = credentials.access_token() else {
            return Ok(());
        };

        // The logout response names nobody; resolve the owner while the token still works.
        let owner = if self.events.receiver_count() > 0 {
            match self.get_user(credentials).await {
                Ok(user) => user.map(|u| u.id),
                Err(e) if e.is_auth() => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        let request = self
            .http
            .post(self.config.auth_url("logout"))
            .bearer_auth(token);
        let (status, body) = self.send(request).await?;
        // 401/403/404: the session is already gone, which is the goal.
        if !(200..300).contains(&status) && !matches!(status, 401 | 403 | 404) {
            return Err(error_from_response(status, &body));
        }
        if let Some(user_id) = owner {
            self.emit(AuthEvent::signed_out(user_id));
        }
        Ok(())
    }

    async fn get_user(&self, credentials: &Credentials) -> Result<Option<User>, IdentityError> {
        let Some(token) = credentials.access_token() else {
            return Ok(None);
        };
        let request = self.http.get(self.config.auth_url("user")).bearer_auth(token);
        let body = self.send_ok(request).await?;
        serde_json::from_str::<User>(&body)
            .map(Some)
            .map_err(|e| IdentityError::Decode(e.to_string()))
    }

    async fn get_session(&self, credentials: &Credentials) -> Result<Option<Session>, IdentityError> {
        let Some(token) = credentials.access_token() else {
            return Ok(None);
        };
        match self.get_user(credentials).await {
            Ok(Some(user)) => Ok(Some(Session {
                access_token: token.to_owned(),
                token_type: "bearer".into(),
                refresh_token: credentials.refresh_token().map(str::to_owned),
                expires_in: None,
                expires_at: None,
                user,
            })),
            Ok(None) => Ok(None),
            Err(e) if e.is_auth() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, IdentityError> {
        let request = self
            .http
            .post(self.config.auth_url("token"))
            .query(&[("grant_type", "refresh_token")])
            .json(&serde_json::json!({ "refresh_token": refresh_token }));
        let body = self.send_ok(request).await?;
        let session = parse_session(&body)?;
        self.emit(AuthEvent::token_refreshed(session.clone()));
        Ok(session)
    }

    async fn select_one(
        &self,
        credentials: &Credentials,
        query: &RowQuery,
    ) -> Result<Option<serde_json::Value>, IdentityError> {
        // Row-level security evaluates the caller's token; anon key otherwise.
        let bearer = credentials.access_token().unwrap_or(&self.config.anon_key);
        let filter = format!("eq.{}", query.value);
        let request = self
            .http
            .get(self.config.rest_url(&query.table))
            .query(&[("select", "*"), (query.column.as_str(), filter.as_str())])
            .header("Accept", SINGLE_OBJECT_MEDIA_TYPE)
            .bearer_auth(bearer);

        let (status, body) = self.send(request).await?;
        if is_no_rows(status, &body) {
            return Ok(None);
        }
        if !(200..300).contains(&status) {
            return Err(error_from_response(status, &body));
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| IdentityError::Decode(e.to_string()))
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

// =============================================================================
// RESPONSE PARSING
// =============================================================================

/// Pull the human-readable message out of a GoTrue/PostgREST error body.
///
/// GoTrue has shipped several shapes over time (`msg`, `error_description`,
/// `message`, bare `error`); the first non-empty one wins.
#[must_use]
pub fn error_message(status: u16, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["msg", "error_description", "message", "error"] {
            if let Some(text) = value.get(key).and_then(serde_json::Value::as_str) {
                if !text.trim().is_empty() {
                    return text.to_owned();
                }
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() || trimmed.starts_with('{') {
        format!("request failed with status {status}")
    } else {
        trimmed.to_owned()
    }
}

/// Classify a non-success response: 4xx is a provider rejection, 5xx an outage.
#[must_use]
pub fn error_from_response(status: u16, body: &str) -> IdentityError {
    let message = error_message(status, body);
    if status >= 500 {
        IdentityError::Transport(format!("status {status}: {message}"))
    } else {
        IdentityError::auth(status, message)
    }
}

/// Parse a token endpoint response into a session.
///
/// # Errors
///
/// Returns `Decode` if the body is not a session.
pub fn parse_session(body: &str) -> Result<Session, IdentityError> {
    serde_json::from_str(body).map_err(|e| IdentityError::Decode(e.to_string()))
}

/// Parse a sign-up response.
///
/// Auto-confirmed projects answer with a full session; projects that require
/// email confirmation answer with the bare user (or `{ "user": ... }`).
///
/// # Errors
///
/// Returns `Decode` if the body matches none of those shapes.
pub fn parse_sign_up(body: &str) -> Result<SignUpOutcome, IdentityError> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| IdentityError::Decode(e.to_string()))?;

    if value.get("access_token").is_some() {
        let session: Session = serde_json::from_value(value).map_err(|e| IdentityError::Decode(e.to_string()))?;
        return Ok(SignUpOutcome { user: Some(session.user.clone()), session: Some(session) });
    }

    let user_value = match value.get("user") {
        Some(inner) if inner.is_object() => inner.clone(),
        Some(_) => return Ok(SignUpOutcome { user: None, session: None }),
        None => value,
    };
    let user: User = serde_json::from_value(user_value).map_err(|e| IdentityError::Decode(e.to_string()))?;
    Ok(SignUpOutcome { user: Some(user), session: None })
}

/// True when PostgREST reports that a single-object query matched nothing.
#[must_use]
pub fn is_no_rows(status: u16, body: &str) -> bool {
    if status != 406 {
        return false;
    }
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("code").and_then(serde_json::Value::as_str).map(|c| c == NO_ROWS_CODE))
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "supabase_test.rs"]
mod tests;
