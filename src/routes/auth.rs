//! Session cookies and the JSON auth API.
//!
//! DESIGN
//! ======
//! Sessions ride in two HttpOnly cookies: the access token, which lives as
//! long as the provider says it does, and the refresh token, kept for 400
//! days. Every handler that needs identity extracts an `AuthContext` built
//! from those cookies; a request that still has a refresh token but lost its
//! access token is renewed during extraction. Whatever session change the
//! request produced is written back with `persist_session`.

use std::convert::Infallible;

use axum::Json;
use axum::extract::{FromRef, FromRequestParts, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use time::Duration;

use crate::identity::{IdentityError, Session};
use crate::services::auth::{self as auth_svc, AuthContext, AuthResponse, LoginCredentials, SessionChange, SignupCredentials};
use crate::state::AppState;

pub const ACCESS_COOKIE: &str = "sb-access-token";
pub const REFRESH_COOKIE: &str = "sb-refresh-token";

/// Access-cookie lifetime when the provider omits `expires_in`.
const DEFAULT_ACCESS_MAX_AGE_SECS: i64 = 3600;
const REFRESH_MAX_AGE_DAYS: i64 = 400;

// =============================================================================
// COOKIES
// =============================================================================

fn session_cookie(name: &'static str, value: String, max_age: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(max_age)
        .build()
}

fn set_session(jar: CookieJar, session: &Session, secure: bool) -> CookieJar {
    let access_max_age = Duration::seconds(
        session
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_ACCESS_MAX_AGE_SECS),
    );
    let jar = jar.add(session_cookie(ACCESS_COOKIE, session.access_token.clone(), access_max_age, secure));
    match &session.refresh_token {
        Some(refresh) if !refresh.is_empty() => jar.add(session_cookie(
            REFRESH_COOKIE,
            refresh.clone(),
            Duration::days(REFRESH_MAX_AGE_DAYS),
            secure,
        )),
        _ => jar,
    }
}

fn clear_session(jar: CookieJar, secure: bool) -> CookieJar {
    jar.add(session_cookie(ACCESS_COOKIE, String::new(), Duration::ZERO, secure))
        .add(session_cookie(REFRESH_COOKIE, String::new(), Duration::ZERO, secure))
}

/// Write the request's pending session change, if any, into the cookie jar.
#[must_use]
pub fn persist_session(jar: CookieJar, ctx: &mut AuthContext, secure: bool) -> CookieJar {
    match ctx.take_session_change() {
        Some(SessionChange::Established(session)) => set_session(jar, &session, secure),
        Some(SessionChange::Cleared) => clear_session(jar, secure),
        None => jar,
    }
}

/// Credentials carried by the request's cookies.
#[must_use]
pub fn credentials_from_jar(jar: &CookieJar) -> crate::identity::Credentials {
    let value = |name: &str| {
        jar.get(name)
            .map(|c| c.value().to_owned())
            .filter(|v| !v.is_empty())
    };
    crate::identity::Credentials { access_token: value(ACCESS_COOKIE), refresh_token: value(REFRESH_COOKIE) }
}

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Builds the per-request `AuthContext` from session cookies. Never rejects;
/// a request without cookies gets an anonymous context.
impl<S> FromRequestParts<S> for AuthContext
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let app_state = AppState::from_ref(state);
        let mut ctx = AuthContext::new(app_state.identity, credentials_from_jar(&jar));
        ctx.restore().await;
        Ok(ctx)
    }
}

/// Status for an identity failure that escaped the façade.
#[must_use]
pub fn identity_error_to_status(err: &IdentityError) -> StatusCode {
    match err {
        IdentityError::Auth { .. } => StatusCode::UNAUTHORIZED,
        IdentityError::Transport(_) | IdentityError::Decode(_) => StatusCode::BAD_GATEWAY,
        IdentityError::HttpClientBuild(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn identity_failure(err: &IdentityError) -> Response {
    tracing::error!(error = %err, "identity service failure");
    (identity_error_to_status(err), "Identity service unavailable").into_response()
}

// =============================================================================
// HANDLERS
// =============================================================================

/// `POST /api/auth/login`: sign in, set session cookies on success.
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    mut ctx: AuthContext,
    Json(body): Json<LoginCredentials>,
) -> (CookieJar, Json<AuthResponse>) {
    let response = auth_svc::login(&mut ctx, &body).await;
    (persist_session(jar, &mut ctx, state.cookie_secure), Json(response))
}

/// `POST /api/auth/signup`: register; cookies are set only when the provider
/// returns a session straight away.
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    mut ctx: AuthContext,
    Json(body): Json<SignupCredentials>,
) -> (CookieJar, Json<AuthResponse>) {
    let response = auth_svc::signup(&mut ctx, &body).await;
    (persist_session(jar, &mut ctx, state.cookie_secure), Json(response))
}

/// `POST /api/auth/logout`: sign out, clear cookies, redirect to `/login`.
pub async fn logout(State(state): State<AppState>, jar: CookieJar, mut ctx: AuthContext) -> impl IntoResponse {
    let redirect = auth_svc::logout(&mut ctx).await;
    (persist_session(jar, &mut ctx, state.cookie_secure), redirect)
}

/// `GET /api/auth/me`: current user or `null`.
pub async fn me(State(state): State<AppState>, jar: CookieJar, mut ctx: AuthContext) -> Response {
    match auth_svc::get_user(&ctx).await {
        Ok(user) => (persist_session(jar, &mut ctx, state.cookie_secure), Json(user)).into_response(),
        Err(e) => identity_failure(&e),
    }
}

/// `GET /api/auth/profile`: current user's profile or `null`.
pub async fn profile(State(state): State<AppState>, jar: CookieJar, mut ctx: AuthContext) -> Response {
    match auth_svc::get_profile(&ctx).await {
        Ok(profile) => (persist_session(jar, &mut ctx, state.cookie_secure), Json(profile)).into_response(),
        Err(e) => identity_failure(&e),
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
