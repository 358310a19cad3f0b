//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Server-rendered pages and the JSON auth API share one Axum router and one
//! `AppState`. Both surfaces go through the same `AuthContext` extractor, so
//! a session established through one is visible to the other.

pub mod auth;
pub mod pages;

#[cfg(test)]
pub(crate) mod test_support;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::services::auth::{DASHBOARD_PATH, LANDING_PATH, LOGIN_PATH, SIGNUP_PATH};
use crate::state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route(LANDING_PATH, get(pages::landing))
        .route(LOGIN_PATH, get(pages::login_page).post(pages::login_submit))
        .route(SIGNUP_PATH, get(pages::signup_page).post(pages::signup_submit))
        .route("/logout", post(pages::logout))
        .route(DASHBOARD_PATH, get(pages::dashboard))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/profile", get(auth::profile))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
