//! Auth façade: login, signup and logout plus current user and profile lookups.
//!
//! DESIGN
//! ======
//! Each operation forwards to exactly one identity-service call and reshapes
//! the result. Credential problems come back inside `AuthResponse` with the
//! provider's message untouched; "nobody is signed in" and "no profile row"
//! are plain `None`; infrastructure failures from the lookups propagate as
//! `IdentityError` for the HTTP layer to report.
//!
//! Every call runs against an explicit per-request `AuthContext` carrying
//! the identity handle and that request's tokens. Session changes made
//! during the request are recorded on the context and written back to
//! cookies by the route layer.

use std::sync::Arc;

use axum::response::Redirect;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::identity::{
    Credentials, IdentityError, IdentityService, PROFILES_TABLE, Profile, RowQuery, Session, SignUpMetadata, User,
};

pub const LANDING_PATH: &str = "/";
pub const LOGIN_PATH: &str = "/login";
pub const SIGNUP_PATH: &str = "/signup";
pub const DASHBOARD_PATH: &str = "/dashboard";

// =============================================================================
// REQUEST CONTEXT
// =============================================================================

/// Session change produced while serving a request.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionChange {
    Established(Box<Session>),
    Cleared,
}

/// Identity handle bound to one request's credentials.
pub struct AuthContext {
    identity: Arc<dyn IdentityService>,
    credentials: Credentials,
    change: Option<SessionChange>,
}

impl AuthContext {
    #[must_use]
    pub fn new(identity: Arc<dyn IdentityService>, credentials: Credentials) -> Self {
        Self { identity, credentials, change: None }
    }

    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// The session change to persist, if any. Subsequent calls return `None`.
    pub fn take_session_change(&mut self) -> Option<SessionChange> {
        self.change.take()
    }

    fn establish(&mut self, session: &Session) {
        self.credentials = session.credentials();
        self.change = Some(SessionChange::Established(Box::new(session.clone())));
    }

    fn clear(&mut self) {
        self.credentials = Credentials::anonymous();
        self.change = Some(SessionChange::Cleared);
    }

    /// Renew the session when the access token has lapsed but a refresh
    /// token is still around. A rejected refresh token clears the session;
    /// an unreachable service leaves the request anonymous for now.
    pub async fn restore(&mut self) {
        if self.credentials.access_token().is_some() {
            return;
        }
        let Some(refresh_token) = self.credentials.refresh_token().map(str::to_owned) else {
            return;
        };
        match self.identity.refresh_session(&refresh_token).await {
            Ok(session) => {
                debug!(user_id = %session.user.id, "session refreshed");
                self.establish(&session);
            }
            Err(e) if e.is_auth() => {
                info!(error = %e, "discarding rejected refresh token");
                self.clear();
            }
            Err(e) => warn!(error = %e, "session refresh failed"),
        }
    }
}

// =============================================================================
// ENVELOPE
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct LoginCredentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SignupCredentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, alias = "fullName")]
    pub full_name: String,
    #[serde(default)]
    pub company: Option<String>,
}

/// Uniform result of `login` and `signup`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl AuthResponse {
    #[must_use]
    pub fn ok(user: Option<User>) -> Self {
        Self { success: true, error: None, user }
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self { success: false, error: Some(message.into()), user: None }
    }
}

const LOGIN_FIELDS_REQUIRED: &str = "Email and password are required";
const SIGNUP_FIELDS_REQUIRED: &str = "Email, password and full name are required";

/// Blank or missing company becomes `None`.
#[must_use]
pub fn normalize_company(company: Option<&str>) -> Option<String> {
    company
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_owned)
}

// =============================================================================
// OPERATIONS
// =============================================================================

/// Sign in with email and password.
pub async fn login(ctx: &mut AuthContext, credentials: &LoginCredentials) -> AuthResponse {
    if credentials.email.trim().is_empty() || credentials.password.is_empty() {
        return AuthResponse::failure(LOGIN_FIELDS_REQUIRED);
    }

    match ctx
        .identity
        .sign_in_with_password(credentials.email.trim(), &credentials.password)
        .await
    {
        Ok(session) => {
            info!(user_id = %session.user.id, "login succeeded");
            ctx.establish(&session);
            AuthResponse::ok(Some(session.user))
        }
        Err(e) => {
            warn!(error = %e, "login rejected");
            AuthResponse::failure(e.to_string())
        }
    }
}

/// Register a new account seeded with profile metadata.
pub async fn signup(ctx: &mut AuthContext, credentials: &SignupCredentials) -> AuthResponse {
    if credentials.email.trim().is_empty() || credentials.password.is_empty() || credentials.full_name.trim().is_empty()
    {
        return AuthResponse::failure(SIGNUP_FIELDS_REQUIRED);
    }

    let metadata = SignUpMetadata {
        full_name: credentials.full_name.trim().to_owned(),
        company: normalize_company(credentials.company.as_deref()),
    };

    match ctx
        .identity
        .sign_up(credentials.email.trim(), &credentials.password, &metadata)
        .await
    {
        Ok(outcome) => {
            info!(
                user_id = ?outcome.user.as_ref().map(|u| u.id),
                confirmed = outcome.session.is_some(),
                "signup succeeded"
            );
            if let Some(session) = &outcome.session {
                ctx.establish(session);
            }
            AuthResponse::ok(outcome.user)
        }
        Err(e) => {
            warn!(error = %e, "signup rejected");
            AuthResponse::failure(e.to_string())
        }
    }
}

/// Sign out and send the caller to the login page, whatever the service says.
pub async fn logout(ctx: &mut AuthContext) -> Redirect {
    if let Err(e) = ctx.identity.sign_out(&ctx.credentials).await {
        warn!(error = %e, "sign-out failed");
    }
    ctx.clear();
    Redirect::to(LOGIN_PATH)
}

/// The signed-in user, or `None` when the request has no valid session.
///
/// # Errors
///
/// Propagates transport and decode failures from the identity service.
pub async fn get_user(ctx: &AuthContext) -> Result<Option<User>, IdentityError> {
    match ctx.identity.get_user(&ctx.credentials).await {
        Ok(user) => Ok(user),
        Err(e) if e.is_auth() => {
            debug!(error = %e, "session rejected");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// The signed-in user's profile row. Skips the row query when nobody is signed in.
///
/// # Errors
///
/// Propagates transport and decode failures from the identity service.
pub async fn get_profile(ctx: &AuthContext) -> Result<Option<Profile>, IdentityError> {
    let Some(user) = get_user(ctx).await? else {
        return Ok(None);
    };

    let query = RowQuery::matching(PROFILES_TABLE, "id", user.id);
    let Some(row) = ctx.identity.select_one(&ctx.credentials, &query).await? else {
        return Ok(None);
    };

    serde_json::from_value(row)
        .map(Some)
        .map_err(|e| IdentityError::Decode(e.to_string()))
}

// =============================================================================
// REDIRECT CONTRACT
// =============================================================================

/// Pages whose access depends on being signed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    Landing,
    Dashboard,
}

/// Where a visitor to `surface` must be sent instead, if anywhere.
#[must_use]
pub fn redirect_for(surface: Surface, user: Option<&User>) -> Option<&'static str> {
    match (surface, user) {
        (Surface::Landing, Some(_)) => Some(DASHBOARD_PATH),
        (Surface::Dashboard, None) => Some(LOGIN_PATH),
        _ => None,
    }
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
