//! Identity types: users, sessions, profiles and change notifications.
//!
//! Field names follow the provider's wire format so the same structs
//! deserialize GoTrue and PostgREST payloads without an adapter layer.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// USER
// =============================================================================

/// Identity record owned by the external service. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(default)]
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Free-form metadata echoed back by the provider (sign-up seed lives here).
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

// =============================================================================
// SESSION
// =============================================================================

fn default_token_type() -> String {
    "bearer".into()
}

/// Proof of an authenticated identity. The token is opaque to this system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    pub refresh_token: Option<String>,
    /// Lifetime of the access token in seconds.
    pub expires_in: Option<i64>,
    /// Unix timestamp (seconds) at which the access token expires.
    pub expires_at: Option<i64>,
    pub user: User,
}

impl Session {
    /// Credentials that let later requests act as this session.
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials { access_token: Some(self.access_token.clone()), refresh_token: self.refresh_token.clone() }
    }
}

/// Tokens presented by the current request. Both may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Credentials {
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self { access_token: Some(access_token.into()), refresh_token: None }
    }

    /// The access token, if one is present and non-empty.
    #[must_use]
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }

    /// The refresh token, if one is present and non-empty.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref().filter(|t| !t.is_empty())
    }
}

// =============================================================================
// PROFILE
// =============================================================================

/// Subscription tier stored on the profile row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

/// Application-level user record, one row per user in `profiles`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Table holding profile rows.
pub const PROFILES_TABLE: &str = "profiles";

// =============================================================================
// SIGN-UP
// =============================================================================

/// Profile seed attached to a sign-up request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpMetadata {
    pub full_name: String,
    /// Always serialized, as `null` when absent.
    pub company: Option<String>,
}

/// Result of a sign-up. `session` is `None` while email confirmation is pending.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUpOutcome {
    pub user: Option<User>,
    pub session: Option<Session>,
}

// =============================================================================
// ROW QUERY
// =============================================================================

/// Single-row lookup by column equality (`select * from {table} where {column} = {value}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowQuery {
    pub table: String,
    pub column: String,
    pub value: String,
}

impl RowQuery {
    #[must_use]
    pub fn matching(table: &str, column: &str, value: impl ToString) -> Self {
        Self { table: table.to_owned(), column: column.to_owned(), value: value.to_string() }
    }
}

// =============================================================================
// CHANGE NOTIFICATIONS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthChangeEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// Session-change notification.
///
/// One service instance serves every caller, so each notification names the
/// user it concerns. `session` is `None` after a sign-out.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthEvent {
    pub kind: AuthChangeEvent,
    pub user_id: Uuid,
    pub session: Option<Session>,
}

impl AuthEvent {
    #[must_use]
    pub fn signed_in(session: Session) -> Self {
        Self { kind: AuthChangeEvent::SignedIn, user_id: session.user.id, session: Some(session) }
    }

    /// Every session of `user_id` was revoked.
    #[must_use]
    pub fn signed_out(user_id: Uuid) -> Self {
        Self { kind: AuthChangeEvent::SignedOut, user_id, session: None }
    }

    #[must_use]
    pub fn token_refreshed(session: Session) -> Self {
        Self { kind: AuthChangeEvent::TokenRefreshed, user_id: session.user.id, session: Some(session) }
    }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
