//! Identity: the narrow seam to the hosted auth/data service.
//!
//! DESIGN
//! ======
//! Everything this application knows about credentials, sessions and
//! profile rows comes through `IdentityService`. The trait mirrors the
//! provider client's operation shapes one-to-one; the façade in
//! `services::auth` adapts them into the presentation contract.
//!
//! `SupabaseIdentity` talks HTTP to GoTrue + PostgREST. `MemoryIdentity`
//! keeps the same observable contract in-process for local development
//! and tests. `IDENTITY_PROVIDER` picks one at startup.

pub mod memory;
pub mod supabase;
pub mod types;

use tokio::sync::broadcast;

pub use types::{
    AuthChangeEvent, AuthEvent, Credentials, PROFILES_TABLE, Profile, Role, RowQuery, Session, SignUpMetadata,
    SignUpOutcome, User,
};

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by identity service operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// The service rejected the request (bad credentials, duplicate email,
    /// expired token). The message is the provider's own text.
    #[error("{message}")]
    Auth { status: u16, message: String },

    /// The request never produced a usable response.
    #[error("identity service request failed: {0}")]
    Transport(String),

    /// The service answered with a body we could not interpret.
    #[error("identity service response parse failed: {0}")]
    Decode(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl IdentityError {
    #[must_use]
    pub fn auth(status: u16, message: impl Into<String>) -> Self {
        Self::Auth { status, message: message.into() }
    }

    /// True for credential/session rejections, false for infrastructure failures.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

// =============================================================================
// SERVICE TRAIT
// =============================================================================

/// Operations consumed from the external identity service.
///
/// Calls that act on behalf of a user take that user's `Credentials`
/// explicitly; implementations hold no per-user state.
#[async_trait::async_trait]
pub trait IdentityService: Send + Sync {
    /// Exchange email + password for a session.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, IdentityError>;

    /// Register a new account, attaching `metadata` as the profile seed.
    async fn sign_up(&self, email: &str, password: &str, metadata: &SignUpMetadata)
    -> Result<SignUpOutcome, IdentityError>;

    /// Revoke the session behind `credentials`.
    async fn sign_out(&self, credentials: &Credentials) -> Result<(), IdentityError>;

    /// Look up the user behind `credentials`.
    ///
    /// `Ok(None)` when no access token is presented; `Err(Auth)` when the
    /// token is presented but rejected.
    async fn get_user(&self, credentials: &Credentials) -> Result<Option<User>, IdentityError>;

    /// Resolve the session behind `credentials`, `Ok(None)` when there is none.
    async fn get_session(&self, credentials: &Credentials) -> Result<Option<Session>, IdentityError>;

    /// Exchange a refresh token for a fresh session.
    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, IdentityError>;

    /// Fetch at most one row matching `query`, as raw JSON.
    async fn select_one(&self, credentials: &Credentials, query: &RowQuery)
    -> Result<Option<serde_json::Value>, IdentityError>;

    /// Subscribe to session-change notifications emitted by this client.
    ///
    /// The stream carries every user's changes; filter on `AuthEvent::user_id`.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

/// Capacity of each client's change-notification channel.
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 16;

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
