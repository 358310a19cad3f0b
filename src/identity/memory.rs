//! In-process identity service.
//!
//! DESIGN
//! ======
//! Same observable contract as the hosted service: identical error texts,
//! provider-side minimum password length, optional email confirmation,
//! and a `profiles` row seeded from sign-up metadata (the hosted project
//! does this with a database trigger). Backs `IDENTITY_PROVIDER=memory`
//! and every test that needs a live identity backend.
//!
//! Refresh tokens rotate on use, and a rotated token stays redeemable for
//! `REFRESH_TOKEN_REUSE_INTERVAL` so concurrent requests carrying the same
//! cookie all get a session, as with the hosted service's reuse interval.
//!
//! TRADE-OFFS
//! ==========
//! Passwords are stored as unsalted SHA-256 digests. Good enough for a
//! throwaway dev backend; never point real users at it.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rand::Rng;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    AuthEvent, Credentials, EVENT_CHANNEL_CAPACITY, IdentityError, IdentityService, PROFILES_TABLE, Profile, Role,
    RowQuery, Session, SignUpMetadata, SignUpOutcome, User,
};

pub const MIN_PASSWORD_LENGTH: usize = 6;
pub const ACCESS_TOKEN_TTL_SECS: i64 = 3600;
pub const REFRESH_TOKEN_REUSE_INTERVAL: Duration = Duration::seconds(10);

pub const INVALID_CREDENTIALS: &str = "Invalid login credentials";
pub const EMAIL_NOT_CONFIRMED: &str = "Email not confirmed";
pub const USER_ALREADY_REGISTERED: &str = "User already registered";
pub const INVALID_EMAIL: &str = "Unable to validate email address: invalid format";
pub const INVALID_TOKEN: &str = "invalid JWT: unable to parse or verify signature";
pub const INVALID_REFRESH_TOKEN: &str = "Invalid Refresh Token: Refresh Token Not Found";
const OFFLINE: &str = "connection refused";

// =============================================================================
// DIGESTS
// =============================================================================

/// Lowercase hex, two digits per byte.
fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

#[must_use]
pub fn hash_password(email: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex(&hasher.finalize())
}

/// Lowercase and trim; `None` unless the result looks like `local@domain`.
#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    let (local, domain) = normalized.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }
    Some(normalized)
}

// =============================================================================
// STORE
// =============================================================================

struct Account {
    user: User,
    password_hash: String,
    confirmed: bool,
}

struct RefreshGrant {
    user_id: Uuid,
    /// Set once the token has been exchanged.
    rotated_at: Option<OffsetDateTime>,
}

#[derive(Default)]
struct Store {
    /// Accounts keyed by normalized email.
    accounts: HashMap<String, Account>,
    access_tokens: HashMap<String, Uuid>,
    refresh_tokens: HashMap<String, RefreshGrant>,
    /// Data API rows keyed by table name.
    tables: HashMap<String, Vec<serde_json::Value>>,
}

impl Store {
    fn user_by_id(&self, id: Uuid) -> Option<&User> {
        self.accounts.values().map(|a| &a.user).find(|u| u.id == id)
    }

    /// Mint an access/refresh pair of random 32-byte hex tokens for `user`.
    fn issue_session(&mut self, user: User) -> Session {
        let mut rng = rand::rng();
        let [access_token, refresh_token] = [(); 2].map(|()| hex(&rng.random::<[u8; 32]>()));
        self.access_tokens.insert(access_token.clone(), user.id);
        self.refresh_tokens
            .insert(refresh_token.clone(), RefreshGrant { user_id: user.id, rotated_at: None });
        Session {
            access_token,
            token_type: "bearer".into(),
            refresh_token: Some(refresh_token),
            expires_in: Some(ACCESS_TOKEN_TTL_SECS),
            expires_at: Some(OffsetDateTime::now_utc().unix_timestamp() + ACCESS_TOKEN_TTL_SECS),
            user,
        }
    }

    fn revoke_all(&mut self, user_id: Uuid) {
        self.access_tokens.retain(|_, id| *id != user_id);
        self.refresh_tokens.retain(|_, grant| grant.user_id != user_id);
    }
}

// =============================================================================
// SERVICE
// =============================================================================

pub struct MemoryIdentity {
    store: Mutex<Store>,
    events: broadcast::Sender<AuthEvent>,
    require_confirmation: AtomicBool,
    offline: AtomicBool,
    row_queries: AtomicUsize,
    refresh_reuse_interval: Duration,
}

impl MemoryIdentity {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store: Mutex::new(Store::default()),
            events,
            require_confirmation: AtomicBool::new(false),
            offline: AtomicBool::new(false),
            row_queries: AtomicUsize::new(0),
            refresh_reuse_interval: REFRESH_TOKEN_REUSE_INTERVAL,
        }
    }

    /// Require new accounts to confirm their email before signing in.
    #[must_use]
    pub fn with_email_confirmation(self, required: bool) -> Self {
        self.require_confirmation.store(required, Ordering::SeqCst);
        self
    }

    /// How long a rotated refresh token stays redeemable.
    #[must_use]
    pub fn with_refresh_reuse_interval(mut self, interval: Duration) -> Self {
        self.refresh_reuse_interval = interval;
        self
    }

    /// Mark an account as confirmed. Returns false if the email is unknown.
    pub fn confirm_email(&self, email: &str) -> bool {
        let Some(normalized) = normalize_email(email) else {
            return false;
        };
        let mut store = self.lock();
        match store.accounts.get_mut(&normalized) {
            Some(account) => {
                account.confirmed = true;
                true
            }
            None => false,
        }
    }

    /// Simulate the service being unreachable. Every call fails with `Transport`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Drop an access token as if it had expired. Its refresh token stays valid.
    pub fn expire_access_token(&self, access_token: &str) {
        self.lock().access_tokens.remove(access_token);
    }

    /// Insert or replace a row in a data API table, keyed by its `id` field.
    pub fn upsert_row(&self, table: &str, row: serde_json::Value) {
        let mut store = self.lock();
        let rows = store.tables.entry(table.to_owned()).or_default();
        let id = row.get("id").cloned();
        rows.retain(|existing| id.is_none() || existing.get("id") != id.as_ref());
        rows.push(row);
    }

    /// Remove every row of a table.
    pub fn clear_table(&self, table: &str) {
        self.lock().tables.remove(table);
    }

    /// Number of `select_one` calls that reached the store.
    #[must_use]
    pub fn row_query_count(&self) -> usize {
        self.row_queries.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        self.store
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn ensure_online(&self) -> Result<(), IdentityError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(IdentityError::Transport(OFFLINE.into()));
        }
        Ok(())
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    fn resolve_token(store: &Store, credentials: &Credentials) -> Result<Option<User>, IdentityError> {
        let Some(token) = credentials.access_token() else {
            return Ok(None);
        };
        let user = store
            .access_tokens
            .get(token)
            .and_then(|id| store.user_by_id(*id))
            .cloned()
            .ok_or_else(|| IdentityError::auth(403, INVALID_TOKEN))?;
        Ok(Some(user))
    }
}

impl Default for MemoryIdentity {
    fn default() -> Self {
        Self::new()
    }
}

fn seed_profile(user: &User, metadata: &SignUpMetadata) -> Result<serde_json::Value, IdentityError> {
    let profile = Profile {
        id: user.id,
        email: Some(user.email.clone()),
        full_name: Some(metadata.full_name.clone()).filter(|n| !n.is_empty()),
        company: metadata.company.clone(),
        role: Role::Free,
        avatar_url: None,
        created_at: user.created_at,
        updated_at: user.created_at,
    };
    serde_json::to_value(&profile).map_err(|e| IdentityError::Decode(e.to_string()))
}

fn column_matches(row: &serde_json::Value, column: &str, value: &str) -> bool {
    match row.get(column) {
        Some(serde_json::Value::String(s)) => s == value,
        Some(serde_json::Value::Null) | None => false,
        Some(other) => other.to_string() == value,
    }
}

#[async_trait::async_trait]
impl IdentityService for MemoryIdentity {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, IdentityError> {
        self.ensure_online()?;
        let normalized = normalize_email(email).ok_or_else(|| IdentityError::auth(400, INVALID_CREDENTIALS))?;

        let session = {
            let mut store = self.lock();
            let account = store
                .accounts
                .get(&normalized)
                .filter(|a| a.password_hash == hash_password(&normalized, password))
                .ok_or_else(|| IdentityError::auth(400, INVALID_CREDENTIALS))?;
            if !account.confirmed {
                return Err(IdentityError::auth(400, EMAIL_NOT_CONFIRMED));
            }
            let user = account.user.clone();
            store.issue_session(user)
        };

        self.emit(AuthEvent::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        metadata: &SignUpMetadata,
    ) -> Result<SignUpOutcome, IdentityError> {
        self.ensure_online()?;
        let normalized = normalize_email(email).ok_or_else(|| IdentityError::auth(400, INVALID_EMAIL))?;
        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(IdentityError::auth(
                422,
                format!("Password should be at least {MIN_PASSWORD_LENGTH} characters."),
            ));
        }

        let confirmed = !self.require_confirmation.load(Ordering::SeqCst);
        let outcome = {
            let mut store = self.lock();
            if store.accounts.contains_key(&normalized) {
                return Err(IdentityError::auth(422, USER_ALREADY_REGISTERED));
            }

            let user = User {
                id: Uuid::new_v4(),
                email: normalized.clone(),
                created_at: OffsetDateTime::now_utc(),
                user_metadata: serde_json::to_value(metadata).map_err(|e| IdentityError::Decode(e.to_string()))?,
            };
            let profile_row = seed_profile(&user, metadata)?;
            store
                .tables
                .entry(PROFILES_TABLE.to_owned())
                .or_default()
                .push(profile_row);
            store.accounts.insert(
                normalized.clone(),
                Account { user: user.clone(), password_hash: hash_password(&normalized, password), confirmed },
            );

            let session = confirmed.then(|| store.issue_session(user.clone()));
            SignUpOutcome { user: Some(user), session }
        };

        if let Some(session) = &outcome.session {
            self.emit(AuthEvent::signed_in(session.clone()));
        }
        Ok(outcome)
    }

    async fn sign_out(&self, credentials: &Credentials) -> Result<(), IdentityError> {
        self.ensure_online()?;
        let owner = {
            let mut store = self.lock();
            let owner = credentials
                .access_token()
                .and_then(|t| store.access_tokens.get(t).copied())
                .or_else(|| {
                    credentials
                        .refresh_token()
                        .and_then(|t| store.refresh_tokens.get(t).map(|grant| grant.user_id))
                });
            if let Some(user_id) = owner {
                store.revoke_all(user_id);
            }
            owner
        };
        if let Some(user_id) = owner {
            self.emit(AuthEvent::signed_out(user_id));
        }
        Ok(())
    }

    async fn get_user(&self, credentials: &Credentials) -> Result<Option<User>, IdentityError> {
        self.ensure_online()?;
        let store = self.lock();
        Self::resolve_token(&store, credentials)
    }

    async fn get_session(&self, credentials: &Credentials) -> Result<Option<Session>, IdentityError> {
        self.ensure_online()?;
        let store = self.lock();
        let user = match Self::resolve_token(&store, credentials) {
            Ok(user) => user,
            Err(e) if e.is_auth() => None,
            Err(e) => return Err(e),
        };
        Ok(user.zip(credentials.access_token()).map(|(user, token)| Session {
            access_token: token.to_owned(),
            token_type: "bearer".into(),
            refresh_token: credentials.refresh_token().map(str::to_owned),
            expires_in: None,
            expires_at: None,
            user,
        }))
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, IdentityError> {
        self.ensure_online()?;
        let reuse_interval = self.refresh_reuse_interval;
        let session = {
            let mut store = self.lock();
            let now = OffsetDateTime::now_utc();
            let user_id = store
                .refresh_tokens
                .get_mut(refresh_token)
                .filter(|grant| grant.rotated_at.is_none_or(|at| now - at < reuse_interval))
                .map(|grant| {
                    grant.rotated_at.get_or_insert(now);
                    grant.user_id
                })
                .ok_or_else(|| IdentityError::auth(400, INVALID_REFRESH_TOKEN))?;
            let user = store
                .user_by_id(user_id)
                .cloned()
                .ok_or_else(|| IdentityError::auth(400, INVALID_REFRESH_TOKEN))?;
            store.issue_session(user)
        };
        self.emit(AuthEvent::token_refreshed(session.clone()));
        Ok(session)
    }

    async fn select_one(
        &self,
        _credentials: &Credentials,
        query: &RowQuery,
    ) -> Result<Option<serde_json::Value>, IdentityError> {
        self.ensure_online()?;
        self.row_queries.fetch_add(1, Ordering::SeqCst);
        let store = self.lock();
        Ok(store
            .tables
            .get(&query.table)
            .and_then(|rows| rows.iter().find(|row| column_matches(row, &query.column, &query.value)))
            .cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
