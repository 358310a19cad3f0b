//! Reactive auth state for long-lived consumers.
//!
//! DESIGN
//! ======
//! `AuthWatcher::mount` subscribes to the identity service's change stream
//! before issuing the initial session fetch, so no notification can slip in
//! between the two. A spawned task owns the subscription and publishes every
//! change through a `tokio::sync::watch` channel; consumers read snapshots
//! or await the next change.
//!
//! `AuthState` stores only the session. The user is read off the session,
//! so "user present" and "session present" can never disagree.
//!
//! The identity service is shared by every caller, so its stream carries
//! everyone's sign-ins and sign-outs. A watcher only applies notifications
//! for the user it tracks: the owner of the mount credentials, or whoever
//! signs in through `AuthWatcher::sign_in`. An anonymous watcher ignores
//! the stream until then.
//!
//! TRADE-OFFS
//! ==========
//! A lagging subscription drops the missed notifications and re-fetches the
//! session instead of replaying them. Only the latest state matters.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::identity::{AuthEvent, Credentials, IdentityService, Session, User};

// =============================================================================
// STATE
// =============================================================================

/// Snapshot of the client-side auth state.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthState {
    session: Option<Session>,
    loading: bool,
    error: Option<String>,
    /// User whose notifications apply. Cleared on sign-out.
    subject: Option<Uuid>,
}

impl AuthState {
    fn initial() -> Self {
        Self { session: None, loading: true, error: None, subject: None }
    }

    fn adopt(&mut self, session: Session) {
        self.subject = Some(session.user.id);
        self.session = Some(session);
    }

    fn credentials_or(&self, fallback: &Credentials) -> Credentials {
        self.session
            .as_ref()
            .map_or_else(|| fallback.clone(), Session::credentials)
    }

    #[must_use]
    pub fn user(&self) -> Option<&User> {
        self.session.as_ref().map(|s| &s.user)
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn loading(&self) -> bool {
        self.loading
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.user().is_some()
    }
}

// =============================================================================
// WATCHER
// =============================================================================

pub struct AuthWatcher {
    service: Arc<dyn IdentityService>,
    credentials: Credentials,
    state: Arc<watch::Sender<AuthState>>,
    updates: watch::Receiver<AuthState>,
    task: JoinHandle<()>,
}

impl AuthWatcher {
    /// Start tracking the session identified by `credentials`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn mount(service: Arc<dyn IdentityService>, credentials: Credentials) -> Self {
        let (tx, updates) = watch::channel(AuthState::initial());
        let state = Arc::new(tx);
        let events = service.subscribe();

        let task = tokio::spawn(run(service.clone(), credentials.clone(), state.clone(), events));

        Self { service, credentials, state, updates, task }
    }

    /// Current snapshot.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.updates.borrow().clone()
    }

    /// A receiver that observes every future state.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Wait for the next state change. `None` once the watcher has stopped.
    pub async fn changed(&mut self) -> Option<AuthState> {
        self.updates.changed().await.ok()?;
        Some(self.updates.borrow_and_update().clone())
    }

    /// Wait until the initial fetch (or a pending sign-out) has settled.
    pub async fn ready(&mut self) -> AuthState {
        if let Ok(state) = self.updates.wait_for(|s| !s.loading).await {
            return state.clone();
        }
        self.state()
    }

    /// Sign in through the identity service and track the resulting user.
    ///
    /// On failure the error is stored and the previous state is kept.
    pub async fn sign_in(&self, email: &str, password: &str) {
        self.state.send_modify(|s| s.loading = true);

        match self.service.sign_in_with_password(email, password).await {
            Ok(session) => self.state.send_modify(|s| {
                s.adopt(session);
                s.error = None;
                s.loading = false;
            }),
            Err(e) => {
                warn!(error = %e, "sign-in failed");
                self.state.send_modify(|s| {
                    s.error = Some(e.to_string());
                    s.loading = false;
                });
            }
        }
    }

    /// Sign out through the identity service.
    ///
    /// On success the unauthenticated state is applied immediately; the
    /// service's own sign-out notification then changes nothing. On failure
    /// the error is stored and the session is left as it was.
    pub async fn sign_out(&self) {
        self.state.send_modify(|s| s.loading = true);

        let credentials = self.state.borrow().credentials_or(&self.credentials);

        match self.service.sign_out(&credentials).await {
            Ok(()) => self.state.send_modify(|s| {
                s.session = None;
                s.subject = None;
                s.error = None;
                s.loading = false;
            }),
            Err(e) => {
                warn!(error = %e, "sign-out failed");
                self.state.send_modify(|s| {
                    s.error = Some(e.to_string());
                    s.loading = false;
                });
            }
        }
    }

    /// Stop processing notifications and release the subscription.
    pub fn unmount(self) {
        self.task.abort();
    }
}

impl Drop for AuthWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// NOTIFICATION LOOP
// =============================================================================

async fn run(
    service: Arc<dyn IdentityService>,
    mount_credentials: Credentials,
    state: Arc<watch::Sender<AuthState>>,
    mut events: broadcast::Receiver<AuthEvent>,
) {
    resync(service.as_ref(), &mount_credentials, &state).await;

    loop {
        match events.recv().await {
            Ok(event) => apply(&state, event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "auth notifications lagged; re-fetching session");
                resync(service.as_ref(), &mount_credentials, &state).await;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn apply(state: &watch::Sender<AuthState>, event: AuthEvent) {
    state.send_if_modified(|s| {
        if s.subject != Some(event.user_id) {
            return false;
        }
        debug!(kind = ?event.kind, user_id = %event.user_id, "auth notification");
        if event.session.is_none() {
            s.subject = None;
        }
        s.session = event.session;
        s.loading = false;
        true
    });
}

async fn resync(service: &dyn IdentityService, fallback: &Credentials, state: &watch::Sender<AuthState>) {
    let credentials = state.borrow().credentials_or(fallback);
    match service.get_session(&credentials).await {
        Ok(session) => state.send_modify(|s| {
            match session {
                Some(session) => s.adopt(session),
                None => {
                    s.session = None;
                    s.subject = None;
                }
            }
            s.loading = false;
        }),
        Err(e) => {
            warn!(error = %e, "session fetch failed");
            state.send_modify(|s| {
                s.session = None;
                s.error = Some(e.to_string());
                s.loading = false;
            });
        }
    }
}

#[cfg(test)]
#[path = "auth_state_test.rs"]
mod tests;
