//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor.
//! It holds the identity service handle and cookie policy. Per-request
//! tokens never live here; they travel in each request's `AuthContext`.

use std::sync::Arc;

use crate::config::{AppConfig, IdentityBackend};
use crate::identity::memory::MemoryIdentity;
use crate::identity::supabase::SupabaseIdentity;
use crate::identity::{IdentityError, IdentityService};

/// Clone is required by Axum; the identity handle is Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<dyn IdentityService>,
    /// Mark session cookies `Secure`.
    pub cookie_secure: bool,
}

impl AppState {
    #[must_use]
    pub fn new(identity: Arc<dyn IdentityService>, cookie_secure: bool) -> Self {
        Self { identity, cookie_secure }
    }

    /// Build state for the configured identity backend.
    ///
    /// # Errors
    ///
    /// Returns `IdentityError::HttpClientBuild` if the HTTP client cannot be
    /// constructed.
    pub fn from_config(config: &AppConfig) -> Result<Self, IdentityError> {
        let identity: Arc<dyn IdentityService> = match &config.identity {
            IdentityBackend::Supabase(supabase) => Arc::new(SupabaseIdentity::new(supabase.clone())?),
            IdentityBackend::Memory => Arc::new(MemoryIdentity::new()),
        };
        Ok(Self::new(identity, config.cookie_secure))
    }
}


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
