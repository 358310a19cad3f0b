//! Domain services used by the HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own the conversation with the identity service so route
//! handlers can stay focused on forms, cookies and redirects.

pub mod auth;
pub mod auth_state;
