//! SolarDesign Pro web server.
//!
//! ARCHITECTURE
//! ============
//! - `identity`: the hosted auth/data service behind one trait, plus an
//!   in-process implementation for development and tests.
//! - `services`: the auth façade used per request and the reactive auth state.
//! - `routes`: Axum router, session cookies, pages and the JSON API.
//! - `config` / `state`: environment parsing and shared handler state.

pub mod config;
pub mod identity;
pub mod routes;
pub mod services;
pub mod state;
