//! Server configuration parsed from environment variables.

use crate::identity::supabase::{DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS, SupabaseConfig};

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {var}")]
    Missing { var: &'static str },
    #[error("invalid {var}: {message}")]
    Invalid { var: &'static str, message: String },
}

/// Which identity service backs the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityBackend {
    Supabase(SupabaseConfig),
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    pub identity: IdentityBackend,
    pub cookie_secure: bool,
}

impl AppConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `PORT`: default 3000
    /// - `IDENTITY_PROVIDER`: `supabase` (default) or `memory`
    /// - `SUPABASE_REQUEST_TIMEOUT_SECS`: default 30
    /// - `SUPABASE_CONNECT_TIMEOUT_SECS`: default 10
    /// - `COOKIE_SECURE`: inferred from `SITE_URL` when unset
    ///
    /// Required for `supabase`:
    /// - `SUPABASE_URL`
    /// - `SUPABASE_ANON_KEY`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a required variable is missing or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// See `from_env`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let port = parse_port(lookup("PORT").as_deref())?;

        let identity = match parse_provider(lookup("IDENTITY_PROVIDER").as_deref())? {
            ProviderKind::Memory => IdentityBackend::Memory,
            ProviderKind::Supabase => {
                let url = required(&lookup, "SUPABASE_URL")?;
                let anon_key = required(&lookup, "SUPABASE_ANON_KEY")?;
                let mut supabase = SupabaseConfig::new(&url, &anon_key);
                supabase.request_timeout_secs =
                    parse_u64_or(lookup("SUPABASE_REQUEST_TIMEOUT_SECS").as_deref(), DEFAULT_REQUEST_TIMEOUT_SECS);
                supabase.connect_timeout_secs =
                    parse_u64_or(lookup("SUPABASE_CONNECT_TIMEOUT_SECS").as_deref(), DEFAULT_CONNECT_TIMEOUT_SECS);
                IdentityBackend::Supabase(supabase)
            }
        };

        let cookie_secure = parse_bool(lookup("COOKIE_SECURE").as_deref())
            .unwrap_or_else(|| lookup("SITE_URL").is_some_and(|url| url.starts_with("https://")));

        Ok(Self { port, identity, cookie_secure })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderKind {
    Supabase,
    Memory,
}

fn required(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<String, ConfigError> {
    lookup(var)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing { var })
}

fn parse_port(raw: Option<&str>) -> Result<u16, ConfigError> {
    match raw {
        None => Ok(DEFAULT_PORT),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var: "PORT", message: format!("not a port number: {raw}") }),
    }
}

fn parse_provider(raw: Option<&str>) -> Result<ProviderKind, ConfigError> {
    match raw.map(str::trim).unwrap_or("supabase") {
        "supabase" => Ok(ProviderKind::Supabase),
        "memory" => Ok(ProviderKind::Memory),
        other => Err(ConfigError::Invalid {
            var: "IDENTITY_PROVIDER",
            message: format!("unknown provider '{other}' (expected 'supabase' or 'memory')"),
        }),
    }
}

fn parse_u64_or(raw: Option<&str>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

/// Parse the usual boolean words. Anything else is treated as unset.
pub(crate) fn parse_bool(raw: Option<&str>) -> Option<bool> {
    raw.and_then(|raw| match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
