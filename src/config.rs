use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use url::Url;

pub const DEFAULT_API_URL: &str = "https://api.streamhoster.com/";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Username/password pair guarding the dashboard itself.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct Config {
    /// Pre-encoded token sent as `Authorization: Basic <token>`.
    pub api_token: String,
    pub api_base: Url,
    pub timeout: Duration,
    pub dashboard_auth: Option<Credentials>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("api_token", &"<redacted>")
            .field("api_base", &self.api_base.as_str())
            .field("timeout", &self.timeout)
            .field("dashboard_auth", &self.dashboard_auth)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |k: &str| get(k).filter(|v| !v.trim().is_empty());

        let api_token = var("STREAMHOSTER").context("STREAMHOSTER (API token) must be set")?;

        let mut api_base = var("STREAMHOSTER_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        // Url::join replaces the last segment unless the base ends in '/'.
        if !api_base.ends_with('/') {
            api_base.push('/');
        }
        let api_base =
            Url::parse(&api_base).with_context(|| format!("parse STREAMHOSTER_API_URL {api_base:?}"))?;

        let timeout = match var("STREAMHOSTER_TIMEOUT_SECS") {
            Some(s) => s
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|&n| n > 0)
                .with_context(|| format!("STREAMHOSTER_TIMEOUT_SECS must be a positive integer, got {s:?}"))?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let dashboard_auth = match (var("STREAMHOSTER_USER"), var("STREAMHOSTER_PASS")) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            (None, None) => None,
            _ => {
                return Err(anyhow!(
                    "STREAMHOSTER_USER and STREAMHOSTER_PASS must be set together"
                ));
            }
        };

        Ok(Self {
            api_token,
            api_base,
            timeout: Duration::from_secs(timeout),
            dashboard_auth,
        })
    }
}
