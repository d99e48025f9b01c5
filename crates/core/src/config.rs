//! Session configuration
//!
//! Defaults match the deployed frontend: five minute refresh lookahead, one
//! minute monitor interval and seven day "remember me" sessions. Values can be
//! overridden from a config file and from `LATCH__*` environment variables.

use crate::cookies::{CookieOptions, MAX_COOKIE_DAYS, SameSite};
use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const MAX_MONITOR_INTERVAL_SECS: u64 = 24 * 60 * 60;

/// Endpoint paths, relative to [`SessionConfig::base_url`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub verify: String,
    pub refresh: String,
    pub profile: String,
    pub login: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            verify: "/api/auth/verify/".to_string(),
            refresh: "/api/auth/token/refresh/".to_string(),
            profile: "/api/auth/profile/".to_string(),
            login: "/api/auth/login/".to_string(),
        }
    }
}

/// Attributes every session cookie is written with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CookiePolicy {
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
}

impl CookiePolicy {
    /// Options for a cookie living `expires`, or a session cookie for `None`
    pub fn options(&self, expires: Option<Duration>) -> CookieOptions {
        CookieOptions {
            expires,
            secure: self.secure,
            same_site: self.same_site,
            path: self.path.clone(),
        }
    }
}

impl Default for CookiePolicy {
    fn default() -> Self {
        Self {
            secure: true,
            same_site: SameSite::Strict,
            path: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// API origin, e.g. `https://api.example.com`
    pub base_url: String,

    pub endpoints: Endpoints,

    /// Where fail-closed transitions send the user
    pub login_path: String,

    /// Refresh proactively when the access token expires within this window
    pub refresh_lookahead_secs: u64,

    /// How often the expiration monitor checks the access token
    pub monitor_interval_secs: u64,

    /// Refresh token lifetime when "remember me" is ticked
    pub remember_me_days: u64,

    /// Access cookie lifetime for tokens without a readable `exp` claim
    pub access_token_ttl_minutes: u64,

    /// HTTP request timeout
    pub request_timeout_secs: u64,

    pub cookies: CookiePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            endpoints: Endpoints::default(),
            login_path: "/login".to_string(),
            refresh_lookahead_secs: 5 * 60,
            monitor_interval_secs: 60,
            remember_me_days: 7,
            access_token_ttl_minutes: 60,
            request_timeout_secs: 30,
            cookies: CookiePolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from an optional file, then `LATCH__*` environment
    /// variables (e.g. `LATCH__BASE_URL`, `LATCH__COOKIES__SECURE`)
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// resulting configuration fails [`SessionConfig::validate`]
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("LATCH")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns an error for an unparsable base URL, endpoint paths without a
    /// leading slash, or an interval or lifetime outside its range
    pub fn validate(&self) -> CoreResult<()> {
        url::Url::parse(&self.base_url).map_err(|e| {
            CoreError::invalid_config(format!("base_url {:?}: {e}", self.base_url))
        })?;

        let paths = [
            ("endpoints.verify", &self.endpoints.verify),
            ("endpoints.refresh", &self.endpoints.refresh),
            ("endpoints.profile", &self.endpoints.profile),
            ("endpoints.login", &self.endpoints.login),
            ("login_path", &self.login_path),
        ];
        for (name, path) in paths {
            if !path.starts_with('/') {
                return Err(CoreError::invalid_config(format!(
                    "{name} must start with '/', got {path:?}"
                )));
            }
        }

        let ranges = [
            (
                "monitor_interval_secs",
                self.monitor_interval_secs,
                MAX_MONITOR_INTERVAL_SECS,
            ),
            ("remember_me_days", self.remember_me_days, MAX_COOKIE_DAYS),
            (
                "access_token_ttl_minutes",
                self.access_token_ttl_minutes,
                MAX_COOKIE_DAYS * 24 * 60,
            ),
        ];
        for (name, value, max) in ranges {
            if !(1..=max).contains(&value) {
                return Err(CoreError::invalid_config(format!(
                    "{name} must be between 1 and {max}, got {value}"
                )));
            }
        }

        Ok(())
    }

    pub fn refresh_lookahead(&self) -> chrono::Duration {
        i64::try_from(self.refresh_lookahead_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn remember_me_lifetime(&self) -> Duration {
        Duration::from_secs(self.remember_me_days.saturating_mul(24 * 60 * 60))
    }

    pub fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_minutes.saturating_mul(60))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
