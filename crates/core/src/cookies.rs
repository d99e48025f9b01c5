//! Cookie names and write options for the persisted session

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const ACCESS_TOKEN: &str = "accessToken";
pub const REFRESH_TOKEN: &str = "refreshToken";
pub const ROLE: &str = "role";
pub const USER_ID: &str = "userId";
pub const IS_TALENTRISE: &str = "is_talentrise";

/// The four cookies that make up a session. Cleared together on every
/// fail-closed transition.
pub const SESSION_COOKIES: [&str; 4] = [ACCESS_TOKEN, REFRESH_TOKEN, ROLE, USER_ID];

/// Everything login writes, including the optional marker
pub const ALL_COOKIES: [&str; 5] = [ACCESS_TOKEN, REFRESH_TOKEN, ROLE, USER_ID, IS_TALENTRISE];

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Longest lifetime a cookie is kept for, matching the browser cap
pub const MAX_COOKIE_DAYS: u64 = 400;

pub const MAX_COOKIE_LIFETIME: Duration = Duration::from_secs(MAX_COOKIE_DAYS * SECONDS_PER_DAY);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    #[default]
    Strict,
    Lax,
    None,
}

/// Attributes a cookie is written with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieOptions {
    /// Lifetime from the moment of writing; `None` is a session cookie
    pub expires: Option<Duration>,
    pub secure: bool,
    pub same_site: SameSite,
    pub path: String,
}

impl CookieOptions {
    /// Session-scoped cookie, secure, strict same-site, path `/`
    pub fn session() -> Self {
        Self {
            expires: None,
            secure: true,
            same_site: SameSite::Strict,
            path: "/".to_string(),
        }
    }

    #[must_use]
    pub fn expires_in(mut self, lifetime: Duration) -> Self {
        self.expires = Some(lifetime);
        self
    }

    #[must_use]
    pub fn expires_in_days(self, days: u64) -> Self {
        self.expires_in(Duration::from_secs(days.saturating_mul(SECONDS_PER_DAY)))
    }

    /// Replace the lifetime, keeping every other attribute
    #[must_use]
    pub fn with_expiry(mut self, expires: Option<Duration>) -> Self {
        self.expires = expires;
        self
    }

    pub fn is_persistent(&self) -> bool {
        self.expires.is_some()
    }
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self::session()
    }
}
