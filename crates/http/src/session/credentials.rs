//! Cookie writes for the credential pair, with the expiry policy applied

use chrono::Utc;
use latch_core::cookies::{ACCESS_TOKEN, REFRESH_TOKEN, SESSION_COOKIES};
use latch_core::token::remaining_lifetime;
use latch_core::{SessionConfig, TokenStore};
use std::time::Duration;

/// Write the access token, expiring with its own `exp` claim when readable.
///
/// The configured TTL only applies to tokens without a readable `exp`; an
/// already expired token is written with a zero lifetime.
pub(crate) fn write_access_token(store: &dyn TokenStore, config: &SessionConfig, token: &str) {
    let lifetime = match remaining_lifetime(token, Utc::now()) {
        Some(left) => left.to_std().unwrap_or(Duration::ZERO),
        None => config.access_token_ttl(),
    };
    store.set(ACCESS_TOKEN, token, config.cookies.options(Some(lifetime)));
}

/// Lifetime a refresh token is written with: the "remember me" period, or
/// `None` for a session cookie
pub(crate) fn refresh_lifetime(config: &SessionConfig, remember_me: bool) -> Option<Duration> {
    remember_me.then(|| config.remember_me_lifetime())
}

/// Whether the stored refresh token was written as a persistent cookie
pub(crate) fn remembered(store: &dyn TokenStore) -> bool {
    store
        .options(REFRESH_TOKEN)
        .is_some_and(|options| options.is_persistent())
}

pub(crate) fn write_refresh_token(
    store: &dyn TokenStore,
    config: &SessionConfig,
    token: &str,
    lifetime: Option<Duration>,
) {
    store.set(REFRESH_TOKEN, token, config.cookies.options(lifetime));
}

/// Drop the whole session: access, refresh, role and user id
pub(crate) fn clear_session(store: &dyn TokenStore) {
    store.clear(&SESSION_COOKIES);
}

#[cfg(test)]
mod tests {
    use super::*;
    use latch_core::MemoryTokenStore;
    use latch_core::testing::token_expiring_in;

    #[test]
    fn access_cookie_follows_the_exp_claim() {
        let store = MemoryTokenStore::new();
        let config = SessionConfig::default();

        write_access_token(&store, &config, &token_expiring_in(600));

        let expires = store.options(ACCESS_TOKEN).and_then(|o| o.expires).unwrap();
        assert!(expires <= Duration::from_secs(600));
        assert!(expires > Duration::from_secs(590));
    }

    #[test]
    fn opaque_access_tokens_use_the_configured_ttl() {
        let store = MemoryTokenStore::new();
        let config = SessionConfig::default();

        write_access_token(&store, &config, "opaque");

        assert_eq!(
            store.options(ACCESS_TOKEN).and_then(|o| o.expires),
            Some(config.access_token_ttl())
        );
    }

    #[test]
    fn expired_access_tokens_get_no_fallback_lifetime() {
        let store = MemoryTokenStore::new();
        let config = SessionConfig::default();

        write_access_token(&store, &config, &token_expiring_in(-30));

        assert_eq!(store.get(ACCESS_TOKEN), None);
        assert_eq!(store.options(ACCESS_TOKEN), None);
    }

    #[test]
    fn refresh_persistence_is_remembered() {
        let store = MemoryTokenStore::new();
        let config = SessionConfig::default();

        write_refresh_token(&store, &config, "r1", refresh_lifetime(&config, false));
        assert!(!remembered(&store));

        write_refresh_token(&store, &config, "r2", refresh_lifetime(&config, true));
        assert!(remembered(&store));
        assert_eq!(store.get(REFRESH_TOKEN).as_deref(), Some("r2"));
    }
}
