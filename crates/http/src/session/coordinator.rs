//! Single-flight token refresh
//!
//! At most one refresh request is ever in flight. The first caller flips the
//! coordinator to `Refreshing` and performs the network call; callers arriving
//! meanwhile are parked on a oneshot channel. When the call completes the
//! state returns to `Idle` and the queue is drained under the same lock, so
//! every parked caller observes the same outcome.

use super::credentials;
use super::error::RefreshError;
use super::navigator::{Location, Navigator};
use crate::api::AuthApi;
use crate::types::RefreshResponse;
use latch_core::cookies::{REFRESH_TOKEN, ROLE};
use latch_core::{SessionConfig, TokenStore};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

type RefreshOutcome = Result<String, RefreshError>;

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

impl RefreshState {
    const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    fn enqueue(&mut self, waiter: oneshot::Sender<RefreshOutcome>) {
        if let Self::Refreshing { waiters } = self {
            waiters.push(waiter);
        }
    }

    fn into_waiters(self) -> Vec<oneshot::Sender<RefreshOutcome>> {
        match self {
            Self::Idle => Vec::new(),
            Self::Refreshing { waiters } => waiters,
        }
    }
}

/// Settles the queue if the leading caller is dropped mid-refresh, so parked
/// callers never wait forever.
struct InFlight<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl InFlight<'_> {
    fn settle(mut self, outcome: &RefreshOutcome) {
        self.settled = true;
        self.coordinator.settle(outcome);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.coordinator.settle(&Err(RefreshError::Abandoned));
        }
    }
}

pub struct RefreshCoordinator {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
    config: Arc<SessionConfig>,
    state: Mutex<RefreshState>,
}

impl RefreshCoordinator {
    pub fn new(
        api: Arc<dyn AuthApi>,
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
        config: Arc<SessionConfig>,
    ) -> Self {
        Self {
            api,
            store,
            navigator,
            config,
            state: Mutex::new(RefreshState::Idle),
        }
    }

    /// Obtain a fresh access token, joining the in-flight refresh if there is one.
    ///
    /// On failure the session cookies are cleared and the navigator is sent to
    /// the login page. Failures are never retried.
    pub async fn refresh(&self) -> Result<String, RefreshError> {
        // Check and flip in one critical section, before any await.
        let waiter = {
            let mut state = self.lock_state();
            if state.is_idle() {
                *state = RefreshState::Refreshing {
                    waiters: Vec::new(),
                };
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.enqueue(tx);
                Some(rx)
            }
        };

        if let Some(rx) = waiter {
            trace!("Refresh already in flight, waiting for its outcome");
            return rx.await.unwrap_or(Err(RefreshError::Abandoned));
        }

        let in_flight = InFlight {
            coordinator: self,
            settled: false,
        };
        let outcome = self.perform().await;
        in_flight.settle(&outcome);
        outcome
    }

    /// Whether a refresh request is currently in flight
    pub fn is_refreshing(&self) -> bool {
        !self.lock_state().is_idle()
    }

    /// Number of callers parked behind the in-flight refresh
    pub fn pending(&self) -> usize {
        match &*self.lock_state() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { waiters } => waiters.len(),
        }
    }

    async fn perform(&self) -> RefreshOutcome {
        let Some(refresh_token) = self.store.get(REFRESH_TOKEN) else {
            return self.fail(RefreshError::MissingRefreshToken);
        };

        debug!("Refreshing access token");
        match self.api.refresh(&refresh_token).await {
            Ok(RefreshResponse {
                access: Some(access),
                refresh,
            }) if !access.is_empty() => {
                self.persist(&access, refresh.as_deref());
                info!(rotated = refresh.is_some(), "Access token refreshed");
                Ok(access)
            }
            Ok(_) => self.fail(RefreshError::NoAccessToken),
            Err(err) => self.fail(err.into()),
        }
    }

    fn persist(&self, access: &str, rotated: Option<&str>) {
        credentials::write_access_token(self.store.as_ref(), &self.config, access);

        if let Some(refresh) = rotated {
            let lifetime = credentials::refresh_lifetime(
                &self.config,
                credentials::remembered(self.store.as_ref()),
            );
            credentials::write_refresh_token(self.store.as_ref(), &self.config, refresh, lifetime);

            // role mirrors the refresh token's lifetime
            if let Some(role) = self.store.get(ROLE) {
                self.store
                    .set(ROLE, &role, self.config.cookies.options(lifetime));
            }
        }
    }

    fn fail(&self, err: RefreshError) -> RefreshOutcome {
        warn!(error = %err, "Token refresh failed, ending session");
        credentials::clear_session(self.store.as_ref());
        self.navigator
            .redirect(Location::new(self.config.login_path.clone()));
        Err(err)
    }

    fn settle(&self, outcome: &RefreshOutcome) {
        let waiters = std::mem::replace(&mut *self.lock_state(), RefreshState::Idle).into_waiters();
        if !waiters.is_empty() {
            debug!(waiters = waiters.len(), ok = outcome.is_ok(), "Settling queued refresh callers");
        }
        for waiter in waiters {
            // a dropped receiver just means that caller went away
            let _ = waiter.send(outcome.clone());
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockAuthApi;
    use crate::client::error::ClientError;
    use crate::session::navigator::RecordingNavigator;
    use latch_core::cookies::{ACCESS_TOKEN, SESSION_COOKIES, USER_ID};
    use latch_core::testing::token_expiring_in;
    use latch_core::{CookieOptions, MemoryTokenStore};

    struct Harness {
        store: Arc<MemoryTokenStore>,
        navigator: Arc<RecordingNavigator>,
        coordinator: RefreshCoordinator,
    }

    fn harness(api: MockAuthApi) -> Harness {
        let store = Arc::new(MemoryTokenStore::new());
        let navigator = Arc::new(RecordingNavigator::new());
        let coordinator = RefreshCoordinator::new(
            Arc::new(api),
            store.clone(),
            navigator.clone(),
            Arc::new(SessionConfig::default()),
        );
        Harness {
            store,
            navigator,
            coordinator,
        }
    }

    fn seed_session(store: &MemoryTokenStore, remember_me: bool) {
        let refresh = if remember_me {
            CookieOptions::session().expires_in_days(7)
        } else {
            CookieOptions::session()
        };
        store.set(ACCESS_TOKEN, "old-access", CookieOptions::session());
        store.set(REFRESH_TOKEN, "refresh-1", refresh.clone());
        store.set(ROLE, "client", refresh);
        store.set(USER_ID, "5", CookieOptions::session());
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_network() {
        let mut api = MockAuthApi::new();
        api.expect_refresh().never();
        let h = harness(api);

        let result = h.coordinator.refresh().await;

        assert_eq!(result, Err(RefreshError::MissingRefreshToken));
        assert!(!h.coordinator.is_refreshing());
        assert_eq!(
            h.navigator.location().map(|l| l.path),
            Some("/login".to_string())
        );
    }

    #[tokio::test]
    async fn success_writes_new_access_token() {
        let access = token_expiring_in(900);
        let mut api = MockAuthApi::new();
        let returned = access.clone();
        api.expect_refresh()
            .withf(|token| token == "refresh-1")
            .times(1)
            .returning(move |_| {
                Ok(RefreshResponse {
                    access: Some(returned.clone()),
                    refresh: None,
                })
            });
        let h = harness(api);
        seed_session(&h.store, true);

        assert_eq!(h.coordinator.pending(), 0);
        let token = h.coordinator.refresh().await.unwrap();

        assert_eq!(token, access);
        assert_eq!(h.store.get(ACCESS_TOKEN), Some(access));
        assert_eq!(h.store.get(REFRESH_TOKEN).as_deref(), Some("refresh-1"));
        assert_eq!(h.coordinator.pending(), 0);
        assert!(!h.coordinator.is_refreshing());
        assert_eq!(h.navigator.redirects(), 0);
    }

    #[tokio::test]
    async fn rotated_refresh_token_keeps_remember_me_policy() {
        let mut api = MockAuthApi::new();
        api.expect_refresh().times(1).returning(|_| {
            Ok(RefreshResponse {
                access: Some("new-access".to_string()),
                refresh: Some("refresh-2".to_string()),
            })
        });
        let h = harness(api);
        seed_session(&h.store, true);

        h.coordinator.refresh().await.unwrap();

        assert_eq!(h.store.get(REFRESH_TOKEN).as_deref(), Some("refresh-2"));
        assert!(
            h.store
                .options(REFRESH_TOKEN)
                .is_some_and(|o| o.is_persistent())
        );
        assert!(h.store.options(ROLE).is_some_and(|o| o.is_persistent()));
    }

    #[tokio::test]
    async fn rotated_refresh_token_stays_session_scoped() {
        let mut api = MockAuthApi::new();
        api.expect_refresh().times(1).returning(|_| {
            Ok(RefreshResponse {
                access: Some("new-access".to_string()),
                refresh: Some("refresh-2".to_string()),
            })
        });
        let h = harness(api);
        seed_session(&h.store, false);

        h.coordinator.refresh().await.unwrap();

        assert!(
            h.store
                .options(REFRESH_TOKEN)
                .is_some_and(|o| !o.is_persistent())
        );
    }

    #[tokio::test]
    async fn rejection_clears_session_and_redirects() {
        let mut api = MockAuthApi::new();
        api.expect_refresh()
            .times(1)
            .returning(|_| Err(ClientError::BadRequest("token_not_valid".into())));
        let h = harness(api);
        seed_session(&h.store, true);

        let result = h.coordinator.refresh().await;

        assert!(matches!(
            result,
            Err(RefreshError::Rejected { status: 400, .. })
        ));
        for key in SESSION_COOKIES {
            assert_eq!(h.store.get(key), None, "{key} should be cleared");
        }
        assert_eq!(
            h.navigator.location(),
            Some(Location::new("/login"))
        );
    }

    #[tokio::test]
    async fn response_without_access_token_is_fatal() {
        let mut api = MockAuthApi::new();
        api.expect_refresh()
            .times(1)
            .returning(|_| Ok(RefreshResponse::default()));
        let h = harness(api);
        seed_session(&h.store, true);

        assert_eq!(
            h.coordinator.refresh().await,
            Err(RefreshError::NoAccessToken)
        );
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn abandoned_leader_settles_waiters() {
        let h = harness(MockAuthApi::new());
        let (tx, rx) = oneshot::channel();
        {
            let mut state = h.coordinator.lock_state();
            *state = RefreshState::Refreshing { waiters: vec![tx] };
        }

        drop(InFlight {
            coordinator: &h.coordinator,
            settled: false,
        });

        assert_eq!(rx.await.unwrap(), Err(RefreshError::Abandoned));
        assert!(!h.coordinator.is_refreshing());
    }
}
