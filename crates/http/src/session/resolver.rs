//! Turns stored credentials into a resolved [`AuthState`]
//!
//! One resolution cycle goes: credential pair present, proactive refresh if
//! the access token is about to expire, verify (falling back to a reactive
//! refresh), then a profile fetch through the request pipeline. Any failure
//! past the single-retry boundaries ends the session: the cookies are cleared
//! and the cycle yields an unauthenticated state.

use super::coordinator::RefreshCoordinator;
use super::credentials;
use super::error::SessionError;
use super::monitor::{ExpirationMonitor, MonitorHandle};
use super::pipeline::RequestPipeline;
use crate::api::AuthApi;
use crate::client::error::ClientError;
use chrono::Utc;
use latch_core::cookies::{ACCESS_TOKEN, REFRESH_TOKEN, USER_ID};
use latch_core::token::expires_within;
use latch_core::{AuthState, Role, SessionConfig, SessionFacts, TokenStore};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

pub struct AuthResolver {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn TokenStore>,
    coordinator: Arc<RefreshCoordinator>,
    pipeline: RequestPipeline,
    monitor: ExpirationMonitor,
    config: Arc<SessionConfig>,
}

impl AuthResolver {
    pub fn new(
        api: Arc<dyn AuthApi>,
        store: Arc<dyn TokenStore>,
        coordinator: Arc<RefreshCoordinator>,
        pipeline: RequestPipeline,
        config: Arc<SessionConfig>,
    ) -> Self {
        let monitor = ExpirationMonitor::new(store.clone(), coordinator.clone(), &config);
        Self {
            api,
            store,
            coordinator,
            pipeline,
            monitor,
            config,
        }
    }

    pub fn monitor(&self) -> &ExpirationMonitor {
        &self.monitor
    }

    /// Run one resolution cycle. `allowed_roles` of `None` means the route
    /// has no role restriction.
    pub async fn resolve(&self, allowed_roles: Option<&[Role]>) -> AuthState {
        match self.authenticate(allowed_roles).await {
            Ok(facts) => {
                let lifetime = credentials::refresh_lifetime(
                    &self.config,
                    credentials::remembered(self.store.as_ref()),
                );
                self.store.set(
                    USER_ID,
                    &facts.user_id,
                    self.config.cookies.options(lifetime),
                );
                debug!(
                    role = %facts.raw_role,
                    has_permission = facts.has_permission,
                    "Session resolved"
                );
                AuthState::authenticated(facts)
            }
            Err(SessionError::MissingCredentials) => {
                debug!("No stored credentials, session is unauthenticated");
                credentials::clear_session(self.store.as_ref());
                AuthState::unauthenticated()
            }
            Err(err) => {
                warn!(error = %err, "Session resolution failed, clearing credentials");
                credentials::clear_session(self.store.as_ref());
                AuthState::unauthenticated()
            }
        }
    }

    async fn authenticate(
        &self,
        allowed_roles: Option<&[Role]>,
    ) -> Result<SessionFacts, SessionError> {
        let (Some(access), Some(_)) = (self.store.get(ACCESS_TOKEN), self.store.get(REFRESH_TOKEN))
        else {
            return Err(SessionError::MissingCredentials);
        };

        let access = if expires_within(&access, Utc::now(), self.config.refresh_lookahead()) {
            debug!("Access token expires soon, refreshing before verification");
            self.coordinator.refresh().await?
        } else {
            access
        };

        // verify goes straight to the api so a rejection cannot recurse into the pipeline
        if let Err(err) = self.api.verify(&access).await {
            let err = SessionError::VerificationFailed(err);
            debug!(error = %err, "Falling back to a reactive refresh");
            self.coordinator.refresh().await?;
        }

        let response = self
            .pipeline
            .call(|token| {
                let api = Arc::clone(&self.api);
                async move {
                    match token {
                        Some(token) => api.profile(&token).await,
                        None => Err(ClientError::AuthenticationFailed(
                            "no access token stored".into(),
                        )),
                    }
                }
            })
            .await
            .map_err(SessionError::from_profile_error)?;

        Ok(SessionFacts::from_profile(response.user, allowed_roles))
    }

    /// Start a mounted session: publish a loading state, resolve in the
    /// background and keep an expiration monitor running until the mount is
    /// dropped.
    pub fn mount(self: &Arc<Self>, allowed_roles: Option<Vec<Role>>) -> SessionMount {
        let (tx, _) = watch::channel(AuthState::loading());
        let mount = SessionMount {
            resolver: Arc::clone(self),
            state: Arc::new(tx),
            generation: Arc::new(Mutex::new(0)),
            monitor: self.monitor.spawn(),
        };
        mount.start(allowed_roles);
        mount
    }
}

/// A session-dependent view's hold on the resolver.
///
/// Each (re)mount starts a new generation; a cycle only publishes its result
/// if its generation is still current, so results of superseded cycles and
/// cycles outliving the mount are discarded.
pub struct SessionMount {
    resolver: Arc<AuthResolver>,
    state: Arc<watch::Sender<AuthState>>,
    generation: Arc<Mutex<u64>>,
    monitor: MonitorHandle,
}

fn lock(generation: &Mutex<u64>) -> MutexGuard<'_, u64> {
    generation.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionMount {
    fn start(&self, allowed_roles: Option<Vec<Role>>) {
        let current = {
            let mut generation = lock(&self.generation);
            *generation += 1;
            self.state.send_replace(AuthState::loading());
            *generation
        };

        let resolver = Arc::clone(&self.resolver);
        let state = Arc::clone(&self.state);
        let generation = Arc::clone(&self.generation);

        tokio::spawn(async move {
            let resolved = resolver.resolve(allowed_roles.as_deref()).await;
            let latest = lock(&generation);
            if *latest == current {
                state.send_replace(resolved);
            } else {
                debug!(cycle = current, latest = *latest, "Discarding stale resolution");
            }
        });
    }

    /// Re-enter the loading state and resolve again, e.g. after navigating to
    /// a route with different allowed roles
    pub fn remount(&self, allowed_roles: Option<Vec<Role>>) {
        self.start(allowed_roles);
    }

    /// Current snapshot, possibly still loading
    pub fn state(&self) -> AuthState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    /// Wait for the current cycle to finish
    pub async fn resolved(&self) -> AuthState {
        let mut rx = self.state.subscribe();
        let resolved = rx.wait_for(|state| !state.loading).await.map(|state| state.clone());
        resolved.unwrap_or_else(|_| AuthState::unauthenticated())
    }

    pub fn monitor(&self) -> &MonitorHandle {
        &self.monitor
    }
}

impl Drop for SessionMount {
    fn drop(&mut self) {
        *lock(&self.generation) += 1;
        self.monitor.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockAuthApi;
    use crate::client::SessionApiClient;
    use crate::session::navigator::{Location, Navigator, RecordingNavigator};
    use crate::types::{ProfileResponse, RefreshResponse};
    use latch_core::cookies::{ROLE, SESSION_COOKIES};
    use latch_core::testing::token_expiring_in;
    use latch_core::{Authentication, CookieOptions, MemoryTokenStore, UserProfile};

    struct Harness {
        store: Arc<MemoryTokenStore>,
        navigator: Arc<RecordingNavigator>,
        resolver: Arc<AuthResolver>,
    }

    fn harness(api: MockAuthApi) -> Harness {
        let config = Arc::new(SessionConfig::default());
        let api: Arc<dyn AuthApi> = Arc::new(api);
        let store = Arc::new(MemoryTokenStore::new());
        let navigator = Arc::new(RecordingNavigator::new());
        let coordinator = Arc::new(RefreshCoordinator::new(
            api.clone(),
            store.clone(),
            navigator.clone(),
            config.clone(),
        ));
        let client = SessionApiClient::from_config(&config).unwrap();
        let pipeline = RequestPipeline::new(client, store.clone(), coordinator.clone());
        let resolver = Arc::new(AuthResolver::new(
            api,
            store.clone(),
            coordinator,
            pipeline,
            config,
        ));
        Harness {
            store,
            navigator,
            resolver,
        }
    }

    fn seed(store: &MemoryTokenStore, access: &str) {
        store.set(ACCESS_TOKEN, access, CookieOptions::session());
        store.set(REFRESH_TOKEN, "refresh", CookieOptions::session());
        store.set(ROLE, "student", CookieOptions::session());
    }

    fn profile(role: &str, verified: bool) -> ProfileResponse {
        ProfileResponse {
            user: UserProfile {
                id: "5".to_string(),
                role: Role::new(role),
                is_profiled: true,
                is_email_verified: verified,
                username: Some("ada".to_string()),
                email: Some("ada@example.com".to_string()),
            },
        }
    }

    fn refreshed(access: &'static str) -> impl Fn(&str) -> Result<RefreshResponse, ClientError> {
        move |_| {
            Ok(RefreshResponse {
                access: Some(access.to_string()),
                refresh: None,
            })
        }
    }

    #[tokio::test]
    async fn no_cookies_means_no_network() {
        let mut api = MockAuthApi::new();
        api.expect_verify().never();
        api.expect_refresh().never();
        api.expect_profile().never();
        let h = harness(api);

        let state = h.resolver.resolve(None).await;

        assert_eq!(state.is_authenticated, Authentication::Unauthenticated);
        assert!(!state.loading);
    }

    #[tokio::test]
    async fn half_a_pair_is_no_credentials() {
        let mut api = MockAuthApi::new();
        api.expect_verify().never();
        api.expect_refresh().never();
        let h = harness(api);
        h.store.set(REFRESH_TOKEN, "refresh", CookieOptions::session());

        let state = h.resolver.resolve(None).await;

        assert!(!state.is_authenticated());
        assert_eq!(h.store.get(REFRESH_TOKEN), None);
    }

    #[tokio::test]
    async fn student_resolves_as_freelancer() {
        let access = token_expiring_in(3600);
        let mut api = MockAuthApi::new();
        api.expect_verify().times(1).returning(|_| Ok(()));
        api.expect_refresh().never();
        api.expect_profile()
            .times(1)
            .returning(|_| Ok(profile("student", false)));
        let h = harness(api);
        seed(&h.store, &access);

        let allowed = [Role::new("freelancer")];
        let state = h.resolver.resolve(Some(&allowed)).await;

        assert!(state.is_authenticated());
        assert_eq!(state.role, Some(Role::new("freelancer")));
        assert_eq!(state.raw_role, Some(Role::new("student")));
        assert!(state.has_permission);
        assert!(!state.is_email_verified);
        assert_eq!(h.store.get(USER_ID).as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn role_outside_the_allow_set_lacks_permission() {
        let mut api = MockAuthApi::new();
        api.expect_verify().returning(|_| Ok(()));
        api.expect_profile()
            .returning(|_| Ok(profile("client", true)));
        let h = harness(api);
        seed(&h.store, &token_expiring_in(3600));

        let allowed = [Role::new("freelancer")];
        let state = h.resolver.resolve(Some(&allowed)).await;

        assert!(state.is_authenticated());
        assert!(!state.has_permission);
    }

    #[tokio::test]
    async fn expiring_token_is_refreshed_before_verification() {
        let mut api = MockAuthApi::new();
        api.expect_refresh().times(1).returning(refreshed("fresh"));
        api.expect_verify()
            .withf(|token| token == "fresh")
            .times(1)
            .returning(|_| Ok(()));
        api.expect_profile()
            .withf(|token| token == "fresh")
            .times(1)
            .returning(|_| Ok(profile("client", true)));
        let h = harness(api);
        seed(&h.store, &token_expiring_in(60));

        assert!(h.resolver.resolve(None).await.is_authenticated());
    }

    #[tokio::test]
    async fn failed_verification_falls_back_to_refresh() {
        let mut api = MockAuthApi::new();
        api.expect_verify()
            .times(1)
            .returning(|_| Err(ClientError::AuthenticationFailed("invalid".into())));
        api.expect_refresh().times(1).returning(refreshed("fresh"));
        api.expect_profile()
            .withf(|token| token == "fresh")
            .times(1)
            .returning(|_| Ok(profile("client", true)));
        let h = harness(api);
        seed(&h.store, "opaque-but-revoked");

        let state = h.resolver.resolve(None).await;

        assert!(state.is_authenticated());
        assert_eq!(h.store.get(ACCESS_TOKEN).as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn failed_verification_and_refresh_end_the_session() {
        let mut api = MockAuthApi::new();
        api.expect_verify()
            .returning(|_| Err(ClientError::AuthenticationFailed("invalid".into())));
        api.expect_refresh()
            .times(1)
            .returning(|_| Err(ClientError::BadRequest("token_not_valid".into())));
        api.expect_profile().never();
        let h = harness(api);
        seed(&h.store, "revoked");

        let state = h.resolver.resolve(None).await;

        assert!(!state.is_authenticated());
        for key in SESSION_COOKIES {
            assert_eq!(h.store.get(key), None);
        }
        assert_eq!(h.navigator.location(), Some(Location::new("/login")));
    }

    #[tokio::test]
    async fn profile_401_is_retried_once_after_refresh() {
        let mut api = MockAuthApi::new();
        api.expect_verify().returning(|_| Ok(()));
        api.expect_refresh().times(1).returning(refreshed("fresh"));
        api.expect_profile()
            .withf(|token| token == "valid-looking")
            .times(1)
            .returning(|_| Err(ClientError::AuthenticationFailed("expired".into())));
        api.expect_profile()
            .withf(|token| token == "fresh")
            .times(1)
            .returning(|_| Ok(profile("client", true)));
        let h = harness(api);
        seed(&h.store, "valid-looking");

        assert!(h.resolver.resolve(None).await.is_authenticated());
    }

    #[tokio::test]
    async fn profile_still_401_after_refresh_ends_the_session() {
        let mut api = MockAuthApi::new();
        api.expect_verify().returning(|_| Ok(()));
        api.expect_refresh().times(1).returning(refreshed("fresh"));
        api.expect_profile()
            .times(2)
            .returning(|_| Err(ClientError::AuthenticationFailed("expired".into())));
        let h = harness(api);
        seed(&h.store, "valid-looking");
        h.store.set(USER_ID, "5", CookieOptions::session());

        let state = h.resolver.resolve(None).await;

        assert_eq!(state.is_authenticated, Authentication::Unauthenticated);
        assert!(!state.loading);
        for key in SESSION_COOKIES {
            assert_eq!(h.store.get(key), None, "{key} should be cleared");
        }
    }

    #[tokio::test]
    async fn transient_profile_errors_fail_closed() {
        let mut api = MockAuthApi::new();
        api.expect_verify().returning(|_| Ok(()));
        api.expect_refresh().never();
        api.expect_profile().times(1).returning(|_| {
            Err(ClientError::ServerError {
                status: 503,
                message: "unavailable".into(),
            })
        });
        let h = harness(api);
        seed(&h.store, &token_expiring_in(3600));

        let state = h.resolver.resolve(None).await;

        assert!(!state.is_authenticated());
        assert!(h.store.is_empty());
        assert_eq!(h.navigator.redirects(), 0);
    }

    fn authenticating_api() -> MockAuthApi {
        let mut api = MockAuthApi::new();
        api.expect_verify().returning(|_| Ok(()));
        api.expect_profile()
            .returning(|_| Ok(profile("client", true)));
        api
    }

    #[tokio::test]
    async fn mount_starts_loading_then_resolves() {
        let h = harness(authenticating_api());
        seed(&h.store, &token_expiring_in(3600));

        let mount = h.resolver.mount(None);
        assert!(mount.state().loading);

        let state = mount.resolved().await;
        assert!(state.is_authenticated());
        assert_eq!(mount.state(), state);
    }

    #[tokio::test]
    async fn remount_supersedes_the_previous_cycle() {
        let h = harness(authenticating_api());
        seed(&h.store, &token_expiring_in(3600));

        let mount = h.resolver.mount(Some(vec![Role::new("client")]));
        mount.remount(Some(vec![Role::new("freelancer")]));

        let state = mount.resolved().await;
        assert!(state.is_authenticated());
        assert!(!state.has_permission);
    }

    #[tokio::test]
    async fn dropped_mount_discards_in_flight_results() {
        let h = harness(authenticating_api());
        seed(&h.store, &token_expiring_in(3600));

        let mount = h.resolver.mount(None);
        let mut rx = mount.subscribe();
        drop(mount);

        // resolves once every sender, including the in-flight cycle's, is gone
        while rx.changed().await.is_ok() {}
        assert!(rx.borrow().loading);
    }
}
