//! Wiring for the whole session engine

use super::coordinator::RefreshCoordinator;
use super::credentials;
use super::error::{RefreshError, SessionError};
use super::monitor::ExpirationMonitor;
use super::navigator::{Location, Navigator};
use super::pipeline::RequestPipeline;
use super::resolver::{AuthResolver, SessionMount};
use crate::api::AuthApi;
use crate::client::SessionApiClient;
use crate::client::error::ClientError;
use crate::types::{LoginRequest, LoginResponse};
use latch_core::cookies::{ALL_COOKIES, IS_TALENTRISE, ROLE};
use latch_core::{AuthState, GuardDecision, Role, RouteGuard, SessionConfig, TokenStore};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// One process-wide session: a single refresh coordinator shared by the
/// pipeline, the monitor and the resolver.
pub struct SessionManager {
    config: Arc<SessionConfig>,
    store: Arc<dyn TokenStore>,
    navigator: Arc<dyn Navigator>,
    api: Arc<dyn AuthApi>,
    coordinator: Arc<RefreshCoordinator>,
    pipeline: RequestPipeline,
    resolver: Arc<AuthResolver>,
    guard: RouteGuard,
}

impl SessionManager {
    /// Build a manager talking to `config.base_url`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self, ClientError> {
        let client = SessionApiClient::from_config(&config)?;
        let api = Arc::new(client.clone());
        Ok(Self::with_api(config, store, navigator, client, api))
    }

    /// Build a manager whose auth endpoints are served by `api`, while
    /// arbitrary requests still go through `client`
    pub fn with_api(
        config: SessionConfig,
        store: Arc<dyn TokenStore>,
        navigator: Arc<dyn Navigator>,
        client: SessionApiClient,
        api: Arc<dyn AuthApi>,
    ) -> Self {
        let config = Arc::new(config);
        let coordinator = Arc::new(RefreshCoordinator::new(
            api.clone(),
            store.clone(),
            navigator.clone(),
            config.clone(),
        ));
        let pipeline = RequestPipeline::new(client, store.clone(), coordinator.clone());
        let resolver = Arc::new(AuthResolver::new(
            api.clone(),
            store.clone(),
            coordinator.clone(),
            pipeline.clone(),
            config.clone(),
        ));
        let guard = RouteGuard::new(config.login_path.clone());

        Self {
            config,
            store,
            navigator,
            api,
            coordinator,
            pipeline,
            resolver,
            guard,
        }
    }

    /// Sign in and write the session cookies.
    ///
    /// Any previous session is cleared first, so a failed login leaves no
    /// credentials behind.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LoginFailed`] if the server rejects the
    /// credentials or cannot be reached
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        remember_me: bool,
    ) -> Result<LoginResponse, SessionError> {
        self.store.clear(&ALL_COOKIES);

        let request = LoginRequest {
            identifier: identifier.to_string(),
            password: password.to_string(),
            remember_me,
        };
        let response = self
            .api
            .login(&request)
            .await
            .map_err(SessionError::LoginFailed)?;

        let store = self.store.as_ref();
        let lifetime = credentials::refresh_lifetime(&self.config, remember_me);
        credentials::write_access_token(store, &self.config, &response.access);
        credentials::write_refresh_token(store, &self.config, &response.refresh, lifetime);
        store.set(
            ROLE,
            response.role.as_str(),
            self.config.cookies.options(lifetime),
        );
        if let Some(talentrise) = response.is_talentrise {
            store.set(
                IS_TALENTRISE,
                &talentrise.to_string(),
                self.config.cookies.options(lifetime),
            );
        }

        info!(role = %response.role, remember_me, "Logged in");
        Ok(response)
    }

    /// Drop every session cookie and go to the login page
    pub fn logout(&self) {
        self.store.clear(&ALL_COOKIES);
        info!("Logged out");
        self.navigator
            .redirect(Location::new(self.config.login_path.clone()));
    }

    /// Force one coordinated refresh
    ///
    /// # Errors
    ///
    /// Returns the shared refresh outcome on failure; the session has been
    /// ended by then
    pub async fn refresh(&self) -> Result<String, RefreshError> {
        self.coordinator.refresh().await
    }

    pub async fn resolve(&self, allowed_roles: Option<&[Role]>) -> AuthState {
        self.resolver.resolve(allowed_roles).await
    }

    /// Resolve the session and decide how `path` renders, following any
    /// redirect the decision calls for
    pub async fn authorize(&self, path: &str, allowed_roles: Option<&[Role]>) -> GuardDecision {
        let state = self.resolve(allowed_roles).await;
        let decision = self.guard.decide(&state, path);

        if let GuardDecision::Redirect { to, from } = &decision {
            self.navigator.redirect(Location {
                path: to.clone(),
                from: from.clone(),
            });
        }

        decision
    }

    pub fn mount(&self, allowed_roles: Option<Vec<Role>>) -> SessionMount {
        self.resolver.mount(allowed_roles)
    }

    pub fn monitor(&self) -> &ExpirationMonitor {
        self.resolver.monitor()
    }

    /// Request builder for an API path, to be sent with [`SessionManager::execute`]
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.pipeline.client().request(method, path)
    }

    /// Send an arbitrary API request through the refresh-and-retry pipeline
    ///
    /// # Errors
    ///
    /// See [`RequestPipeline::execute`]
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        self.pipeline.execute(request).await
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TokenStore> {
        &self.store
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    pub fn resolver(&self) -> &Arc<AuthResolver> {
        &self.resolver
    }

    pub fn guard(&self) -> &RouteGuard {
        &self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock::MockAuthApi;
    use crate::session::navigator::RecordingNavigator;
    use crate::types::ProfileResponse;
    use latch_core::cookies::{ACCESS_TOKEN, REFRESH_TOKEN, USER_ID};
    use latch_core::testing::token_expiring_in;
    use latch_core::{CookieOptions, MemoryTokenStore, UserProfile};

    fn build(api: MockAuthApi) -> (SessionManager, Arc<MemoryTokenStore>, Arc<RecordingNavigator>) {
        let config = SessionConfig::default();
        let store = Arc::new(MemoryTokenStore::new());
        let navigator = Arc::new(RecordingNavigator::new());
        let client = SessionApiClient::from_config(&config).unwrap();
        let manager = SessionManager::with_api(
            config,
            store.clone(),
            navigator.clone(),
            client,
            Arc::new(api),
        );
        (manager, store, navigator)
    }

    fn login_response(is_talentrise: Option<bool>) -> LoginResponse {
        LoginResponse {
            access: token_expiring_in(3600),
            refresh: "refresh".to_string(),
            role: Role::new("client"),
            is_talentrise,
        }
    }

    #[tokio::test]
    async fn login_writes_the_session_cookies() {
        let mut api = MockAuthApi::new();
        api.expect_login()
            .withf(|req| req.identifier == "ada" && req.remember_me)
            .times(1)
            .returning(|_| Ok(login_response(Some(true))));
        let (manager, store, _) = build(api);

        manager.login("ada", "secret", true).await.unwrap();

        assert!(store.get(ACCESS_TOKEN).is_some());
        assert_eq!(store.get(ROLE).as_deref(), Some("client"));
        assert_eq!(store.get(IS_TALENTRISE).as_deref(), Some("true"));
        let refresh = store.options(REFRESH_TOKEN).unwrap();
        assert_eq!(refresh.expires, Some(manager.config().remember_me_lifetime()));
        assert_eq!(store.options(ROLE).unwrap().expires, refresh.expires);
    }

    #[tokio::test]
    async fn login_without_remember_me_uses_session_cookies() {
        let mut api = MockAuthApi::new();
        api.expect_login()
            .returning(|_| Ok(login_response(None)));
        let (manager, store, _) = build(api);

        manager.login("ada", "secret", false).await.unwrap();

        assert!(!store.options(REFRESH_TOKEN).unwrap().is_persistent());
        assert!(!store.options(ROLE).unwrap().is_persistent());
        assert_eq!(store.get(IS_TALENTRISE), None);
    }

    #[tokio::test]
    async fn failed_login_leaves_no_session() {
        let mut api = MockAuthApi::new();
        api.expect_login()
            .returning(|_| Err(ClientError::AuthenticationFailed("bad credentials".into())));
        let (manager, store, _) = build(api);
        store.set(REFRESH_TOKEN, "stale", CookieOptions::session());

        let result = manager.login("ada", "wrong", false).await;

        assert!(matches!(result, Err(SessionError::LoginFailed(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn logout_clears_everything_and_redirects() {
        let (manager, store, navigator) = build(MockAuthApi::new());
        for key in ALL_COOKIES {
            store.set(key, "x", CookieOptions::session());
        }

        manager.logout();

        assert!(store.is_empty());
        assert_eq!(navigator.location(), Some(Location::new("/login")));
    }

    #[tokio::test]
    async fn authorize_follows_redirects() {
        let mut api = MockAuthApi::new();
        api.expect_verify().never();
        let (manager, _, navigator) = build(api);

        let decision = manager.authorize("/client/dashboard", None).await;

        assert_eq!(
            decision,
            GuardDecision::Redirect {
                to: "/login".to_string(),
                from: Some("/client/dashboard".to_string()),
            }
        );
        assert_eq!(
            navigator.location(),
            Some(Location::new("/login").from_path("/client/dashboard"))
        );
    }

    #[tokio::test]
    async fn authorize_renders_for_a_permitted_user() {
        let mut api = MockAuthApi::new();
        api.expect_verify().returning(|_| Ok(()));
        api.expect_profile().returning(|_| {
            Ok(ProfileResponse {
                user: UserProfile {
                    id: "5".to_string(),
                    role: Role::new("client"),
                    is_profiled: true,
                    is_email_verified: true,
                    username: None,
                    email: None,
                },
            })
        });
        let (manager, store, navigator) = build(api);
        store.set(ACCESS_TOKEN, &token_expiring_in(3600), CookieOptions::session());
        store.set(REFRESH_TOKEN, "refresh", CookieOptions::session());

        let allowed = [Role::new("client")];
        let decision = manager.authorize("/client/dashboard", Some(&allowed)).await;

        assert!(matches!(
            decision,
            GuardDecision::Render {
                verification: None,
                ..
            }
        ));
        assert_eq!(store.get(USER_ID).as_deref(), Some("5"));
        assert_eq!(navigator.redirects(), 0);
    }
}
