//! Authentication API client methods

use super::{ClientError, SessionApiClient, send_json, send_status, with_bearer};
use crate::api::AuthApi;
use crate::types::{LoginRequest, LoginResponse, ProfileResponse, RefreshRequest, RefreshResponse};
use async_trait::async_trait;
use reqwest::Method;

#[async_trait]
impl AuthApi for SessionApiClient {
    async fn verify(&self, access_token: &str) -> Result<(), ClientError> {
        let request = self.request(Method::POST, &self.endpoints().verify);
        send_status(with_bearer(request, Some(access_token))).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ClientError> {
        let request = self
            .request(Method::POST, &self.endpoints().refresh)
            .json(&RefreshRequest {
                refresh: refresh_token.to_string(),
            });
        send_json(request).await
    }

    async fn profile(&self, access_token: &str) -> Result<ProfileResponse, ClientError> {
        let request = self.request(Method::GET, &self.endpoints().profile);
        send_json(with_bearer(request, Some(access_token))).await
    }

    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ClientError> {
        let request = self
            .request(Method::POST, &self.endpoints().login)
            .json(request);
        send_json(request).await
    }
}
