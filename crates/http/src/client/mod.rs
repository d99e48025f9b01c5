//! Latch HTTP client

pub mod auth;
pub mod error;

use error::ClientError;
use latch_core::{Endpoints, SessionConfig};
use reqwest::{Client, ClientBuilder, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

const USER_AGENT: &str = concat!("latch-client/", env!("CARGO_PKG_VERSION"));

/// Client for the authentication API.
///
/// Calls made directly on this client never go through the refresh-and-retry
/// pipeline; that is what keeps verify and refresh from recursing into
/// themselves.
#[derive(Clone)]
pub struct SessionApiClient {
    client: Client,
    base_url: String,
    endpoints: Endpoints,
}

impl SessionApiClient {
    /// Create a new client with default configuration
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder().base_url(base_url).build()
    }

    /// Create a client from session configuration
    pub fn from_config(config: &SessionConfig) -> Result<Self, ClientError> {
        Self::builder()
            .base_url(config.base_url.clone())
            .endpoints(config.endpoints.clone())
            .timeout(config.request_timeout())
            .build()
    }

    /// Create a new client builder
    pub fn builder() -> SessionApiClientBuilder {
        SessionApiClientBuilder::default()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Create a request builder without authentication
    pub fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client.request(method, url)
    }

    /// Execute a request and decode a JSON body
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        send_json(request).await
    }
}

/// Attach `token` as a bearer header, if there is one
pub(crate) fn with_bearer(request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
    match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    }
}

/// Send a request and decode the JSON body of a successful response
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
) -> Result<T, ClientError> {
    let response = request.send().await?;
    let status = response.status();

    if status.is_success() {
        Ok(response.json().await?)
    } else {
        let message = response.text().await.unwrap_or_else(|_| status.to_string());
        Err(ClientError::from_status(status, message))
    }
}

/// Send a request where only the status matters
pub(crate) async fn send_status(request: RequestBuilder) -> Result<(), ClientError> {
    let response = request.send().await?;
    let status = response.status();

    if status.is_success() {
        Ok(())
    } else {
        let message = response.text().await.unwrap_or_else(|_| status.to_string());
        Err(ClientError::from_status(status, message))
    }
}

/// Builder for SessionApiClient
#[derive(Default)]
pub struct SessionApiClientBuilder {
    base_url: Option<String>,
    endpoints: Option<Endpoints>,
    timeout: Option<Duration>,
}

impl SessionApiClientBuilder {
    /// Set the base URL
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Override the endpoint paths
    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<SessionApiClient, ClientError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;

        // Ensure base_url ends without a trailing slash
        let base_url = base_url.trim_end_matches('/').to_string();

        let mut client_builder = ClientBuilder::new();

        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }

        client_builder = client_builder.user_agent(USER_AGENT);

        let client = client_builder.build()?;

        Ok(SessionApiClient {
            client,
            base_url,
            endpoints: self.endpoints.unwrap_or_default(),
        })
    }
}
