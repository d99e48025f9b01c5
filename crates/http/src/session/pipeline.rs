//! Bearer attachment and one-shot 401 recovery around the send path

use super::coordinator::RefreshCoordinator;
use crate::client::error::ClientError;
use crate::client::{SessionApiClient, send_json, with_bearer};
use latch_core::TokenStore;
use latch_core::cookies::ACCESS_TOKEN;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;

/// Wraps API calls so they carry the current access token and survive one
/// expired-token rejection.
///
/// A call that comes back 401 is resubmitted exactly once, with the token
/// obtained from [`RefreshCoordinator::refresh`]. A second 401 is returned to
/// the caller as is. The verify and refresh endpoints must not go through
/// here.
#[derive(Clone)]
pub struct RequestPipeline {
    client: SessionApiClient,
    store: Arc<dyn TokenStore>,
    coordinator: Arc<RefreshCoordinator>,
}

impl RequestPipeline {
    pub fn new(
        client: SessionApiClient,
        store: Arc<dyn TokenStore>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            client,
            store,
            coordinator,
        }
    }

    pub fn client(&self) -> &SessionApiClient {
        &self.client
    }

    /// Run `op` with the stored access token, retrying once after a refresh
    /// if the server rejects it.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or [`ClientError::Refresh`] when the
    /// recovery refresh itself fails.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, ClientError>
    where
        F: Fn(Option<String>) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        match op(self.store.get(ACCESS_TOKEN)).await {
            Err(err) if err.is_auth_expired() => {
                debug!("Request rejected with 401, refreshing and retrying once");
                let token = self.coordinator.refresh().await?;
                op(Some(token)).await
            }
            result => result,
        }
    }

    /// Send an arbitrary API request through the pipeline and decode its
    /// JSON body.
    ///
    /// Requests whose body cannot be cloned are sent once, without retry.
    ///
    /// # Errors
    ///
    /// Same as [`RequestPipeline::call`].
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        let Some(retry) = request.try_clone() else {
            trace!("Request body is not cloneable, sending without retry");
            return send_json(with_bearer(request, self.store.get(ACCESS_TOKEN).as_deref())).await;
        };

        let first = with_bearer(request, self.store.get(ACCESS_TOKEN).as_deref());
        match send_json(first).await {
            Err(err) if err.is_auth_expired() => {
                debug!("Request rejected with 401, refreshing and retrying once");
                let token = self.coordinator.refresh().await?;
                send_json(with_bearer(retry, Some(&token))).await
            }
            result => result,
        }
    }
}
