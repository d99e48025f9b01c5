use crate::client::error::ClientError;
use crate::types::{LoginRequest, LoginResponse, ProfileResponse, RefreshResponse};
use async_trait::async_trait;

/// The authentication endpoints the session engine depends on.
///
/// Every method is a single attempt with exactly the credential it is given;
/// retry policy lives in the session layer.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Succeeds iff the server accepts `access_token`
    async fn verify(&self, access_token: &str) -> Result<(), ClientError>;

    /// Exchange a refresh token for a new access token
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshResponse, ClientError>;

    /// Fetch the signed-in user's profile
    async fn profile(&self, access_token: &str) -> Result<ProfileResponse, ClientError>;

    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ClientError>;
}
