//! Session failure taxonomy

use crate::client::error::ClientError;
use thiserror::Error;

/// Outcome shared by every caller waiting on one refresh, hence `Clone`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("no refresh token stored")]
    MissingRefreshToken,

    #[error("refresh rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("refresh response carried no access token")]
    NoAccessToken,

    #[error("refresh request failed: {0}")]
    Transport(String),

    /// The task driving the refresh was dropped before it finished
    #[error("refresh abandoned before completion")]
    Abandoned,
}

impl From<ClientError> for RefreshError {
    fn from(err: ClientError) -> Self {
        match err.status() {
            Some(status) => Self::Rejected {
                status,
                message: err.to_string(),
            },
            None => Self::Transport(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no access and refresh token pair stored")]
    MissingCredentials,

    #[error("access token failed verification: {0}")]
    VerificationFailed(ClientError),

    #[error(transparent)]
    RefreshFailed(#[from] RefreshError),

    #[error("profile fetch failed: {0}")]
    ProfileFetchFailed(ClientError),

    #[error("login failed: {0}")]
    LoginFailed(ClientError),
}

impl SessionError {
    /// Classify a profile fetch failure coming out of the request pipeline
    pub(crate) fn from_profile_error(err: ClientError) -> Self {
        match err {
            ClientError::Refresh(err) => Self::RefreshFailed(err),
            other => Self::ProfileFetchFailed(other),
        }
    }
}
