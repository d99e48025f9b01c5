//! Latch HTTP layer
//!
//! A typed client for the verify, refresh, profile and login endpoints, and
//! the session engine built on top of it: a single-flight refresh
//! coordinator, a request pipeline that retries a 401 once after refreshing,
//! an expiration monitor and the auth resolver feeding the route guard.

#[macro_use]
extern crate tracing;

pub mod api;
pub mod client;
pub mod session;
pub mod types;

pub use api::AuthApi;
pub use client::{SessionApiClient, error::ClientError};
pub use session::{
    AuthResolver, ExpirationMonitor, Location, MonitorHandle, Navigator, RecordingNavigator,
    RefreshCoordinator, RefreshError, RequestPipeline, SessionError, SessionManager,
    SessionMount,
};
