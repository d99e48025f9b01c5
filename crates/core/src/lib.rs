//! Latch core types and utilities
//!
//! Everything in this crate is synchronous and transport-agnostic: the cookie
//! jar abstraction, access token expiry decoding, session configuration and
//! the route guard that turns a resolved [`AuthState`] into a render decision.

pub mod config;
pub mod cookies;
pub mod error;
pub mod guard;
pub mod store;
pub mod token;
pub mod types;

#[cfg(any(test, feature = "tests"))]
pub mod testing;

pub use config::{CookiePolicy, Endpoints, SessionConfig};
pub use cookies::{CookieOptions, SameSite};
pub use error::{CoreError, CoreResult};
pub use guard::{GuardDecision, ProfileView, ProtectedContext, RouteGuard, VerificationPrompt};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use types::{AuthState, Authentication, Role, SessionFacts, UserProfile};
