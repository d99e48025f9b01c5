//! Route guard: turns a resolved [`AuthState`] into a render decision
//!
//! The checks run in a fixed order and the first one that applies wins:
//!
//! 1. still loading: placeholder, no redirect
//! 2. unauthenticated: public profile view, or redirect to login
//! 3. viewing someone else's profile: read-only profile in the viewer's shell
//! 4. role not permitted: redirect to the viewer's homepage
//! 5. email unverified: render with the verification overlay
//! 6. render

use crate::types::{AuthState, Role};
use serde::{Deserialize, Serialize};

/// A `/{role}/profile/{id}/view_profile` path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileView {
    pub role: Role,
    pub user_id: String,
}

impl ProfileView {
    pub fn parse(path: &str) -> Option<Self> {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let mut segments = path.trim_matches('/').split('/');

        let role = segments.next().filter(|s| !s.is_empty())?;
        let user_id = match (segments.next(), segments.next(), segments.next()) {
            (Some("profile"), Some(id), Some("view_profile")) if !id.is_empty() => id,
            _ => return None,
        };
        if segments.next().is_some() {
            return None;
        }

        Some(Self {
            role: Role::new(role),
            user_id: user_id.to_string(),
        })
    }
}

/// What protected content gets to see about the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedContext {
    pub user_id: Option<String>,
    pub role: Option<Role>,
    pub is_authenticated: bool,
    pub is_editable: bool,
    pub is_email_verified: bool,
}

/// Non-blocking email verification overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPrompt {
    Banner,
    CodeEntry,
}

impl VerificationPrompt {
    /// The banner's call to action opens code entry
    #[must_use]
    pub const fn open_code_entry(self) -> Self {
        Self::CodeEntry
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GuardDecision {
    /// Resolution still running
    Placeholder,

    /// Navigate away. `from` carries the attempted location for post-login return.
    Redirect { to: String, from: Option<String> },

    /// Read-only public profile for a visitor without a session
    NotAuthenticatedProfile { user_id: String, role: Role },

    /// Read-only profile of another user, rendered inside the viewer's shell
    OtherProfile {
        shell_role: Role,
        other_profile_role: Role,
        user_id: String,
        context: ProtectedContext,
    },

    Render {
        context: ProtectedContext,
        verification: Option<VerificationPrompt>,
    },
}

#[derive(Debug, Clone)]
pub struct RouteGuard {
    login_path: String,
}

impl RouteGuard {
    pub fn new(login_path: impl Into<String>) -> Self {
        Self {
            login_path: login_path.into(),
        }
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    /// Decide how `path` renders for `state`
    pub fn decide(&self, state: &AuthState, path: &str) -> GuardDecision {
        if state.loading {
            return GuardDecision::Placeholder;
        }

        let profile_view = ProfileView::parse(path);

        if !state.is_authenticated() {
            return match profile_view {
                Some(view) if view.role.is_supported() => GuardDecision::NotAuthenticatedProfile {
                    user_id: view.user_id,
                    role: view.role,
                },
                _ => GuardDecision::Redirect {
                    to: self.login_path.clone(),
                    from: Some(path.to_string()),
                },
            };
        }

        let viewer_role = state.role.clone().unwrap_or_else(|| Role::new(""));

        if let Some(view) = profile_view {
            if state.user_id.as_deref() != Some(view.user_id.as_str()) {
                if !viewer_role.is_supported() {
                    return GuardDecision::Redirect {
                        to: viewer_role.homepage(),
                        from: None,
                    };
                }
                return GuardDecision::OtherProfile {
                    shell_role: viewer_role,
                    other_profile_role: view.role,
                    user_id: view.user_id,
                    context: Self::context(state, false),
                };
            }
        }

        if !state.has_permission {
            return GuardDecision::Redirect {
                to: viewer_role.homepage(),
                from: None,
            };
        }

        GuardDecision::Render {
            context: Self::context(state, true),
            verification: (!state.is_email_verified).then_some(VerificationPrompt::Banner),
        }
    }

    fn context(state: &AuthState, is_editable: bool) -> ProtectedContext {
        ProtectedContext {
            user_id: state.user_id.clone(),
            role: state.role.clone(),
            is_authenticated: state.is_authenticated(),
            is_editable,
            is_email_verified: state.is_email_verified,
        }
    }
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::new("/login")
    }
}
