use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Raw roles that authorize as a different logical role.
///
/// The raw value stays available for display; every authorization decision
/// goes through [`Role::effective`].
pub const ROLE_ALIASES: &[(&str, &str)] = &[("student", "freelancer")];

/// Logical roles that own a profile shell
pub const SUPPORTED_ROLES: &[&str] = &["freelancer", "client"];

/// A user role as reported by the profile endpoint or written in a route
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(String);

impl Role {
    pub fn new(role: impl Into<String>) -> Self {
        Self(role.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Logical role used for authorization, after applying [`ROLE_ALIASES`]
    #[must_use]
    pub fn effective(&self) -> Self {
        ROLE_ALIASES
            .iter()
            .find(|(raw, _)| *raw == self.0)
            .map_or_else(|| self.clone(), |(_, logical)| Self::new(*logical))
    }

    /// Whether the logical role has its own profile shell
    pub fn is_supported(&self) -> bool {
        SUPPORTED_ROLES.contains(&self.effective().as_str())
    }

    /// Landing page for users holding this role
    pub fn homepage(&self) -> String {
        format!("/{}/dashboard", self.effective())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(role: &str) -> Self {
        Self::new(role)
    }
}

/// `user` object returned by the profile endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(deserialize_with = "id_from_string_or_number")]
    pub id: String,
    pub role: Role,
    #[serde(default)]
    pub is_profiled: bool,
    #[serde(default)]
    pub is_email_verified: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

fn id_from_string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(id) => id,
        RawId::Number(id) => id.to_string(),
    })
}

/// Facts resolved from one profile fetch. Held in memory only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFacts {
    /// Role exactly as the server reported it
    pub raw_role: Role,
    pub user_id: String,
    pub is_profiled: bool,
    pub is_email_verified: bool,
    pub username: Option<String>,
    pub email: Option<String>,
    pub has_permission: bool,
}

impl SessionFacts {
    /// Derive the facts for a profile, checking its logical role against
    /// `allowed_roles`. `None` means the route has no role restriction.
    pub fn from_profile(profile: UserProfile, allowed_roles: Option<&[Role]>) -> Self {
        let has_permission = permits(&profile.role, allowed_roles);
        Self {
            raw_role: profile.role,
            user_id: profile.id,
            is_profiled: profile.is_profiled,
            is_email_verified: profile.is_email_verified,
            username: profile.username,
            email: profile.email,
            has_permission,
        }
    }

    /// Logical role used for authorization
    pub fn role(&self) -> Role {
        self.raw_role.effective()
    }
}

/// Whether `role` is allowed by an optional allow-set of logical roles
pub fn permits(role: &Role, allowed_roles: Option<&[Role]>) -> bool {
    let effective = role.effective();
    allowed_roles.is_none_or(|allowed| allowed.iter().any(|r| r.effective() == effective))
}

/// Tri-state authentication flag. `Unknown` only while a resolution is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authentication {
    #[default]
    Unknown,
    Unauthenticated,
    Authenticated,
}

/// Snapshot handed to the route guard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    pub is_authenticated: Authentication,
    pub is_profiled: bool,
    /// Logical role (aliases applied)
    pub role: Option<Role>,
    /// Role as reported by the server, for display
    pub raw_role: Option<Role>,
    pub user_id: Option<String>,
    pub loading: bool,
    pub has_permission: bool,
    pub is_email_verified: bool,
    pub username: Option<String>,
    pub email: Option<String>,
}

impl AuthState {
    /// Initial state of every resolution cycle
    pub fn loading() -> Self {
        Self {
            is_authenticated: Authentication::Unknown,
            is_profiled: false,
            role: None,
            raw_role: None,
            user_id: None,
            loading: true,
            has_permission: false,
            is_email_verified: false,
            username: None,
            email: None,
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            is_authenticated: Authentication::Unauthenticated,
            loading: false,
            ..Self::loading()
        }
    }

    pub fn authenticated(facts: SessionFacts) -> Self {
        Self {
            is_authenticated: Authentication::Authenticated,
            is_profiled: facts.is_profiled,
            role: Some(facts.role()),
            raw_role: Some(facts.raw_role),
            user_id: Some(facts.user_id),
            loading: false,
            has_permission: facts.has_permission,
            is_email_verified: facts.is_email_verified,
            username: facts.username,
            email: facts.email,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_authenticated == Authentication::Authenticated
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::loading()
    }
}
