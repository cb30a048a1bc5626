//! Bearer-token authentication and role-based access.
//!
//! Tokens are HS256 JWTs issued by `POST /api/v1/auth/token` and checked by
//! [`crate::middleware::AuthLayer`] against a per-route [`AccessPolicy`].

mod token;
mod users;

pub use token::{Claims, JwtKeys, TokenError};
pub use users::{UserDirectory, UserRecord};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role carried in the `role` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    User,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "Admin"),
            Role::User => write!(f, "User"),
        }
    }
}

/// Caller identity established by the auth gate.
///
/// Inserted into request extensions for handlers and into response
/// extensions for the access logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub subject: String,
    pub role: Role,
}

impl From<Claims> for AuthenticatedUser {
    fn from(claims: Claims) -> Self {
        Self {
            subject: claims.sub,
            role: claims.role,
        }
    }
}

/// Who may call a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPolicy {
    /// No credential needed.
    Anonymous,
    /// Any valid token.
    Authenticated,
    /// A valid token whose role is in the list.
    AnyRole(&'static [Role]),
}

impl AccessPolicy {
    /// Routes open to every signed-in role.
    pub const USER_OR_ADMIN: AccessPolicy = AccessPolicy::AnyRole(&[Role::User, Role::Admin]);

    /// Routes restricted to administrators.
    pub const ADMIN_ONLY: AccessPolicy = AccessPolicy::AnyRole(&[Role::Admin]);

    pub fn requires_token(self) -> bool {
        !matches!(self, AccessPolicy::Anonymous)
    }

    pub fn permits(self, role: Role) -> bool {
        match self {
            AccessPolicy::Anonymous | AccessPolicy::Authenticated => true,
            AccessPolicy::AnyRole(roles) => roles.contains(&role),
        }
    }
}
