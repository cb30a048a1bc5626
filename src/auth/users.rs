use subtle::{Choice, ConstantTimeEq};

use super::Role;

/// A login allowed to request tokens.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub username: String,
    pub password: String,
    pub role: Role,
}

impl UserRecord {
    pub fn new(username: &str, password: &str, role: Role) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            role,
        }
    }
}

/// In-memory credential store used by the token endpoint.
#[derive(Debug, Clone)]
pub struct UserDirectory {
    users: Vec<UserRecord>,
}

impl Default for UserDirectory {
    /// The two demo accounts, one per role.
    fn default() -> Self {
        Self::new(vec![
            UserRecord::new("admin", "123", Role::Admin),
            UserRecord::new("user", "123", Role::User),
        ])
    }
}

impl UserDirectory {
    pub fn new(users: Vec<UserRecord>) -> Self {
        Self { users }
    }

    /// Role of the matching account, if the credentials are valid.
    ///
    /// Every record is compared in constant time, so response timing does not
    /// reveal which usernames exist.
    pub fn authenticate(&self, username: &str, password: &str) -> Option<Role> {
        let mut found = None;
        for user in &self.users {
            let matches: Choice = user.username.as_bytes().ct_eq(username.as_bytes())
                & user.password.as_bytes().ct_eq(password.as_bytes());
            if bool::from(matches) {
                found = Some(user.role);
            }
        }
        found
    }
}
