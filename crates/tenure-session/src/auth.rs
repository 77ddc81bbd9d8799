//! Credential checking.
//!
//! tenure doesn't own a user table. It defines the [`Authenticator`]
//! trait: given a username and password, return the account's profile or
//! an error. Plug in a database lookup, an LDAP bind, or the in-memory
//! [`StaticDirectory`] for demos and tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::SessionError;

/// Public profile of an account, as returned to a client after login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    /// Display name.
    pub name: String,
    pub is_admin: bool,
}

/// Verifies credentials and describes known accounts.
///
/// # Example
///
/// ```rust
/// use tenure_session::{Authenticator, SessionError, UserProfile};
///
/// /// Lets anyone in as a non-admin. Development only.
/// struct OpenDoor;
///
/// impl Authenticator for OpenDoor {
///     async fn authenticate(
///         &self,
///         username: &str,
///         _password: &str,
///     ) -> Result<UserProfile, SessionError> {
///         Ok(UserProfile {
///             username: username.to_string(),
///             name: username.to_string(),
///             is_admin: false,
///         })
///     }
///
///     async fn directory(&self) -> Vec<UserProfile> {
///         Vec::new()
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Checks `password` for `username`.
    ///
    /// # Returns
    /// - `Ok(UserProfile)`: credentials are good
    /// - `Err(SessionError::UnknownAccount)`: no such username
    /// - `Err(SessionError::InvalidCredentials)`: wrong password
    fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<UserProfile, SessionError>> + Send;

    /// Every account this authenticator knows about, sorted by username.
    fn directory(&self) -> impl std::future::Future<Output = Vec<UserProfile>> + Send;
}

/// A fixed, in-memory account table.
///
/// ```rust
/// use tenure_session::StaticDirectory;
///
/// let users = StaticDirectory::new()
///     .with_user("alice", "Alice Liddell", "wonderland", true)
///     .with_user("bob", "Bob", "hunter2", false);
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    users: BTreeMap<String, (UserProfile, String)>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an account, replacing any earlier one with the same username.
    pub fn with_user(
        mut self,
        username: impl Into<String>,
        name: impl Into<String>,
        password: impl Into<String>,
        is_admin: bool,
    ) -> Self {
        let username = username.into();
        let profile = UserProfile {
            username: username.clone(),
            name: name.into(),
            is_admin,
        };
        self.users.insert(username, (profile, password.into()));
        self
    }
}

impl Authenticator for StaticDirectory {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<UserProfile, SessionError> {
        let (profile, expected) = self
            .users
            .get(username)
            .ok_or_else(|| SessionError::UnknownAccount(username.to_string()))?;
        if expected != password {
            return Err(SessionError::InvalidCredentials(username.to_string()));
        }
        Ok(profile.clone())
    }

    async fn directory(&self) -> Vec<UserProfile> {
        self.users.values().map(|(p, _)| p.clone()).collect()
    }
}
