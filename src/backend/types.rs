//! Record types exchanged with identity backends.

use serde::{Deserialize, Serialize};

/// The attributes a backend is asked to converge a user to.
///
/// Built from a User resource's name and spec; `name` is the username in the
/// pool and the join key between the two stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredUser {
    /// Username in the pool.
    pub name: String,
    /// Email address (may be empty).
    pub email: String,
    /// Whether the account should be enabled.
    pub enabled: bool,
}

/// A user as reported by the identity backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedUser {
    /// Username in the pool.
    pub username: String,
    /// Email address (empty if the provider has none).
    pub email: String,
    /// Whether the account is enabled.
    pub enabled: bool,
}

/// One page of a cursor-paged listing.
#[derive(Debug, Clone, Default)]
pub struct UserPage {
    /// Users on this page.
    pub users: Vec<ObservedUser>,
    /// Continuation token for the next page; `None` or empty ends the listing.
    pub next_token: Option<String>,
}

impl DesiredUser {
    /// Creates a desired user.
    #[must_use]
    pub fn new(name: impl Into<String>, email: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            enabled,
        }
    }

    /// Returns the observed record a backend would report once converged.
    #[must_use]
    pub fn to_observed(&self) -> ObservedUser {
        ObservedUser {
            username: self.name.clone(),
            email: self.email.clone(),
            enabled: self.enabled,
        }
    }
}

impl UserPage {
    /// Creates a page.
    #[must_use]
    pub const fn new(users: Vec<ObservedUser>, next_token: Option<String>) -> Self {
        Self { users, next_token }
    }

    /// Returns the continuation token if the listing has more pages.
    #[must_use]
    pub fn continuation(&self) -> Option<&str> {
        self.next_token.as_deref().filter(|t| !t.is_empty())
    }
}

impl std::fmt::Display for ObservedUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = if self.enabled { "enabled" } else { "disabled" };
        write!(f, "{} <{}> ({state})", self.username, self.email)
    }
}
