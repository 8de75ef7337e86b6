//! Identity backend module.
//!
//! This module defines the port every identity provider adapter implements,
//! the pagination walker over its listings, and the shipped adapters.

mod port;
mod types;
mod pager;
mod memory;
mod cognito;
mod credential;

pub use port::{BackendResult, IdentityBackend};
pub use types::{DesiredUser, ObservedUser, UserPage};
pub use pager::UserPager;
pub use memory::{BackendCall, BackendOp, MemoryBackend};
pub use cognito::CognitoBackend;
pub use credential::{generate_temporary_password, TEMPORARY_PASSWORD_LEN};

#[cfg(test)]
pub use port::MockIdentityBackend;
