//! Declarative user store module.
//!
//! This module provides access to the store of record for `User` resources:
//! the interface the reconciler depends on and two implementations.

mod port;
mod types;
mod memory;
mod local;

pub use port::UserStore;
pub use types::{
    ResourceKey, UserPhase, UserResource, UserSpec, UserStatus, DEFAULT_NAMESPACE, USER_FINALIZER,
};
pub use memory::MemoryUserStore;
pub use local::{LocalUserStore, STORE_VERSION};
