// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Userpool Operator
//!
//! A reconciler that keeps an identity-provider user pool in line with
//! declared `User` resources.
//!
//! ## Overview
//!
//! Operators declare user accounts (username, email, enabled flag) as
//! resources in a store. A controller loop drives the pool toward that
//! declaration and reports what it observed back into each resource's status.
//!
//! ## Architecture
//!
//! The system is built around the concept of **desired state reconciliation**:
//!
//! 1. **Desired State**: `User` resources in the declarative store
//! 2. **Observed State**: read from the pool on every pass, never cached
//! 3. **Reconciler**: diffs the two and applies the operations in order
//!
//! A finalizer on each resource guarantees that its pool user is deleted
//! before the resource itself disappears.
//!
//! ## Modules
//!
//! - [`backend`]: Identity backend port, pagination walker, memory and Cognito adapters
//! - [`store`]: Declarative store port with memory and file-backed stores
//! - [`planner`]: Diff computation and plan execution
//! - [`reconciler`]: Single-resource reconciliation and drift checks
//! - [`controller`]: Periodic resync driver with per-key backoff
//! - [`config`]: Configuration and manifest parsing and validation
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: userpool.dev/v1alpha1
//! kind: User
//! metadata:
//!   name: alice
//! spec:
//!   email: alice@example.com
//!   enabled: true
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod backend;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod planner;
pub mod reconciler;
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use backend::{CognitoBackend, IdentityBackend, MemoryBackend, UserPager};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigParser, ConfigValidator, OperatorConfig};
pub use controller::Controller;
pub use error::{OperatorError, Result};
pub use planner::{DiffEngine, PlanExecutor, ReconcilePlan};
pub use reconciler::{DriftReport, ReconcileOutcome, Reconciler};
pub use store::{LocalUserStore, MemoryUserStore, UserStore};
